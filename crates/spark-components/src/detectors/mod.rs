//! 检测器：对每条消息给出“告警 / 放行”的判定。
//!
//! 告警以 JSON 对象输出，至少包含 `detector` 字段；未告警的消息被过滤（返回 `None`）。

mod keyword;
mod random;

pub use keyword::{KeywordDetector, KeywordDetectorConfig};
pub use random::{RandomDetector, RandomDetectorConfig};

/// 告警中附带的负载摘要；非 UTF-8 字节以替换字符呈现。
fn preview(payload: &[u8]) -> String {
    const LIMIT: usize = 256;
    let text = String::from_utf8_lossy(payload);
    match text.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.into_owned(),
    }
}

/// 把告警对象编码为字节。
fn encode(alert: &serde_json::Value) -> Result<Vec<u8>, spark_runner::ComponentError> {
    serde_json::to_vec(alert)
        .map_err(|err| spark_runner::ComponentError::new(format!("failed to encode alert: {err}")))
}
