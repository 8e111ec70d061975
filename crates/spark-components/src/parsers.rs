//! 解析器：把原始文本行转换为结构化记录。

use serde::{Deserialize, Serialize};
use serde_json::json;
use spark_runner::{
    Component, ComponentConfig, ComponentError, FieldKind, FieldSpec, FieldViolation,
    ValidatedConfig,
    component::{AUTO_CONFIG, METHOD_TYPE},
};

/// `parsers.LineParser` 的配置。
///
/// - `delimiter`：分隔符，不能为空；单个空格表示按任意空白切分；
/// - `max_tokens`：最多切出的片段数，最后一段保留剩余内容；缺省不限；
/// - `keep_empty`：是否保留相邻分隔符之间的空片段。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineParserConfig {
    pub method_type: String,
    pub auto_config: bool,
    pub delimiter: String,
    pub max_tokens: Option<usize>,
    pub keep_empty: bool,
}

impl Default for LineParserConfig {
    fn default() -> Self {
        Self {
            method_type: "line_parser".to_owned(),
            auto_config: false,
            delimiter: " ".to_owned(),
            max_tokens: None,
            keep_empty: false,
        }
    }
}

impl ComponentConfig for LineParserConfig {
    const FIELDS: &'static [FieldSpec] = &[
        METHOD_TYPE,
        AUTO_CONFIG,
        FieldSpec::optional("delimiter", FieldKind::String),
        FieldSpec::optional(
            "max_tokens",
            FieldKind::Integer {
                min: Some(1),
                max: None,
            },
        ),
        FieldSpec::optional("keep_empty", FieldKind::Bool),
    ];

    fn check(&self) -> Result<(), Vec<FieldViolation>> {
        if self.delimiter.is_empty() {
            Err(vec![FieldViolation::new(
                "delimiter",
                "non-empty string",
                "empty string",
            )])
        } else {
            Ok(())
        }
    }
}

/// 行解析器。
///
/// # 契约 (What)
/// - 输入必须是 UTF-8，否则该消息失败（不影响后续消息）；
/// - 行尾的 `\r\n`/`\n` 被去除；去除后为空白的行被过滤；
/// - 输出 `{"tokens": [...], "count": n}`。
pub struct LineParser {
    config: LineParserConfig,
}

impl LineParser {
    pub fn new(config: Option<&LineParserConfig>) -> Self {
        Self {
            config: config.cloned().unwrap_or_default(),
        }
    }

    fn tokenize<'a>(&self, line: &'a str) -> Vec<&'a str> {
        let limit = self.config.max_tokens.unwrap_or(usize::MAX);
        let tokens: Vec<&str> = if self.config.delimiter == " " {
            split_whitespace_limited(line, limit)
        } else {
            line.splitn(limit, self.config.delimiter.as_str()).collect()
        };
        if self.config.keep_empty {
            tokens
        } else {
            tokens.into_iter().filter(|t| !t.is_empty()).collect()
        }
    }
}

fn split_whitespace_limited(line: &str, limit: usize) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = line.trim_start();
    while !rest.is_empty() {
        if tokens.len() + 1 == limit {
            tokens.push(rest.trim_end());
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                tokens.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                tokens.push(rest);
                break;
            }
        }
    }
    tokens
}

impl Component for LineParser {
    fn process(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ComponentError> {
        let text = std::str::from_utf8(payload)
            .map_err(|err| ComponentError::new(format!("payload is not valid UTF-8: {err}")))?;
        let line = text.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(None);
        }
        let tokens = self.tokenize(line);
        let record = json!({ "tokens": tokens, "count": tokens.len() });
        serde_json::to_vec(&record)
            .map(Some)
            .map_err(|err| ComponentError::new(format!("failed to encode record: {err}")))
    }

    fn reconfigure(&mut self, config: &ValidatedConfig) -> Result<(), ComponentError> {
        let config = config
            .typed::<LineParserConfig>()
            .ok_or_else(|| ComponentError::new("expected LineParserConfig"))?;
        self.config = (*config).clone();
        Ok(())
    }
}
