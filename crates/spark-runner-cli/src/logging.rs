//! 依据服务设置安装全局 `tracing` 订阅者。
//!
//! - 控制台与文件两个输出层各自可开关，共用同一过滤规则；
//! - 过滤规则优先取 `RUST_LOG`，否则取 `log_level`；
//! - 文件写入 `<log_dir>/<component_type>_<component_id>.log`，追加模式，无 ANSI 转义。

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::Mutex,
};

use anyhow::{Context, Result};
use spark_runner::ServiceSettings;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init(settings: &ServiceSettings) -> Result<()> {
    let console = if settings.log_to_console {
        Some(fmt::layer().with_target(false).with_filter(filter(settings)?))
    } else {
        None
    };

    let file = if settings.log_to_file {
        fs::create_dir_all(&settings.log_dir).with_context(|| {
            format!("failed to create log directory {}", settings.log_dir.display())
        })?;
        let path = log_file_path(settings);
        let sink = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(sink))
                .with_filter(filter(settings)?),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("failed to install tracing subscriber")
}

fn filter(settings: &ServiceSettings) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&settings.log_level)
            .with_context(|| format!("invalid log_level `{}`", settings.log_level)),
    }
}

/// 日志文件路径；组件路径中的点保留，便于按类别检索。
pub fn log_file_path(settings: &ServiceSettings) -> PathBuf {
    settings.log_dir.join(format!(
        "{}_{}.log",
        settings.component_type,
        settings.component_id()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_is_named_after_component() {
        let settings = ServiceSettings {
            component_type: "detectors.RandomDetector".to_owned(),
            component_id: Some("abc123".to_owned()),
            log_dir: PathBuf::from("/var/log/spark"),
            ..ServiceSettings::default()
        }
        .finalize()
        .unwrap();
        assert_eq!(
            log_file_path(&settings),
            PathBuf::from("/var/log/spark/detectors.RandomDetector_abc123.log")
        );
    }
}
