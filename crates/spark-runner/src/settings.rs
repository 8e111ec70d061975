//! # settings 模块说明
//!
//! ## 意图（Why）
//! - 进程级设置在启动时一次性构造，之后只读，并以 `Arc` 传递给需要它的组件，而不是作为全局状态；
//! - 分层来源：TOML 文件打底，`SPARK_RUNNER_*` 环境变量覆盖，最后统一校验。
//!
//! ## 契约（What）
//! - 未知键（文件或环境中）一律拒绝；
//! - 地址字段只接受 `tcp://` 与 `ipc://`；
//! - `component_id` 未显式给出时按 UUIDv5 派生，重启后保持稳定。

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::SettingsError, transport::ChannelAddr};

/// 环境变量前缀。
pub const ENV_PREFIX: &str = "SPARK_RUNNER_";

const DEFAULT_ENGINE_SOCKET: &str = "/tmp/spark-runner.engine.ipc";
const DEFAULT_COMPONENT_TYPE: &str = "core.Passthrough";
const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// 进程级服务设置。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 汇总引擎、组件与管理面所需的全部参数，并在构造完成后冻结；
///
/// ## 逻辑 (How)
/// - 通过 [`ServiceSettings::load`] 读取文件与环境变量，经 `serde` 反序列化（`deny_unknown_fields`）；
/// - [`ServiceSettings::finalize`] 校验数值范围并派生 `component_id`。
///
/// ## 契约 (What)
/// - 所有超时以毫秒表示，且必须大于 0；
/// - `out_addr` 可以为空，此时组件输出被计算后直接丢弃。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceSettings {
    pub component_name: Option<String>,
    pub component_id: Option<String>,
    pub component_type: String,
    pub component_config_path: Option<PathBuf>,

    pub log_dir: PathBuf,
    pub log_to_console: bool,
    pub log_to_file: bool,
    pub log_level: String,

    pub engine_addr: ChannelAddr,
    pub out_addr: Vec<ChannelAddr>,
    pub engine_autostart: bool,
    pub engine_recv_timeout_ms: u64,
    pub out_dial_timeout_ms: u64,
    pub manager_thread_join_timeout_ms: u64,
    pub max_frame_len: usize,

    pub http_host: String,
    pub http_port: u16,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            component_name: None,
            component_id: None,
            component_type: DEFAULT_COMPONENT_TYPE.to_owned(),
            component_config_path: None,
            log_dir: PathBuf::from("./logs"),
            log_to_console: true,
            log_to_file: false,
            log_level: "info".to_owned(),
            engine_addr: ChannelAddr::ipc(DEFAULT_ENGINE_SOCKET),
            out_addr: Vec::new(),
            engine_autostart: true,
            engine_recv_timeout_ms: 100,
            out_dial_timeout_ms: 1000,
            manager_thread_join_timeout_ms: 1000,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            http_host: "127.0.0.1".to_owned(),
            http_port: 8000,
        }
    }
}

#[derive(Clone, Copy)]
enum EnvKind {
    Text,
    Bool,
    Integer,
    List,
}

/// 可被环境变量覆盖的字段及其取值形态。
const ENV_FIELDS: &[(&str, EnvKind)] = &[
    ("component_name", EnvKind::Text),
    ("component_id", EnvKind::Text),
    ("component_type", EnvKind::Text),
    ("component_config_path", EnvKind::Text),
    ("log_dir", EnvKind::Text),
    ("log_to_console", EnvKind::Bool),
    ("log_to_file", EnvKind::Bool),
    ("log_level", EnvKind::Text),
    ("engine_addr", EnvKind::Text),
    ("out_addr", EnvKind::List),
    ("engine_autostart", EnvKind::Bool),
    ("engine_recv_timeout_ms", EnvKind::Integer),
    ("out_dial_timeout_ms", EnvKind::Integer),
    ("manager_thread_join_timeout_ms", EnvKind::Integer),
    ("max_frame_len", EnvKind::Integer),
    ("http_host", EnvKind::Text),
    ("http_port", EnvKind::Integer),
];

impl ServiceSettings {
    /// 从可选的设置文件与当前进程环境构造设置。
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_with_env(path, std::env::vars())
    }

    /// 与 [`Self::load`] 相同，但环境变量由调用方提供，便于测试隔离。
    pub fn load_with_env<I>(path: Option<&Path>, env: I) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut table = match path {
            Some(path) => {
                let raw =
                    std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
                        path: path.to_path_buf(),
                        source,
                    })?;
                raw.parse::<toml::Table>().map_err(SettingsError::Parse)?
            }
            None => toml::Table::new(),
        };
        apply_env(&mut table, env)?;
        let settings: ServiceSettings = toml::Value::Table(table)
            .try_into()
            .map_err(SettingsError::Parse)?;
        settings.finalize()
    }

    /// 校验取值并补全派生字段。
    pub fn finalize(mut self) -> Result<Self, SettingsError> {
        for (field, value) in [
            ("engine_recv_timeout_ms", self.engine_recv_timeout_ms),
            ("out_dial_timeout_ms", self.out_dial_timeout_ms),
            ("manager_thread_join_timeout_ms", self.manager_thread_join_timeout_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::Invalid {
                    field,
                    detail: "must be greater than 0".to_owned(),
                });
            }
        }
        if self.max_frame_len == 0 || self.max_frame_len > u32::MAX as usize {
            return Err(SettingsError::Invalid {
                field: "max_frame_len",
                detail: format!("must be within 1..={}", u32::MAX),
            });
        }
        if self.component_type.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "component_type",
                detail: "must not be empty".to_owned(),
            });
        }
        if self.out_addr.contains(&self.engine_addr) {
            return Err(SettingsError::InvalidAddress {
                field: "out_addr",
                value: self.engine_addr.to_string(),
                reason: "output must differ from engine_addr".to_owned(),
            });
        }
        if self.component_id.as_deref().is_none_or(str::is_empty) {
            self.component_id = Some(self.derive_component_id());
        }
        Ok(self)
    }

    fn derive_component_id(&self) -> String {
        let seed = match self.component_name.as_deref().filter(|name| !name.is_empty()) {
            Some(name) => format!("spark-runner/{}/{}", self.component_type, name),
            None => format!("spark-runner/{}|{}", self.component_type, self.engine_addr),
        };
        Uuid::new_v5(&Uuid::NAMESPACE_URL, seed.as_bytes())
            .simple()
            .to_string()
    }

    /// 已派生的组件标识；`finalize` 之后必然存在。
    pub fn component_id(&self) -> &str {
        self.component_id.as_deref().unwrap_or_default()
    }

    pub fn engine_recv_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_recv_timeout_ms)
    }

    pub fn out_dial_timeout(&self) -> Duration {
        Duration::from_millis(self.out_dial_timeout_ms)
    }

    pub fn manager_thread_join_timeout(&self) -> Duration {
        Duration::from_millis(self.manager_thread_join_timeout_ms)
    }

    /// 管理面监听地址（`host:port`）。
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

fn apply_env<I>(table: &mut toml::Table, env: I) -> Result<(), SettingsError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (var, raw) in env {
        let Some(suffix) = var.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key = suffix.to_ascii_lowercase();
        let Some((field, kind)) = ENV_FIELDS.iter().find(|(name, _)| *name == key) else {
            return Err(SettingsError::Env {
                var,
                detail: "unknown setting".to_owned(),
            });
        };
        let value = match kind {
            EnvKind::Text => toml::Value::String(raw),
            EnvKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => toml::Value::Boolean(true),
                "0" | "false" | "no" | "off" => toml::Value::Boolean(false),
                other => {
                    return Err(SettingsError::Env {
                        var,
                        detail: format!("expected a boolean, found `{other}`"),
                    });
                }
            },
            EnvKind::Integer => match raw.trim().parse::<i64>() {
                Ok(value) => toml::Value::Integer(value),
                Err(err) => {
                    return Err(SettingsError::Env {
                        var,
                        detail: format!("expected an integer: {err}"),
                    });
                }
            },
            EnvKind::List => toml::Value::Array(
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| toml::Value::String(item.to_owned()))
                    .collect(),
            ),
        };
        table.insert((*field).to_owned(), value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn defaults_derive_a_stable_component_id() {
        let a = ServiceSettings::load_with_env(None, Vec::new()).unwrap();
        let b = ServiceSettings::load_with_env(None, Vec::new()).unwrap();
        assert_eq!(a.component_id(), b.component_id(), "派生标识应在重启间保持稳定");
        assert_eq!(a.component_type, "core.Passthrough");
        assert_eq!(a.engine_addr.to_string(), "ipc:///tmp/spark-runner.engine.ipc");
        assert_eq!(a.engine_recv_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "component_name = \"d1\"\nengine_addr = \"tcp://127.0.0.1:7001\"\nhttp_port = 9000\n",
        )
        .unwrap();
        let settings = ServiceSettings::load_with_env(
            Some(&path),
            env(&[
                ("SPARK_RUNNER_HTTP_PORT", "9100"),
                ("SPARK_RUNNER_OUT_ADDR", "tcp://127.0.0.1:7002, ipc:///tmp/out.ipc"),
                ("SPARK_RUNNER_ENGINE_AUTOSTART", "false"),
                ("UNRELATED", "ignored"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.http_port, 9100);
        assert!(!settings.engine_autostart);
        assert_eq!(
            settings.out_addr,
            vec![
                ChannelAddr::tcp("127.0.0.1:7002"),
                ChannelAddr::ipc("/tmp/out.ipc")
            ]
        );
        assert_eq!(settings.component_name.as_deref(), Some("d1"));
    }

    #[test]
    fn invalid_scheme_and_unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "out_addr = [\"udp://127.0.0.1:9\"]\n").unwrap();
        let err = ServiceSettings::load_with_env(Some(&path), Vec::new()).unwrap_err();
        assert_eq!(err.code(), "runner.settings.parse_failed");

        std::fs::write(&path, "no_such_field = 1\n").unwrap();
        assert!(ServiceSettings::load_with_env(Some(&path), Vec::new()).is_err());

        let err =
            ServiceSettings::load_with_env(None, env(&[("SPARK_RUNNER_BOGUS", "1")])).unwrap_err();
        assert_eq!(err.code(), "runner.settings.env_invalid");
    }

    #[test]
    fn zero_timeouts_fail_validation() {
        let err = ServiceSettings::load_with_env(
            None,
            env(&[("SPARK_RUNNER_ENGINE_RECV_TIMEOUT_MS", "0")]),
        )
        .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { field: "engine_recv_timeout_ms", .. }));
    }
}
