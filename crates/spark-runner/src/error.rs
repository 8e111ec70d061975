//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义运行时对外暴露的错误语义：组件解析、配置校验、引擎生命周期、单条消息处理与单个下游投递；
//! - 每个错误都提供稳定的 `code()`（`runner.<域>.<原因>`），便于管理面与日志检索使用同一标识。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 [`thiserror::Error`]，满足 `Send + Sync + 'static`，可跨线程传播；
//! - 启动期错误（解析、配置文件、设置）对进程是致命的；运行期错误局限于单条消息或单个下游；
//! - 配置校验错误携带全部违规字段，调用方无需查阅日志即可修正请求。

use std::{fmt, io, path::PathBuf};

use serde::Serialize;
use thiserror::Error;

/// 组件在处理或重配时主动报告的失败。
///
/// - **契约 (What)**：仅携带人类可读描述；组件实现通过 [`ComponentError::new`] 构造；
/// - **风险 (Trade-offs)**：不区分可重试与否，运行时统一按“丢弃当前消息”处理。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ComponentError {
    message: String,
}

impl ComponentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn code(&self) -> &'static str {
        "runner.component.failed"
    }
}

/// 单条消息处理失败，包含组件返回的错误与被捕获的 panic。
#[derive(Clone, Debug, Error)]
pub enum ProcessError {
    #[error("component rejected message: {0}")]
    Component(#[from] ComponentError),
    #[error("component panicked while processing message: {message}")]
    Panicked { message: String },
}

impl ProcessError {
    pub const fn code(&self) -> &'static str {
        match self {
            ProcessError::Component(_) => "runner.process.component_failed",
            ProcessError::Panicked { .. } => "runner.process.panicked",
        }
    }
}

/// 单个下游的投递失败。
///
/// - **意图 (Why)**：扇出时每个下游独立计时、独立失败，错误需要标明是哪一个地址；
/// - **契约 (What)**：出错后对应连接已被丢弃，下一次投递会重新拨号。
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("dial `{addr}` failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("write to `{addr}` failed: {source}")]
    Write {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("delivery to `{addr}` exceeded {timeout_ms} ms")]
    TimedOut { addr: String, timeout_ms: u64 },
    #[error("payload of {len} bytes exceeds frame limit {max} for `{addr}`")]
    FrameTooLarge { addr: String, len: usize, max: usize },
}

impl DeliveryError {
    pub const fn code(&self) -> &'static str {
        match self {
            DeliveryError::Dial { .. } => "runner.delivery.dial_failed",
            DeliveryError::Write { .. } => "runner.delivery.write_failed",
            DeliveryError::TimedOut { .. } => "runner.delivery.timeout",
            DeliveryError::FrameTooLarge { .. } => "runner.delivery.frame_too_large",
        }
    }

    /// 失败是否可能在稍后的重拨中恢复。
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::TimedOut { .. } => true,
            DeliveryError::FrameTooLarge { .. } => false,
            DeliveryError::Dial { source, .. } | DeliveryError::Write { source, .. } => {
                is_transient_io(source)
            }
        }
    }
}

fn is_transient_io(error: &io::Error) -> bool {
    use io::ErrorKind;
    matches!(
        error.kind(),
        ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::NotFound
            | ErrorKind::AddrNotAvailable
            | ErrorKind::BrokenPipe
            | ErrorKind::WriteZero
    )
}

/// 引擎生命周期错误。
#[derive(Debug, Error)]
pub enum EngineError {
    /// 上一个工作线程仍在退出过程中。
    #[error("engine is still stopping; the previous worker has not exited yet")]
    AlreadyStarted,
    #[error("engine worker did not exit within {timeout_ms} ms")]
    StopTimedOut { timeout_ms: u64 },
    #[error("failed to bind input channel `{addr}`: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn engine worker: {0}")]
    WorkerSpawn(#[source] io::Error),
}

impl EngineError {
    pub const fn code(&self) -> &'static str {
        match self {
            EngineError::AlreadyStarted => "runner.engine.already_started",
            EngineError::StopTimedOut { .. } => "runner.engine.stop_timeout",
            EngineError::Bind { .. } => "runner.engine.bind_failed",
            EngineError::WorkerSpawn(_) => "runner.engine.worker_spawn_failed",
        }
    }
}

/// 单个字段的校验违规。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub expected: String,
    pub found: String,
}

impl FieldViolation {
    pub fn new(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}`: expected {}, found {}",
            self.field, self.expected, self.found
        )
    }
}

/// 配置未通过组件声明的 schema。
///
/// - **契约 (What)**：`violations` 非空，按发现顺序列出所有违规字段；
/// - **后置条件**：返回该错误时，活动配置与源文件均未被修改。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("configuration rejected: {}", render_violations(.violations))]
pub struct ConfigValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ConfigValidationError {
    pub fn new(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }

    pub fn single(violation: FieldViolation) -> Self {
        Self {
            violations: vec![violation],
        }
    }

    pub const fn code(&self) -> &'static str {
        "runner.config.validation"
    }

    /// 是否包含指定字段的违规。
    pub fn mentions(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn render_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 配置文件读写失败。
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to read `{}`: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse `{}`: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize configuration document: {0}")]
    Serialize(#[source] toml::ser::Error),
    #[error("failed to write `{}`: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConfigFileError {
    pub const fn code(&self) -> &'static str {
        match self {
            ConfigFileError::Read { .. } => "runner.config.read_failed",
            ConfigFileError::Parse { .. } => "runner.config.parse_failed",
            ConfigFileError::Serialize(_) => "runner.config.serialize_failed",
            ConfigFileError::Write { .. } => "runner.config.write_failed",
        }
    }
}

/// 组件必须满足的两项能力契约。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Contract {
    /// 可用可选配置构造，并暴露 `process(bytes) -> optional bytes`。
    Processable,
    /// 配置可从无类型数据校验构造，并序列化回无类型数据。
    ConfigValidatable,
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contract::Processable => f.write_str("Processable"),
            Contract::ConfigValidatable => f.write_str("ConfigValidatable"),
        }
    }
}

/// 组件路径解析失败，或解析结果违反能力契约。
///
/// - **意图 (Why)**：在启动或显式重载阶段拦截错误路径与不合格组件；
/// - **契约 (What)**：对本次加载是致命的，但从不影响已在运行的引擎。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ComponentResolutionError {
    #[error("component path `{path}` is malformed")]
    InvalidPath { path: String },
    #[error("component `{path}` not found (searched: {})", .searched.join(", "))]
    NotFound { path: String, searched: Vec<String> },
    #[error("component name `{name}` is ambiguous: {}", .candidates.join(", "))]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },
    #[error("component `{path}` violates the {contract} contract: {detail}")]
    ContractViolation {
        path: String,
        contract: Contract,
        detail: String,
    },
}

impl ComponentResolutionError {
    pub const fn code(&self) -> &'static str {
        match self {
            ComponentResolutionError::InvalidPath { .. } => "runner.resolve.invalid_path",
            ComponentResolutionError::NotFound { .. } => "runner.resolve.not_found",
            ComponentResolutionError::Ambiguous { .. } => "runner.resolve.ambiguous",
            ComponentResolutionError::ContractViolation { .. } => "runner.resolve.contract",
        }
    }
}

/// 注册表写入失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("component `{path}` already registered")]
    Duplicate { path: String },
    #[error("component path `{path}` is malformed")]
    InvalidPath { path: String },
}

/// 进程设置加载失败。
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings `{}`: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid settings: {0}")]
    Parse(#[source] toml::de::Error),
    #[error("environment variable `{var}` is invalid: {detail}")]
    Env { var: String, detail: String },
    #[error("setting `{field}` has invalid address `{value}`: {reason}")]
    InvalidAddress {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("setting `{field}` is invalid: {detail}")]
    Invalid { field: &'static str, detail: String },
}

impl SettingsError {
    pub const fn code(&self) -> &'static str {
        match self {
            SettingsError::Read { .. } => "runner.settings.read_failed",
            SettingsError::Parse(_) => "runner.settings.parse_failed",
            SettingsError::Env { .. } => "runner.settings.env_invalid",
            SettingsError::InvalidAddress { .. } => "runner.settings.invalid_address",
            SettingsError::Invalid { .. } => "runner.settings.invalid",
        }
    }
}
