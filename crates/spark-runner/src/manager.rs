//! # manager 模块说明
//!
//! ## 角色定位（Why）
//! - 组合引擎、配置管理器与组件处理器，向管理面暴露 start/stop/reconfigure/shutdown/status；
//! - 所有变更类操作串行化在同一把命令锁下，避免启停与重配交错；`status` 不取该锁，
//!   读取的都是各自内部同步过的快照，因此不会阻塞在进行中的处理或重配上。
//!
//! ## 契约（What）
//! - 重配采用显式重载：校验通过后在组件锁内调用 `Component::reconfigure`，成功后才替换活动配置与回写；
//! - `shutdown` 是进程生命周期内唯一不可逆的操作：停止引擎（以 `manager_thread_join_timeout` 为界），
//!   然后触发进程级关闭信号；之后的变更操作返回 [`ManagerError::ShutDown`]；
//! - `stop`/`shutdown` 的总耗时（含等待命令锁）都以 `manager_thread_join_timeout` 为界，
//!   重配等待组件锁同样受此约束，超时即以“组件忙”拒绝。

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    config::{ConfigBinding, ConfigError, ConfigManager, ReconfigureOutcome},
    engine::{Engine, EngineOptions, EngineState, StartOutcome, StatsSnapshot, StopOutcome},
    error::{ComponentResolutionError, EngineError},
    processor::Processor,
    registry::ComponentResolver,
    settings::ServiceSettings,
};

/// 启动期装配失败，对进程是致命的。
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Resolution(#[from] ComponentResolutionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BootstrapError {
    pub const fn code(&self) -> &'static str {
        match self {
            BootstrapError::Resolution(err) => err.code(),
            BootstrapError::Config(err) => err.code(),
        }
    }
}

/// 管理命令失败。
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("manager is shut down")]
    ShutDown,
}

impl ManagerError {
    pub const fn code(&self) -> &'static str {
        match self {
            ManagerError::Engine(err) => err.code(),
            ManagerError::Config(err) => err.code(),
            ManagerError::ShutDown => "runner.manager.shut_down",
        }
    }
}

/// 管理命令的应答，同时也是管理面 HTTP 的响应体。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandReply {
    pub message: String,
    pub ok: bool,
}

impl CommandReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ok: true,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ok: false,
        }
    }
}

/// 状态快照中的运行信息。
#[derive(Clone, Debug, Serialize)]
pub struct RunStatus {
    pub component_type: String,
    pub component_id: String,
    pub running: bool,
    pub state: EngineState,
    pub config_epoch: u64,
}

/// `status()` 的完整快照。
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub status: RunStatus,
    pub settings: ServiceSettings,
    pub configs: Value,
    pub stats: StatsSnapshot,
}

/// 进程级关闭信号的等待端。
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// 等待 `shutdown` 被调用；发送端被丢弃时同样返回。
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

/// 运行时编排者。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 管理面可能多线程并发调用；命令锁保证任意时刻至多一个变更操作在执行；
///
/// ## 逻辑 (How)
/// - [`Manager::bootstrap`]：解析组件路径 → 加载配置 → 以配置实例化组件 → 构造引擎；
/// - 变更操作先取命令锁并检查是否已关闭，再委托给引擎或配置管理器；
///
/// ## 契约 (What)
/// - 所有方法均为同步阻塞调用（`stop`/`shutdown` 最长阻塞一个 join 超时），
///   异步调用方应放入 `spawn_blocking`。
pub struct Manager {
    settings: Arc<ServiceSettings>,
    component_path: String,
    engine: Engine,
    config: ConfigManager,
    command_lock: Mutex<()>,
    shut_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl Manager {
    /// 按设置装配组件与引擎；不会启动引擎。
    pub fn bootstrap(
        settings: ServiceSettings,
        resolver: &ComponentResolver,
    ) -> Result<Self, BootstrapError> {
        let descriptor = resolver.resolve(&settings.component_type)?;
        let binding = ConfigBinding::new(descriptor.category(), descriptor.class_id());
        let config = match settings.component_config_path.as_deref() {
            Some(path) => ConfigManager::load(path, binding, descriptor.schema())?,
            None => ConfigManager::from_defaults(binding, descriptor.schema())?,
        };
        let component = descriptor.instantiate(Some(&config.current()))?;
        let processor = Processor::new(descriptor.path(), component);
        let engine = Engine::new(EngineOptions::from_settings(&settings), processor);
        info!(
            component = descriptor.path(),
            component_id = settings.component_id(),
            config = descriptor.schema().type_name(),
            "component loaded"
        );
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            settings: Arc::new(settings),
            component_path: descriptor.path().to_owned(),
            engine,
            config,
            command_lock: Mutex::new(()),
            shut_down: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    pub fn settings(&self) -> &Arc<ServiceSettings> {
        &self.settings
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    pub fn component_path(&self) -> &str {
        &self.component_path
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    pub fn status(&self) -> StatusReport {
        let state = self.engine.state();
        let active = self.config.snapshot();
        StatusReport {
            status: RunStatus {
                component_type: self.settings.component_type.clone(),
                component_id: self.settings.component_id().to_owned(),
                running: state.is_running(),
                state,
                config_epoch: active.epoch(),
            },
            settings: (*self.settings).clone(),
            configs: Value::Object(active.document().clone()),
            stats: self.engine.stats(),
        }
    }

    /// 设置要求自动启动时启动引擎。
    pub fn autostart(&self) -> Result<Option<CommandReply>, ManagerError> {
        if self.settings.engine_autostart {
            self.start().map(Some)
        } else {
            info!("engine autostart disabled");
            Ok(None)
        }
    }

    pub fn start(&self) -> Result<CommandReply, ManagerError> {
        let _guard = self.command_lock.lock();
        self.ensure_alive()?;
        Ok(match self.engine.start()? {
            StartOutcome::Started => CommandReply::ok("engine started"),
            StartOutcome::AlreadyRunning => CommandReply::ok("engine already running"),
        })
    }

    pub fn stop(&self) -> Result<CommandReply, ManagerError> {
        let timeout = self.settings.manager_thread_join_timeout();
        let deadline = Instant::now() + timeout;
        let Some(_guard) = self.command_lock.try_lock_for(timeout) else {
            warn!(timeout_ms = millis(timeout), "stop gave up waiting for a running command");
            return Err(EngineError::StopTimedOut {
                timeout_ms: millis(timeout),
            }
            .into());
        };
        self.ensure_alive()?;
        Ok(stop_reply(self.engine.stop(remaining(deadline))?))
    }

    /// 校验并应用配置更新；组件显式重载成功后才替换与回写。
    pub fn reconfigure(&self, updates: &Value, persist: bool) -> Result<CommandReply, ManagerError> {
        let _guard = self.command_lock.lock();
        self.ensure_alive()?;
        let processor = self.engine.processor();
        let wait = self.settings.manager_thread_join_timeout();
        let outcome = self
            .config
            .reconfigure_with(updates, persist, |config| processor.reload(config, wait))?;
        Ok(match outcome {
            ReconfigureOutcome::NoOp => CommandReply::ok("reconfigure: no-op (empty config data)"),
            ReconfigureOutcome::Applied { epoch, persisted } => {
                info!(epoch, persisted, "component reconfigured");
                CommandReply::ok("reconfigure: ok")
            }
        })
    }

    /// 停止引擎并触发进程级关闭信号；重复调用为空操作。
    ///
    /// 关闭标记与引擎停止信号先于命令锁发出，进行中的命令结束后工作循环即退出；
    /// 等锁与等线程共用同一个 `manager_thread_join_timeout` 预算。
    pub fn shutdown(&self) -> Result<CommandReply, ManagerError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(CommandReply::ok("shutdown already in progress"));
        }
        self.engine.request_stop();

        let timeout = self.settings.manager_thread_join_timeout();
        let deadline = Instant::now() + timeout;
        let guard: Option<MutexGuard<'_, ()>> = self.command_lock.try_lock_for(timeout);
        if guard.is_none() {
            warn!(timeout_ms = millis(timeout), "shutdown proceeding without waiting for a running command");
        }
        let reply = match self.engine.stop(remaining(deadline)) {
            Ok(_) => CommandReply::ok("shutdown initiated"),
            Err(err) => {
                warn!(code = err.code(), error = %err, "engine did not stop cleanly during shutdown");
                CommandReply::warning(format!("shutdown initiated; {err}"))
            }
        };
        drop(guard);
        self.shutdown_tx.send_replace(true);
        info!("shutdown signalled");
        Ok(reply)
    }

    fn ensure_alive(&self) -> Result<(), ManagerError> {
        if self.shut_down.load(Ordering::Acquire) {
            Err(ManagerError::ShutDown)
        } else {
            Ok(())
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn stop_reply(outcome: StopOutcome) -> CommandReply {
    match outcome {
        StopOutcome::Stopped => CommandReply::ok("engine stopped"),
        StopOutcome::NotRunning => CommandReply::ok("engine not running"),
        StopOutcome::InProgress => CommandReply::ok("engine stop already in progress"),
    }
}
