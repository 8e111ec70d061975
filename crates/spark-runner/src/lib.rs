#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = r#"
# spark-runner

## 设计动机（Why）
- **定位**：把单个字节处理组件托管为独立的流水线节点：从一个输入通道收帧、
  交给组件处理、再把结果扇出到若干输出通道。
- **架构角色**：服务进程（`spark-runner-cli`）的全部运行期语义都在本 crate 中；
  具体组件由 `spark-components` 或外部注册表提供，通过点分路径解析。
- **设计理念**：处理循环运行在专属线程上，管理面只通过锁与原子量与之交互；
  配置校验先于任何副作用，失败的重配不会留下半应用状态。

## 核心契约（What）
- [`settings`]：服务设置的加载、环境变量覆盖与校验；
- [`component`] / [`registry`]：组件契约、配置 schema 与两级解析；
- [`config`]：组件配置文档的读取、合并、校验、热替换与回写；
- [`transport`]：长度前缀帧的输入/输出通道（TCP 与 Unix 套接字）；
- [`engine`] / [`processor`]：处理线程的生命周期与逐消息的失败隔离；
- [`manager`] / [`admin`]：命令编排与 HTTP 管理面；
- [`telemetry`]：以 Prometheus 文本格式导出的引擎指标。

## 实现策略（How）
- **执行框架**：引擎线程内运行单线程 Tokio 运行时；管理面运行在宿主的多线程运行时；
- **热更新**：活动配置保存在 `ArcSwap` 中，读路径无锁；
- **错误分类**：所有错误类型都提供 `code()`，返回 `runner.<域>.<原因>` 形式的稳定错误码。

## 风险与考量（Trade-offs）
- 停止引擎依赖工作线程自愿退出；组件长时间阻塞时 `stop` 会超时并保留 `Stopping` 状态，
  直到线程真正退出后才允许再次启动。
"#]

pub mod admin;
pub mod component;
pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod processor;
pub mod registry;
pub mod settings;
pub mod telemetry;
pub mod transport;

pub use component::{
    Component, ComponentConfig, ConfigSchema, FieldKind, FieldSpec, TypedSchema, ValidatedConfig,
};
pub use config::{ConfigBinding, ConfigError, ConfigManager, ReconfigureOutcome};
pub use engine::{Engine, EngineOptions, EngineState, StartOutcome, StatsSnapshot, StopOutcome};
pub use error::{
    ComponentError, ComponentResolutionError, ConfigValidationError, EngineError, FieldViolation,
    RegistrationError, SettingsError,
};
pub use manager::{BootstrapError, CommandReply, Manager, ManagerError, StatusReport};
pub use processor::Processor;
pub use registry::{BUNDLED_NAMESPACE, ComponentDescriptor, ComponentRegistry, ComponentResolver};
pub use settings::ServiceSettings;
pub use transport::{ChannelAddr, InputChannel, OutputChannel};
