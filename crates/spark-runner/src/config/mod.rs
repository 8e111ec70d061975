//! # config 模块说明
//!
//! ## 角色定位（Why）
//! - 持有当前组件唯一一份“已校验”的配置，支持加载、校验合并与回写源文件；
//! - 工作循环与重配路径共享这份配置，读路径必须永远看到完整一致的快照。
//!
//! ## 实现策略（How）
//! - 活动配置保存在 `ArcSwap<ActiveConfig>` 中：读者 `load_full` 拿到 `Arc` 快照，写者在校验成功后 `swap`；
//! - 所有写操作串行化在同一把互斥锁下，避免两次重配基于同一旧版本各自合并而丢失更新；
//! - 失败路径在任何副作用之前返回，活动配置与源文件保持原样。
//!
//! ## 风险与考量（Trade-offs）
//! - 回写采用“临时文件 + 改名”，中途崩溃最多遗留 `.tmp` 文件，不会写出半个配置；
//! - 回写的是合并后的文档，而不是扁平配置，因此再次加载会得到同一份配置。

pub mod document;

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    component::{ConfigSchema, ValidatedConfig},
    error::{ComponentError, ConfigFileError, ConfigValidationError, FieldViolation},
};

pub use document::ConfigBinding;

/// 配置管理失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),
    #[error(transparent)]
    File(#[from] ConfigFileError),
    /// 组件拒绝了新配置，活动配置未变。
    #[error("component rejected the new configuration: {0}")]
    Rejected(#[source] ComponentError),
    #[error("configuration has no origin file to persist to")]
    NoOrigin,
}

impl ConfigError {
    pub const fn code(&self) -> &'static str {
        match self {
            ConfigError::Validation(err) => err.code(),
            ConfigError::File(err) => err.code(),
            ConfigError::Rejected(_) => "runner.config.rejected",
            ConfigError::NoOrigin => "runner.config.no_origin",
        }
    }

    pub fn violations(&self) -> &[FieldViolation] {
        match self {
            ConfigError::Validation(err) => &err.violations,
            _ => &[],
        }
    }
}

/// 某一时刻生效的配置。
#[derive(Debug)]
pub struct ActiveConfig {
    document: Map<String, Value>,
    config: ValidatedConfig,
    epoch: u64,
}

impl ActiveConfig {
    /// 文档形式（类别 → 类标识 → 条目）。
    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// 规范化、校验后的扁平配置。
    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    /// 每次成功重配加一，初始为 0。
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// 一次重配的结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconfigureOutcome {
    /// 更新内容为空，未做任何改动。
    NoOp,
    Applied { epoch: u64, persisted: bool },
}

/// 活动配置的持有者。
///
/// # 教案式注释
///
/// ## 契约 (What)
/// - `load`：读取并校验文件；文件不存在时以 schema 默认值生成并写出；
/// - `reconfigure`：合并 → 规范化 → 校验 → （可选）回写 → 原子替换；
/// - `snapshot`：无锁读取当前快照，不会阻塞在进行中的重配上。
///
/// ## 前置/后置条件
/// - **前置**：`binding` 与组件注册时的类别、类标识一致；
/// - **后置**：任何返回 `Err` 的重配都不改变 `snapshot()` 的结果与源文件内容。
pub struct ConfigManager {
    origin: Option<PathBuf>,
    binding: ConfigBinding,
    schema: Arc<dyn ConfigSchema>,
    active: ArcSwap<ActiveConfig>,
    write_lock: Mutex<()>,
}

impl ConfigManager {
    /// 从文件加载；文件缺失时写出默认配置。
    pub fn load(
        path: &Path,
        binding: ConfigBinding,
        schema: Arc<dyn ConfigSchema>,
    ) -> Result<Self, ConfigError> {
        let document = if path.exists() {
            let document = document::read(path)?;
            debug!(path = %path.display(), "configuration loaded");
            document
        } else {
            let defaults = schema.default_value()?;
            let document = document::document_from_flat(&binding, &defaults);
            document::write(path, &document)?;
            info!(path = %path.display(), "configuration file missing, wrote defaults");
            document
        };
        Self::from_document(document, binding, schema, Some(path.to_path_buf()))
    }

    /// 不关联文件，以 schema 默认值启动；此时无法回写。
    pub fn from_defaults(
        binding: ConfigBinding,
        schema: Arc<dyn ConfigSchema>,
    ) -> Result<Self, ConfigError> {
        let defaults = schema.default_value()?;
        let document = document::document_from_flat(&binding, &defaults);
        Self::from_document(document, binding, schema, None)
    }

    pub fn from_document(
        document: Map<String, Value>,
        binding: ConfigBinding,
        schema: Arc<dyn ConfigSchema>,
        origin: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        document::check_layout(&document)?;
        let flat = document::flatten_entry(&document, &binding)?;
        let config = schema.validate(&flat)?;
        Ok(Self {
            origin,
            binding,
            schema,
            active: ArcSwap::from_pointee(ActiveConfig {
                document,
                config,
                epoch: 0,
            }),
            write_lock: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Arc<ActiveConfig> {
        self.active.load_full()
    }

    pub fn current(&self) -> ValidatedConfig {
        self.active.load().config.clone()
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    pub fn binding(&self) -> &ConfigBinding {
        &self.binding
    }

    pub fn schema(&self) -> &Arc<dyn ConfigSchema> {
        &self.schema
    }

    /// 合并并校验更新，成功后原子替换。
    pub fn reconfigure(&self, updates: &Value, persist: bool) -> Result<ReconfigureOutcome, ConfigError> {
        self.reconfigure_with(updates, persist, |_| Ok(()))
    }

    /// 与 [`Self::reconfigure`] 相同，但在替换前调用 `apply`，让组件显式重载新配置。
    ///
    /// # 逻辑 (How)
    /// 1. 持写锁，读取当前文档并合并 `updates`；
    /// 2. 校验文档外形、规范化条目、按 schema 校验；失败立即返回；
    /// 3. `persist` 时先读出旧内容（读失败即返回，不做任何写入），再回写文件；
    /// 4. 调用 `apply`；组件拒绝时恢复旧文件并返回 [`ConfigError::Rejected`]；
    /// 5. 原子替换活动配置，`epoch` 加一。
    pub fn reconfigure_with<F>(
        &self,
        updates: &Value,
        persist: bool,
        apply: F,
    ) -> Result<ReconfigureOutcome, ConfigError>
    where
        F: FnOnce(&ValidatedConfig) -> Result<(), ComponentError>,
    {
        let updates = match updates {
            Value::Null => return Ok(ReconfigureOutcome::NoOp),
            Value::Object(map) if map.is_empty() => return Ok(ReconfigureOutcome::NoOp),
            Value::Object(map) => map,
            other => {
                return Err(ConfigValidationError::single(FieldViolation::new(
                    "<update>",
                    "table",
                    crate::component::describe(other),
                ))
                .into());
            }
        };

        let _guard = self.write_lock.lock();
        let current = self.active.load_full();

        let mut merged = current.document.clone();
        document::merge_tables(&mut merged, updates);

        let validated = document::check_layout(&merged)
            .and_then(|()| document::flatten_entry(&merged, &self.binding))
            .and_then(|flat| self.schema.validate(&flat))
            .inspect_err(|err| warn!(code = err.code(), error = %err, "configuration update rejected"))?;

        let rollback = if persist {
            let origin = self.origin.as_deref().ok_or(ConfigError::NoOrigin)?;
            let previous = match fs::read(origin) {
                Ok(bytes) => Some(bytes),
                Err(err) if err.kind() == io::ErrorKind::NotFound => None,
                Err(source) => {
                    return Err(ConfigFileError::Read {
                        path: origin.to_path_buf(),
                        source,
                    }
                    .into());
                }
            };
            document::write(origin, &merged)?;
            Some((origin, previous))
        } else {
            None
        };

        if let Err(err) = apply(&validated) {
            warn!(error = %err, "component refused configuration update");
            match rollback {
                Some((origin, Some(previous))) => document::write_bytes(origin, &previous)?,
                Some((origin, None)) => fs::remove_file(origin).map_err(|source| {
                    ConfigFileError::Write {
                        path: origin.to_path_buf(),
                        source,
                    }
                })?,
                None => {}
            }
            return Err(ConfigError::Rejected(err));
        }

        let epoch = current.epoch + 1;
        self.active.store(Arc::new(ActiveConfig {
            document: merged,
            config: validated,
            epoch,
        }));
        info!(epoch, persisted = persist, "configuration updated");
        Ok(ReconfigureOutcome::Applied {
            epoch,
            persisted: persist,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::component::{
        AUTO_CONFIG, ComponentConfig, FieldKind, FieldSpec, METHOD_TYPE, TypedSchema,
    };

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(default)]
    struct ThresholdConfig {
        method_type: String,
        auto_config: bool,
        threshold: f64,
    }

    impl Default for ThresholdConfig {
        fn default() -> Self {
            Self {
                method_type: "threshold".into(),
                auto_config: false,
                threshold: 0.5,
            }
        }
    }

    impl ComponentConfig for ThresholdConfig {
        const FIELDS: &'static [FieldSpec] = &[
            METHOD_TYPE,
            AUTO_CONFIG,
            FieldSpec::optional(
                "threshold",
                FieldKind::Float {
                    min: Some(0.0),
                    max: Some(1.0),
                },
            ),
        ];
    }

    fn binding() -> ConfigBinding {
        ConfigBinding::new("detectors", "Threshold")
    }

    fn schema() -> Arc<dyn ConfigSchema> {
        Arc::new(TypedSchema::<ThresholdConfig>::new())
    }

    fn threshold(manager: &ConfigManager) -> f64 {
        manager.current().typed::<ThresholdConfig>().unwrap().threshold
    }

    #[test]
    fn missing_file_is_created_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("component.toml");
        let manager = ConfigManager::load(&path, binding(), schema()).unwrap();
        assert!(path.exists(), "缺失的配置文件应以默认值生成");
        assert_eq!(threshold(&manager), 0.5);
        let reloaded = ConfigManager::load(&path, binding(), schema()).unwrap();
        assert_eq!(
            reloaded.current().value(),
            manager.current().value(),
            "重新加载应得到同一配置"
        );
    }

    #[test]
    fn empty_update_is_a_no_op() {
        let manager = ConfigManager::from_defaults(binding(), schema()).unwrap();
        assert_eq!(
            manager.reconfigure(&json!({}), true).unwrap(),
            ReconfigureOutcome::NoOp
        );
        assert_eq!(manager.snapshot().epoch(), 0);
    }

    #[test]
    fn persist_without_origin_is_refused() {
        let manager = ConfigManager::from_defaults(binding(), schema()).unwrap();
        let err = manager
            .reconfigure(&json!({"detectors": {"Threshold": {"params": {"threshold": 0.1}}}}), true)
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoOrigin));
        assert_eq!(threshold(&manager), 0.5, "拒绝后配置不应变化");
    }

    #[test]
    fn component_rejection_restores_file_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("component.toml");
        let manager = ConfigManager::load(&path, binding(), schema()).unwrap();
        let before = fs::read(&path).unwrap();
        let err = manager
            .reconfigure_with(
                &json!({"detectors": {"Threshold": {"params": {"threshold": 0.9}}}}),
                true,
                |_| Err(ComponentError::new("busy")),
            )
            .unwrap_err();
        assert_eq!(err.code(), "runner.config.rejected");
        assert_eq!(fs::read(&path).unwrap(), before, "组件拒绝后文件应恢复原样");
        assert_eq!(threshold(&manager), 0.5);
    }

    #[test]
    fn unreadable_origin_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = schema().default_value().unwrap();
        let document = document::document_from_flat(&binding(), &defaults);
        let manager =
            ConfigManager::from_document(document, binding(), schema(), Some(dir.path().to_path_buf()))
                .unwrap();
        let err = manager
            .reconfigure(&json!({"detectors": {"Threshold": {"params": {"threshold": 0.9}}}}), true)
            .unwrap_err();
        assert_eq!(err.code(), "runner.config.read_failed");
        assert!(dir.path().is_dir(), "读失败时不应写入");
        assert_eq!(threshold(&manager), 0.5);
        assert_eq!(manager.snapshot().epoch(), 0);
    }

    #[test]
    fn rejection_removes_a_file_that_did_not_exist_before() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("component.toml");
        let manager = ConfigManager::load(&path, binding(), schema()).unwrap();
        fs::remove_file(&path).unwrap();
        let err = manager
            .reconfigure_with(
                &json!({"detectors": {"Threshold": {"params": {"threshold": 0.9}}}}),
                true,
                |_| Err(ComponentError::new("busy")),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::Rejected(_)));
        assert!(!path.exists(), "回滚应恢复到文件不存在的状态");
    }

    #[test]
    #[traced_test]
    fn rejected_update_is_logged() {
        let manager = ConfigManager::from_defaults(binding(), schema()).unwrap();
        let err = manager
            .reconfigure(&json!({"detectors": {"Threshold": {"params": {"threshold": 7}}}}), false)
            .unwrap_err();
        assert!(err.violations().iter().any(|v| v.field == "threshold"));
        assert!(logs_contain("configuration update rejected"));
    }
}
