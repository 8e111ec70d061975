//! # registry 模块说明
//!
//! ## 意图（Why）
//! - 以静态注册表取代运行期按路径动态导入：每个组件在初始化时登记“路径 → 工厂 + 配置 schema”；
//! - 两级解析：先查内置组件库，再查应用自带的外部注册表，短名称仍可直接定位内置组件。
//!
//! ## 契约（What）
//! - 路径为点分形式（`detectors.RandomDetector`），首段为类别，末段为类标识；
//! - 不含点的裸类名在两级注册表中按类标识搜索，命中多个时报歧义；
//! - 加载（[`ComponentDescriptor::instantiate`]）时再校验两项能力契约，失败只影响本次加载。

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    component::{Component, ComponentConfig, ConfigSchema, TypedSchema, ValidatedConfig},
    error::{ComponentError, ComponentResolutionError, Contract, RegistrationError},
};

/// 内置组件库的命名空间前缀；带此前缀的路径只在内置注册表中查找。
pub const BUNDLED_NAMESPACE: &str = "spark_components";

const TIER_BUNDLED: &str = "bundled";
const TIER_EXTERNAL: &str = "external";

type FactoryFn =
    dyn Fn(Option<&ValidatedConfig>) -> Result<Box<dyn Component>, ComponentError> + Send + Sync;

/// 注册表中的一个组件条目。
///
/// # 教案级注释
/// - **意图 (Why)**：把“如何构造组件”与“如何校验其配置”绑定在同一条目中，
///   解析路径后即可同时拿到两项能力；
/// - **契约 (What)**：`factory` 接受可选配置（`None` 表示无配置启动）；
///   `schema` 为组件配置的类型擦除；`category`/`class_id` 决定配置文档中的定位；
/// - **风险提示 (Trade-offs)**：工厂以 `Arc<dyn Fn>` 保存，条目可廉价克隆，但无法在运行期替换实现。
#[derive(Clone)]
pub struct ComponentDescriptor {
    path: String,
    category: String,
    class_id: String,
    factory: Arc<FactoryFn>,
    schema: Arc<dyn ConfigSchema>,
}

impl ComponentDescriptor {
    /// 以强类型配置登记组件。
    ///
    /// `factory` 收到的是已通过校验的强类型配置。
    pub fn typed<C, K, F>(path: &str, factory: F) -> Result<Self, RegistrationError>
    where
        C: ComponentConfig,
        K: Component,
        F: Fn(Option<&C>) -> Result<K, ComponentError> + Send + Sync + 'static,
    {
        let (category, class_id) = split_path(path)?;
        let erased = move |config: Option<&ValidatedConfig>| {
            let typed = match config {
                Some(config) => Some(config.typed::<C>().ok_or_else(|| {
                    ComponentError::new(format!(
                        "expected {} configuration, got {}",
                        std::any::type_name::<C>(),
                        config.type_name()
                    ))
                })?),
                None => None,
            };
            factory(typed.as_deref()).map(|component| Box::new(component) as Box<dyn Component>)
        };
        Ok(Self {
            path: path.to_owned(),
            category,
            class_id,
            factory: Arc::new(erased),
            schema: Arc::new(TypedSchema::<C>::new()),
        })
    }

    /// 覆盖默认类别（路径首段）。
    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn schema(&self) -> Arc<dyn ConfigSchema> {
        Arc::clone(&self.schema)
    }

    /// 校验能力契约并构造组件实例。
    ///
    /// - `ConfigValidatable`：schema 的默认值必须能通过自身校验；
    /// - `Processable`：工厂必须能以给定配置构造出实例。
    pub fn instantiate(
        &self,
        config: Option<&ValidatedConfig>,
    ) -> Result<Box<dyn Component>, ComponentResolutionError> {
        self.schema
            .default_value()
            .and_then(|defaults| self.schema.validate(&defaults))
            .map_err(|err| ComponentResolutionError::ContractViolation {
                path: self.path.clone(),
                contract: Contract::ConfigValidatable,
                detail: err.to_string(),
            })?;
        (self.factory)(config).map_err(|err| ComponentResolutionError::ContractViolation {
            path: self.path.clone(),
            contract: Contract::Processable,
            detail: err.to_string(),
        })
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("path", &self.path)
            .field("category", &self.category)
            .field("class_id", &self.class_id)
            .field("config", &self.schema.type_name())
            .finish()
    }
}

fn split_path(path: &str) -> Result<(String, String), RegistrationError> {
    let invalid = || RegistrationError::InvalidPath {
        path: path.to_owned(),
    };
    if !is_well_formed(path) {
        return Err(invalid());
    }
    let (category, _) = path.split_once('.').ok_or_else(invalid)?;
    let (_, class_id) = path.rsplit_once('.').ok_or_else(invalid)?;
    Ok((category.to_owned(), class_id.to_owned()))
}

fn is_well_formed(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// 单级注册表：按完整路径索引的组件目录。
///
/// - `BTreeMap` 提供稳定迭代顺序，歧义报错中的候选列表因此可重现；
/// - 路径必须唯一，重复登记返回 [`RegistrationError::Duplicate`]。
#[derive(Clone, Debug, Default)]
pub struct ComponentRegistry {
    entries: BTreeMap<String, ComponentDescriptor>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ComponentDescriptor) -> Result<(), RegistrationError> {
        if self.entries.contains_key(descriptor.path()) {
            return Err(RegistrationError::Duplicate {
                path: descriptor.path().to_owned(),
            });
        }
        self.entries.insert(descriptor.path().to_owned(), descriptor);
        Ok(())
    }

    /// 以强类型配置登记组件的便捷方法。
    pub fn register_typed<C, K, F>(&mut self, path: &str, factory: F) -> Result<(), RegistrationError>
    where
        C: ComponentConfig,
        K: Component,
        F: Fn(Option<&C>) -> Result<K, ComponentError> + Send + Sync + 'static,
    {
        self.register(ComponentDescriptor::typed::<C, K, F>(path, factory)?)
    }

    pub fn get(&self, path: &str) -> Option<&ComponentDescriptor> {
        self.entries.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn by_class_id<'a>(&'a self, class_id: &str) -> impl Iterator<Item = &'a ComponentDescriptor> {
        self.entries
            .values()
            .filter(move |descriptor| descriptor.class_id == class_id)
    }
}

/// 两级解析器：内置注册表优先，外部注册表兜底。
#[derive(Clone, Debug, Default)]
pub struct ComponentResolver {
    bundled: ComponentRegistry,
    external: ComponentRegistry,
}

impl ComponentResolver {
    pub fn new(bundled: ComponentRegistry, external: ComponentRegistry) -> Self {
        Self { bundled, external }
    }

    pub fn bundled(&self) -> &ComponentRegistry {
        &self.bundled
    }

    pub fn external(&self) -> &ComponentRegistry {
        &self.external
    }

    /// 解析组件路径。
    ///
    /// # 逻辑 (How)
    /// 1. 带 [`BUNDLED_NAMESPACE`] 前缀：去掉前缀后只查内置注册表；
    /// 2. 点分路径：先按内置命名空间查，未命中再按外部完整路径查；
    /// 3. 裸类名：按类标识在内置注册表中搜索，未命中再搜索外部注册表，多于一个候选即歧义。
    pub fn resolve(&self, path: &str) -> Result<&ComponentDescriptor, ComponentResolutionError> {
        let path = path.trim();
        if !is_well_formed(path) {
            return Err(ComponentResolutionError::InvalidPath {
                path: path.to_owned(),
            });
        }

        if let Some(inner) = path
            .strip_prefix(BUNDLED_NAMESPACE)
            .and_then(|rest| rest.strip_prefix('.'))
        {
            return self.bundled.get(inner).ok_or_else(|| not_found(path, &[TIER_BUNDLED]));
        }

        if path.contains('.') {
            return self
                .bundled
                .get(path)
                .or_else(|| self.external.get(path))
                .ok_or_else(|| not_found(path, &[TIER_BUNDLED, TIER_EXTERNAL]));
        }

        for registry in [&self.bundled, &self.external] {
            let candidates: Vec<&ComponentDescriptor> = registry.by_class_id(path).collect();
            match candidates.as_slice() {
                [] => continue,
                [single] => return Ok(*single),
                many => {
                    return Err(ComponentResolutionError::Ambiguous {
                        name: path.to_owned(),
                        candidates: many.iter().map(|d| d.path().to_owned()).collect(),
                    });
                }
            }
        }
        Err(not_found(path, &[TIER_BUNDLED, TIER_EXTERNAL]))
    }
}

fn not_found(path: &str, tiers: &[&str]) -> ComponentResolutionError {
    ComponentResolutionError::NotFound {
        path: path.to_owned(),
        searched: tiers.iter().map(|tier| (*tier).to_owned()).collect(),
    }
}
