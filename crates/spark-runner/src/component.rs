//! # component 模块说明
//!
//! ## 角色定位（Why）
//! - 定义插件必须满足的两项能力契约：
//!   - `Processable`：可用可选配置构造，暴露 `process(bytes) -> optional bytes`；
//!   - `ConfigValidatable`：配置可从无类型数据校验构造，并序列化回无类型数据；
//! - 以显式 trait 取代鸭子类型，任何实现了这两个 trait 的类型都是合法插件。
//!
//! ## 契约（What）
//! - [`Component`]：组件本体，只在持有组件锁时被调用，因此无需自身线程安全；
//! - [`ComponentConfig`]：强类型配置，声明 [`FieldSpec`] 列表用于字段级校验；
//! - [`ConfigSchema`]：对 `ComponentConfig` 的类型擦除，注册表与配置管理器只依赖它；
//! - [`ValidatedConfig`]：通过校验的配置快照，可按具体类型取回。

use std::{any::Any, fmt, marker::PhantomData, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::error::{ComponentError, ConfigValidationError, FieldViolation};

/// 处理单元。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 引擎只认识这一个入口，组件的具体形态（解析器、检测器……）对引擎透明。
///
/// ## 契约 (What)
/// - `process` 返回 `Ok(Some(bytes))` 时字节被原样扇出；`Ok(None)` 表示过滤该消息；
///   `Err` 或 panic 只影响当前消息；
/// - `reconfigure` 在新配置生效前被调用，返回 `Err` 时整个重配回滚；
/// - **前置条件**：两个方法都在组件锁内调用，不会与另一条消息并发。
pub trait Component: Send + 'static {
    fn process(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ComponentError>;

    /// 显式重载配置。默认实现接受任何配置且不做处理。
    fn reconfigure(&mut self, config: &ValidatedConfig) -> Result<(), ComponentError> {
        let _ = config;
        Ok(())
    }
}

/// 字段取值形态与约束。
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FieldKind {
    Bool,
    Integer { min: Option<i64>, max: Option<i64> },
    Float { min: Option<f64>, max: Option<f64> },
    String,
    OneOf(&'static [&'static str]),
    List,
    Table,
    Any,
}

impl FieldKind {
    pub const fn integer() -> Self {
        FieldKind::Integer {
            min: None,
            max: None,
        }
    }

    pub const fn float() -> Self {
        FieldKind::Float {
            min: None,
            max: None,
        }
    }

    /// 人类可读的期望描述，出现在 [`FieldViolation::expected`] 中。
    pub fn expected(&self) -> String {
        match self {
            FieldKind::Bool => "boolean".to_owned(),
            FieldKind::Integer { min, max } => with_range("integer", *min, *max),
            FieldKind::Float { min, max } => with_range("number", *min, *max),
            FieldKind::String => "string".to_owned(),
            FieldKind::OneOf(choices) => format!("one of [{}]", choices.join(", ")),
            FieldKind::List => "list".to_owned(),
            FieldKind::Table => "table".to_owned(),
            FieldKind::Any => "any value".to_owned(),
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::Any, _) => true,
            (FieldKind::Bool, Value::Bool(_)) => true,
            (FieldKind::Integer { min, max }, Value::Number(n)) => n
                .as_i64()
                .is_some_and(|v| min.is_none_or(|m| v >= m) && max.is_none_or(|m| v <= m)),
            (FieldKind::Float { min, max }, Value::Number(n)) => n
                .as_f64()
                .is_some_and(|v| min.is_none_or(|m| v >= m) && max.is_none_or(|m| v <= m)),
            (FieldKind::String, Value::String(_)) => true,
            (FieldKind::OneOf(choices), Value::String(s)) => choices.contains(&s.as_str()),
            (FieldKind::List, Value::Array(_)) => true,
            (FieldKind::Table, Value::Object(_)) => true,
            _ => false,
        }
    }
}

fn with_range<T: fmt::Display>(base: &str, min: Option<T>, max: Option<T>) -> String {
    match (min, max) {
        (None, None) => base.to_owned(),
        (Some(min), None) => format!("{base} >= {min}"),
        (None, Some(max)) => format!("{base} <= {max}"),
        (Some(min), Some(max)) => format!("{base} in [{min}, {max}]"),
    }
}

/// 组件声明的单个配置字段。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// 所有配置都携带的两个布局字段。
pub const METHOD_TYPE: FieldSpec = FieldSpec::optional("method_type", FieldKind::String);
pub const AUTO_CONFIG: FieldSpec = FieldSpec::optional("auto_config", FieldKind::Bool);

/// 组件的强类型配置。
///
/// - **契约 (What)**：
///   - `FIELDS` 列出全部允许的键；未声明的键、类型不符、越界或缺失必填字段都会成为违规；
///   - `Default` 用于配置文件缺失时生成初始文件；
///   - `check` 承载跨字段的语义约束，默认无约束。
pub trait ComponentConfig:
    Serialize + DeserializeOwned + Default + fmt::Debug + Send + Sync + 'static
{
    const FIELDS: &'static [FieldSpec];

    fn check(&self) -> Result<(), Vec<FieldViolation>> {
        Ok(())
    }
}

/// 通过校验的配置快照。
///
/// - `value` 为规范化后的扁平映射（由强类型值重新序列化，缺省字段已补全）；
/// - `typed` 保存强类型值，组件通过 [`ValidatedConfig::typed`] 取回。
#[derive(Clone)]
pub struct ValidatedConfig {
    value: Map<String, Value>,
    typed: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ValidatedConfig {
    pub fn value(&self) -> &Map<String, Value> {
        &self.value
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn typed<C: ComponentConfig>(&self) -> Option<Arc<C>> {
        Arc::clone(&self.typed).downcast::<C>().ok()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }
}

impl fmt::Debug for ValidatedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedConfig")
            .field("type_name", &self.type_name)
            .field("value", &self.value)
            .finish()
    }
}

/// 类型擦除后的配置契约（`ConfigValidatable`）。
pub trait ConfigSchema: Send + Sync + 'static {
    /// 配置类型名，用于状态展示与错误信息。
    fn type_name(&self) -> &'static str;

    fn fields(&self) -> &'static [FieldSpec];

    /// 默认配置的无类型形式。
    fn default_value(&self) -> Result<Map<String, Value>, ConfigValidationError>;

    /// 从无类型数据校验并构造。
    fn validate(&self, value: &Map<String, Value>) -> Result<ValidatedConfig, ConfigValidationError>;
}

/// `ComponentConfig` 到 `ConfigSchema` 的桥接。
pub struct TypedSchema<C>(PhantomData<fn() -> C>);

impl<C> TypedSchema<C> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<C> Default for TypedSchema<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ComponentConfig> ConfigSchema for TypedSchema<C> {
    fn type_name(&self) -> &'static str {
        short_type_name::<C>()
    }

    fn fields(&self) -> &'static [FieldSpec] {
        C::FIELDS
    }

    fn default_value(&self) -> Result<Map<String, Value>, ConfigValidationError> {
        to_map(&C::default())
    }

    fn validate(&self, value: &Map<String, Value>) -> Result<ValidatedConfig, ConfigValidationError> {
        let mut violations = check_fields(C::FIELDS, value);
        if !violations.is_empty() {
            return Err(ConfigValidationError::new(violations));
        }
        let typed: C = serde_json::from_value(Value::Object(value.clone())).map_err(|err| {
            ConfigValidationError::single(FieldViolation::new(
                "<config>",
                short_type_name::<C>(),
                err.to_string(),
            ))
        })?;
        if let Err(mut semantic) = typed.check() {
            violations.append(&mut semantic);
            return Err(ConfigValidationError::new(violations));
        }
        let value = to_map(&typed)?;
        Ok(ValidatedConfig {
            value,
            typed: Arc::new(typed),
            type_name: short_type_name::<C>(),
        })
    }
}

/// 按字段声明收集全部违规，而不是遇到第一个就返回。
pub fn check_fields(fields: &[FieldSpec], value: &Map<String, Value>) -> Vec<FieldViolation> {
    let mut violations = Vec::new();
    for (key, found) in value {
        match fields.iter().find(|field| field.name == key.as_str()) {
            None => violations.push(FieldViolation::new(
                key.as_str(),
                "no such field",
                describe(found),
            )),
            Some(field) if found.is_null() && !field.required => {}
            Some(field) if !field.kind.accepts(found) => violations.push(FieldViolation::new(
                key.as_str(),
                field.kind.expected(),
                describe(found),
            )),
            Some(_) => {}
        }
    }
    for field in fields.iter().filter(|field| field.required) {
        if value.get(field.name).is_none_or(Value::is_null) {
            violations.push(FieldViolation::new(field.name, field.kind.expected(), "missing"));
        }
    }
    violations
}

/// 违规信息中展示的取值摘要。
pub fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(items) => format!("list of {}", items.len()),
        Value::Object(_) => "table".to_owned(),
    }
}

fn to_map<C: Serialize>(config: &C) -> Result<Map<String, Value>, ConfigValidationError> {
    match serde_json::to_value(config) {
        Ok(Value::Object(mut map)) => {
            map.retain(|_, v| !v.is_null());
            Ok(map)
        }
        Ok(other) => Err(ConfigValidationError::single(FieldViolation::new(
            "<config>",
            "table",
            describe(&other),
        ))),
        Err(err) => Err(ConfigValidationError::single(FieldViolation::new(
            "<config>",
            "serializable value",
            err.to_string(),
        ))),
    }
}

fn short_type_name<C>() -> &'static str {
    let full = std::any::type_name::<C>();
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct SampleConfig {
        method_type: String,
        auto_config: bool,
        threshold: f64,
        label: Option<String>,
    }

    impl ComponentConfig for SampleConfig {
        const FIELDS: &'static [FieldSpec] = &[
            METHOD_TYPE,
            AUTO_CONFIG,
            FieldSpec::required(
                "threshold",
                FieldKind::Float {
                    min: Some(0.0),
                    max: Some(1.0),
                },
            ),
            FieldSpec::optional("label", FieldKind::String),
        ];

        fn check(&self) -> Result<(), Vec<FieldViolation>> {
            if self.label.as_deref() == Some("") {
                return Err(vec![FieldViolation::new("label", "non-empty string", "empty")]);
            }
            Ok(())
        }
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn valid_config_round_trips_to_typed_value() {
        let schema = TypedSchema::<SampleConfig>::new();
        let validated = schema
            .validate(&map(json!({"threshold": 0.25, "label": "x"})))
            .unwrap();
        let typed = validated.typed::<SampleConfig>().unwrap();
        assert_eq!(typed.threshold, 0.25);
        assert_eq!(validated.get("auto_config"), Some(&json!(false)), "缺省字段应被补全");
        assert_eq!(schema.type_name(), "SampleConfig");
    }

    #[test]
    fn all_violations_are_reported_together() {
        let schema = TypedSchema::<SampleConfig>::new();
        let err = schema
            .validate(&map(json!({"threshold": 3.0, "bogus": 1, "auto_config": "yes"})))
            .unwrap_err();
        assert!(err.mentions("threshold"));
        assert!(err.mentions("bogus"));
        assert!(err.mentions("auto_config"));
        let threshold = err
            .violations
            .iter()
            .find(|v| v.field == "threshold")
            .unwrap();
        assert_eq!(threshold.expected, "number in [0, 1]");
    }

    #[test]
    fn missing_required_and_semantic_checks_fail() {
        let schema = TypedSchema::<SampleConfig>::new();
        let err = schema.validate(&map(json!({}))).unwrap_err();
        assert_eq!(err.violations[0].found, "missing");

        let err = schema
            .validate(&map(json!({"threshold": 0.5, "label": ""})))
            .unwrap_err();
        assert!(err.mentions("label"));
    }
}
