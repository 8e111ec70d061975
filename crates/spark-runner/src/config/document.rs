//! 配置文档（类别 → 类标识 → 条目）与组件扁平配置之间的转换。
//!
//! 文档布局：
//!
//! ```toml
//! all_log_format = "json"            # 作用于所有类别的所有条目
//!
//! [detectors]
//! all_threshold = 0.2                # 作用于本类别的所有条目
//!
//! [detectors.RandomDetector]
//! method_type = "random_detector"
//! auto_config = false
//!
//! [detectors.RandomDetector.params]
//! seed = 7
//! ```

use std::{fs, io::Write, path::Path};

use serde_json::{Map, Value};

use crate::{
    component::describe,
    error::{ConfigFileError, ConfigValidationError, FieldViolation},
};

/// “应用到全部”前缀。
pub const APPLY_TO_ALL_PREFIX: &str = "all_";
/// 条目中承载实现特定字段的子表。
pub const PARAMS_KEY: &str = "params";

const LAYOUT_KEYS: [&str; 2] = ["method_type", "auto_config"];

/// 组件配置在文档中的定位。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigBinding {
    pub category: String,
    pub class_id: String,
}

impl ConfigBinding {
    pub fn new(category: impl Into<String>, class_id: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            class_id: class_id.into(),
        }
    }

    fn field(&self, key: &str) -> String {
        format!("{}.{}.{}", self.category, self.class_id, key)
    }
}

/// 递归合并：对象逐键合并，数组与标量整体替换。
pub fn merge(base: &mut Value, updates: &Value) {
    match (base, updates) {
        (Value::Object(base), Value::Object(updates)) => merge_tables(base, updates),
        (base, updates) => *base = updates.clone(),
    }
}

/// 表级合并，语义同 [`merge`]。
pub fn merge_tables(base: &mut Map<String, Value>, updates: &Map<String, Value>) {
    for (key, update) in updates {
        match base.get_mut(key) {
            Some(existing) if existing.is_object() && update.is_object() => {
                merge(existing, update);
            }
            _ => {
                base.insert(key.clone(), update.clone());
            }
        }
    }
}

/// 校验文档外形：顶层只能是类别表或 `all_` 键，类别下只能是条目表或 `all_` 键。
pub fn check_layout(document: &Map<String, Value>) -> Result<(), ConfigValidationError> {
    let mut violations = Vec::new();
    for (category, entries) in document {
        if category.starts_with(APPLY_TO_ALL_PREFIX) {
            continue;
        }
        let Some(entries) = entries.as_object() else {
            violations.push(FieldViolation::new(
                category.as_str(),
                "category table",
                describe(entries),
            ));
            continue;
        };
        for (class_id, entry) in entries {
            if !class_id.starts_with(APPLY_TO_ALL_PREFIX) && !entry.is_object() {
                violations.push(FieldViolation::new(
                    format!("{category}.{class_id}"),
                    "component table",
                    describe(entry),
                ));
            }
        }
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ConfigValidationError::new(violations))
    }
}

/// 从文档中取出绑定条目并规范化为扁平映射。
///
/// # 逻辑 (How)
/// 1. 条目内（含 `params` 内）的 `all_<k>` 改名为 `<k>`，同名键已存在时丢弃；
/// 2. `params` 提升到顶层（`params` 中的值优先），随后移除 `params`；
/// 3. 类别级、文档级的 `all_<k>` 依次作为缺省值补入，条目自身的值优先。
///
/// 结果中不会残留 `params` 键或任何 `all_` 前缀键。
pub fn flatten_entry(
    document: &Map<String, Value>,
    binding: &ConfigBinding,
) -> Result<Map<String, Value>, ConfigValidationError> {
    let category = document.get(&binding.category).and_then(Value::as_object);
    let mut entry = match category.and_then(|c| c.get(&binding.class_id)) {
        None => Map::new(),
        Some(Value::Object(entry)) => entry.clone(),
        Some(other) => {
            return Err(ConfigValidationError::single(FieldViolation::new(
                format!("{}.{}", binding.category, binding.class_id),
                "component table",
                describe(other),
            )));
        }
    };

    strip_apply_to_all(&mut entry);
    if let Some(params) = entry.remove(PARAMS_KEY) {
        let Value::Object(mut params) = params else {
            return Err(ConfigValidationError::single(FieldViolation::new(
                binding.field(PARAMS_KEY),
                "table",
                describe(&params),
            )));
        };
        strip_apply_to_all(&mut params);
        entry.extend(params);
    }

    let inherited = category
        .into_iter()
        .chain(std::iter::once(document))
        .flat_map(|scope| scope.iter())
        .filter_map(|(key, value)| {
            key.strip_prefix(APPLY_TO_ALL_PREFIX)
                .filter(|stripped| !stripped.is_empty())
                .map(|stripped| (stripped, value))
        });
    for (key, value) in inherited {
        if !entry.contains_key(key) {
            entry.insert(key.to_owned(), value.clone());
        }
    }
    Ok(entry)
}

fn strip_apply_to_all(map: &mut Map<String, Value>) {
    let prefixed: Vec<String> = map
        .keys()
        .filter(|key| key.starts_with(APPLY_TO_ALL_PREFIX))
        .cloned()
        .collect();
    for key in prefixed {
        let Some(value) = map.remove(&key) else {
            continue;
        };
        let stripped = &key[APPLY_TO_ALL_PREFIX.len()..];
        if !stripped.is_empty() && !map.contains_key(stripped) {
            map.insert(stripped.to_owned(), value);
        }
    }
}

/// 由扁平默认值生成文档：布局键留在条目顶层，其余字段放入 `params`。
pub fn document_from_flat(
    binding: &ConfigBinding,
    flat: &Map<String, Value>,
) -> Map<String, Value> {
    let mut entry = Map::new();
    let mut params = Map::new();
    for (key, value) in flat {
        if LAYOUT_KEYS.contains(&key.as_str()) {
            entry.insert(key.clone(), value.clone());
        } else {
            params.insert(key.clone(), value.clone());
        }
    }
    if !params.is_empty() {
        entry.insert(PARAMS_KEY.to_owned(), Value::Object(params));
    }
    let mut category = Map::new();
    category.insert(binding.class_id.clone(), Value::Object(entry));
    let mut document = Map::new();
    document.insert(binding.category.clone(), Value::Object(category));
    document
}

/// 读取 TOML 文档。
pub fn read(path: &Path) -> Result<Map<String, Value>, ConfigFileError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<Map<String, Value>>(&raw).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// 序列化为 TOML 文本；`null` 在 TOML 中无对应表示，写出前剔除。
pub fn render(document: &Map<String, Value>) -> Result<String, ConfigFileError> {
    let mut pruned = Value::Object(document.clone());
    prune_nulls(&mut pruned);
    toml::to_string_pretty(&pruned).map_err(ConfigFileError::Serialize)
}

/// 先写临时文件再改名，读者不会看到写了一半的文件。
pub fn write(path: &Path, document: &Map<String, Value>) -> Result<(), ConfigFileError> {
    let rendered = render(document)?;
    write_bytes(path, rendered.as_bytes())
}

pub(crate) fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), ConfigFileError> {
    let write_err = |source| ConfigFileError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = std::path::PathBuf::from(staging);
    let mut file = fs::File::create(&staging).map_err(write_err)?;
    file.write_all(bytes).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);
    fs::rename(&staging, path).map_err(write_err)
}

fn prune_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(prune_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(prune_nulls),
        _ => {}
    }
}
