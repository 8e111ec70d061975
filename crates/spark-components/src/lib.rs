#![deny(unsafe_code)]
#![doc = r#"
# spark-components

## 设计动机（Why）
- **定位**：`spark-runner` 的内置组件库。组件路径中的短名称（`detectors.RandomDetector`）
  首先在这里解析，解析不到才回退到应用自带的外部注册表。
- **设计理念**：每个组件都是“强类型配置 + 工厂”的组合，运行时不做任何动态加载。

## 核心契约（What）
| 路径 | 行为 |
|---|---|
| `core.Passthrough` | 原样转发 |
| `detectors.RandomDetector` | 以 `threshold` 概率对消息告警，可用 `seed` 固定随机序列 |
| `detectors.KeywordDetector` | 消息包含任一关键字时告警 |
| `parsers.LineParser` | 把一行文本按分隔符切分为 JSON 记录 |

告警与解析结果统一编码为 JSON，下游无需了解产生它的组件类型。
"#]

mod detectors;
mod parsers;
mod passthrough;

use spark_runner::{ComponentRegistry, RegistrationError};

pub use detectors::{
    KeywordDetector, KeywordDetectorConfig, RandomDetector, RandomDetectorConfig,
};
pub use parsers::{LineParser, LineParserConfig};
pub use passthrough::{Passthrough, PassthroughConfig};

/// 构造内置注册表。
pub fn bundled() -> Result<ComponentRegistry, RegistrationError> {
    let mut registry = ComponentRegistry::new();
    registry.register_typed("core.Passthrough", |config: Option<&PassthroughConfig>| {
        Ok(Passthrough::new(config))
    })?;
    registry.register_typed(
        "detectors.RandomDetector",
        |config: Option<&RandomDetectorConfig>| Ok(RandomDetector::new(config)),
    )?;
    registry.register_typed(
        "detectors.KeywordDetector",
        |config: Option<&KeywordDetectorConfig>| Ok(KeywordDetector::new(config)),
    )?;
    registry.register_typed("parsers.LineParser", |config: Option<&LineParserConfig>| {
        Ok(LineParser::new(config))
    })?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_registry_lists_every_component() {
        let registry = bundled().unwrap();
        let paths: Vec<&str> = registry.paths().collect();
        assert_eq!(
            paths,
            [
                "core.Passthrough",
                "detectors.KeywordDetector",
                "detectors.RandomDetector",
                "parsers.LineParser",
            ],
            "BTreeMap 保证路径按字典序排列"
        );
        for path in paths {
            let descriptor = registry.get(path).unwrap();
            assert!(
                descriptor.instantiate(None).is_ok(),
                "{path} 应能以缺省配置实例化"
            );
        }
    }
}
