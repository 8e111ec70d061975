use serde::{Deserialize, Serialize};
use serde_json::json;
use spark_runner::{
    Component, ComponentConfig, ComponentError, FieldKind, FieldSpec, FieldViolation,
    ValidatedConfig,
    component::{AUTO_CONFIG, METHOD_TYPE},
};

use super::{encode, preview};

/// `detectors.KeywordDetector` 的配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordDetectorConfig {
    pub method_type: String,
    pub auto_config: bool,
    pub keywords: Vec<String>,
    pub case_sensitive: bool,
}

impl Default for KeywordDetectorConfig {
    fn default() -> Self {
        Self {
            method_type: "keyword_detector".to_owned(),
            auto_config: false,
            keywords: vec!["error".to_owned(), "fatal".to_owned()],
            case_sensitive: false,
        }
    }
}

impl ComponentConfig for KeywordDetectorConfig {
    const FIELDS: &'static [FieldSpec] = &[
        METHOD_TYPE,
        AUTO_CONFIG,
        FieldSpec::required("keywords", FieldKind::List),
        FieldSpec::optional("case_sensitive", FieldKind::Bool),
    ];

    fn check(&self) -> Result<(), Vec<FieldViolation>> {
        if self.keywords.is_empty() {
            return Err(vec![FieldViolation::new(
                "keywords",
                "non-empty list of strings",
                "empty list",
            )]);
        }
        if self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(vec![FieldViolation::new(
                "keywords",
                "non-empty list of strings",
                "list containing a blank keyword",
            )]);
        }
        Ok(())
    }
}

/// 关键字检测器：消息包含任一关键字时输出告警，列出全部命中的关键字。
pub struct KeywordDetector {
    keywords: Vec<String>,
    case_sensitive: bool,
}

impl KeywordDetector {
    pub fn new(config: Option<&KeywordDetectorConfig>) -> Self {
        let defaults = KeywordDetectorConfig::default();
        let config = config.unwrap_or(&defaults);
        let keywords = if config.case_sensitive {
            config.keywords.clone()
        } else {
            config.keywords.iter().map(|k| k.to_lowercase()).collect()
        };
        Self {
            keywords,
            case_sensitive: config.case_sensitive,
        }
    }
}

impl Component for KeywordDetector {
    fn process(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ComponentError> {
        let text = String::from_utf8_lossy(payload);
        let haystack = if self.case_sensitive {
            text.clone()
        } else {
            text.to_lowercase().into()
        };
        let matched: Vec<&str> = self
            .keywords
            .iter()
            .filter(|keyword| haystack.contains(keyword.as_str()))
            .map(String::as_str)
            .collect();
        if matched.is_empty() {
            return Ok(None);
        }
        encode(&json!({
            "detector": "KeywordDetector",
            "matched": matched,
            "payload": preview(payload),
        }))
        .map(Some)
    }

    fn reconfigure(&mut self, config: &ValidatedConfig) -> Result<(), ComponentError> {
        let config = config
            .typed::<KeywordDetectorConfig>()
            .ok_or_else(|| ComponentError::new("expected KeywordDetectorConfig"))?;
        *self = Self::new(Some(config.as_ref()));
        Ok(())
    }
}
