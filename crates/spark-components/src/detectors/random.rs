use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use spark_runner::{
    Component, ComponentConfig, ComponentError, FieldKind, FieldSpec, ValidatedConfig,
    component::{AUTO_CONFIG, METHOD_TYPE},
};
use tracing::debug;

use super::{encode, preview};

/// `detectors.RandomDetector` 的配置。
///
/// - `threshold`：告警概率，取值 `[0, 1]`；
/// - `seed`：固定随机序列，便于复现；缺省时使用操作系统熵源；
/// - `log_variables`：变量提取描述，原样保存，供下游解析器参考。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomDetectorConfig {
    pub method_type: String,
    pub auto_config: bool,
    pub threshold: f64,
    pub seed: Option<u64>,
    pub log_variables: Vec<Value>,
}

impl Default for RandomDetectorConfig {
    fn default() -> Self {
        Self {
            method_type: "random_detector".to_owned(),
            auto_config: false,
            threshold: 0.5,
            seed: None,
            log_variables: Vec::new(),
        }
    }
}

impl ComponentConfig for RandomDetectorConfig {
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
        FieldSpec::optional(
            "seed",
            FieldKind::Integer {
                min: Some(0),
                max: None,
            },
        ),
        FieldSpec::optional("log_variables", FieldKind::List),
    ];
}

/// 随机检测器：每条消息抽取一个 `[0, 1)` 的分数，低于阈值即告警。
///
/// 主要用于端到端链路的压测与演示：告警比例可由 `threshold` 精确控制。
pub struct RandomDetector {
    threshold: f64,
    rng: StdRng,
}

impl RandomDetector {
    pub fn new(config: Option<&RandomDetectorConfig>) -> Self {
        let defaults = RandomDetectorConfig::default();
        let config = config.unwrap_or(&defaults);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            threshold: config.threshold,
            rng,
        }
    }
}

impl Component for RandomDetector {
    fn process(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ComponentError> {
        let score: f64 = self.rng.random();
        if score >= self.threshold {
            return Ok(None);
        }
        let alert = json!({
            "detector": "RandomDetector",
            "score": score,
            "threshold": self.threshold,
            "len": payload.len(),
            "payload": preview(payload),
        });
        encode(&alert).map(Some)
    }

    /// 重建随机源：新配置带 `seed` 时序列从头开始。
    fn reconfigure(&mut self, config: &ValidatedConfig) -> Result<(), ComponentError> {
        let config = config
            .typed::<RandomDetectorConfig>()
            .ok_or_else(|| ComponentError::new("expected RandomDetectorConfig"))?;
        *self = Self::new(Some(config.as_ref()));
        debug!(threshold = self.threshold, "random detector reconfigured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(threshold: f64, seed: u64) -> RandomDetector {
        RandomDetector::new(Some(&RandomDetectorConfig {
            threshold,
            seed: Some(seed),
            ..RandomDetectorConfig::default()
        }))
    }

    #[test]
    fn threshold_bounds_are_absolute() {
        let mut never = seeded(0.0, 1);
        let mut always = seeded(1.0, 1);
        for _ in 0..100 {
            assert!(never.process(b"line").unwrap().is_none(), "阈值 0 不应告警");
            assert!(always.process(b"line").unwrap().is_some(), "阈值 1 应始终告警");
        }
    }

    #[test]
    fn same_seed_gives_same_decisions() {
        let mut left = seeded(0.5, 42);
        let mut right = seeded(0.5, 42);
        let decide = |detector: &mut RandomDetector| {
            (0..64)
                .map(|_| detector.process(b"x").unwrap().is_some())
                .collect::<Vec<_>>()
        };
        assert_eq!(decide(&mut left), decide(&mut right));
    }

    #[test]
    fn alert_is_json_with_score_below_threshold() {
        let mut detector = seeded(1.0, 7);
        let alert: Value =
            serde_json::from_slice(&detector.process(b"disk full").unwrap().unwrap()).unwrap();
        assert_eq!(alert["detector"], "RandomDetector");
        assert_eq!(alert["payload"], "disk full");
        assert_eq!(alert["len"], 9);
        assert!(alert["score"].as_f64().unwrap() < 1.0);
    }
}
