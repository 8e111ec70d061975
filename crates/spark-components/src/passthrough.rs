use serde::{Deserialize, Serialize};
use spark_runner::{
    Component, ComponentConfig, ComponentError, FieldSpec,
    component::{AUTO_CONFIG, METHOD_TYPE},
};

/// `core.Passthrough` 的配置：只有布局字段。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassthroughConfig {
    pub method_type: String,
    pub auto_config: bool,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            method_type: "passthrough".to_owned(),
            auto_config: false,
        }
    }
}

impl ComponentConfig for PassthroughConfig {
    const FIELDS: &'static [FieldSpec] = &[METHOD_TYPE, AUTO_CONFIG];
}

/// 原样转发每条消息，常用于连通性验证与拓扑占位。
#[derive(Debug, Default)]
pub struct Passthrough;

impl Passthrough {
    pub fn new(_config: Option<&PassthroughConfig>) -> Self {
        Self
    }
}

impl Component for Passthrough {
    fn process(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ComponentError> {
        Ok(Some(payload.to_vec()))
    }
}
