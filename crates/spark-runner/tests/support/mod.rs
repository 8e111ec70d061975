//! 集成测试共用的组件与辅助函数。
#![allow(dead_code)]

use std::{
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use spark_runner::{
    ChannelAddr, Component, ComponentError, Engine, EngineOptions, InputChannel, OutputChannel,
    Processor,
};

pub const MAX_FRAME: usize = 1024 * 1024;
pub const SEND_TIMEOUT: Duration = Duration::from_secs(2);
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// 转大写；`panic`、`error`、`drop`、`sleep:<ms>` 触发对应行为。
pub struct Upper;

impl Component for Upper {
    fn process(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ComponentError> {
        match payload {
            b"panic" => panic!("component exploded"),
            b"error" => Err(ComponentError::new("refused")),
            b"drop" => Ok(None),
            other => {
                if let Some(ms) = other.strip_prefix(b"sleep:") {
                    let ms: u64 = std::str::from_utf8(ms).unwrap().parse().unwrap();
                    thread::sleep(Duration::from_millis(ms));
                }
                Ok(Some(other.to_ascii_uppercase()))
            }
        }
    }
}

pub fn loopback() -> ChannelAddr {
    ChannelAddr::tcp("127.0.0.1:0")
}

pub fn options(out_addr: Vec<ChannelAddr>) -> EngineOptions {
    EngineOptions {
        component_type: "tests.Upper".to_owned(),
        component_id: "test".to_owned(),
        engine_addr: loopback(),
        out_addr,
        recv_timeout: Duration::from_millis(20),
        out_dial_timeout: Duration::from_millis(300),
        max_frame_len: MAX_FRAME,
    }
}

pub fn upper_engine(out_addr: Vec<ChannelAddr>) -> Engine {
    Engine::new(
        options(out_addr),
        Processor::new("tests.Upper", Box::new(Upper)),
    )
}

pub async fn sink() -> InputChannel {
    InputChannel::bind(&loopback(), MAX_FRAME)
        .await
        .expect("下游测试通道应能绑定")
}

pub async fn recv(sink: &mut InputChannel) -> Bytes {
    tokio::time::timeout(RECV_TIMEOUT, sink.recv())
        .await
        .expect("等待下游消息超时")
        .expect("下游通道意外关闭")
}

/// 断言在短时间内没有消息到达。
pub async fn assert_silent(sink: &mut InputChannel) {
    let outcome = tokio::time::timeout(Duration::from_millis(200), sink.recv()).await;
    assert!(outcome.is_err(), "不应收到消息，实际为 {outcome:?}");
}

/// 连接到引擎的输入通道。
pub fn feeder(engine: &Engine) -> OutputChannel {
    let addr = engine.input_addr().expect("运行中的引擎应暴露输入地址");
    OutputChannel::new(addr, MAX_FRAME)
}

/// 轮询直到条件成立或超时。
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + RECV_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "条件在超时前未满足");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// 可配置组件：负载重复 `factor` 次后追加 `suffix`；`suffix = "reject"` 时拒绝重载，
/// `sleep:<ms>` 负载先阻塞对应时长。
pub mod scale {
    use std::path::PathBuf;

    use serde::{Deserialize, Serialize};
    use spark_runner::{
        Component, ComponentConfig, ComponentError, ComponentRegistry, ComponentResolver,
        FieldKind, FieldSpec, ServiceSettings, ValidatedConfig,
        component::{AUTO_CONFIG, METHOD_TYPE},
    };

    use super::loopback;

    pub const PATH: &str = "tests.Scale";

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ScaleConfig {
        pub method_type: String,
        pub auto_config: bool,
        pub factor: i64,
        pub suffix: String,
    }

    impl Default for ScaleConfig {
        fn default() -> Self {
            Self {
                method_type: "scale".to_owned(),
                auto_config: false,
                factor: 1,
                suffix: String::new(),
            }
        }
    }

    impl ComponentConfig for ScaleConfig {
        const FIELDS: &'static [FieldSpec] = &[
            METHOD_TYPE,
            AUTO_CONFIG,
            FieldSpec::optional(
                "factor",
                FieldKind::Integer {
                    min: Some(1),
                    max: Some(10),
                },
            ),
            FieldSpec::optional("suffix", FieldKind::String),
        ];
    }

    pub struct Scale {
        factor: usize,
        suffix: Vec<u8>,
    }

    impl Scale {
        fn new(config: Option<&ScaleConfig>) -> Self {
            let defaults = ScaleConfig::default();
            let config = config.unwrap_or(&defaults);
            Self {
                factor: config.factor as usize,
                suffix: config.suffix.clone().into_bytes(),
            }
        }
    }

    impl Component for Scale {
        fn process(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, ComponentError> {
            if let Some(ms) = payload.strip_prefix(b"sleep:") {
                let ms: u64 = std::str::from_utf8(ms).unwrap().parse().unwrap();
                std::thread::sleep(std::time::Duration::from_millis(ms));
            }
            let mut out = payload.repeat(self.factor);
            out.extend_from_slice(&self.suffix);
            Ok(Some(out))
        }

        fn reconfigure(&mut self, config: &ValidatedConfig) -> Result<(), ComponentError> {
            let config = config
                .typed::<ScaleConfig>()
                .ok_or_else(|| ComponentError::new("unexpected configuration type"))?;
            if config.suffix == "reject" {
                return Err(ComponentError::new("suffix `reject` is not accepted"));
            }
            *self = Self::new(Some(config.as_ref()));
            Ok(())
        }
    }

    /// 外部注册表中只有 `tests.Scale`。
    pub fn resolver() -> ComponentResolver {
        let mut external = ComponentRegistry::new();
        external
            .register_typed(PATH, |config: Option<&ScaleConfig>| Ok(Scale::new(config)))
            .unwrap();
        ComponentResolver::new(ComponentRegistry::new(), external)
    }

    pub fn settings(
        config_path: Option<PathBuf>,
        out_addr: Vec<spark_runner::ChannelAddr>,
    ) -> ServiceSettings {
        ServiceSettings {
            component_name: Some("scale-under-test".to_owned()),
            component_type: PATH.to_owned(),
            component_config_path: config_path,
            engine_addr: loopback(),
            out_addr,
            engine_autostart: false,
            engine_recv_timeout_ms: 20,
            out_dial_timeout_ms: 300,
            manager_thread_join_timeout_ms: 2000,
            http_port: 0,
            ..ServiceSettings::default()
        }
        .finalize()
        .unwrap()
    }
}
