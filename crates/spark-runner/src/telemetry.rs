//! # telemetry 模块说明
//!
//! ## 意图（Why）
//! - 以 Prometheus 文本格式导出引擎指标，供管理面 `GET /metrics` 抓取；
//! - 指标统一带 `component_type`、`component_id` 标签，同一抓取目标下可区分多个组件实例。
//!
//! ## 契约（What）
//! - `engine_running`：状态枚举，`engine_running="running"|"stopped"` 两条序列，当前状态取 1；
//! - `engine_starts_total`：引擎成功启动次数；
//! - `processing_duration_seconds`：单条消息的组件处理耗时直方图；
//! - `data_processed_bytes_total`：进入组件的负载字节数。
//!
//! ## 风险（Trade-offs）
//! - 记录器是进程级全局状态，只安装一次；已有其它记录器时 [`install`] 返回 `None`，
//!   此时指标句柄退化为空操作，数据面不受影响。

use std::{sync::OnceLock, time::Duration};

use metrics::{Counter, Gauge, Histogram, counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::warn;

pub const ENGINE_RUNNING: &str = "engine_running";
pub const ENGINE_STARTS_TOTAL: &str = "engine_starts_total";
pub const PROCESSING_DURATION_SECONDS: &str = "processing_duration_seconds";
pub const DATA_PROCESSED_BYTES_TOTAL: &str = "data_processed_bytes_total";

const DURATION_BUCKETS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// 安装进程级 Prometheus 记录器，重复调用返回同一个句柄。
pub fn install() -> Option<&'static PrometheusHandle> {
    HANDLE
        .get_or_init(|| {
            let installed = PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Full(PROCESSING_DURATION_SECONDS.to_owned()),
                    &DURATION_BUCKETS,
                )
                .and_then(PrometheusBuilder::install_recorder);
            match installed {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!(error = %err, "prometheus recorder not installed, metrics disabled");
                    None
                }
            }
        })
        .as_ref()
}

/// 以 Prometheus 文本格式渲染当前指标；记录器未安装时返回 `None`。
pub fn render() -> Option<String> {
    install().map(PrometheusHandle::render)
}

/// 单个引擎的指标句柄，标签在构造时绑定。
#[derive(Clone)]
pub struct EngineMetrics {
    running: Gauge,
    stopped: Gauge,
    starts: Counter,
    processing: Histogram,
    bytes: Counter,
}

impl EngineMetrics {
    pub fn new(component_type: &str, component_id: &str) -> Self {
        install();
        let ty = component_type.to_owned();
        let id = component_id.to_owned();
        let metrics = Self {
            running: gauge!(ENGINE_RUNNING, "component_type" => ty.clone(), "component_id" => id.clone(), ENGINE_RUNNING => "running"),
            stopped: gauge!(ENGINE_RUNNING, "component_type" => ty.clone(), "component_id" => id.clone(), ENGINE_RUNNING => "stopped"),
            starts: counter!(ENGINE_STARTS_TOTAL, "component_type" => ty.clone(), "component_id" => id.clone()),
            processing: histogram!(PROCESSING_DURATION_SECONDS, "component_type" => ty.clone(), "component_id" => id.clone()),
            bytes: counter!(DATA_PROCESSED_BYTES_TOTAL, "component_type" => ty, "component_id" => id),
        };
        metrics.set_running(false);
        metrics
    }

    pub fn set_running(&self, running: bool) {
        self.running.set(if running { 1.0 } else { 0.0 });
        self.stopped.set(if running { 0.0 } else { 1.0 });
    }

    pub fn record_start(&self) {
        self.starts.increment(1);
        self.set_running(true);
    }

    pub fn record_message(&self, len: usize, elapsed: Duration) {
        self.bytes.increment(len as u64);
        self.processing.record(elapsed.as_secs_f64());
    }
}
