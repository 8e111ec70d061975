//! # engine 模块说明
//!
//! ## 角色定位（Why）
//! - 在专属执行上下文中运行“接收 → 处理 → 转发”循环，并提供幂等、线程安全的启停操作；
//! - 停止依赖协作式轮询：接收操作以 `engine_recv_timeout` 为界，超时后重新检查停止信号，
//!   因此 `stop` 至多在一个轮询周期（加上当前消息的处理与投递）内被感知。
//!
//! ## 实现策略（How）
//! - 每次 `start` 派生一个 OS 线程，线程内构造单线程 Tokio 运行时承载输入/输出 IO；
//!   `start` 同步等待绑定结果，绑定失败直接返回错误且状态不变；
//! - 停止信号为 `AtomicBool`；线程退出时丢弃 `done` 发送端，`stop` 以 `recv_timeout` 限时等待；
//! - 状态机 `Idle → Running → Stopping → Stopped → Running …` 的检查与迁移都在同一把锁内完成。
//!
//! ## 风险与考量（Trade-offs）
//! - 阻塞中的 OS 线程无法被抢占：`stop` 超时后线程被“挂起回收”，状态保持 `Stopping` 直到线程真正退出，
//!   期间 `start` 返回 [`EngineError::AlreadyStarted`]，从而保证任何时刻至多一个工作循环；
//! - 组件处理在运行时线程上同步执行，处理期间不会接受新连接，但内核缓冲会暂存入站数据。

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc as std_mpsc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::{
    error::EngineError,
    processor::Processor,
    settings::ServiceSettings,
    telemetry::EngineMetrics,
    transport::{ChannelAddr, FanOut, InputChannel},
};

/// 引擎运行状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl EngineState {
    pub fn is_running(self) -> bool {
        self == EngineState::Running
    }
}

/// `start` 的结果；重复启动是无害的信息性结果，而非错误。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// `stop` 的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
    /// 另一个调用方正在等待同一个工作线程退出。
    InProgress,
}

/// 引擎参数，通常由 [`ServiceSettings`] 派生。
#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub component_type: String,
    pub component_id: String,
    pub engine_addr: ChannelAddr,
    pub out_addr: Vec<ChannelAddr>,
    pub recv_timeout: Duration,
    pub out_dial_timeout: Duration,
    pub max_frame_len: usize,
}

impl EngineOptions {
    pub fn from_settings(settings: &ServiceSettings) -> Self {
        Self {
            component_type: settings.component_type.clone(),
            component_id: settings.component_id().to_owned(),
            engine_addr: settings.engine_addr.clone(),
            out_addr: settings.out_addr.clone(),
            recv_timeout: settings.engine_recv_timeout(),
            out_dial_timeout: settings.out_dial_timeout(),
            max_frame_len: settings.max_frame_len,
        }
    }
}

/// 工作循环计数器，跨重启累计。
#[derive(Debug, Default)]
pub struct EngineStats {
    received: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    delivery_failures: AtomicU64,
    bytes_in: AtomicU64,
    starts: AtomicU64,
}

/// [`EngineStats`] 的只读快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub failed: u64,
    pub delivery_failures: u64,
    pub bytes_in: u64,
    pub starts: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            starts: self.starts.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    done: std_mpsc::Receiver<()>,
    thread: JoinHandle<()>,
}

struct EngineInner {
    state: EngineState,
    worker: Option<Worker>,
    input_addr: Option<ChannelAddr>,
}

impl EngineInner {
    /// 回收已退出的工作线程：超时后挂起的线程、或因输入通道失效而自行退出的线程。
    fn reap(&mut self, metrics: &EngineMetrics) {
        let finished = self
            .worker
            .as_ref()
            .is_some_and(|worker| worker.thread.is_finished());
        if !finished {
            return;
        }
        if let Some(worker) = self.worker.take() {
            if worker.thread.join().is_err() {
                error!("engine worker panicked");
            }
        }
        if self.state == EngineState::Running {
            warn!("engine worker exited on its own");
        }
        self.state = EngineState::Stopped;
        self.input_addr = None;
        metrics.set_running(false);
    }
}

/// 驱动单个组件的工作循环。
///
/// # 教案式注释
///
/// ## 契约 (What)
/// - `start`：`Running` 时为空操作；`Idle/Stopped` 时绑定输入、派生工作线程并进入 `Running`；
///   `Stopping` 时返回 [`EngineError::AlreadyStarted`]；
/// - `stop(timeout)`：`Idle/Stopped` 时为空操作；否则发出停止信号并最多等待 `timeout`，
///   成功进入 `Stopped`，超时返回 [`EngineError::StopTimedOut`]，由调用方决定是否升级处理；
/// - 消息严格按到达顺序单条处理与扇出；组件失败与单个下游失败只记录日志，循环继续。
pub struct Engine {
    options: EngineOptions,
    processor: Processor,
    stats: Arc<EngineStats>,
    metrics: EngineMetrics,
    inner: Mutex<EngineInner>,
}

impl Engine {
    pub fn new(options: EngineOptions, processor: Processor) -> Self {
        let metrics = EngineMetrics::new(&options.component_type, &options.component_id);
        Self {
            options,
            processor,
            stats: Arc::new(EngineStats::default()),
            metrics,
            inner: Mutex::new(EngineInner {
                state: EngineState::Idle,
                worker: None,
                input_addr: None,
            }),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    pub fn state(&self) -> EngineState {
        let mut inner = self.inner.lock();
        inner.reap(&self.metrics);
        inner.state
    }

    /// 输入通道实际绑定的地址；仅在运行期间存在。
    pub fn input_addr(&self) -> Option<ChannelAddr> {
        self.inner.lock().input_addr.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn start(&self) -> Result<StartOutcome, EngineError> {
        let mut inner = self.inner.lock();
        inner.reap(&self.metrics);
        match inner.state {
            EngineState::Running => {
                debug!("engine already running");
                return Ok(StartOutcome::AlreadyRunning);
            }
            EngineState::Stopping => return Err(EngineError::AlreadyStarted),
            EngineState::Idle | EngineState::Stopped => {}
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let (done_tx, done_rx) = std_mpsc::channel::<()>();
        let context = WorkerContext {
            options: self.options.clone(),
            processor: self.processor.clone(),
            stats: Arc::clone(&self.stats),
            metrics: self.metrics.clone(),
            stop: Arc::clone(&stop),
        };
        let thread = std::thread::Builder::new()
            .name("spark-engine".to_owned())
            .spawn(move || {
                let _done = done_tx;
                run_worker(context, ready_tx);
            })
            .map_err(EngineError::WorkerSpawn)?;

        match ready_rx.recv() {
            Ok(Ok(bound)) => {
                info!(input = %bound, outputs = self.options.out_addr.len(), "engine started");
                inner.state = EngineState::Running;
                inner.input_addr = Some(bound);
                inner.worker = Some(Worker {
                    stop,
                    done: done_rx,
                    thread,
                });
                EngineStats::bump(&self.stats.starts, 1);
                self.metrics.record_start();
                Ok(StartOutcome::Started)
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(EngineError::WorkerSpawn(io::Error::other(
                    "engine worker exited before binding its input",
                )))
            }
        }
    }

    /// 只发出停止信号、不等待。`stop` 仍需调用以回收工作线程。
    pub fn request_stop(&self) {
        if let Some(worker) = self.inner.lock().worker.as_ref() {
            worker.stop.store(true, Ordering::Release);
        }
    }

    pub fn stop(&self, timeout: Duration) -> Result<StopOutcome, EngineError> {
        let worker = {
            let mut inner = self.inner.lock();
            inner.reap(&self.metrics);
            match inner.state {
                EngineState::Idle | EngineState::Stopped => return Ok(StopOutcome::NotRunning),
                EngineState::Running | EngineState::Stopping => {}
            }
            inner.state = EngineState::Stopping;
            match inner.worker.take() {
                Some(worker) => worker,
                None => return Ok(StopOutcome::InProgress),
            }
        };

        worker.stop.store(true, Ordering::Release);
        match worker.done.recv_timeout(timeout) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                if worker.thread.join().is_err() {
                    error!("engine worker panicked");
                }
                let mut inner = self.inner.lock();
                inner.state = EngineState::Stopped;
                inner.input_addr = None;
                self.metrics.set_running(false);
                info!("engine stopped");
                Ok(StopOutcome::Stopped)
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms, "engine worker did not stop in time");
                self.inner.lock().worker = Some(worker);
                Err(EngineError::StopTimedOut { timeout_ms })
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(worker) = self.inner.get_mut().worker.as_ref() {
            worker.stop.store(true, Ordering::Release);
        }
    }
}

struct WorkerContext {
    options: EngineOptions,
    processor: Processor,
    stats: Arc<EngineStats>,
    metrics: EngineMetrics,
    stop: Arc<AtomicBool>,
}

fn run_worker(
    context: WorkerContext,
    ready: std_mpsc::SyncSender<Result<ChannelAddr, EngineError>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ready.send(Err(EngineError::WorkerSpawn(err)));
            return;
        }
    };
    let span = info_span!(
        "engine_worker",
        component = %context.processor.path(),
        component_id = %context.options.component_id,
    );
    runtime.block_on(
        async move {
            let input = match InputChannel::bind(
                &context.options.engine_addr,
                context.options.max_frame_len,
            )
            .await
            {
                Ok(input) => input,
                Err(source) => {
                    let _ = ready.send(Err(EngineError::Bind {
                        addr: context.options.engine_addr.to_string(),
                        source,
                    }));
                    return;
                }
            };
            if ready.send(Ok(input.local_addr().clone())).is_err() {
                return;
            }
            drop(ready);
            worker_loop(context, input).await;
        }
        .instrument(span),
    );
}

async fn worker_loop(context: WorkerContext, mut input: InputChannel) {
    let WorkerContext {
        options,
        processor,
        stats,
        metrics,
        stop,
    } = context;
    let mut outputs = FanOut::new(&options.out_addr, options.out_dial_timeout, options.max_frame_len);

    while !stop.load(Ordering::Acquire) {
        let frame = match tokio::time::timeout(options.recv_timeout, input.recv()).await {
            Err(_) => continue,
            Ok(Some(frame)) => frame,
            Ok(None) => {
                error!("input channel closed, engine worker exiting");
                break;
            }
        };
        EngineStats::bump(&stats.received, 1);
        EngineStats::bump(&stats.bytes_in, frame.len() as u64);
        if frame.is_empty() {
            EngineStats::bump(&stats.dropped, 1);
            debug!("skipping empty message");
            continue;
        }

        let started = Instant::now();
        let processed = processor.process(&frame);
        metrics.record_message(frame.len(), started.elapsed());
        match processed {
            Ok(Some(output)) => {
                EngineStats::bump(&stats.forwarded, 1);
                if outputs.is_empty() {
                    trace!(len = output.len(), "no outputs configured, result discarded");
                    continue;
                }
                let report = outputs.deliver(&output).await;
                if !report.failures.is_empty() {
                    EngineStats::bump(&stats.delivery_failures, report.failures.len() as u64);
                }
            }
            Ok(None) => {
                EngineStats::bump(&stats.dropped, 1);
                trace!("component filtered message");
            }
            Err(err) => {
                EngineStats::bump(&stats.failed, 1);
                warn!(code = err.code(), error = %err, "component failed to process message");
            }
        }
    }

    outputs.close().await;
    debug!("engine worker loop exited");
}
