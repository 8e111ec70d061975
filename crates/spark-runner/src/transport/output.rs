use std::time::Duration;

use futures::future::join_all;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tracing::{debug, warn};

use super::{ChannelAddr, frame::write_frame};
use crate::error::DeliveryError;

type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// 单个下游输出通道，惰性拨号并在失败后自动重拨。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 下游可能晚于本进程启动，`start` 不能因为下游不可达而失败；
/// - 下游重启后应能在下一条消息到来时自动恢复。
///
/// ## 逻辑 (How)
/// - 首次 `send` 时拨号；拨号与写入共享同一个 `timeout` 预算；
/// - 任何失败（含超时）都会丢弃当前连接，下一次 `send` 重新拨号。
///
/// ## 契约 (What)
/// - `send` 仅在整帧写入并刷新后返回 `Ok`；
/// - 单个通道的失败不会影响其它通道，扇出由 [`FanOut`] 负责并发推进。
pub struct OutputChannel {
    addr: ChannelAddr,
    label: String,
    max_frame_len: usize,
    conn: Option<BoxedWriter>,
}

impl OutputChannel {
    pub fn new(addr: ChannelAddr, max_frame_len: usize) -> Self {
        let label = addr.to_string();
        Self {
            addr,
            label,
            max_frame_len,
            conn: None,
        }
    }

    pub fn addr(&self) -> &ChannelAddr {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// 在 `timeout` 内完成（必要时的）拨号与一帧写入。
    pub async fn send(&mut self, payload: &[u8], timeout: Duration) -> Result<(), DeliveryError> {
        if payload.len() > self.max_frame_len {
            return Err(DeliveryError::FrameTooLarge {
                addr: self.label.clone(),
                len: payload.len(),
                max: self.max_frame_len,
            });
        }
        match tokio::time::timeout(timeout, self.send_inner(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.conn = None;
                Err(err)
            }
            Err(_) => {
                self.conn = None;
                Err(DeliveryError::TimedOut {
                    addr: self.label.clone(),
                    timeout_ms: duration_ms(timeout),
                })
            }
        }
    }

    async fn send_inner(&mut self, payload: &[u8]) -> Result<(), DeliveryError> {
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => {
                let conn = dial(&self.addr).await.map_err(|source| DeliveryError::Dial {
                    addr: self.label.clone(),
                    source,
                })?;
                debug!(output = %self.label, "output connected");
                self.conn.insert(conn)
            }
        };
        write_frame(conn, payload)
            .await
            .map_err(|source| DeliveryError::Write {
                addr: self.label.clone(),
                source,
            })
    }

    /// 关闭当前连接（若有）。
    pub async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(err) = conn.shutdown().await {
                debug!(output = %self.label, error = %err, "output shutdown failed");
            }
        }
    }
}

async fn dial(addr: &ChannelAddr) -> std::io::Result<BoxedWriter> {
    match addr {
        ChannelAddr::Tcp(host_port) => {
            let stream = TcpStream::connect(host_port.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        ChannelAddr::Ipc(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
        #[cfg(not(unix))]
        ChannelAddr::Ipc(_) => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "ipc channels require a unix platform",
        )),
    }
}

/// 一次扇出的结果。
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failures: Vec<DeliveryError>,
}

/// 全部下游输出通道的集合。
///
/// - **契约 (What)**：`deliver` 并发推进所有下游，每个下游独立受 `timeout` 约束，
///   因此整体耗时不超过单个 `timeout`；失败逐个以 WARN 记录并汇总在报告中；
/// - **前置条件**：同一时间只有一个 `deliver` 在进行（工作循环单消费者），保证投递顺序与接收顺序一致。
pub struct FanOut {
    outputs: Vec<OutputChannel>,
    timeout: Duration,
}

impl FanOut {
    pub fn new(addrs: &[ChannelAddr], timeout: Duration, max_frame_len: usize) -> Self {
        Self {
            outputs: addrs
                .iter()
                .cloned()
                .map(|addr| OutputChannel::new(addr, max_frame_len))
                .collect(),
            timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub async fn deliver(&mut self, payload: &[u8]) -> DeliveryReport {
        let timeout = self.timeout;
        let results = join_all(
            self.outputs
                .iter_mut()
                .map(|output| async move { output.send(payload, timeout).await }),
        )
        .await;

        let mut report = DeliveryReport::default();
        for result in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(
                        code = err.code(),
                        transient = err.is_transient(),
                        error = %err,
                        "output delivery failed"
                    );
                    report.failures.push(err);
                }
            }
        }
        report
    }

    pub async fn close(&mut self) {
        for output in &mut self.outputs {
            output.close().await;
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
