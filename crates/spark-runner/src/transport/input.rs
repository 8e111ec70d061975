use std::{io, path::PathBuf, time::Duration};

use bytes::Bytes;
use tokio::{
    io::AsyncRead,
    net::TcpListener,
    sync::mpsc,
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, warn};

use super::{ChannelAddr, frame::read_frame};

/// 入站帧队列容量；读取任务在队列满时等待，形成对端背压。
const INPUT_QUEUE_CAPACITY: usize = 1024;
/// `accept` 失败后的退避间隔，避免文件描述符耗尽时空转。
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Ipc(tokio::net::UnixListener),
}

impl Listener {
    async fn accept(&self) -> io::Result<(BoxedReader, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Listener::Ipc(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), "ipc-peer".to_owned()))
            }
        }
    }
}

/// 引擎的输入通道：在 `engine_addr` 上监听，接受任意数量的对端并按帧汇聚。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 工作循环需要“有界等待”的接收原语；若直接在套接字上做带超时的读，超时可能截断半帧。
///   因此由后台任务完成完整帧的读取，再经有界队列交给工作循环，超时只作用在队列上。
///
/// ## 逻辑 (How)
/// - `bind`：IPC 地址先清理遗留的套接字文件再绑定；TCP 地址绑定后记录实际端口；
/// - 后台 `accept` 任务为每个连接派生读取任务（收纳在 `JoinSet` 中），帧写入 `mpsc` 队列；
/// - 超长帧或读错误只会丢弃对应连接，不影响监听与其它对端。
///
/// ## 契约 (What)
/// - 必须在 Tokio 运行时内调用 `bind`；
/// - `recv` 返回 `None` 表示后台任务已终止，通道不可再用；
/// - `Drop` 时终止全部后台任务，并删除自己创建的 IPC 套接字文件。
pub struct InputChannel {
    rx: mpsc::Receiver<Bytes>,
    acceptor: JoinHandle<()>,
    local_addr: ChannelAddr,
    socket_file: Option<PathBuf>,
}

impl InputChannel {
    /// 绑定并开始接受连接。
    pub async fn bind(addr: &ChannelAddr, max_frame_len: usize) -> io::Result<Self> {
        let (listener, local_addr, socket_file) = match addr {
            ChannelAddr::Tcp(host_port) => {
                let listener = TcpListener::bind(host_port.as_str()).await?;
                let local = listener.local_addr()?;
                (
                    Listener::Tcp(listener),
                    ChannelAddr::Tcp(local.to_string()),
                    None,
                )
            }
            #[cfg(unix)]
            ChannelAddr::Ipc(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = tokio::net::UnixListener::bind(path)?;
                (
                    Listener::Ipc(listener),
                    addr.clone(),
                    Some(path.clone()),
                )
            }
            #[cfg(not(unix))]
            ChannelAddr::Ipc(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "ipc channels require a unix platform",
                ));
            }
        };

        let (tx, rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let acceptor = tokio::spawn(accept_loop(listener, tx, max_frame_len));
        debug!(addr = %local_addr, "input channel bound");
        Ok(Self {
            rx,
            acceptor,
            local_addr,
            socket_file,
        })
    }

    /// 实际绑定的地址；TCP 端口为 0 时返回内核分配的端口。
    pub fn local_addr(&self) -> &ChannelAddr {
        &self.local_addr
    }

    /// 等待下一帧。取消安全：超时丢弃该 future 不会丢失已读取的数据。
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Drop for InputChannel {
    fn drop(&mut self) {
        self.acceptor.abort();
        if let Some(path) = self.socket_file.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "failed to remove ipc socket file");
                }
            }
        }
    }
}

async fn accept_loop(listener: Listener, tx: mpsc::Sender<Bytes>, max_frame_len: usize) {
    let mut readers = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((reader, peer)) => {
                    debug!(peer = %peer, "input peer connected");
                    readers.spawn(read_loop(reader, peer, tx.clone(), max_frame_len));
                }
                Err(err) => {
                    warn!(error = %err, "input accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
            _ = tx.closed() => break,
        }
    }
}

async fn read_loop(
    mut reader: BoxedReader,
    peer: String,
    tx: mpsc::Sender<Bytes>,
    max_frame_len: usize,
) {
    loop {
        match read_frame(&mut reader, max_frame_len).await {
            Ok(Some(frame)) => {
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!(peer = %peer, "input peer disconnected");
                break;
            }
            Err(err) => {
                warn!(peer = %peer, error = %err, "dropping input connection");
                break;
            }
        }
    }
}
