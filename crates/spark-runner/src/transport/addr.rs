use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const TCP_SCHEME: &str = "tcp://";
const IPC_SCHEME: &str = "ipc://";

/// 数据通道端点地址。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 设置文件与环境变量中的地址均以 URL 形式书写（`tcp://host:port`、`ipc:///path`），
///   在进入运行时之前统一解析，非法 scheme 在启动阶段即被拒绝；
/// - 输入端与输出端共用同一类型，测试可直接用它搭建对端。
///
/// ## 契约 (What)
/// - `Tcp` 保存 `host:port`，端口必须是合法 `u16`，`0` 表示由内核分配；
/// - `Ipc` 保存 Unix 域套接字路径，必须为非空绝对路径；
/// - `Display` 输出与解析输入互逆，可直接回写设置文件。
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelAddr {
    Tcp(String),
    Ipc(PathBuf),
}

/// 地址解析失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid channel address `{value}`: {reason}")]
pub struct AddrParseError {
    pub value: String,
    pub reason: String,
}

impl AddrParseError {
    fn new(value: &str, reason: impl Into<String>) -> Self {
        Self {
            value: value.to_owned(),
            reason: reason.into(),
        }
    }
}

impl ChannelAddr {
    pub fn tcp(host_port: impl Into<String>) -> Self {
        ChannelAddr::Tcp(host_port.into())
    }

    pub fn ipc(path: impl Into<PathBuf>) -> Self {
        ChannelAddr::Ipc(path.into())
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            ChannelAddr::Tcp(_) => "tcp",
            ChannelAddr::Ipc(_) => "ipc",
        }
    }
}

impl FromStr for ChannelAddr {
    type Err = AddrParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        if let Some(rest) = value.strip_prefix(TCP_SCHEME) {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| AddrParseError::new(value, "expected tcp://host:port"))?;
            if host.is_empty() {
                return Err(AddrParseError::new(value, "missing host"));
            }
            port.parse::<u16>()
                .map_err(|_| AddrParseError::new(value, format!("invalid port `{port}`")))?;
            return Ok(ChannelAddr::Tcp(rest.to_owned()));
        }
        if let Some(rest) = value.strip_prefix(IPC_SCHEME) {
            if rest.is_empty() {
                return Err(AddrParseError::new(value, "missing socket path"));
            }
            let path = PathBuf::from(rest);
            if !path.is_absolute() {
                return Err(AddrParseError::new(value, "ipc path must be absolute"));
            }
            return Ok(ChannelAddr::Ipc(path));
        }
        let reason = match value.split_once("://") {
            Some((scheme, _)) => format!("unsupported scheme `{scheme}` (expected tcp or ipc)"),
            None => "missing scheme (expected tcp:// or ipc://)".to_owned(),
        };
        Err(AddrParseError::new(value, reason))
    }
}

impl TryFrom<String> for ChannelAddr {
    type Error = AddrParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelAddr> for String {
    fn from(addr: ChannelAddr) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for ChannelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAddr::Tcp(host_port) => write!(f, "{TCP_SCHEME}{host_port}"),
            ChannelAddr::Ipc(path) => write!(f, "{IPC_SCHEME}{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_schemes() {
        assert_eq!(
            "tcp://127.0.0.1:5555".parse::<ChannelAddr>().unwrap(),
            ChannelAddr::tcp("127.0.0.1:5555")
        );
        assert_eq!(
            "ipc:///tmp/engine.ipc".parse::<ChannelAddr>().unwrap(),
            ChannelAddr::ipc("/tmp/engine.ipc")
        );
        assert_eq!(
            ChannelAddr::ipc("/tmp/engine.ipc").to_string(),
            "ipc:///tmp/engine.ipc"
        );
    }

    #[test]
    fn rejects_unknown_scheme_and_bad_ports() {
        let err = "inproc://x".parse::<ChannelAddr>().unwrap_err();
        assert!(err.reason.contains("inproc"), "错误信息应指出非法 scheme");
        assert!("tcp://localhost:99999".parse::<ChannelAddr>().is_err());
        assert!("tcp://:80".parse::<ChannelAddr>().is_err());
        assert!("ipc://relative.ipc".parse::<ChannelAddr>().is_err());
        assert!("127.0.0.1:80".parse::<ChannelAddr>().is_err());
    }
}
