//! # transport 模块说明
//!
//! ## 角色定位（Why）
//! - 为引擎提供数据面：一个监听式输入通道与若干惰性拨号的输出通道；
//! - 负载对运行时不透明，只做长度前缀分帧（4 字节大端长度 + 负载）。
//!
//! ## 契约（What）
//! - [`ChannelAddr`]：`tcp://host:port` 或 `ipc:///path`，其余 scheme 在解析时拒绝；
//! - [`InputChannel`]：绑定 `engine_addr`，多对端汇聚为有序帧队列；
//! - [`OutputChannel`] / [`FanOut`]：每个下游独立拨号、独立超时、失败后重拨。

mod addr;
pub mod frame;
mod input;
mod output;

pub use addr::{AddrParseError, ChannelAddr};
pub use input::InputChannel;
pub use output::{DeliveryReport, FanOut, OutputChannel};
