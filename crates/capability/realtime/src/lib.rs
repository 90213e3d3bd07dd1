//! 实时转发：把总线上的数据点推送给各个在线订阅者。
//!
//! 每个订阅者一个有界队列：
//! - 队列满时只丢弃该订阅者最旧的一条消息，并累计丢弃计数
//! - 连续丢弃达到阈值（期间订阅者未取走任何消息）即进入 `closing` 并被强制断开
//! - 断开（主动退订或连接关闭）后进入 `closed`，队列随之释放
//!
//! 推送路径只持有短时锁，从不等待订阅者。

mod feed;
mod filter;
mod relay;

pub use feed::{MqttRelayConfig, decode_bus_message, spawn_bus_feed, spawn_mqtt_feed};
pub use filter::TopicFilter;
pub use relay::{DispatchReport, Relay, RelayConfig, SubscriberState, Subscription};

/// 实时转发错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("invalid topic filter: {0}")]
    InvalidFilter(String),
    #[error("decode error: {0}")]
    Decode(String),
}
