//! 事件发布：把数据点按确定的 topic 发布到消息总线。
//!
//! topic 格式：`{prefix}/{device_name}/{slave_id}/{register_type}/{address}`，
//! 载荷为 JSON [`LivePayload`]。发布是尽力而为的，失败只记录日志与计数，
//! 不影响轮询与存储。

mod bus;
mod mqtt;

pub use bus::{BusMessage, BusPublisher, InProcessBus};
pub use mqtt::{
    MqttBusPublisher, MqttPublisherConfig, client_options, qos_from_u8, resubscribe_on_connack,
};

use api_contract::LivePayload;
use domain::{DataPoint, TagSet};
use std::sync::Arc;
use tracing::warn;

/// 发布错误。
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    #[error("encode error: {0}")]
    Encode(String),
    #[error("bus error: {0}")]
    Bus(String),
}

/// 由标签集生成 topic。
pub fn topic_for(prefix: &str, tags: &TagSet) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        prefix.trim_end_matches('/'),
        tags.device_name,
        tags.slave_id,
        tags.register_type.as_str(),
        tags.address
    )
}

/// 事件发布器：同一条消息发往所有已配置的总线。
#[derive(Clone)]
pub struct EventPublisher {
    prefix: String,
    buses: Vec<Arc<dyn BusPublisher>>,
}

impl EventPublisher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
            buses: Vec::new(),
        }
    }

    pub fn with_bus(mut self, bus: Arc<dyn BusPublisher>) -> Self {
        self.buses.push(bus);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 编码为总线消息。
    pub fn encode(&self, point: &DataPoint) -> Result<BusMessage, PublishError> {
        let payload = serde_json::to_vec(&LivePayload::from(point))
            .map_err(|err| PublishError::Encode(err.to_string()))?;
        Ok(BusMessage {
            topic: topic_for(&self.prefix, &point.tags),
            payload,
        })
    }

    /// 发布数据点；不阻塞、不返回错误。
    pub fn publish(&self, point: &DataPoint) {
        let message = match self.encode(point) {
            Ok(message) => message,
            Err(err) => {
                ems_telemetry::record_publish_failure();
                warn!(
                    target: "ems.publish",
                    device_name = %point.tags.device_name,
                    address = point.tags.address,
                    error = %err,
                    "publish_encode_failed"
                );
                return;
            }
        };
        for bus in &self.buses {
            if let Err(err) = bus.try_publish(message.clone()) {
                ems_telemetry::record_publish_failure();
                warn!(
                    target: "ems.publish",
                    bus = bus.name(),
                    topic = %message.topic,
                    error = %err,
                    "publish_failed"
                );
            }
        }
    }
}
