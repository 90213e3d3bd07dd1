//! 转发数据来源：进程内总线或 MQTT 订阅。

use crate::{Relay, RelayError};
use api_contract::{LivePayload, LiveUpdateMessage, LiveValue, TagsDto};
use domain::now_epoch_ms;
use ems_publish::{BusMessage, client_options, resubscribe_on_connack};
use rumqttc::{AsyncClient, Event, Packet, QoS};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 解析总线消息。
///
/// 载荷优先按 JSON [`LivePayload`] 解析；否则按纯文本值处理，
/// 标签取 topic 末尾四段：`{device_name}/{slave_id}/{register_type}/{address}`。
pub fn decode_bus_message(topic: &str, payload: &[u8]) -> Result<LiveUpdateMessage, RelayError> {
    if let Ok(payload) = serde_json::from_slice::<LivePayload>(payload) {
        return Ok(LiveUpdateMessage {
            topic: topic.to_string(),
            payload,
        });
    }
    let text = std::str::from_utf8(payload).map_err(|err| RelayError::Decode(err.to_string()))?;
    let value = LiveValue::parse_plain(text)
        .ok_or_else(|| RelayError::Decode(format!("unsupported payload: {}", text.trim())))?;
    let parts: Vec<&str> = topic
        .trim_matches('/')
        .split('/')
        .filter(|part| !part.is_empty())
        .collect();
    if parts.len() < 4 {
        return Err(RelayError::Decode(format!("topic too short: {}", topic)));
    }
    let tail = &parts[parts.len() - 4..];
    let tags = TagsDto {
        device_name: tail[0].to_string(),
        slave_id: tail[1].to_string(),
        register_name: String::new(),
        register_type: tail[2].to_string(),
        address: tail[3].to_string(),
    };
    tags.to_tag_set()
        .map_err(|err| RelayError::Decode(err.to_string()))?;
    Ok(LiveUpdateMessage {
        topic: topic.to_string(),
        payload: LivePayload {
            timestamp: now_epoch_ms(),
            value,
            tags,
        },
    })
}

fn forward(relay: &Relay, topic: &str, payload: &[u8]) {
    match decode_bus_message(topic, payload) {
        Ok(message) => {
            let report = relay.dispatch(message);
            debug!(
                target: "ems.relay",
                topic = %topic,
                matched = report.matched,
                dropped = report.dropped,
                "relay_dispatched"
            );
        }
        Err(err) => {
            warn!(target: "ems.relay", topic = %topic, error = %err, "relay_message_skipped");
        }
    }
}

/// 从进程内总线读取并转发，总线关闭后退出。
pub fn spawn_bus_feed(relay: Relay, mut rx: broadcast::Receiver<BusMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => forward(&relay, &message.topic, &message.payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "ems.relay", skipped, "relay_feed_lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!(target: "ems.relay", "relay_feed_closed");
                    return;
                }
            }
        }
    })
}

/// MQTT 转发源配置。
#[derive(Debug, Clone)]
pub struct MqttRelayConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub topic_prefix: String,
}

/// 订阅 `{topic_prefix}/#` 并转发；每次（重）连接成功后重新订阅。
pub fn spawn_mqtt_feed(relay: Relay, config: MqttRelayConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let options = client_options(
            format!("{}-relay", config.client_id),
            &config.host,
            config.port,
            config.username,
            config.password,
        );
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let topic = format!("{}/#", config.topic_prefix.trim_end_matches('/'));
        info!(target: "ems.relay", topic = %topic, "mqtt_relay_started");

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    forward(&relay, &publish.topic, &publish.payload);
                }
                Ok(event) => {
                    match resubscribe_on_connack(&client, &event, &topic, QoS::AtMostOnce) {
                        Ok(true) => {
                            info!(target: "ems.relay", topic = %topic, "mqtt_relay_subscribed");
                        }
                        Ok(false) => {}
                        Err(err) => {
                            warn!(target: "ems.relay", error = %err, "mqtt_subscribe_failed");
                        }
                    }
                }
                Err(err) => {
                    warn!(target: "ems.relay", error = %err, "mqtt_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}
