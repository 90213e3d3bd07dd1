use crate::{BusMessage, BusPublisher, PublishError};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{info, warn};

/// MQTT 发布配置。
#[derive(Debug, Clone)]
pub struct MqttPublisherConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub qos: u8,
}

/// MQTT 发布端。
#[derive(Clone)]
pub struct MqttBusPublisher {
    client: AsyncClient,
    qos: QoS,
}

impl MqttBusPublisher {
    /// 建立客户端并在后台驱动事件循环。
    pub fn connect(config: MqttPublisherConfig) -> (Self, tokio::task::JoinHandle<()>) {
        let options = client_options(
            format!("{}-publish", config.client_id),
            &config.host,
            config.port,
            config.username,
            config.password,
        );
        let (client, mut eventloop) = AsyncClient::new(options, 64);
        info!(
            target: "ems.publish",
            host = %config.host,
            port = config.port,
            "mqtt_publisher_started"
        );
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    warn!(target: "ems.publish", error = %err, "mqtt_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        (
            Self {
                client,
                qos: qos_from_u8(config.qos),
            },
            handle,
        )
    }
}

impl BusPublisher for MqttBusPublisher {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn try_publish(&self, message: BusMessage) -> Result<(), PublishError> {
        self.client
            .try_publish(message.topic, self.qos, false, message.payload)
            .map_err(|err| PublishError::Bus(err.to_string()))
    }
}

/// 网关各 MQTT 客户端共用的连接参数（keep-alive 30s，可选账号）。
pub fn client_options(
    client_id: String,
    host: &str,
    port: u16,
    username: Option<String>,
    password: Option<String>,
) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(30));
    if let (Some(username), Some(password)) = (username, password) {
        options.set_credentials(username, password);
    }
    options
}

pub fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// 每次连接成功（含重连）后重新下发订阅。
///
/// 客户端使用 clean session，断线重连后 broker 不保留旧订阅。
/// 返回 `Ok(true)` 表示本事件触发了订阅；订阅请求只入队，不阻塞事件循环。
pub fn resubscribe_on_connack(
    client: &AsyncClient,
    event: &Event,
    topic: &str,
    qos: QoS,
) -> Result<bool, PublishError> {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
            client
                .try_subscribe(topic, qos)
                .map_err(|err| PublishError::Bus(err.to_string()))?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::ConnAck;

    fn connack(code: ConnectReturnCode) -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck::new(code, false)))
    }

    #[test]
    fn qos_defaults_to_at_least_once() {
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(2), QoS::ExactlyOnce);
        assert_eq!(qos_from_u8(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(9), QoS::AtLeastOnce);
    }

    #[test]
    fn every_successful_connack_resubscribes() {
        let options =
            client_options("test-resubscribe".to_string(), "127.0.0.1", 1883, None, None);
        let (client, _eventloop) = AsyncClient::new(options, 10);
        let event = connack(ConnectReturnCode::Success);

        // 首次连接与重连各触发一次
        for _ in 0..2 {
            let subscribed =
                resubscribe_on_connack(&client, &event, "modbus/gateway/#", QoS::AtMostOnce);
            assert!(subscribed.unwrap());
        }
    }

    #[test]
    fn other_events_do_not_subscribe() {
        let options = client_options("test-other".to_string(), "127.0.0.1", 1883, None, None);
        let (client, _eventloop) = AsyncClient::new(options, 10);
        let refused = connack(ConnectReturnCode::NotAuthorized);
        let ping = Event::Incoming(Packet::PingResp);
        assert!(!resubscribe_on_connack(&client, &refused, "cmd", QoS::AtLeastOnce).unwrap());
        assert!(!resubscribe_on_connack(&client, &ping, "cmd", QoS::AtLeastOnce).unwrap());
    }

    #[test]
    fn resubscribe_reports_closed_event_loop() {
        let options = client_options("test-closed".to_string(), "127.0.0.1", 1883, None, None);
        let (client, eventloop) = AsyncClient::new(options, 10);
        drop(eventloop);
        let event = connack(ConnectReturnCode::Success);
        assert!(resubscribe_on_connack(&client, &event, "cmd", QoS::AtLeastOnce).is_err());
    }
}
