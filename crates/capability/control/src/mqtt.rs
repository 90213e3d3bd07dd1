//! MQTT 命令通道：订阅命令 topic，执行后把结果发布到 `{response_prefix}/{correlation_id}`。

use crate::{CommandExecutor, ControlError};
use api_contract::{WriteRegisterRequest, WriteResponse};
use domain::CommandOutcome;
use ems_publish::{client_options, qos_from_u8, resubscribe_on_connack};
use rumqttc::{AsyncClient, Event, Packet};
use std::time::Duration;
use tracing::{info, warn};

/// MQTT 命令通道配置。
#[derive(Debug, Clone)]
pub struct MqttCommandConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub command_topic: String,
    pub response_topic_prefix: String,
    pub qos: u8,
}

/// 解析命令载荷（JSON）。
pub fn parse_command_payload(payload: &[u8]) -> Result<WriteRegisterRequest, ControlError> {
    if payload.is_empty() {
        return Err(ControlError::Payload("empty payload".to_string()));
    }
    serde_json::from_slice(payload).map_err(|err| ControlError::Payload(err.to_string()))
}

pub fn response_topic(prefix: &str, correlation_id: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), correlation_id)
}

/// 处理一条命令消息，返回 (correlation_id, 响应)。
async fn handle_payload(executor: &CommandExecutor, payload: &[u8]) -> (String, WriteResponse) {
    let request = match parse_command_payload(payload) {
        Ok(request) => request,
        Err(err) => {
            let correlation_id = ems_telemetry::new_correlation_id();
            ems_telemetry::record_command_rejected();
            let outcome = CommandOutcome::rejected(err.to_string())
                .with_correlation_id(Some(correlation_id.clone()));
            return (correlation_id, WriteResponse::from_outcome(&outcome, None));
        }
    };
    let correlation_id = request
        .correlation_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(ems_telemetry::new_correlation_id);
    let details = serde_json::to_value(&request).ok();
    let outcome = match request.to_command() {
        Ok(mut command) => {
            command.correlation_id = Some(correlation_id.clone());
            executor.submit(command).await
        }
        Err(err) => {
            ems_telemetry::record_command_rejected();
            CommandOutcome::rejected(err.to_string())
                .with_correlation_id(Some(correlation_id.clone()))
        }
    };
    (correlation_id, WriteResponse::from_outcome(&outcome, details))
}

/// 启动命令监听；每条命令在独立任务中执行，事件循环不被设备写入阻塞。
pub fn spawn_command_listener(
    executor: CommandExecutor,
    config: MqttCommandConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let options = client_options(
            format!("{}-control", config.client_id),
            &config.host,
            config.port,
            config.username,
            config.password,
        );
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let qos = qos_from_u8(config.qos);
        info!(
            target: "ems.control",
            topic = %config.command_topic,
            "mqtt_command_listener_started"
        );

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let executor = executor.clone();
                    let client = client.clone();
                    let prefix = config.response_topic_prefix.clone();
                    tokio::spawn(async move {
                        let (correlation_id, response) =
                            handle_payload(&executor, &publish.payload).await;
                        let topic = response_topic(&prefix, &correlation_id);
                        let body = match serde_json::to_vec(&response) {
                            Ok(body) => body,
                            Err(err) => {
                                warn!(
                                    target: "ems.control",
                                    error = %err,
                                    "command_response_encode_failed"
                                );
                                return;
                            }
                        };
                        if let Err(err) = client.publish(topic.clone(), qos, false, body).await {
                            warn!(
                                target: "ems.control",
                                topic = %topic,
                                error = %err,
                                "command_response_publish_failed"
                            );
                        } else {
                            info!(
                                target: "ems.control",
                                topic = %topic,
                                status = %response.status,
                                "command_response_published"
                            );
                        }
                    });
                }
                Ok(event) => {
                    match resubscribe_on_connack(&client, &event, &config.command_topic, qos) {
                        Ok(true) => info!(
                            target: "ems.control",
                            topic = %config.command_topic,
                            "mqtt_command_subscribed"
                        ),
                        Ok(false) => {}
                        Err(err) => {
                            warn!(
                                target: "ems.control",
                                error = %err,
                                "mqtt_command_subscribe_failed"
                            );
                        }
                    }
                }
                Err(err) => {
                    warn!(target: "ems.control", error = %err, "mqtt_command_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}
