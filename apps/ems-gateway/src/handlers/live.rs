//! 实时推送
//!
//! - GET /ws/live?topic=<filter>
//!
//! 每个连接对应转发器中的一个订阅者；订阅被强制关闭时发送 Close 帧后断开。

use crate::AppState;
use crate::utils::response::bad_request_error;
use api_contract::SubscribeQuery;
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use ems_realtime::Subscription;
use futures_util::{sink::SinkExt, stream::StreamExt};
use tracing::{debug, warn};

pub async fn live_updates(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let filter = query.topic.filter(|topic| !topic.trim().is_empty());
    let subscription = match state.relay.subscribe(filter.as_deref()) {
        Ok(subscription) => subscription,
        Err(err) => return bad_request_error(err.to_string()),
    };
    ws.on_upgrade(move |socket| serve_subscriber(socket, subscription))
}

async fn serve_subscriber(socket: WebSocket, subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            message = subscription.recv() => {
                let Some(message) = message else {
                    debug!(
                        target: "ems.relay",
                        subscriber_id = subscription.id(),
                        "ws_subscription_closed"
                    );
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(message.as_ref()) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(target: "ems.relay", error = %err, "ws_encode_failed");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    drop(subscription);
}
