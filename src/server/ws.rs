use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use super::AppState;
use crate::broadcast::Event;
use crate::registry::TaskFilter;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(event: &Event) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("事件序列化失败: {}", e);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut subscription = state.hub.subscribe();
    let subscriber_id = subscription.id;
    let (mut sender, mut receiver) = socket.split();

    // 连接建立后先发一次完整列表，之后跟随同步循环推送
    let snapshot = Event::ProgressUpdate {
        tasks: state.manager.list_tasks(&TaskFilter::default()),
        daemon_reachable: state.manager.is_daemon_reachable(),
    };
    if let Some(message) = encode(&snapshot) {
        if sender.send(message).await.is_err() {
            state.hub.unsubscribe(subscriber_id);
            return;
        }
    }

    loop {
        tokio::select! {
            event = subscription.recv() => {
                // 推送失败时 hub 已经把我们移除了
                let Some(event) = event else { break };
                let Some(message) = encode(&event) else { continue };
                if sender.send(message).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("WebSocket 读取失败: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unsubscribe(subscriber_id);
    debug!("WebSocket 订阅者 {} 已退出", subscriber_id);
}
