//! WebSocket stream of shop events for staff dashboards

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use crate::auth::AuthService;
use crate::error::ApiError;
use crate::middleware::auth::AuthRejection;
use crate::events::{EventBus, ShopEvent};
use crate::users::Capability;

/// WebSocket server state
#[derive(Clone)]
pub struct WsState {
    pub events: EventBus,
    /// Connected clients registry
    pub clients: Arc<RwLock<HashMap<String, ClientInfo>>>,
}

/// Client connection information
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub client_id: String,
    pub user_id: u64,
    /// Event kinds to forward; empty means all
    pub kinds: Vec<String>,
}

impl ClientInfo {
    fn wants(&self, event: &ShopEvent) -> bool {
        self.kinds.is_empty() || self.kinds.iter().any(|k| k == event.kind())
    }
}

/// Client message types
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe { kinds: Vec<String> },
    Unsubscribe { kinds: Vec<String> },
    Ping,
}

/// Server message types
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Event { event: ShopEvent },
    Subscribed { kinds: Vec<String> },
    Unsubscribed { kinds: Vec<String> },
    Lagged { missed: u64 },
    Pong,
}

#[derive(Debug, Deserialize)]
pub struct WsAuth {
    /// Browsers cannot set headers on upgrade requests
    pub token: String,
}

impl WsState {
    /// Create new WebSocket state over the shop's event bus
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn register_client(&self, client_id: String, user_id: u64) {
        let mut clients = self.clients.write().await;
        clients.insert(
            client_id.clone(),
            ClientInfo {
                client_id,
                user_id,
                kinds: vec![],
            },
        );
    }

    async fn unregister_client(&self, client_id: &str) {
        let mut clients = self.clients.write().await;
        clients.remove(client_id);
        tracing::info!(client_id, "Event stream client disconnected");
    }

    async fn update_subscriptions(&self, client_id: &str, f: impl FnOnce(&mut Vec<String>)) {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get_mut(client_id) {
            f(&mut client.kinds);
        }
    }
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(auth): Query<WsAuth>,
    State(state): State<WsState>,
    State(auth_service): State<AuthService>,
) -> Response {
    let actor = match auth_service.authorize(&auth.token).await {
        Ok(actor) => actor,
        Err(rejection) => return AuthRejection::from(rejection).into_response(),
    };
    if let Err(err) = actor.require(Capability::ViewReports) {
        return ApiError::from(err).into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, actor.user_id))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: WsState, user_id: u64) {
    let client_id = Uuid::new_v4().to_string();
    state.register_client(client_id.clone(), user_id).await;
    tracing::info!(client_id = %client_id, user_id, "Event stream client connected");

    let (mut sender, mut receiver) = socket.split();

    // Confirmations from recv_task go out through the send task
    let (internal_tx, mut internal_rx) = mpsc::channel::<ServerMessage>(32);

    let mut rx = state.events.subscribe();
    let client_id_send = client_id.clone();
    let state_send = state.clone();

    let mut send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => {
                        let clients = state_send.clients.read().await;
                        match clients.get(&client_id_send) {
                            Some(client) if client.wants(&event) => ServerMessage::Event { event },
                            _ => continue,
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(client_id = %client_id_send, missed, "Event stream client lagging");
                        ServerMessage::Lagged { missed }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(msg) = internal_rx.recv() => msg,
                else => break,
            };

            if let Ok(text) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    let state_recv = state.clone();
    let client_id_recv = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
                        tracing::debug!(client_id = %client_id_recv, "Ignoring malformed client message");
                        continue;
                    };
                    let response = match client_msg {
                        ClientMessage::Subscribe { kinds } => {
                            let added = kinds.clone();
                            state_recv
                                .update_subscriptions(&client_id_recv, move |current| {
                                    for kind in added {
                                        if !current.contains(&kind) {
                                            current.push(kind);
                                        }
                                    }
                                })
                                .await;
                            ServerMessage::Subscribed { kinds }
                        }
                        ClientMessage::Unsubscribe { kinds } => {
                            let removed = kinds.clone();
                            state_recv
                                .update_subscriptions(&client_id_recv, move |current| {
                                    current.retain(|k| !removed.contains(k))
                                })
                                .await;
                            ServerMessage::Unsubscribed { kinds }
                        }
                        ClientMessage::Ping => ServerMessage::Pong,
                    };
                    if internal_tx.send(response).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.unregister_client(&client_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn approved() -> ShopEvent {
        ShopEvent::TopupApproved {
            topup_id: 1,
            user_id: 2,
            amount: Decimal::ONE,
            new_balance: Decimal::ONE,
        }
    }

    #[test]
    fn test_empty_subscription_receives_everything() {
        let client = ClientInfo::default();
        assert!(client.wants(&approved()));
    }

    #[test]
    fn test_kind_filter() {
        let client = ClientInfo {
            kinds: vec!["receipt_flagged".into()],
            ..ClientInfo::default()
        };
        assert!(!client.wants(&approved()));
    }

    #[test]
    fn test_client_messages_parse() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","kinds":["topup_submitted"]}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { kinds } if kinds.len() == 1));
        let pong = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(pong["type"], "pong");
    }

    #[tokio::test]
    async fn test_registry_tracks_clients() {
        let state = WsState::new(EventBus::default());
        state.register_client("c1".into(), 1).await;
        state
            .update_subscriptions("c1", |kinds| kinds.push("purchase_completed".into()))
            .await;
        assert_eq!(state.client_count().await, 1);
        assert_eq!(
            state.clients.read().await["c1"].kinds,
            vec!["purchase_completed".to_string()]
        );
        state.unregister_client("c1").await;
        assert_eq!(state.client_count().await, 0);
    }
}
