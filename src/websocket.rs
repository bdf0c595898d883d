use crate::auth::TokenManager;
use crate::error::{AppError, AppResult};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info, warn};
use uuid::Uuid;

/// WebSocket message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    /// Authenticate and join the caller's `user:{id}` channel
    #[serde(rename = "subscribe")]
    Subscribe { token: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe,
    #[serde(rename = "balance_updated")]
    BalanceUpdated {
        user_id: Uuid,
        balance: i64,
        version: i64,
        correlation_id: Uuid,
    },
    #[serde(rename = "friend_request_received")]
    FriendRequestReceived {
        request_id: Uuid,
        from_user_id: Uuid,
    },
    #[serde(rename = "friend_request_resolved")]
    FriendRequestResolved {
        request_id: Uuid,
        to_user_id: Uuid,
        accepted: bool,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Message tagged with the channel it was published on
#[derive(Debug, Clone)]
struct Envelope {
    channel: String,
    message: WsMessage,
}

pub fn user_channel(user_id: Uuid) -> String {
    format!("user:{}", user_id)
}

/// WebSocket server pushing account and friend-graph updates to their owners
pub struct WebSocketServer {
    tx: broadcast::Sender<Envelope>,
    tokens: Arc<TokenManager>,
    /// Active subscriptions: channel -> client IDs
    subscriptions: Arc<RwLock<HashMap<String, Vec<Uuid>>>>,
    /// Client subscriptions: client_id -> channels
    client_channels: Arc<RwLock<HashMap<Uuid, Vec<String>>>>,
}

impl WebSocketServer {
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        let (tx, _) = broadcast::channel(1000); // Buffer up to 1000 messages

        Self {
            tx,
            tokens,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            client_channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish a message to every subscriber of `channel`; no-op without subscribers
    pub async fn broadcast_to_channel(&self, channel: &str, message: WsMessage) {
        let subscriptions = self.subscriptions.read().await;

        let count = subscriptions.get(channel).map_or(0, Vec::len);
        if count == 0 {
            return;
        }

        info!("Broadcasting to {} subscribers on channel {}", count, channel);
        let envelope = Envelope {
            channel: channel.to_string(),
            message,
        };
        if let Err(e) = self.tx.send(envelope) {
            warn!("Failed to broadcast message: {}", e);
        }
    }

    pub async fn broadcast_to_user(&self, user_id: Uuid, message: WsMessage) {
        self.broadcast_to_channel(&user_channel(user_id), message).await;
    }

    pub async fn notify_balance(&self, user_id: Uuid, balance: i64, version: i64, correlation_id: Uuid) {
        let message = WsMessage::BalanceUpdated {
            user_id,
            balance,
            version,
            correlation_id,
        };
        self.broadcast_to_user(user_id, message).await;
    }

    /// Verify `token` and subscribe the client to its owner's channel
    pub async fn subscribe_with_token(&self, client_id: Uuid, token: &str) -> AppResult<String> {
        let claims = self.tokens.verify(token)?;
        let channel = user_channel(claims.sub);
        self.subscribe(client_id, channel.clone()).await;
        Ok(channel)
    }

    pub async fn subscribe(&self, client_id: Uuid, channel: String) {
        let mut subscriptions = self.subscriptions.write().await;
        let mut client_channels = self.client_channels.write().await;

        let subscribers = subscriptions.entry(channel.clone()).or_default();
        if !subscribers.contains(&client_id) {
            subscribers.push(client_id);
        }

        let channels = client_channels.entry(client_id).or_default();
        if !channels.contains(&channel) {
            channels.push(channel.clone());
        }

        info!("Client {} subscribed to {}", client_id, channel);
    }

    /// Drop every subscription held by a client
    pub async fn unsubscribe_all(&self, client_id: Uuid) {
        let mut subscriptions = self.subscriptions.write().await;
        let mut client_channels = self.client_channels.write().await;

        for channel in client_channels.remove(&client_id).unwrap_or_default() {
            if let Some(subscribers) = subscriptions.get_mut(&channel) {
                subscribers.retain(|&id| id != client_id);
                if subscribers.is_empty() {
                    subscriptions.remove(&channel);
                }
            }
            info!("Client {} unsubscribed from {}", client_id, channel);
        }
    }

    pub async fn is_client_subscribed(&self, client_id: Uuid, channel: &str) -> bool {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .get(channel)
            .is_some_and(|subscribers| subscribers.contains(&client_id))
    }

    /// Handle a new WebSocket connection
    pub async fn handle_connection(&self, stream: tokio::net::TcpStream) -> AppResult<()> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| AppError::Message(format!("WebSocket handshake failed: {}", e)))?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let mut rx = self.tx.subscribe();
        let client_id = Uuid::new_v4();

        info!("New WebSocket connection: {}", client_id);

        let welcome = serde_json::json!({
            "type": "connected",
            "client_id": client_id.to_string(),
        });
        if let Err(e) = ws_sender.send(Message::Text(welcome.to_string())).await {
            warn!("Failed to send welcome message: {}", e);
        }

        // Shared between the reader and the broadcast forwarder
        let ws_sender = Arc::new(tokio::sync::Mutex::new(ws_sender));

        // Forwarder lives exactly as long as the reader loop below
        let server = self.clone();
        let forward_sender = ws_sender.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                let envelope = match rx.recv().await {
                    Ok(envelope) => envelope,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagged, skipped {} messages", client_id, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if !server.is_client_subscribed(client_id, &envelope.channel).await {
                    continue;
                }

                let json = match serde_json::to_string(&envelope.message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };

                let mut sender = forward_sender.lock().await;
                if let Err(e) = sender.send(Message::Text(json)).await {
                    warn!("Client {} went away: {}", client_id, e);
                    break;
                }
            }
        });

        while let Some(msg) = ws_receiver.next().await {
            let reply = match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::Subscribe { token }) => {
                        match self.subscribe_with_token(client_id, &token).await {
                            Ok(channel) => serde_json::json!({
                                "type": "subscribed",
                                "channel": channel,
                            }),
                            Err(e) => {
                                warn!("Rejected subscription from client {}: {}", client_id, e);
                                serde_json::json!({
                                    "type": "error",
                                    "message": "Invalid or expired token",
                                })
                            }
                        }
                    }
                    Ok(WsMessage::Unsubscribe) => {
                        self.unsubscribe_all(client_id).await;
                        serde_json::json!({ "type": "unsubscribed" })
                    }
                    Ok(_) => {
                        warn!("Unexpected message type from client {}", client_id);
                        serde_json::json!({
                            "type": "error",
                            "message": "Unsupported message type",
                        })
                    }
                    Err(_) => {
                        warn!("Failed to parse message from client {}: {}", client_id, text);
                        serde_json::json!({
                            "type": "error",
                            "message": "Invalid message format",
                        })
                    }
                },
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed: {}", client_id);
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => continue,
            };

            let mut sender = ws_sender.lock().await;
            if let Err(e) = sender.send(Message::Text(reply.to_string())).await {
                warn!("Failed to reply to client {}: {}", client_id, e);
                break;
            }
        }

        self.unsubscribe_all(client_id).await;
        forwarder.abort();
        // Resolves once the task is dropped, releasing its receiver and write half
        let _ = forwarder.await;

        info!("WebSocket client {} disconnected", client_id);
        Ok(())
    }
}

impl Clone for WebSocketServer {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            tokens: Arc::clone(&self.tokens),
            subscriptions: Arc::clone(&self.subscriptions),
            client_channels: Arc::clone(&self.client_channels),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;

    fn server() -> (WebSocketServer, Arc<TokenManager>) {
        let tokens = Arc::new(TokenManager::new(&AuthConfig::default()));
        (WebSocketServer::new(tokens.clone()), tokens)
    }

    #[test]
    fn test_message_wire_format() {
        let msg: WsMessage = serde_json::from_str(r#"{"type":"subscribe","token":"abc"}"#).unwrap();
        assert_eq!(msg, WsMessage::Subscribe { token: "abc".to_string() });

        let json = serde_json::to_value(WsMessage::BalanceUpdated {
            user_id: Uuid::nil(),
            balance: 70,
            version: 2,
            correlation_id: Uuid::nil(),
        })
        .unwrap();
        assert_eq!(json["type"], "balance_updated");
        assert_eq!(json["balance"], 70);
    }

    #[tokio::test]
    async fn test_subscribe_with_token_joins_owner_channel() {
        let (server, tokens) = server();
        let user_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        let token = tokens.issue(user_id, "john@example.com").unwrap();

        let channel = server.subscribe_with_token(client_id, &token).await.unwrap();
        assert_eq!(channel, user_channel(user_id));
        assert!(server.is_client_subscribed(client_id, &channel).await);

        server.unsubscribe_all(client_id).await;
        assert!(!server.is_client_subscribed(client_id, &channel).await);
    }

    #[tokio::test]
    async fn test_bad_token_is_rejected() {
        let (server, _) = server();
        let result = server.subscribe_with_token(Uuid::new_v4(), "garbage").await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_subscribed_channels() {
        let (server, _) = server();
        let mut rx = server.tx.subscribe();
        let user_id = Uuid::new_v4();

        // Nobody listening: dropped before reaching the bus
        server.notify_balance(user_id, 10, 1, Uuid::nil()).await;
        assert!(rx.try_recv().is_err());

        server.subscribe(Uuid::new_v4(), user_channel(user_id)).await;
        server.notify_balance(user_id, 20, 2, Uuid::nil()).await;
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.channel, user_channel(user_id));
        assert!(matches!(envelope.message, WsMessage::BalanceUpdated { balance: 20, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_closed_connections_release_their_receivers() {
        use tokio::net::TcpListener;
        use tokio_tungstenite::connect_async;

        let (server, tokens) = server();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let acceptor = server.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let ws = acceptor.clone();
                tokio::spawn(async move { ws.handle_connection(stream).await });
            }
        });

        let mut clients = Vec::new();
        for _ in 0..3 {
            let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
            let welcome = client.next().await.unwrap().unwrap();
            assert!(welcome.to_text().unwrap().contains("connected"));

            let token = tokens.issue(Uuid::new_v4(), "john@example.com").unwrap();
            let subscribe = serde_json::json!({ "type": "subscribe", "token": token });
            client.send(Message::Text(subscribe.to_string())).await.unwrap();
            let reply = client.next().await.unwrap().unwrap();
            assert!(reply.to_text().unwrap().contains("subscribed"));

            clients.push(client);
        }
        assert_eq!(server.tx.receiver_count(), 3);

        for mut client in clients {
            client.close(None).await.unwrap();
        }

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while server.tx.receiver_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(server.tx.receiver_count(), 0);
        assert!(server.client_channels.read().await.is_empty());
    }
}
