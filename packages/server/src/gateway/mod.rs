//! Real-time gateway.
//!
//! WebSocket endpoint that relays job progress to authenticated clients.
//! Each connection is auto-joined to its owner's room and may additionally
//! subscribe to individual quiz rooms.

pub mod rooms;

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamMap;
use tracing::{debug, info, warn};

use crate::auth::JwtService;
use rooms::RoomRegistry;

pub fn owner_room(owner_id: &str) -> String {
    format!("user:{owner_id}")
}

pub fn quiz_room(quiz_id: &str) -> String {
    format!("quiz:{quiz_id}")
}

#[derive(Clone)]
pub struct GatewayState {
    pub rooms: RoomRegistry,
    pub jwt: Arc<JwtService>,
}

pub fn router(state: GatewayState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Subscribe {
        #[serde(rename = "quizId")]
        quiz_id: String,
    },
    Unsubscribe {
        #[serde(rename = "quizId")]
        quiz_id: String,
    },
    Ping,
}

/// Token comes from the `Authorization` header (with or without a `Bearer `
/// prefix) or a `token` query parameter. Verification happens before the
/// upgrade so a bad token gets a plain 401 instead of a dropped socket.
fn extract_token(headers: &HeaderMap, query: &WsQuery) -> Option<String> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        let token = value.strip_prefix("Bearer ").unwrap_or(value);
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    query.token.clone()
}

async fn ws_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(token) = extract_token(&headers, &query) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let claims = match state.jwt.verify_token(&token) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "rejecting websocket upgrade");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let user_id = claims.sub;
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
        .into_response()
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState, user_id: String) {
    info!(user_id = %user_id, "websocket connected");

    let mut streams: StreamMap<String, BroadcastStream<serde_json::Value>> = StreamMap::new();
    let owner = owner_room(&user_id);
    streams.insert(owner.clone(), BroadcastStream::new(state.rooms.join(&owner).await));
    let mut subscriptions: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                match message {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Subscribe { quiz_id }) => {
                                // Any authenticated user may watch any quiz id;
                                // ownership is not re-checked here.
                                let room = quiz_room(&quiz_id);
                                if subscriptions.insert(quiz_id) {
                                    let rx = state.rooms.join(&room).await;
                                    streams.insert(room, BroadcastStream::new(rx));
                                }
                            }
                            Ok(ClientMessage::Unsubscribe { quiz_id }) => {
                                if subscriptions.remove(&quiz_id) {
                                    streams.remove(&quiz_room(&quiz_id));
                                }
                            }
                            Ok(ClientMessage::Ping) => {
                                let pong = json!({ "type": "pong", "timestamp": Utc::now() });
                                if socket.send(Message::Text(pong.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(user_id = %user_id, error = %e, "ignoring malformed client message");
                            }
                        }
                    }
                    Message::Close(_) => break,
                    // axum answers protocol-level pings itself
                    _ => {}
                }
            }
            Some((room, event)) = streams.next() => {
                match event {
                    Ok(value) => {
                        if socket.send(Message::Text(value.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(user_id = %user_id, room = %room, skipped, "slow websocket client lagged");
                    }
                }
            }
            else => break,
        }
    }

    drop(streams);
    state.rooms.cleanup().await;
    info!(user_id = %user_id, "websocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_map(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", value.parse().unwrap());
        headers
    }

    #[test]
    fn token_from_bearer_header() {
        let headers = header_map("Bearer abc123");
        let query = WsQuery { token: None };
        assert_eq!(extract_token(&headers, &query).as_deref(), Some("abc123"));
    }

    #[test]
    fn token_from_bare_header() {
        let headers = header_map("abc123");
        let query = WsQuery { token: None };
        assert_eq!(extract_token(&headers, &query).as_deref(), Some("abc123"));
    }

    #[test]
    fn token_falls_back_to_query_param() {
        let headers = HeaderMap::new();
        let query = WsQuery {
            token: Some("qtoken".to_string()),
        };
        assert_eq!(extract_token(&headers, &query).as_deref(), Some("qtoken"));
    }

    #[test]
    fn no_token_anywhere() {
        let headers = HeaderMap::new();
        let query = WsQuery { token: None };
        assert!(extract_token(&headers, &query).is_none());
    }

    #[test]
    fn client_messages_parse() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","quizId":"pdf-1"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { quiz_id } if quiz_id == "pdf-1"));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }
}
