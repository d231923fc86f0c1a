use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    extract::ws::rejection::WebSocketUpgradeRejection,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::auth::{AuthVerifier, DecodedToken, Role};
use crate::error::GatewayError;
use crate::registry::{ConnectionHandle, ConnectionRegistry, ConnectionStatus, EvictReason};
use crate::server::AppState;

use super::message::{Envelope, EventType, Outbound};

const OUTBOUND_BUFFER_SIZE: usize = 32;

/// Header used by clients predating the Authorization header support.
const LEGACY_TOKEN_HEADER: &str = "auth_token";

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub auth_token: Option<String>,
}

/// Identity fixed at handshake time. The session id is pinned for the whole
/// life of the connection; token refreshes must present the same session.
#[derive(Debug, Clone)]
struct ConnectionIdentity {
    connection_id: u64,
    user_id: i64,
    session_id: String,
}

pub async fn user_ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    handshake(ws, state, query, headers, Role::User).await
}

pub async fn admin_ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    handshake(ws, state, query, headers, Role::Admin).await
}

/// Authentication and authorization run to completion before the protocol
/// upgrade, so an unauthenticated peer never obtains a live channel.
async fn handshake(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    state: AppState,
    query: WsQuery,
    headers: HeaderMap,
    route_role: Role,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "non-upgrade request on websocket route");
            return GatewayError::MalformedUpgrade.into_response();
        }
    };

    let Some(token) = extract_token(&headers, &query) else {
        return GatewayError::MissingToken.into_response();
    };

    let decoded = match state.verifier.verify(&token).await {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(error = %e, "token verification failed");
            return GatewayError::InvalidToken.into_response();
        }
    };

    if route_role == Role::Admin && decoded.role != Role::Admin {
        tracing::warn!(user_id = decoded.user_id, "admin route refused for non-admin role");
        return GatewayError::InsufficientRole.into_response();
    }

    tracing::info!(
        user_id = decoded.user_id,
        role = ?decoded.role,
        "websocket upgrade authorized"
    );

    ws.on_failed_upgrade(|error| {
        tracing::error!(error = %error, "{}", GatewayError::UpgradeFailed);
    })
    .on_upgrade(move |socket| handle_socket(socket, state, decoded))
}

/// Bearer header first, then the legacy header, then the query parameter.
/// First non-empty candidate wins.
fn extract_token(headers: &HeaderMap, query: &WsQuery) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        if let Ok(text) = value.to_str() {
            if let Some(token) = text.strip_prefix("Bearer ") {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    if let Some(value) = headers.get(LEGACY_TOKEN_HEADER) {
        if let Ok(text) = value.to_str() {
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }

    query
        .auth_token
        .as_deref()
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

async fn handle_socket(socket: WebSocket, state: AppState, decoded: DecodedToken) {
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER_SIZE);

    let handle = ConnectionHandle::new(
        decoded.user_id,
        decoded.role,
        decoded.session_id.clone(),
        tx.clone(),
    );
    let identity = ConnectionIdentity {
        connection_id: handle.connection_id,
        user_id: decoded.user_id,
        session_id: decoded.session_id,
    };
    state.registry.register(handle);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Writer: drains the outbound queue onto the socket. A close frame ends
    // the connection from our side.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match frame {
                Outbound::Close(reason) => {
                    let close = Message::Close(Some(CloseFrame {
                        code: reason.close_code(),
                        reason: reason.as_str().into(),
                    }));
                    let _ = ws_sender.send(close).await;
                    break;
                }
                Outbound::Envelope(envelope) => serde_json::to_string(&envelope),
                Outbound::Notification(notification) => serde_json::to_string(&notification),
            };

            match text {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound frame");
                }
            }
        }
    });

    // Reader: inbound events for this connection, strictly in arrival order.
    let recv_state = state.clone();
    let recv_identity = identity.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(message) => {
                    if !process_message(message, &recv_state, &recv_identity, &tx).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        user_id = recv_identity.user_id,
                        error = %e,
                        "websocket receive error"
                    );
                    break;
                }
            }
        }

        recv_state.registry.evict_connection(
            recv_identity.user_id,
            recv_identity.connection_id,
            EvictReason::PeerClosed,
        );
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    tracing::info!(user_id = identity.user_id, "websocket connection closed");
}

/// Returns false when the receive loop should stop.
async fn process_message(
    message: Message,
    state: &AppState,
    identity: &ConnectionIdentity,
    reply: &mpsc::Sender<Outbound>,
) -> bool {
    match message {
        Message::Text(text) => {
            let outcome = match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => {
                    dispatch_event(state.verifier.as_ref(), &state.registry, identity, envelope)
                        .await
                }
                Err(e) => {
                    tracing::debug!(
                        user_id = identity.user_id,
                        error = %e,
                        "malformed inbound message"
                    );
                    EventOutcome::Reply(Envelope::error("malformed message"))
                }
            };
            apply_outcome(outcome, state, identity, reply)
        }
        Message::Binary(_) => {
            let _ = reply.try_send(Outbound::Envelope(Envelope::error(
                "binary messages are not supported",
            )));
            true
        }
        Message::Ping(_) => true, // axum answers protocol pings itself
        Message::Pong(_) => {
            state.registry.touch_pong(identity.user_id);
            true
        }
        Message::Close(_) => false,
    }
}

/// Side effect of one inbound event.
#[derive(Debug, PartialEq)]
enum EventOutcome {
    Reply(Envelope),
    TouchPong,
    Evict(EvictReason),
}

/// One logical switch over the decoded event type, independent of the
/// transport. The socket loop applies the returned side effect.
async fn dispatch_event(
    verifier: &dyn AuthVerifier,
    registry: &ConnectionRegistry,
    identity: &ConnectionIdentity,
    envelope: Envelope,
) -> EventOutcome {
    match envelope.event {
        EventType::Ping => EventOutcome::Reply(Envelope::event(EventType::Pong)),
        EventType::Pong => EventOutcome::TouchPong,
        EventType::TokenUpdate => {
            let Some(token) = envelope.token else {
                tracing::warn!(user_id = identity.user_id, "token update without a token");
                return EventOutcome::Evict(EvictReason::InvalidToken);
            };

            registry.set_status(identity.user_id, ConnectionStatus::Authenticating);
            match verifier.verify(&token).await {
                Ok(decoded) if decoded.session_id == identity.session_id => {
                    registry.set_status(identity.user_id, ConnectionStatus::Connected);
                    EventOutcome::Reply(Envelope::with_data(
                        EventType::Notification,
                        json!({ "message": "token refreshed" }),
                    ))
                }
                Ok(_) => {
                    // A valid token for a different session must not take
                    // over an existing channel.
                    tracing::warn!(
                        user_id = identity.user_id,
                        "token refresh pinned to a different session"
                    );
                    EventOutcome::Evict(EvictReason::InvalidToken)
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = identity.user_id,
                        error = %e,
                        "token refresh verification failed"
                    );
                    EventOutcome::Evict(EvictReason::InvalidToken)
                }
            }
        }
        other => {
            tracing::debug!(user_id = identity.user_id, event = ?other, "unexpected inbound event");
            EventOutcome::Reply(Envelope::error("unexpected event"))
        }
    }
}

fn apply_outcome(
    outcome: EventOutcome,
    state: &AppState,
    identity: &ConnectionIdentity,
    reply: &mpsc::Sender<Outbound>,
) -> bool {
    match outcome {
        EventOutcome::Reply(envelope) => {
            let _ = reply.try_send(Outbound::Envelope(envelope));
            true
        }
        EventOutcome::TouchPong => {
            state.registry.touch_pong(identity.user_id);
            true
        }
        EventOutcome::Evict(reason) => {
            state.registry.evict_connection(
                identity.user_id,
                identity.connection_id,
                reason,
            );
            false
        }
    }
}
