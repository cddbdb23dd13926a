//! WebSocket transport for live subscribers
//!
//! Each socket gets a [`ChannelHandle`] bounded by
//! `realtime.outbound_queue_bound`. The registry owns the only strong
//! reference to that handle, so once the connection has been pruned (or has
//! left every topic) the outbound channel closes and the socket is closed
//! with it.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use realtime::{
    ChannelHandle, ConnectionHandle, ConnectionId, InboundMessage, OutboundMessage, Topic,
    TopicType,
};
use serde::Deserialize;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use super::error::{ApiError, ApiResult};
use super::handlers::ResponseRequest;
use super::AppState;

/// Query string of the upgrade request
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub topic_type: String,
    pub topic_id: String,
    pub subscriber_id: String,
}

/// GET /ws
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> ApiResult<Response> {
    let topic_type: TopicType = params.topic_type.parse()?;
    if params.topic_id.trim().is_empty() || params.subscriber_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "topic_id and subscriber_id are required".to_string(),
        ));
    }
    let topic = Topic::new(topic_type, params.topic_id);
    let subscriber_id = params.subscriber_id;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, topic, subscriber_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, topic: Topic, subscriber_id: String) {
    let registry = Arc::clone(state.gatehouse.registry());
    let bound = state.gatehouse.config().realtime.outbound_queue_bound;

    let (handle, mut outbound) = ChannelHandle::new(bound);
    let connection_id = handle.id();
    let handle: Arc<dyn ConnectionHandle> = Arc::new(handle);
    let weak = Arc::downgrade(&handle);

    let (mut sink, mut stream) = socket.split();

    if let Err(e) = registry.subscribe(handle, topic.clone(), &subscriber_id) {
        warn!("Rejected WebSocket subscription to {}: {}", topic, e);
        if let Ok(text) = ApiError::from(e).to_frame().to_json() {
            let _ = sink.send(Message::Text(text)).await;
        }
        let _ = sink.send(Message::Close(None)).await;
        return;
    }
    info!(
        "WebSocket {} opened for {} on {}",
        connection_id, subscriber_id, topic
    );

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    debug!("Connection {} no longer registered", connection_id);
                    break;
                };
                match message.to_json() {
                    Ok(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to encode {} message: {}", message.event_type(), e),
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_frame(&state, &weak, connection_id, &subscriber_id, &text);
                        if let Some(reply) = reply {
                            let Ok(text) = reply.to_json() else { continue };
                            if sink.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket {} read error: {}", connection_id, e);
                        break;
                    }
                }
            }
        }
    }

    let removed = registry.unsubscribe(connection_id, None);
    info!(
        "WebSocket {} closed, left {} topic(s)",
        connection_id, removed
    );
}

/// Apply one inbound frame; returns an error frame to send back, if any
fn handle_frame(
    state: &AppState,
    handle: &Weak<dyn ConnectionHandle>,
    connection_id: ConnectionId,
    subscriber_id: &str,
    text: &str,
) -> Option<OutboundMessage> {
    let inbound = match InboundMessage::from_json(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            debug!("Malformed frame on {}: {}", connection_id, e);
            return Some(OutboundMessage::error(
                format!("Malformed message: {}", e),
                Some("BAD_REQUEST"),
            ));
        }
    };

    match apply_inbound(state, handle, connection_id, subscriber_id, inbound) {
        Ok(()) => None,
        Err(e) => Some(e.to_frame()),
    }
}

fn apply_inbound(
    state: &AppState,
    handle: &Weak<dyn ConnectionHandle>,
    connection_id: ConnectionId,
    subscriber_id: &str,
    inbound: InboundMessage,
) -> ApiResult<()> {
    let gatehouse = &state.gatehouse;
    match inbound {
        InboundMessage::Subscribe {
            topic_type,
            topic_id,
        } => {
            let handle = handle
                .upgrade()
                .ok_or_else(|| ApiError::Conflict("connection was dropped".to_string()))?;
            gatehouse.subscribe(handle, &topic_type, &topic_id, subscriber_id)?;
        }
        InboundMessage::Unsubscribe {
            topic_type,
            topic_id,
        } => match (topic_type, topic_id) {
            (Some(topic_type), Some(topic_id)) => {
                let topic = Topic::new(topic_type.parse::<TopicType>()?, topic_id);
                gatehouse.registry().unsubscribe(connection_id, Some(&topic));
            }
            (None, None) => {
                gatehouse.unsubscribe(connection_id);
            }
            _ => {
                return Err(ApiError::BadRequest(
                    "unsubscribe needs both topic_type and topic_id, or neither".to_string(),
                ))
            }
        },
        InboundMessage::CheckpointResponse {
            checkpoint_id,
            reviewer_id,
            decision,
            feedback,
            suggestions,
            changes,
            time_spent_secs,
        } => {
            let request = ResponseRequest {
                reviewer_id: reviewer_id.unwrap_or_else(|| subscriber_id.to_string()),
                decision,
                feedback,
                suggestions,
                changes,
                time_spent_secs,
            };
            gatehouse
                .gate()
                .submit_response(&checkpoint_id, request.into_submission()?)?;
        }
        InboundMessage::InputReply { request_id, answer } => {
            gatehouse.submit_input_reply(&request_id, answer)?;
        }
        InboundMessage::Ping => {}
    }
    Ok(())
}
