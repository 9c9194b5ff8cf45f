//! WebSocket connection handling
//!
//! One task per connection owns the read side; outbound frames go
//! through a bounded channel drained by a writer task, so a slow client
//! backs up its own queue instead of the fan-out path. The sink handed
//! to the signaling core is synchronous and never blocks.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec::{WireEncoding, SUPPORTED_VERSIONS};
use crate::envelope::{
    ClientDisconnectPayload, ClientMessage, HelloPayload, MediaSinkWantsPayload, ServerMessage,
};
use voicegate_signaling::{
    KeyframeCoordinator, Participant, RoomId, RoomType, SignalingConfig, TrackUpdate, UpdateFanout,
    UpdateSink, UserId,
};

/// Outbound frames buffered per connection before sends start failing
const OUTBOUND_BUFFER: usize = 1000;

/// Maximum accepted control frame, far above any real signaling payload
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Shared state handed to every connection
pub struct GatewayState {
    pub fanout: Arc<UpdateFanout>,
    pub keyframes: Arc<KeyframeCoordinator>,
    pub config: SignalingConfig,
}

/// Query parameters for the voice WebSocket handshake
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    /// Caller-supplied identity; generated when absent
    pub user_id: Option<String>,
    /// `text` (default) or `binary`
    pub encoding: Option<String>,
    /// Protocol version, defaults to the latest supported
    pub v: Option<u8>,
    /// Declared on room creation; later joiners inherit the live type
    pub room_type: Option<RoomType>,
    /// Designated video publisher for stream rooms
    pub stream_owner: Option<String>,
}

/// Outbound half of one connection, handed to the signaling core.
///
/// `try_send` keeps the core non-blocking: when the buffer fills the
/// frame is dropped and the error surfaces in the caller's logs, while
/// heartbeat starvation eventually closes the connection for real.
pub struct ConnectionSink {
    user_id: UserId,
    encoding: WireEncoding,
    tx: mpsc::Sender<Message>,
}

impl ConnectionSink {
    fn new(user_id: UserId, encoding: WireEncoding, tx: mpsc::Sender<Message>) -> Self {
        Self {
            user_id,
            encoding,
            tx,
        }
    }

    fn send(&self, message: &ServerMessage) -> anyhow::Result<()> {
        let frame = self.encoding.encode(message)?;
        let ws_message = if self.encoding.is_text() {
            Message::Text(String::from_utf8(frame)?.into())
        } else {
            Message::Binary(frame.into())
        };
        self.tx.try_send(ws_message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                anyhow::anyhow!("outbound buffer full for {}", self.user_id)
            }
            mpsc::error::TrySendError::Closed(_) => {
                anyhow::anyhow!("connection closed for {}", self.user_id)
            }
        })
    }
}

impl UpdateSink for ConnectionSink {
    fn send_update(&self, update: TrackUpdate) -> anyhow::Result<()> {
        self.send(&ServerMessage::TrackUpdate(update))
    }

    fn send_media_sink_wants(&self, any: u32) -> anyhow::Result<()> {
        self.send(&ServerMessage::MediaSinkWants(MediaSinkWantsPayload { any }))
    }

    fn send_client_disconnect(&self, user_id: &UserId) -> anyhow::Result<()> {
        self.send(&ServerMessage::ClientDisconnect(ClientDisconnectPayload {
            user_id: user_id.clone(),
        }))
    }
}

/// WebSocket handler for `/voice/{room_id}`
pub async fn voice_handler(
    State(state): State<Arc<GatewayState>>,
    Path(room_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let encoding = match WireEncoding::from_query(query.encoding.as_deref()) {
        Ok(encoding) => encoding,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    if let Some(v) = query.v {
        if !SUPPORTED_VERSIONS.contains(&v) {
            return (StatusCode::BAD_REQUEST, format!("unsupported protocol version {v}"))
                .into_response();
        }
    }

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, room_id, query, encoding))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<GatewayState>,
    room_id: String,
    query: ConnectQuery,
    encoding: WireEncoding,
) {
    let room_id = RoomId::from(room_id);
    let user_id = query
        .user_id
        .map_or_else(UserId::generate, UserId::from);
    let room_type = query.room_type.unwrap_or(RoomType::Call);
    let stream_owner = query.stream_owner.map(UserId::from);

    info!(
        room_id = %room_id,
        user_id = %user_id,
        encoding = ?encoding,
        "Voice connection established"
    );

    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
    let sink = Arc::new(ConnectionSink::new(user_id.clone(), encoding, tx));

    let participant = Arc::new(Participant::new(
        user_id.clone(),
        room_id.clone(),
        room_type,
        Arc::clone(&sink) as Arc<dyn UpdateSink>,
    ));

    if let Err(e) = state
        .fanout
        .registry()
        .join(&room_id, room_type, stream_owner, participant)
        .await
    {
        warn!(room_id = %room_id, user_id = %user_id, error = %e, "Join refused");
        return;
    }

    let (mut ws_writer, mut ws_reader) = socket.split();

    // Writer task: drains the outbound buffer until the socket dies
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_writer.send(message).await {
                debug!(error = %e, "WebSocket write failed");
                break;
            }
        }
    });

    let hello = ServerMessage::Hello(HelloPayload {
        heartbeat_interval_ms: state.config.heartbeat_interval_ms,
    });
    if let Err(e) = sink.send(&hello) {
        warn!(user_id = %user_id, error = %e, "Failed to send hello");
    }

    // The in-process engine has no ICE/DTLS handshake, so the transport
    // is ready as soon as the socket is up; reconciliation runs now
    if let Err(e) = state.fanout.handle_transport_ready(&room_id, &user_id).await {
        warn!(
            room_id = %room_id,
            user_id = %user_id,
            error = %e,
            "Transport-ready reconciliation failed"
        );
    }

    // A client that misses this many consecutive heartbeat intervals is
    // considered gone
    let starvation = state.config.heartbeat_interval() * state.config.heartbeat_grace;
    let deadline = tokio::time::sleep(starvation);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => {
                info!(room_id = %room_id, user_id = %user_id, "Heartbeat starvation, closing");
                break;
            }
            frame = ws_reader.next() => {
                let bytes = match frame {
                    Some(Ok(Message::Text(text))) => bytes::Bytes::copy_from_slice(text.as_bytes()),
                    Some(Ok(Message::Binary(bytes))) => bytes,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // ping/pong
                    Some(Err(e)) => {
                        debug!(user_id = %user_id, error = %e, "WebSocket read failed");
                        break;
                    }
                };

                let message = match encoding.decode(&bytes) {
                    Ok(message) => message,
                    Err(e) => {
                        // Malformed frames are dropped, the session survives
                        warn!(
                            room_id = %room_id,
                            user_id = %user_id,
                            error = %e,
                            "Dropping malformed frame"
                        );
                        continue;
                    }
                };

                match message {
                    ClientMessage::Heartbeat => {
                        deadline
                            .as_mut()
                            .reset(tokio::time::Instant::now() + starvation);
                        if let Err(e) = sink.send(&ServerMessage::HeartbeatAck) {
                            debug!(user_id = %user_id, error = %e, "Failed to ack heartbeat");
                        }
                    }
                    ClientMessage::ProducerState(producer_state) => {
                        if let Err(e) = state
                            .fanout
                            .handle_producer_state(&room_id, &user_id, producer_state)
                            .await
                        {
                            warn!(
                                room_id = %room_id,
                                user_id = %user_id,
                                error = %e,
                                "Producer state rejected"
                            );
                        }
                    }
                    ClientMessage::ViewerReady(payload) => {
                        if let Err(e) = state
                            .keyframes
                            .on_viewer_ready(&room_id, &user_id, payload.user_id)
                            .await
                        {
                            warn!(
                                room_id = %room_id,
                                user_id = %user_id,
                                error = %e,
                                "Viewer-ready handling failed"
                            );
                        }
                    }
                }
            }
        }
    }

    state.fanout.handle_disconnect(&room_id, &user_id).await;
    writer.abort();
    info!(room_id = %room_id, user_id = %user_id, "Voice connection closed");
}
