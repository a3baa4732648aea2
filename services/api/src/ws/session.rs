//! Manages the WebSocket connection lifecycle for a conversation session.
//!
//! One task per connection drives the whole session: handshake and access
//! checks, the message loop, the turn pipeline, and teardown. Background
//! enrichment tasks are joined before the session is retired so persisted
//! feedback is never truncated.

use super::{
    protocol::{BLOCKED_MESSAGE, ClientMessage, ServerMessage},
    turn::{FLUSH_DELAY, TurnOutcome, handle_turn, stream_speech},
};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        ConnectInfo, Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use parley_core::emotion::Emotion;
use parley_core::persona::{self, Persona};
use parley_core::session::{Difficulty, SharedSession};
use parley_core::store::NewSessionRecord;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinSet};
use tracing::{Instrument, error, info, instrument, warn};
use uuid::Uuid;

pub(crate) type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(character_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(move |socket| handle_socket(socket, state, character_id, addr, user_agent))
}

/// Entry point for a new connection: access checks, session creation and
/// the handshake, then the main loop.
#[instrument(name = "ws_session", skip_all, fields(character_id = %character_id, session_id))]
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    character_id: String,
    addr: SocketAddr,
    user_agent: Option<String>,
) {
    let (socket_tx, socket_rx) = socket.split();
    let socket_tx: SharedSink = Arc::new(Mutex::new(socket_tx));

    // Coarse check before the client has supplied its fingerprint. The
    // network identity alone never blocks, but the check is part of the
    // admission protocol and is logged.
    if !state.guard.may_proceed(Some(addr.ip()), None).await {
        let _ = send_msg(
            &mut *socket_tx.lock().await,
            ServerMessage::Blocked {
                message: BLOCKED_MESSAGE.to_string(),
            },
        )
        .await;
        tokio::time::sleep(FLUSH_DELAY).await;
        return;
    }

    let Some(persona) = persona::find(&character_id) else {
        error!("unknown character id");
        let _ = send_msg(
            &mut *socket_tx.lock().await,
            ServerMessage::Error {
                message: "Character not found".to_string(),
            },
        )
        .await;
        return;
    };

    let connection_key = Uuid::new_v4();
    let session = state.registry.create(&character_id, connection_key);
    let session_id = session.lock().await.session_id();
    tracing::Span::current().record("session_id", &session_id.to_string());
    info!(ip = %addr.ip(), "new conversation session");

    let record = NewSessionRecord {
        session_id,
        character_id: character_id.clone(),
        user_ip: Some(addr.ip().to_string()),
        user_agent,
        fingerprint: None,
        difficulty: Difficulty::default(),
    };
    if let Err(err) = state.store.create_session(record).await {
        warn!(error = ?err, "failed to persist new session record");
    }

    if send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::Connected {
            character_id: character_id.clone(),
            character_name: persona.name.to_string(),
            session_id,
            max_turns: state.config.max_turns,
            init_message: persona.init_message.to_string(),
            request_difficulty: true,
        },
    )
    .await
    .is_err()
    {
        error!("failed to send connected message");
        if let Some(session) = state.registry.retire(connection_key).await {
            let locked = session.lock().await;
            if let Err(err) = state
                .store
                .mark_completed(session_id, locked.history(), &locked.feedback_bundle())
                .await
            {
                warn!(error = ?err, "failed to persist session at teardown");
            }
        }
        return;
    }

    let session_span = tracing::info_span!("conversation", %session_id);
    tokio::spawn(
        async move {
            if let Err(e) = run_session(
                state,
                persona,
                socket_tx,
                socket_rx,
                connection_key,
                session,
                addr,
            )
            .await
            {
                error!(error = ?e, "session terminated with error");
            }
            info!("session finished");
        }
        .instrument(session_span),
    );
}

/// The main event loop for an active connection.
async fn run_session(
    state: Arc<AppState>,
    persona: &'static Persona,
    socket_tx: SharedSink,
    mut socket_rx: SplitStream<WebSocket>,
    connection_key: Uuid,
    session: SharedSession,
    addr: SocketAddr,
) -> Result<()> {
    let session_id = session.lock().await.session_id();
    let client_ip = Some(addr.ip());
    let mut fingerprint: Option<String> = None;
    let mut background = JoinSet::new();

    while let Some(msg_result) = socket_rx.next().await {
        let ws_msg = match msg_result {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = ?err, "error receiving from client");
                break;
            }
        };

        match ws_msg {
            Message::Text(text) => {
                let parsed = serde_json::from_str::<ClientMessage>(&text);
                let outcome = match parsed {
                    Ok(ClientMessage::Init {
                        fingerprint: fp,
                        difficulty,
                    }) => {
                        handle_init(
                            &state,
                            persona,
                            &session,
                            &socket_tx,
                            &mut fingerprint,
                            fp,
                            difficulty,
                            client_ip,
                        )
                        .await?
                    }
                    Ok(ClientMessage::Audio { audio }) => {
                        handle_turn(
                            &state,
                            persona,
                            &session,
                            &socket_tx,
                            &mut background,
                            &audio,
                        )
                        .await?
                    }
                    Ok(ClientMessage::Ping) => {
                        send_msg(&mut *socket_tx.lock().await, ServerMessage::Pong).await?;
                        TurnOutcome::Continue
                    }
                    Err(err) => {
                        // Unrecognized kinds get an error acknowledgment and
                        // cause no state change.
                        warn!(error = %err, "unrecognized client message");
                        send_msg(
                            &mut *socket_tx.lock().await,
                            ServerMessage::Error {
                                message: "Unknown or malformed message".to_string(),
                            },
                        )
                        .await?;
                        TurnOutcome::Continue
                    }
                };
                if outcome == TurnOutcome::Terminate {
                    break;
                }
            }
            Message::Binary(_) => {
                send_msg(
                    &mut *socket_tx.lock().await,
                    ServerMessage::Error {
                        message: "Binary frames are not part of this protocol".to_string(),
                    },
                )
                .await?;
            }
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // Structured teardown: finish in-flight enrichment before persisting,
    // so the stored feedback reflects every evaluated turn.
    while background.join_next().await.is_some() {}

    if let Some(session) = state.registry.retire(connection_key).await {
        let locked = session.lock().await;
        if let Err(err) = state
            .store
            .mark_completed(session_id, locked.history(), &locked.feedback_bundle())
            .await
        {
            warn!(error = ?err, "failed to persist session at teardown");
        }
        info!(
            turn_count = locked.turn_count(),
            messages = locked.history().len(),
            "session retired"
        );
    }
    Ok(())
}

/// Applies an `init` message: fingerprint registration with the
/// authoritative access check, then the one-time difficulty selection with
/// its initial suggestions and spoken greeting.
#[allow(clippy::too_many_arguments)]
async fn handle_init(
    state: &Arc<AppState>,
    persona: &'static Persona,
    session: &SharedSession,
    socket_tx: &SharedSink,
    known_fingerprint: &mut Option<String>,
    fingerprint: Option<String>,
    difficulty: Option<String>,
    client_ip: Option<std::net::IpAddr>,
) -> Result<TurnOutcome> {
    let session_id = session.lock().await.session_id();

    if let Some(fp) = fingerprint
        && known_fingerprint.is_none()
    {
        info!("fingerprint received");
        if let Err(err) = state.store.set_fingerprint(session_id, &fp).await {
            warn!(error = ?err, "failed to persist fingerprint");
        }

        // Authoritative check now that the identity is known; a connection
        // wrongly admitted by the coarse check terminates here.
        if !state.guard.may_proceed(client_ip, Some(&fp)).await {
            send_msg(
                &mut *socket_tx.lock().await,
                ServerMessage::Blocked {
                    message: BLOCKED_MESSAGE.to_string(),
                },
            )
            .await?;
            tokio::time::sleep(FLUSH_DELAY).await;
            return Ok(TurnOutcome::Terminate);
        }
        *known_fingerprint = Some(fp);
    }

    if let Some(raw) = difficulty {
        let Ok(level) = raw.parse::<Difficulty>() else {
            warn!(raw = %raw, "ignoring unknown difficulty");
            return Ok(TurnOutcome::Continue);
        };
        let applied = session.lock().await.set_difficulty(level);
        if !applied {
            return Ok(TurnOutcome::Continue);
        }
        info!(difficulty = level.as_str(), "difficulty selected");
        if let Err(err) = state.store.set_difficulty(session_id, level).await {
            warn!(error = ?err, "failed to persist difficulty");
        }

        send_msg(
            &mut *socket_tx.lock().await,
            ServerMessage::SuggestedResponses {
                suggestions: level.initial_suggestions(),
            },
        )
        .await?;

        // Speak the opening line. It joins the history so the model sees
        // one coherent transcript from the first real turn.
        session
            .lock()
            .await
            .record_agent_utterance(persona.init_message);
        send_msg(
            &mut *socket_tx.lock().await,
            ServerMessage::CharacterImage {
                image_url: persona.emotion_image(Emotion::Neutral).to_string(),
                emotion: Emotion::Neutral,
            },
        )
        .await?;
        stream_speech(state, persona.init_message, persona.voice_id, socket_tx).await?;
    }

    Ok(TurnOutcome::Continue)
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
