//! The per-utterance turn pipeline.
//!
//! One inbound audio payload drives: blocked-session check, gated
//! transcription, turn accounting (persisted before reply generation),
//! detached evaluation, reply generation with the persona prompt, emotion
//! classification, gated streaming synthesis, and the final-turn /
//! penultimate-turn completion work.

use crate::{
    state::AppState,
    ws::{
        protocol::ServerMessage,
        session::{SharedSink, send_msg},
    },
};
use anyhow::Result;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures_util::StreamExt;
use parley_core::persona::Persona;
use parley_core::session::SharedSession;
use parley_core::{emotion, gate::GateError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// What the connection loop should do after a message was handled.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TurnOutcome {
    Continue,
    Terminate,
}

/// Grace delay so in-flight messages flush before the socket closes.
pub(crate) const FLUSH_DELAY: Duration = Duration::from_millis(100);
const FINAL_FLUSH_DELAY: Duration = Duration::from_millis(200);

fn is_final_turn(turn_count: u32, max_turns: u32) -> bool {
    turn_count >= max_turns
}

fn is_penultimate_turn(turn_count: u32, max_turns: u32) -> bool {
    turn_count + 1 == max_turns
}

/// Appends the sign-off instruction for the last turn of a session.
fn closing_prompt(base_prompt: &str, max_turns: u32) -> String {
    format!(
        "{base_prompt}\n\nIMPORTANT: This is the end of our conversation ({max_turns} turns \
         completed). Please provide a warm closing message in 2-3 sentences, thanking the user \
         for the practice and encouraging them to keep learning English."
    )
}

/// Picks the user-facing notice for a failed gated call.
fn gate_failure_notice(err: &GateError, while_doing: &str) -> String {
    if err.is_transient() {
        format!("The {while_doing} service is busy right now. Please try again in a moment.")
    } else {
        format!("Something went wrong during {while_doing}. Please try again.")
    }
}

pub(crate) async fn handle_turn(
    state: &Arc<AppState>,
    persona: &'static Persona,
    session: &SharedSession,
    socket_tx: &SharedSink,
    background: &mut JoinSet<()>,
    audio_b64: &str,
) -> Result<TurnOutcome> {
    let max_turns = state.config.max_turns;
    let session_id = {
        let locked = session.lock().await;
        if locked.is_completed() {
            drop(locked);
            send_msg(
                &mut *socket_tx.lock().await,
                ServerMessage::Error {
                    message: "This conversation has already ended.".to_string(),
                },
            )
            .await?;
            return Ok(TurnOutcome::Terminate);
        }
        locked.session_id()
    };

    // A concurrent session under the same fingerprint may have recorded a
    // block since the handshake; re-check before counting the turn. The
    // turn is rejected without touching session state.
    match state.store.is_blocked(session_id).await {
        Ok(true) => {
            send_msg(
                &mut *socket_tx.lock().await,
                ServerMessage::Error {
                    message: "This conversation has already been completed. No further turns are possible.".to_string(),
                },
            )
            .await?;
            return Ok(TurnOutcome::Continue);
        }
        Ok(false) => {}
        Err(err) => warn!(error = ?err, "block re-check failed, continuing"),
    }

    let Ok(audio_bytes) = BASE64.decode(audio_b64) else {
        send_msg(
            &mut *socket_tx.lock().await,
            ServerMessage::Error {
                message: "Invalid audio payload.".to_string(),
            },
        )
        .await?;
        return Ok(TurnOutcome::Continue);
    };
    let audio_bytes = Bytes::from(audio_bytes);

    // --- Transcription (gated) ---
    send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::StatusUpdate {
            message: "Recognizing your speech...".to_string(),
        },
    )
    .await?;

    let speech = state.speech.clone();
    let payload = audio_bytes.clone();
    let transcript = state
        .transcription_gate
        .execute(|| {
            let speech = speech.clone();
            let payload = payload.clone();
            async move { speech.transcribe(payload).await }
        })
        .await;

    let user_text = match transcript {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "transcription failed");
            send_msg(
                &mut *socket_tx.lock().await,
                ServerMessage::Error {
                    message: gate_failure_notice(&err, "speech recognition"),
                },
            )
            .await?;
            return Ok(TurnOutcome::Continue);
        }
    };

    // An empty transcript is a recoverable notice; the turn is not counted.
    if user_text.trim().is_empty() {
        send_msg(
            &mut *socket_tx.lock().await,
            ServerMessage::Error {
                message: "Sorry, I couldn't hear you. Could you please speak again?".to_string(),
            },
        )
        .await?;
        return Ok(TurnOutcome::Continue);
    }
    let user_text = user_text.trim().to_string();

    send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::Transcript {
            text: user_text.clone(),
        },
    )
    .await?;

    // --- Turn accounting ---
    // History as it stood before this turn is what the reply prompt sees.
    let (previous_history, turn_count, difficulty) = {
        let mut locked = session.lock().await;
        let previous = locked.history().to_vec();
        locked.record_user_utterance(user_text.clone());
        (previous, locked.turn_count(), locked.difficulty())
    };

    // Persisted synchronously so a crash cannot lose turn accounting.
    if let Err(err) = state.store.update_turn_count(session_id, turn_count).await {
        warn!(error = ?err, turn_count, "failed to persist turn count");
    }

    send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::TurnCountUpdate {
            turn_count,
            max_turns,
        },
    )
    .await?;

    // --- Detached evaluation of the utterance just received ---
    {
        let llm = state.llm.clone();
        let session = session.clone();
        let text = user_text.clone();
        background.spawn(async move {
            match llm.evaluate(&text).await {
                Ok(Some(item)) => session.lock().await.add_feedback(item),
                Ok(None) => {}
                Err(err) => warn!(error = ?err, "utterance evaluation failed"),
            }
        });
    }

    let final_turn = is_final_turn(turn_count, max_turns);
    let penultimate_turn = is_penultimate_turn(turn_count, max_turns);

    // The final turn completes the session before the reply is generated,
    // persisting the transcript and the feedback collected so far.
    if final_turn {
        info!(turn_count, max_turns, "turn limit reached, completing session");
        let (history, feedback) = {
            let mut locked = session.lock().await;
            locked.complete();
            (locked.history().to_vec(), locked.feedback_bundle())
        };
        if let Err(err) = state.store.mark_completed(session_id, &history, &feedback).await {
            warn!(error = ?err, "failed to persist session completion");
        }
    }

    // --- Reply generation ---
    send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::StatusUpdate {
            message: "Thinking of a reply...".to_string(),
        },
    )
    .await?;

    let system_prompt = {
        let with_difficulty = difficulty.apply_to_prompt(persona.system_prompt);
        if final_turn {
            closing_prompt(&with_difficulty, max_turns)
        } else {
            with_difficulty
        }
    };

    let reply = match state
        .llm
        .respond(&system_prompt, &previous_history, &user_text)
        .await
    {
        Ok(reply) => reply,
        Err(err) => {
            // The turn is already recorded and is not rolled back.
            warn!(error = ?err, "reply generation failed");
            send_msg(
                &mut *socket_tx.lock().await,
                ServerMessage::Error {
                    message: "I couldn't come up with a reply just now. Please keep going."
                        .to_string(),
                },
            )
            .await?;
            if final_turn {
                emit_session_completed(socket_tx, session_id, turn_count).await?;
                tokio::time::sleep(FINAL_FLUSH_DELAY).await;
                return Ok(TurnOutcome::Terminate);
            }
            return Ok(TurnOutcome::Continue);
        }
    };

    session.lock().await.record_agent_utterance(reply.clone());

    send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::ReplyText {
            text: reply.clone(),
        },
    )
    .await?;

    // --- Emotion-matched persona image ---
    let detected = emotion::classify(&reply);
    send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::CharacterImage {
            image_url: persona.emotion_image(detected).to_string(),
            emotion: detected,
        },
    )
    .await?;

    // --- Streaming synthesis (gated) ---
    send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::StatusUpdate {
            message: "Synthesizing speech...".to_string(),
        },
    )
    .await?;

    // The completion notice goes out before the final audio stream so the
    // client sees it even if it stops listening at stream end.
    if final_turn {
        emit_session_completed(socket_tx, session_id, turn_count).await?;
        tokio::time::sleep(FLUSH_DELAY).await;
    }

    stream_speech(state, &reply, persona.voice_id, socket_tx).await?;

    if final_turn {
        tokio::time::sleep(FINAL_FLUSH_DELAY).await;
        return Ok(TurnOutcome::Terminate);
    }

    // --- Detached suggestion generation (non-final turns only) ---
    {
        let llm = state.llm.clone();
        let session = session.clone();
        let socket_tx = socket_tx.clone();
        let persona_name = persona.name;
        background.spawn(async move {
            let history = session.lock().await.history().to_vec();
            match llm.suggest(&history, persona_name, difficulty).await {
                Ok(suggestions) => {
                    let sent = send_msg(
                        &mut *socket_tx.lock().await,
                        ServerMessage::SuggestedResponses { suggestions },
                    )
                    .await;
                    if sent.is_err() {
                        warn!("could not push suggested responses, client likely gone");
                    }
                }
                Err(err) => warn!(error = ?err, "suggestion generation failed"),
            }
        });
    }

    // --- Detached overall assessment on the penultimate turn ---
    if penultimate_turn {
        info!(turn_count, "penultimate turn, scheduling overall assessment");
        let llm = state.llm.clone();
        let session = session.clone();
        background.spawn(async move {
            let items = session.lock().await.feedback_items().to_vec();
            match llm.assess(&items).await {
                Ok(assessment) => session.lock().await.set_overall_assessment(assessment),
                Err(err) => {
                    // Leaves the assessment unset; completion never waits on it.
                    warn!(error = ?err, "overall assessment failed");
                }
            }
        });
    }

    Ok(TurnOutcome::Continue)
}

async fn emit_session_completed(
    socket_tx: &SharedSink,
    session_id: uuid::Uuid,
    turn_count: u32,
) -> Result<()> {
    send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::SessionCompleted {
            session_id,
            turn_count,
            message: "The conversation is complete!".to_string(),
        },
    )
    .await
}

/// Synthesizes `text` through the synthesis gate and forwards audio chunks
/// as they arrive. The admission token is held until the stream is drained.
///
/// Synthesis failures are reported as recoverable notices; the turn they
/// belong to stands.
pub(crate) async fn stream_speech(
    state: &Arc<AppState>,
    text: &str,
    voice_id: &'static str,
    socket_tx: &SharedSink,
) -> Result<()> {
    let speech = state.speech.clone();
    let text_owned = text.to_string();
    let started = state
        .synthesis_gate
        .execute_with_permit(|| {
            let speech = speech.clone();
            let text = text_owned.clone();
            async move { speech.synthesize(&text, voice_id).await }
        })
        .await;

    let (mut stream, permit) = match started {
        Ok(started) => started,
        Err(err) => {
            warn!(error = %err, "synthesis failed");
            send_msg(
                &mut *socket_tx.lock().await,
                ServerMessage::Error {
                    message: gate_failure_notice(&err, "speech synthesis"),
                },
            )
            .await?;
            return Ok(());
        }
    };

    send_msg(&mut *socket_tx.lock().await, ServerMessage::AudioStreamStart).await?;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                send_msg(
                    &mut *socket_tx.lock().await,
                    ServerMessage::AudioChunk {
                        data: BASE64.encode(&chunk),
                    },
                )
                .await?;
            }
            Err(err) => {
                // A stream is not resumable mid-transfer; end it cleanly.
                warn!(error = %err, "synthesis stream interrupted");
                break;
            }
        }
    }
    send_msg(&mut *socket_tx.lock().await, ServerMessage::AudioStreamEnd).await?;
    drop(permit);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_turn_triggers_exactly_at_limit() {
        assert!(!is_final_turn(9, 10));
        assert!(is_final_turn(10, 10));
        assert!(is_final_turn(11, 10));
    }

    #[test]
    fn penultimate_turn_is_one_before_the_limit() {
        assert!(!is_penultimate_turn(8, 10));
        assert!(is_penultimate_turn(9, 10));
        assert!(!is_penultimate_turn(10, 10));
    }

    #[test]
    fn closing_prompt_keeps_persona_text_first() {
        let prompt = closing_prompt("You are Jeongsu.", 10);
        assert!(prompt.starts_with("You are Jeongsu."));
        assert!(prompt.contains("10 turns"));
        assert!(prompt.contains("warm closing message"));
    }

    #[test]
    fn transient_gate_failures_suggest_retrying() {
        let err = GateError::Exhausted {
            capability: "transcription",
            attempts: 3,
            source: parley_core::error::RemoteError::RateLimited,
        };
        let notice = gate_failure_notice(&err, "speech recognition");
        assert!(notice.contains("busy"));

        let fatal = GateError::Rejected {
            capability: "transcription",
            source: parley_core::error::RemoteError::Http { status: 400 },
        };
        let notice = gate_failure_notice(&fatal, "speech recognition");
        assert!(notice.contains("went wrong"));
    }
}
