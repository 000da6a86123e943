//! Newline-delimited JSON protocol over TCP.
//!
//! One request object per line, `{"op": "check_in", ...}`, answered by one
//! reply line: `{"ok": true, "data": ...}` or
//! `{"ok": false, "error": {"kind", "category", "message"}}`.
//! Any request may carry `deadline_ms`, capped at `MAX_DEADLINE_MS`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::{MAX_DEADLINE_MS, MAX_REQUEST_LINE_LEN};
use crate::model::*;
use crate::observability;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CheckIn {
        reservation_id: Ulid,
        actor: String,
        #[serde(default)]
        notes: Option<String>,
        #[serde(default)]
        verification: Option<Verification>,
    },
    CheckOut {
        session_id: Ulid,
        actor: String,
        #[serde(default)]
        notes: Option<String>,
    },
    CancelSession {
        session_id: Ulid,
        actor: String,
        #[serde(default)]
        reason: Option<String>,
    },
    LiveStatus {
        session_id: Ulid,
    },
    SessionView {
        session_id: Ulid,
    },
    SessionsForReservation {
        reservation_id: Ulid,
    },
    ActiveSessions,
    ExtensionOptions {
        reservation_id: Ulid,
    },
    CommitExtension {
        reservation_id: Ulid,
        space_id: Ulid,
        start: TimeOfDay,
        end: TimeOfDay,
    },
}

/// Parse one request line into the request and its optional deadline.
pub fn parse_request(line: &str) -> Result<(Request, Option<Duration>), String> {
    let value: Value = serde_json::from_str(line).map_err(|e| format!("malformed JSON: {e}"))?;
    let deadline = match value.get("deadline_ms") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let ms = v
                .as_u64()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| "deadline_ms must be a positive integer".to_string())?;
            Some(Duration::from_millis(ms.min(MAX_DEADLINE_MS)))
        }
    };
    let request: Request = serde_json::from_value(value).map_err(|e| format!("bad request: {e}"))?;
    Ok((request, deadline))
}

async fn execute(engine: &Engine, request: Request) -> Result<Value, EngineError> {
    match request {
        Request::CheckIn {
            reservation_id,
            actor,
            notes,
            verification,
        } => {
            let session = engine
                .check_in(reservation_id, &actor, notes.as_deref(), verification.as_ref())
                .await?;
            Ok(json!(session))
        }
        Request::CheckOut {
            session_id,
            actor,
            notes,
        } => {
            let session = engine.check_out(session_id, &actor, notes.as_deref()).await?;
            Ok(json!(session))
        }
        Request::CancelSession {
            session_id,
            actor,
            reason,
        } => {
            let session = engine
                .cancel_session(session_id, &actor, reason.as_deref())
                .await?;
            Ok(json!(session))
        }
        Request::LiveStatus { session_id } => Ok(json!(engine.live_status(session_id)?)),
        Request::SessionView { session_id } => Ok(json!(engine.session_view(session_id).await?)),
        Request::SessionsForReservation { reservation_id } => {
            Ok(json!(engine.sessions_for_reservation(reservation_id).await))
        }
        Request::ActiveSessions => Ok(json!(engine.active_sessions())),
        Request::ExtensionOptions { reservation_id } => {
            Ok(json!(engine.extension_options(reservation_id).await?))
        }
        Request::CommitExtension {
            reservation_id,
            space_id,
            start,
            end,
        } => {
            let receipt = engine
                .commit_extension(reservation_id, ExtensionChoice { space_id, start, end })
                .await?;
            Ok(json!(receipt))
        }
    }
}

fn error_reply(kind: &str, category: &str, message: String) -> Value {
    json!({
        "ok": false,
        "error": { "kind": kind, "category": category, "message": message },
    })
}

fn engine_err(e: &EngineError) -> Value {
    error_reply(e.kind(), e.category().as_str(), e.to_string())
}

fn bad_request(message: String) -> Value {
    error_reply("bad_request", "validation", message)
}

/// Handle one request line and build its reply.
pub async fn handle_line(engine: &Engine, line: &str) -> Value {
    let (request, deadline) = match parse_request(line) {
        Ok(parsed) => parsed,
        Err(msg) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => "unknown", "status" => "bad_request")
                .increment(1);
            return bad_request(msg);
        }
    };

    let op = observability::op_label(&request);
    let started = Instant::now();
    let result = match deadline {
        Some(deadline) => Engine::with_deadline(deadline, execute(engine, request)).await,
        None => execute(engine, request).await,
    };
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(data) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "ok").increment(1);
            json!({ "ok": true, "data": data })
        }
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => e.kind())
                .increment(1);
            debug!(op, error = %e, "request failed");
            engine_err(&e)
        }
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LINE_LEN));
    let mut resuming = false;
    loop {
        let line = match lines.next().await {
            Some(line) => line,
            // After a decode error the stream yields one None, then resumes reading.
            None if resuming => {
                resuming = false;
                continue;
            }
            None => break,
        };
        resuming = false;
        let reply = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&engine, &line).await,
            // The codec discards the rest of the oversized line.
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                resuming = true;
                bad_request(format!("request line exceeds {MAX_REQUEST_LINE_LEN} bytes"))
            }
            Err(e) => return Err(e.into()),
        };
        lines.send(reply.to_string()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_requests() {
        let id = Ulid::new();
        let line = format!(
            r#"{{"op":"commit_extension","reservation_id":"{id}","space_id":"{id}","start":"16:00","end":"17:30"}}"#
        );
        let (request, deadline) = parse_request(&line).unwrap();
        assert_eq!(
            request,
            Request::CommitExtension {
                reservation_id: id,
                space_id: id,
                start: "16:00".parse().unwrap(),
                end: "17:30".parse().unwrap(),
            }
        );
        assert_eq!(deadline, None);

        let (request, _) = parse_request(r#"{"op":"active_sessions"}"#).unwrap();
        assert_eq!(request, Request::ActiveSessions);
    }

    #[test]
    fn optional_fields_default_to_none() {
        let id = Ulid::new();
        let line = format!(r#"{{"op":"check_in","reservation_id":"{id}","actor":"desk"}}"#);
        let (request, _) = parse_request(&line).unwrap();
        assert_eq!(
            request,
            Request::CheckIn {
                reservation_id: id,
                actor: "desk".into(),
                notes: None,
                verification: None,
            }
        );
    }

    #[test]
    fn deadline_is_capped() {
        let id = Ulid::new();
        let line = format!(r#"{{"op":"live_status","session_id":"{id}","deadline_ms":999999999}}"#);
        let (_, deadline) = parse_request(&line).unwrap();
        assert_eq!(deadline, Some(Duration::from_millis(MAX_DEADLINE_MS)));

        let line = format!(r#"{{"op":"live_status","session_id":"{id}","deadline_ms":-5}}"#);
        assert!(parse_request(&line).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_request("not json").is_err());
        assert!(parse_request(r#"{"op":"launch_rockets"}"#).is_err());
        assert!(parse_request(r#"{"op":"check_out","session_id":"nope","actor":"x"}"#).is_err());
        assert!(
            parse_request(r#"{"op":"commit_extension","reservation_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","space_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","start":"25:00","end":"26:00"}"#)
                .is_err()
        );
    }

    #[test]
    fn error_reply_carries_kind_and_category() {
        let reply = engine_err(&EngineError::DeadlineExceeded);
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["error"]["kind"], "deadline_exceeded");
        assert_eq!(reply["error"]["category"], "infrastructure");
    }
}
