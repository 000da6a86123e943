use std::net::SocketAddr;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use occupancy::clock::{ManualClock, instant_at};
use occupancy::config::{BillingTiers, BusinessHours, EngineConfig};
use occupancy::directory::MemoryDirectory;
use occupancy::engine::{Engine, SessionStore};
use occupancy::limits::MAX_REQUEST_LINE_LEN;
use occupancy::model::*;
use occupancy::wire;

// ── Test infrastructure ──────────────────────────────────────

fn t(s: &str) -> TimeOfDay {
    s.parse().unwrap()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

fn config() -> EngineConfig {
    EngineConfig::new(
        BillingTiers {
            half_day_threshold: Hours::whole(4),
            full_day_threshold: Hours::whole(8),
        },
        BusinessHours {
            open: t("09:00"),
            close: t("20:00"),
            max_lookahead_ms: None,
            min_slot_ms: 0,
        },
    )
}

fn at(time: &str) -> Ms {
    instant_at(date(), t(time), config().utc_offset)
}

struct Server {
    addr: SocketAddr,
    engine: Arc<Engine>,
    dir: Arc<MemoryDirectory>,
    clock: Arc<ManualClock>,
}

impl Server {
    fn add_space(&self, name: &str, capacity: u32) -> Space {
        let space = Space {
            id: Ulid::new(),
            name: name.into(),
            capacity,
            price_hour: 3000,
            price_half_day: Some(10_000),
            price_full_day: Some(18_000),
        };
        self.dir.insert_space(space.clone());
        space
    }

    fn add_reservation(&self, space_id: Ulid, start: &str, end: &str) -> Reservation {
        let reservation = Reservation {
            id: Ulid::new(),
            space_id,
            date: date(),
            start_time: t(start),
            end_time: t(end),
            is_active: true,
            owner: Owner {
                id: Ulid::new(),
                name: "Grace Hopper".into(),
                email: "grace@example.com".into(),
            },
            event_name: Some("Compiler review".into()),
            attendees: 3,
        };
        self.dir.insert_reservation(reservation.clone());
        reservation
    }
}

async fn start_test_server() -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = Arc::new(MemoryDirectory::new());
    let clock = Arc::new(ManualClock::new(at("09:00")));
    let engine = Arc::new(Engine::new(
        Arc::new(SessionStore::new()),
        dir.clone(),
        dir.clone(),
        clock.clone(),
        config(),
    ));

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine).await;
            });
        }
    });

    Server {
        addr,
        engine,
        dir,
        clock,
    }
}

async fn connect(addr: SocketAddr) -> Framed<TcpStream, LinesCodec> {
    let socket = TcpStream::connect(addr).await.unwrap();
    Framed::new(socket, LinesCodec::new())
}

async fn send_raw(client: &mut Framed<TcpStream, LinesCodec>, line: String) -> Value {
    client.send(line).await.unwrap();
    let reply = client.next().await.unwrap().unwrap();
    serde_json::from_str(&reply).unwrap()
}

async fn call(client: &mut Framed<TcpStream, LinesCodec>, request: Value) -> Value {
    send_raw(client, request.to_string()).await
}

fn data(reply: &Value) -> &Value {
    assert_eq!(reply["ok"], true, "unexpected error reply: {reply}");
    &reply["data"]
}

fn error_kind(reply: &Value) -> &str {
    assert_eq!(reply["ok"], false, "unexpected ok reply: {reply}");
    reply["error"]["kind"].as_str().unwrap()
}

// ── Lifecycle over the wire ──────────────────────────────────

#[tokio::test]
async fn check_in_live_status_check_out() {
    let server = start_test_server().await;
    let room = server.add_space("Room A", 6);
    let r = server.add_reservation(room.id, "14:00", "16:00");
    let mut client = connect(server.addr).await;

    server.clock.set(at("14:05"));
    let reply = call(
        &mut client,
        json!({ "op": "check_in", "reservation_id": r.id, "actor": "desk-1", "notes": "badge issued" }),
    )
    .await;
    let session = data(&reply);
    assert_eq!(session["status"], "checked_in");
    assert_eq!(session["reserved_duration_hours"], 2.0);
    let session_id = session["id"].as_str().unwrap().to_string();

    server.clock.set(at("15:05"));
    let reply = call(&mut client, json!({ "op": "live_status", "session_id": session_id })).await;
    let live = data(&reply);
    assert_eq!(live["current_duration_hours"], 1.0);
    assert_eq!(live["remaining_reserved_time_hours"], 1.0);
    assert_eq!(live["is_overtime"], false);

    server.clock.set(at("16:30"));
    let reply = call(
        &mut client,
        json!({ "op": "check_out", "session_id": session_id, "actor": "desk-2" }),
    )
    .await;
    let done = data(&reply);
    assert_eq!(done["status"], "checked_out");
    assert_eq!(done["actual_duration_hours"], 2.42);
    assert_eq!(done["overtime_hours"], 0.42);
    assert_eq!(done["base_cost"], 6000);
    assert_eq!(done["overtime_cost"], 1260);
    assert_eq!(done["total_cost"], 7260);

    // A repeated check-out returns the stored result unchanged.
    server.clock.set(at("18:00"));
    let again = call(
        &mut client,
        json!({ "op": "check_out", "session_id": session_id, "actor": "desk-3" }),
    )
    .await;
    assert_eq!(data(&again), done);

    let reply = call(&mut client, json!({ "op": "active_sessions" })).await;
    assert_eq!(data(&reply), &json!([]));
}

#[tokio::test]
async fn session_view_and_listing() {
    let server = start_test_server().await;
    let room = server.add_space("Room B", 4);
    let r = server.add_reservation(room.id, "10:00", "12:00");
    let mut client = connect(server.addr).await;

    server.clock.set(at("10:00"));
    let reply = call(
        &mut client,
        json!({
            "op": "check_in",
            "reservation_id": r.id,
            "actor": "desk",
            "verification": { "email": " GRACE@example.com " },
        }),
    )
    .await;
    let session_id = data(&reply)["id"].clone();

    let reply = call(&mut client, json!({ "op": "session_view", "session_id": session_id })).await;
    let view = data(&reply);
    assert_eq!(view["user_name"], "Grace Hopper");
    assert_eq!(view["space_name"], "Room B");
    assert_eq!(view["event_name"], "Compiler review");
    assert_eq!(view["date"], "2026-10-16");

    let reply = call(
        &mut client,
        json!({ "op": "sessions_for_reservation", "reservation_id": r.id }),
    )
    .await;
    assert_eq!(data(&reply).as_array().unwrap().len(), 1);

    let reply = call(&mut client, json!({ "op": "active_sessions" })).await;
    let active = data(&reply).as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["session_id"], session_id);
}

#[tokio::test]
async fn extension_search_and_commit() {
    let server = start_test_server().await;
    let room = server.add_space("Room A", 6);
    let r = server.add_reservation(room.id, "14:00", "16:00");
    server.add_reservation(room.id, "17:00", "18:00");
    let mut client = connect(server.addr).await;

    server.clock.set(at("14:00"));
    let reply = call(&mut client, json!({ "op": "check_in", "reservation_id": r.id, "actor": "desk" })).await;
    let session_id = data(&reply)["id"].clone();

    let reply = call(&mut client, json!({ "op": "extension_options", "reservation_id": r.id })).await;
    let options = data(&reply);
    assert_eq!(
        options["same_space"],
        json!([
            { "start": "16:00", "end": "17:00", "duration_hours": 1.0 },
            { "start": "18:00", "end": "20:00", "duration_hours": 2.0 },
        ])
    );

    let reply = call(
        &mut client,
        json!({
            "op": "commit_extension",
            "reservation_id": r.id,
            "space_id": room.id,
            "start": "16:00",
            "end": "17:00",
        }),
    )
    .await;
    let receipt = data(&reply);
    assert_eq!(receipt["follow_on"], false);
    assert_eq!(receipt["added_hours"], 1.0);
    assert_eq!(receipt["reservation"]["end_time"], "17:00");
    assert_eq!(receipt["session"]["reserved_duration_hours"], 3.0);

    // The reservation now ends at 17:00, so the old slot is no longer contiguous.
    let reply = call(
        &mut client,
        json!({
            "op": "commit_extension",
            "reservation_id": r.id,
            "space_id": room.id,
            "start": "16:00",
            "end": "17:00",
        }),
    )
    .await;
    assert_eq!(error_kind(&reply), "invalid_reservation_window");

    let reply = call(&mut client, json!({ "op": "live_status", "session_id": session_id })).await;
    assert_eq!(data(&reply)["reserved_duration_hours"], 3.0);
}

// ── Errors ───────────────────────────────────────────────────

#[tokio::test]
async fn engine_errors_carry_kind_and_category() {
    let server = start_test_server().await;
    let mut client = connect(server.addr).await;

    let reply = call(
        &mut client,
        json!({ "op": "check_in", "reservation_id": Ulid::new(), "actor": "desk" }),
    )
    .await;
    assert_eq!(error_kind(&reply), "reservation_not_found");
    assert_eq!(reply["error"]["category"], "validation");
    assert!(reply["error"]["message"].as_str().unwrap().contains("not found"));

    let reply = call(&mut client, json!({ "op": "live_status", "session_id": Ulid::new() })).await;
    assert_eq!(error_kind(&reply), "session_not_found");
}

#[tokio::test]
async fn malformed_requests_keep_the_connection_open() {
    let server = start_test_server().await;
    let mut client = connect(server.addr).await;

    let reply = send_raw(&mut client, "{not json".into()).await;
    assert_eq!(error_kind(&reply), "bad_request");
    assert_eq!(reply["error"]["category"], "validation");

    let reply = call(&mut client, json!({ "op": "drop_tables" })).await;
    assert_eq!(error_kind(&reply), "bad_request");

    let reply = call(&mut client, json!({ "op": "check_out", "session_id": Ulid::new() })).await;
    assert_eq!(error_kind(&reply), "bad_request");

    let reply = send_raw(&mut client, "x".repeat(MAX_REQUEST_LINE_LEN + 1)).await;
    assert_eq!(error_kind(&reply), "bad_request");

    // Still serving after all of the above.
    let reply = call(&mut client, json!({ "op": "active_sessions" })).await;
    assert_eq!(data(&reply), &json!([]));
}

#[tokio::test]
async fn handle_line_without_a_socket() {
    let server = start_test_server().await;
    let room = server.add_space("Room C", 2);
    let r = server.add_reservation(room.id, "09:00", "10:00");
    server.clock.set(at("09:00"));

    let line = json!({ "op": "check_in", "reservation_id": r.id, "actor": "kiosk", "deadline_ms": 5000 })
        .to_string();
    let reply = wire::handle_line(&server.engine, &line).await;
    assert_eq!(data(&reply)["check_in_actor"], "kiosk");

    let reply = wire::handle_line(&server.engine, &line).await;
    assert_eq!(error_kind(&reply), "already_checked_in");
    assert_eq!(reply["error"]["category"], "state");
}
