use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use ulid::Ulid;

use occupancy::clock::{ManualClock, instant_at};
use occupancy::config::{BillingTiers, BusinessHours, EngineConfig};
use occupancy::directory::MemoryDirectory;
use occupancy::engine::{Engine, SessionStore};
use occupancy::model::*;

fn t(s: &str) -> TimeOfDay {
    s.parse().expect("valid time")
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).expect("valid date")
}

fn config() -> EngineConfig {
    EngineConfig::new(
        BillingTiers {
            half_day_threshold: Hours::whole(4),
            full_day_threshold: Hours::whole(8),
        },
        BusinessHours {
            open: t("08:00"),
            close: t("22:00"),
            max_lookahead_ms: None,
            min_slot_ms: 0,
        },
    )
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

struct Bench {
    engine: Arc<Engine>,
    dir: Arc<MemoryDirectory>,
    clock: Arc<ManualClock>,
}

impl Bench {
    fn new(store: SessionStore) -> Self {
        let dir = Arc::new(MemoryDirectory::new());
        let clock = Arc::new(ManualClock::new(instant_at(date(), t("10:00"), config().utc_offset)));
        let engine = Arc::new(Engine::new(
            Arc::new(store),
            dir.clone(),
            dir.clone(),
            clock.clone(),
            config(),
        ));
        Self { engine, dir, clock }
    }

    fn add_space(&self, capacity: u32) -> Ulid {
        let id = Ulid::new();
        self.dir.insert_space(Space {
            id,
            name: format!("Room {id}"),
            capacity,
            price_hour: 3000,
            price_half_day: Some(10_000),
            price_full_day: Some(18_000),
        });
        id
    }

    fn add_reservation(&self, space_id: Ulid, start: &str, end: &str) -> Ulid {
        let id = Ulid::new();
        self.dir.insert_reservation(Reservation {
            id,
            space_id,
            date: date(),
            start_time: t(start),
            end_time: t(end),
            is_active: true,
            owner: Owner {
                id: Ulid::new(),
                name: "Bench User".into(),
                email: "bench@example.com".into(),
            },
            event_name: None,
            attendees: 2,
        });
        id
    }
}

async fn phase1_sequential(bench: &Bench) {
    let space = bench.add_space(4);
    let n = 2000;
    let reservations: Vec<Ulid> = (0..n)
        .map(|_| bench.add_reservation(space, "10:00", "12:00"))
        .collect();

    let mut latencies = Vec::with_capacity(n * 2);
    let start = Instant::now();
    for rid in reservations {
        let t0 = Instant::now();
        let session = bench
            .engine
            .check_in(rid, "bench", None, None)
            .await
            .expect("check-in failed");
        latencies.push(t0.elapsed());

        let t0 = Instant::now();
        bench
            .engine
            .check_out(session.id, "bench", None)
            .await
            .expect("check-out failed");
        latencies.push(t0.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = (n * 2) as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} check-in/check-out pairs in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(bench: &Bench) {
    let n_tasks = 10;
    let n_per_task = 200;
    let space = bench.add_space(4);

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = bench.engine.clone();
        let reservations: Vec<Ulid> = (0..n_per_task)
            .map(|_| bench.add_reservation(space, "09:00", "13:00"))
            .collect();
        handles.push(tokio::spawn(async move {
            for rid in reservations {
                // Two racing check-ins per reservation; exactly one wins.
                let (a, b) = tokio::join!(
                    engine.check_in(rid, "bench-a", None, None),
                    engine.check_in(rid, "bench-b", None, None),
                );
                assert!(a.is_ok() != b.is_ok(), "expected exactly one check-in to win");
            }
        }));
    }
    for h in handles {
        h.await.expect("task panicked");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task * 2;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} contested check-ins = {total} attempts in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(bench: &Bench) {
    let space = bench.add_space(4);
    let readers: Vec<Ulid> = {
        let mut ids = Vec::new();
        for _ in 0..50 {
            let rid = bench.add_reservation(space, "09:00", "17:00");
            let session = bench
                .engine
                .check_in(rid, "bench", None, None)
                .await
                .expect("check-in failed");
            ids.push(session.id);
        }
        ids
    };

    let writer = {
        let engine = bench.engine.clone();
        let reservations: Vec<Ulid> = (0..1000)
            .map(|_| bench.add_reservation(space, "14:00", "15:00"))
            .collect();
        tokio::spawn(async move {
            for rid in reservations {
                if let Ok(session) = engine.check_in(rid, "writer", None, None).await {
                    let _ = engine.check_out(session.id, "writer", None).await;
                }
            }
        })
    };

    let mut latencies = Vec::with_capacity(5000);
    for i in 0..5000 {
        let t0 = Instant::now();
        bench
            .engine
            .live_status(readers[i % readers.len()])
            .expect("live status failed");
        latencies.push(t0.elapsed());
        if i % 100 == 0 {
            tokio::task::yield_now().await;
        }
    }
    writer.await.expect("writer panicked");
    print_latency("live_status latency", &mut latencies);
}

async fn phase4_extension_contention(bench: &Bench) {
    let n_spaces = 10;
    let n_contenders = 8;
    let committed = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_spaces {
        let target = bench.add_space(10);
        for _ in 0..n_contenders {
            let origin = bench.add_space(10);
            let rid = bench.add_reservation(origin, "09:00", "11:00");
            let engine = bench.engine.clone();
            let committed = committed.clone();
            let conflicts = conflicts.clone();
            handles.push(tokio::spawn(async move {
                let choice = ExtensionChoice {
                    space_id: target,
                    start: t("11:00"),
                    end: t("12:00"),
                };
                match engine.commit_extension(rid, choice).await {
                    Ok(_) => committed.fetch_add(1, Ordering::Relaxed),
                    Err(e) if e.kind() == "availability_conflict" => {
                        conflicts.fetch_add(1, Ordering::Relaxed)
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }));
        }
    }
    for h in handles {
        h.await.expect("task panicked");
    }

    let elapsed = start.elapsed();
    let ok = committed.load(Ordering::Relaxed);
    println!(
        "  {n_spaces} slots x {n_contenders} contenders: {ok} committed, {} conflicts in {:.2}s",
        conflicts.load(Ordering::Relaxed),
        elapsed.as_secs_f64()
    );
    assert_eq!(ok, n_spaces, "each slot must be won exactly once");
}

#[tokio::main]
async fn main() {
    println!("=== occupancy stress benchmark ===\n");

    let path = std::env::temp_dir().join(format!("occupancy_bench_{}.wal", Ulid::new()));
    let bench = Bench::new(SessionStore::open(&path).expect("open WAL"));
    bench
        .clock
        .set(instant_at(date(), t("10:00"), config().utc_offset));

    println!("[phase 1] sequential check-in/check-out throughput");
    phase1_sequential(&bench).await;

    println!("\n[phase 2] contested check-ins");
    phase2_concurrent(&bench).await;

    println!("\n[phase 3] live status latency under write load");
    phase3_read_under_load(&bench).await;

    println!("\n[phase 4] extension commit contention");
    phase4_extension_contention(&bench).await;

    let _ = std::fs::remove_file(&path);
    println!("\n=== benchmark complete ===");
}
