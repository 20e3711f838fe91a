use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use ulid::Ulid;

use office_booker::audit::AuditLog;
use office_booker::booking::BookingService;
use office_booker::config::Config;
use office_booker::dates::{self, Clock};
use office_booker::engine::Engine;
use office_booker::model::{CreateBooking, OfficeQuota, User};
use office_booker::notify::LogTransport;
use office_booker::users::ConfigUserDirectory;

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
    service: Arc<BookingService>,
    engine: Arc<Engine>,
    days: Vec<NaiveDate>,
}

fn setup(name: &str, offices: Vec<OfficeQuota>) -> Bench {
    let dir = std::env::temp_dir().join("office_booker_bench");
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let wal_path = dir.join(format!("{name}_{}.wal", Ulid::new()));

    let config = Config {
        env: "test".into(),
        office_quotas: offices,
        advance_booking_days: 60,
        ..Config::default()
    };
    let engine = Arc::new(Engine::open(&wal_path, config.data_retention_days).expect("open engine"));
    let today = dates::parse_date("2030-01-07").expect("bench start date");
    let days = dates::available_dates(&config, today);
    let service = BookingService::with_engine(
        Arc::new(config.clone()),
        engine.clone(),
        Arc::new(ConfigUserDirectory::new(&config)),
        Arc::new(LogTransport),
        Arc::new(AuditLog::new()),
    )
    .with_clock(Clock::Fixed(today));
    Bench {
        service: Arc::new(service),
        engine,
        days,
    }
}

fn office(id: &str, quota: u32, parking_quota: u32) -> OfficeQuota {
    OfficeQuota {
        id: id.into(),
        name: id.into(),
        quota,
        parking_quota,
    }
}

async fn phase1_sequential() {
    let bench = setup("sequential", vec![office("hq", 10_000, 100)]);
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);

    let start = Instant::now();
    for i in 0..n {
        let email = format!("user{i}@bench");
        let date = dates::format_date(bench.days[i % bench.days.len()]);
        let user = User::new(&email, 5);
        let t = Instant::now();
        bench
            .service
            .create_booking(&user, CreateBooking::new("hq", &date, &email))
            .await
            .expect("sequential booking");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

async fn phase2_contended() {
    let quota = 25;
    let bench = setup("contended", vec![office("hq", quota, 5)]);
    let date = dates::format_date(bench.days[0]);
    let n_tasks = 500;

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let service = bench.service.clone();
        let date = date.clone();
        handles.push(tokio::spawn(async move {
            let email = format!("racer{i}@bench");
            let user = User::new(&email, 5);
            let mut request = CreateBooking::new("hq", &date, &email);
            if i % 10 == 0 {
                request = request.with_parking();
            }
            let t = Instant::now();
            let ok = service.create_booking(&user, request).await.is_ok();
            (ok, t.elapsed())
        }));
    }

    let mut won = 0;
    let mut latencies = Vec::new();
    for h in handles {
        let (ok, latency) = h.await.expect("task panicked");
        won += ok as u32;
        latencies.push(latency);
    }

    let elapsed = start.elapsed();
    let row = bench
        .engine
        .office_counter("hq", bench.days[0])
        .await
        .expect("counter row");
    println!(
        "  {n_tasks} racers for {quota} desks: {won} won in {:.2}s, counter={} parking={}",
        elapsed.as_secs_f64(),
        row.booking_count,
        row.parking_count
    );
    assert_eq!(won, quota, "quota overrun or lost booking");
    assert_eq!(row.booking_count, quota);
    print_latency("contended create latency", &mut latencies);
}

async fn phase3_reads_under_load() {
    let bench = setup("reads", vec![office("hq", 400, 50)]);
    let writers = 8;
    let per_writer = 200;

    let mut handles = Vec::new();
    for w in 0..writers {
        let service = bench.service.clone();
        let days = bench.days.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..per_writer {
                let email = format!("w{w}_{j}@bench");
                let date = dates::format_date(days[j % days.len()]);
                let user = User::new(&email, 5);
                let _ = service
                    .create_booking(&user, CreateBooking::new("hq", &date, &email))
                    .await;
            }
        }));
    }

    let mut latencies = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && !handles.iter().all(|h| h.is_finished()) {
        let t = Instant::now();
        bench
            .service
            .office_availability("hq")
            .await
            .expect("availability");
        latencies.push(t.elapsed());
        tokio::task::yield_now().await;
    }
    for h in handles {
        h.await.expect("writer panicked");
    }
    print_latency("availability latency", &mut latencies);
}

async fn phase4_duplicate_storm() {
    let offices: Vec<_> = (0..20).map(|i| office(&format!("site{i}"), 100, 0)).collect();
    let bench = setup("duplicates", offices);
    let date = dates::format_date(bench.days[0]);

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..20 {
        let service = bench.service.clone();
        let date = date.clone();
        handles.push(tokio::spawn(async move {
            let user = User::new("same@bench", 5);
            service
                .create_booking(&user, CreateBooking::new(&format!("site{i}"), &date, "same@bench"))
                .await
                .is_ok()
        }));
    }
    let mut won = 0;
    for h in handles {
        won += h.await.expect("task panicked") as u32;
    }

    let mut leaked = 0;
    for i in 0..20 {
        let counts = bench
            .engine
            .office_counter(&format!("site{i}"), bench.days[0])
            .await
            .map(|c| c.booking_count)
            .unwrap_or(0);
        leaked += counts;
    }
    println!(
        "  20 offices, one user: {won} booking(s) in {:.2}s, office slots held={leaked}",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, 1);
    assert_eq!(leaked, 1, "compensation left office slots behind");
}

#[tokio::main]
async fn main() {
    println!("=== office-booker stress benchmark ===\n");

    println!("[phase 1] sequential create throughput");
    phase1_sequential().await;

    println!("\n[phase 2] contended office-day");
    phase2_contended().await;

    println!("\n[phase 3] availability reads under write load");
    phase3_reads_under_load().await;

    println!("\n[phase 4] duplicate storm");
    phase4_duplicate_storm().await;

    println!("\n=== benchmark complete ===");
}
