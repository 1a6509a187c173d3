use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    connect_db(host, port, &format!("bench_{}", Ulid::new())).await
}

async fn connect_db(host: &str, port: u16, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user("agenda")
        .password("agenda");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// A provider with a 08:00–20:00 block of one-hour sessions on every weekday.
struct Practice {
    provider: Ulid,
    clients: Vec<Ulid>,
}

const DAYS: [&str; 7] = ["Lunes", "Martes", "Miercoles", "Jueves", "Viernes", "Sabado", "Domingo"];
const SESSIONS_PER_DAY: u32 = 12;

fn first_monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 16).unwrap()
}

fn session(i: u32) -> (String, String) {
    let start = 8 + i % SESSIONS_PER_DAY;
    (format!("{start:02}:00"), format!("{:02}:00", start + 1))
}

async fn setup(client: &tokio_postgres::Client, n_clients: usize) -> Practice {
    let owner = Ulid::new();
    let provider = Ulid::new();
    let mut sql = format!(
        "INSERT INTO users (id) VALUES ('{owner}');
         INSERT INTO providers (id, user_id) VALUES ('{provider}', '{owner}');"
    );
    for day in DAYS {
        sql.push_str(&format!(
            "INSERT INTO schedules (id, provider_id, day, start_at, end_at, hours_per_session) \
             VALUES ('{}', '{provider}', '{day}', '08:00', '20:00', 1);",
            Ulid::new()
        ));
    }
    let clients: Vec<Ulid> = (0..n_clients).map(|_| Ulid::new()).collect();
    for c in &clients {
        sql.push_str(&format!("INSERT INTO users (id) VALUES ('{c}');"));
    }
    client.batch_execute(&sql).await.unwrap();
    Practice { provider, clients }
}

fn booking_sql(practice: &Practice, client: Ulid, date: NaiveDate, slot: u32) -> String {
    let (start, end) = session(slot);
    format!(
        "INSERT INTO appointments (id, client_id, provider_id, appointment_date, start_at, end_at) \
         VALUES ('{}', '{client}', '{}', '{date}', '{start}', '{end}')",
        Ulid::new(),
        practice.provider
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let practice = setup(&client, 1).await;

    let n = 2000u32;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let date = first_monday() + Days::new(u64::from(i / SESSIONS_PER_DAY));
        let t = Instant::now();
        client
            .batch_execute(&booking_sql(&practice, practice.clients[0], date, i))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many clients of one provider competing for the same slots. Every slot
/// must end up booked exactly once.
async fn phase2_contended(host: &str, port: u16) {
    let n_tasks = 16;
    let n_slots = 120u32;
    let dbname = format!("bench_race_{}", Ulid::new());

    let setup_client = connect_db(host, port, &dbname).await;
    let practice = std::sync::Arc::new(setup(&setup_client, n_tasks).await);
    drop(setup_client);

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let host = host.to_string();
        let dbname = dbname.clone();
        let practice = practice.clone();
        handles.push(tokio::spawn(async move {
            let client = connect_db(&host, port, &dbname).await;
            let me = practice.clients[t];
            let mut won = 0usize;
            let mut latencies = Vec::with_capacity(n_slots as usize);
            for i in 0..n_slots {
                let date = first_monday() + Days::new(u64::from(i / SESSIONS_PER_DAY));
                let started = Instant::now();
                if client
                    .batch_execute(&booking_sql(&practice, me, date, i))
                    .await
                    .is_ok()
                {
                    won += 1;
                }
                latencies.push(started.elapsed());
            }
            (won, latencies)
        }));
    }

    let mut won = 0;
    let mut latencies = Vec::new();
    for h in handles {
        let (w, l) = h.await.unwrap();
        won += w;
        latencies.extend(l);
    }

    let elapsed = start.elapsed();
    println!(
        "  {n_tasks} clients x {n_slots} slots: {won} booked (expected {n_slots}) in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, n_slots as usize, "double booking or lost booking detected");
    print_latency("contended booking", &mut latencies);
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let dbname = format!("bench_read_{}", Ulid::new());
    let setup_client = connect_db(host, port, &dbname).await;
    let practice = std::sync::Arc::new(setup(&setup_client, 5).await);
    drop(setup_client);

    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5usize {
        let host = host.to_string();
        let dbname = dbname.clone();
        let practice = practice.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect_db(&host, port, &dbname).await;
            let mut i = 0u32;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let day = w as u64 * 1000 + u64::from(i / SESSIONS_PER_DAY);
                let date = first_monday() + Days::new(day);
                let _ = client
                    .batch_execute(&booking_sql(&practice, practice.clients[w], date, i))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let dbname = dbname.clone();
        let provider = practice.provider;
        reader_handles.push(tokio::spawn(async move {
            let client = connect_db(&host, port, &dbname).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let date = first_monday() + Days::new(((r * reads_per_reader + i) % 30) as u64);
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM slots WHERE provider_id = '{provider}' AND appointment_date = '{date}'"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("slot listing", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("AGENDA_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("AGENDA_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid AGENDA_PORT");

    println!("=== agenda stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended bookings");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] slot listing latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n=== benchmark complete ===");
}
