//! # fetch: keep-alive load generator
//!
//! Runs `--concurrency` worker fibers on one thread, each issuing GET
//! requests through a shared [`ClientPool`] until `--requests` have been
//! sent. Connections are reused across workers.
//!
//! ## Usage
//!
//!   fetch --port 8080 -n 100000 -c 50
//!   FIBER_LOG=fiber_http=trace fetch --addr 10.0.0.2 --path /index.html
//!
//! Output: JSON on stdout, progress on stderr.

use std::cell::{Cell, RefCell};
use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Instant;

use clap::Parser;
use fiber_http::{ClientPool, PoolConfig};
use fiber_runtime::{RuntimeConfig, Scheduler};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ═══════════════════════════════════════════════════════════════════
// CLI
// ═══════════════════════════════════════════════════════════════════

#[derive(Parser, Debug)]
#[command(name = "fetch", version, about = "HTTP/1.1 load generator on single-threaded fibers")]
struct Args {
    /// Server IPv4 address
    #[arg(short, long, env = "FETCH_ADDR", default_value_t = Ipv4Addr::LOCALHOST)]
    addr: Ipv4Addr,

    /// Server port
    #[arg(short, long, env = "FETCH_PORT", default_value_t = 8080)]
    port: u16,

    /// Request path
    #[arg(long, default_value = "/")]
    path: String,

    /// Host header (defaults to the address)
    #[arg(long)]
    host: Option<String>,

    /// Total requests
    #[arg(short = 'n', long, env = "FETCH_REQUESTS", default_value_t = 1000)]
    requests: u64,

    /// Worker fibers issuing requests concurrently
    #[arg(short, long, env = "FETCH_CONCURRENCY", default_value_t = 16)]
    concurrency: usize,

    /// Send `Connection: close` (no reuse)
    #[arg(long)]
    close: bool,
}

impl Args {
    fn request_bytes(&self) -> Vec<u8> {
        let host = self.host.clone().unwrap_or_else(|| format!("{}:{}", self.addr, self.port));
        let connection = if self.close { "close" } else { "keep-alive" };
        format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: fetch\r\nConnection: {}\r\n\r\n",
            self.path, host, connection
        )
        .into_bytes()
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tally shared by the worker fibers
// ═══════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Tally {
    ok: u64,
    errors: u64,
    reused: u64,
    non_2xx: u64,
    body_bytes: u64,
    latencies_ns: Vec<u64>,
}

fn worker(pool: ClientPool, args: Rc<Args>, request: Rc<[u8]>, remaining: Rc<Cell<u64>>, tally: Rc<RefCell<Tally>>) {
    while remaining.get() > 0 {
        remaining.set(remaining.get() - 1);

        let t = Instant::now();
        let handle = match pool.request(args.addr, args.port, &request) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "acquire failed");
                tally.borrow_mut().errors += 1;
                continue;
            }
        };
        let outcome = handle.wait();
        let lat = t.elapsed().as_nanos() as u64;

        let mut tally = tally.borrow_mut();
        match outcome {
            Ok(resp) => {
                tally.ok += 1;
                tally.latencies_ns.push(lat);
                tally.body_bytes += resp.body_len() as u64;
                if handle.is_reused() {
                    tally.reused += 1;
                }
                if !(200..300).contains(&resp.status) {
                    tally.non_2xx += 1;
                }
                let done = tally.ok + tally.errors;
                if done % 10_000 == 0 {
                    eprintln!("fetch: {} done", done);
                }
            }
            Err(e) => {
                warn!(fd = handle.fd(), error = %e, "request failed");
                tally.errors += 1;
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Latency statistics
// ═══════════════════════════════════════════════════════════════════

struct Stats {
    min_us: f64, max_us: f64, avg_us: f64,
    p50_us: f64, p75_us: f64, p90_us: f64, p99_us: f64, p99_9_us: f64,
}

fn compute_stats(lat: &mut [u64]) -> Stats {
    if lat.is_empty() {
        return Stats { min_us: 0.0, max_us: 0.0, avg_us: 0.0,
            p50_us: 0.0, p75_us: 0.0, p90_us: 0.0, p99_us: 0.0, p99_9_us: 0.0 };
    }
    lat.sort_unstable();
    let n = lat.len();
    let sum: u64 = lat.iter().sum();
    let pct = |p: f64| lat[((p / 100.0) * (n as f64 - 1.0)).ceil() as usize] as f64 / 1000.0;
    Stats {
        min_us: lat[0] as f64 / 1000.0,
        max_us: lat[n - 1] as f64 / 1000.0,
        avg_us: (sum as f64 / n as f64) / 1000.0,
        p50_us: pct(50.0), p75_us: pct(75.0), p90_us: pct(90.0),
        p99_us: pct(99.0), p99_9_us: pct(99.9),
    }
}

// ═══════════════════════════════════════════════════════════════════
// JSON output
// ═══════════════════════════════════════════════════════════════════

fn emit_json(args: &Args, dur: f64, t: &Tally, opened: usize, s: &Stats) {
    let e = |s: &str| s.replace('\\', "\\\\").replace('"', "\\\"");
    println!(r#"{{
  "target": "{}:{}{}",
  "concurrency": {},
  "duration_sec": {:.3},
  "total_requests": {},
  "requests_per_sec": {:.2},
  "total_errors": {},
  "non_2xx": {},
  "reused": {},
  "open_connections": {},
  "body_bytes": {},
  "latency_us": {{
    "min": {:.1},
    "avg": {:.1},
    "p50": {:.1},
    "p75": {:.1},
    "p90": {:.1},
    "p99": {:.1},
    "p99.9": {:.1},
    "max": {:.1}
  }}
}}"#, args.addr, args.port, e(&args.path), args.concurrency, dur,
        t.ok, t.ok as f64 / dur, t.errors, t.non_2xx, t.reused, opened, t.body_bytes,
        s.min_us, s.avg_us, s.p50_us, s.p75_us, s.p90_us,
        s.p99_us, s.p99_9_us, s.max_us);
}

// ═══════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let sched = Scheduler::new(RuntimeConfig::from_env())?;
    let pool = ClientPool::new(sched.clone(), PoolConfig::from_env())?;

    let args = Rc::new(args);
    let request: Rc<[u8]> = args.request_bytes().into();
    let remaining = Rc::new(Cell::new(args.requests));
    let tally = Rc::new(RefCell::new(Tally {
        latencies_ns: Vec::with_capacity(args.requests as usize),
        ..Tally::default()
    }));

    info!(
        target_addr = %args.addr, port = args.port, requests = args.requests,
        concurrency = args.concurrency, keepalive = !args.close, "starting"
    );

    let start = Instant::now();
    for _ in 0..args.concurrency.max(1) {
        let (pool, args, request) = (pool.clone(), args.clone(), request.clone());
        let (remaining, tally) = (remaining.clone(), tally.clone());
        sched.spawn(move || worker(pool, args, request, remaining, tally))?;
    }
    sched.run()?;
    let dur = start.elapsed().as_secs_f64();

    let opened = pool.open_connections();
    pool.shutdown();

    let mut tally = tally.borrow_mut();
    let stats = compute_stats(&mut tally.latencies_ns);
    eprintln!("fetch: done, {} reqs in {:.2}s ({:.0} req/s), {} errors, {} reused",
        tally.ok, dur, tally.ok as f64 / dur, tally.errors, tally.reused);
    emit_json(&args, dur, &tally, opened, &stats);
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("FIBER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fetch: {}", e);
            ExitCode::FAILURE
        }
    }
}
