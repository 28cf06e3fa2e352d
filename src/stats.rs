//! Sniffer counters and the HTTP `/stats` endpoint.
//!
//! Counters are plain atomics so the frame callback can bump them without
//! taking a lock. The server uses `tiny_http` and runs in its own thread.
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 120,
//!   "channel": 7,
//!   "frames": { "delivered": 5120, "accepted": 4810, "control": 250,
//!               "truncated": 12, "dropped": 48 },
//!   "sweeps": { "completed": 9, "last_devs": 3, "last_bss": 2 }
//! }
//! ```

use crate::registry::SweepReport;
use log::{error, info, warn};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tiny_http::{Method, Response, Server};

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// Frame-path counters.
#[derive(Debug, Default)]
pub struct FrameStats {
    /// Every buffer handed to the frame handler.
    pub delivered: AtomicUsize,
    /// Frames folded into the registry.
    pub accepted: AtomicUsize,
    /// Control frames skipped.
    pub control: AtomicUsize,
    /// Buffers too short to classify.
    pub truncated: AtomicUsize,
    /// Frames dropped because reception was paused or the registry was busy.
    pub dropped: AtomicUsize,
}

impl FrameStats {
    fn to_json(&self) -> String {
        format!(
            r#"{{"delivered":{},"accepted":{},"control":{},"truncated":{},"dropped":{}}}"#,
            self.delivered.load(Ordering::Relaxed),
            self.accepted.load(Ordering::Relaxed),
            self.control.load(Ordering::Relaxed),
            self.truncated.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed)
        )
    }
}

/// Sweep counters.
#[derive(Debug, Default)]
pub struct SweepStats {
    /// Completed sweeps (reset/report transactions).
    pub completed: AtomicUsize,
    /// Devices in the most recent report.
    pub last_devices: AtomicU32,
    /// Infrastructure in the most recent report.
    pub last_infrastructure: AtomicU32,
}

impl SweepStats {
    fn to_json(&self) -> String {
        format!(
            r#"{{"completed":{},"last_devs":{},"last_bss":{}}}"#,
            self.completed.load(Ordering::Relaxed),
            self.last_devices.load(Ordering::Relaxed),
            self.last_infrastructure.load(Ordering::Relaxed)
        )
    }
}

/// All sniffer statistics.
///
/// Shared across the frame callback, the tick handler and the server.
#[derive(Debug)]
pub struct SnifferStats {
    start_time: Instant,
    /// Channel the radio is currently tuned to.
    pub channel: AtomicU8,
    /// Frame-path counters.
    pub frames: FrameStats,
    /// Sweep counters.
    pub sweeps: SweepStats,
}

impl SnifferStats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            channel: AtomicU8::new(0),
            frames: FrameStats::default(),
            sweeps: SweepStats::default(),
        }
    }

    /// Record a finished sweep.
    pub fn record_sweep(&self, report: &SweepReport) {
        self.sweeps.completed.fetch_add(1, Ordering::Relaxed);
        self.sweeps
            .last_devices
            .store(report.devices, Ordering::Relaxed);
        self.sweeps
            .last_infrastructure
            .store(report.infrastructure, Ordering::Relaxed);
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> String {
        format!(
            r#"{{"uptime_secs":{},"channel":{},"frames":{},"sweeps":{}}}"#,
            self.uptime_secs(),
            self.channel.load(Ordering::Relaxed),
            self.frames.to_json(),
            self.sweeps.to_json()
        )
    }
}

impl Default for SnifferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP stats server.
///
/// Runs in a background thread; drop it to stop.
pub struct StatsServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl StatsServer {
    /// Start serving `stats` on `bind_addr:port` (`None` binds 0.0.0.0).
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        stats: Arc<SnifferStats>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;

        info!("Stats server listening on http://{}/stats", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::spawn(move || {
            Self::run_server(server, stats, shutdown_clone);
        });

        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    fn run_server(server: Server, stats: Arc<SnifferStats>, shutdown: Arc<AtomicBool>) {
        let content_type =
            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                .expect("static header");
        let allow_get =
            tiny_http::Header::from_bytes(&b"Allow"[..], &b"GET"[..]).expect("static header");

        while !shutdown.load(Ordering::Acquire) {
            let request = match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    error!("Stats server error: {}", e);
                    return;
                }
            };

            let response = if request.method() != &Method::Get {
                Response::from_string("Method Not Allowed")
                    .with_status_code(405)
                    .with_header(allow_get.clone())
            } else {
                match request.url() {
                    "/stats" | "/stats/" => Response::from_string(stats.to_json())
                        .with_header(content_type.clone())
                        .with_status_code(200),
                    _ => Response::from_string("Not Found").with_status_code(404),
                }
            };

            if let Err(e) = request.respond(response) {
                warn!("Failed to send response: {}", e);
            }
        }

        info!("Stats server shutting down");
    }

    /// Stop the server. May take up to 100ms due to polling.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}
