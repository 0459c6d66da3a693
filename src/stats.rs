//! Stats & throttle wrapper.
//!
//! A `Backend` wrapper holding mutable counters behind a
//! `parking_lot::Mutex`, exposing a snapshot struct.
//! `BORGSTORE_LATENCY`/`BORGSTORE_BANDWIDTH` are read once at
//! construction rather than per call.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::backend::{Backend, DirEntry, ItemInfo};
use crate::error::Result;

/// Per-operation counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpStats {
    pub calls: u64,
    pub wall_time: Duration,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// A point-in-time snapshot of all counters tracked by a `StatsBackend`.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub by_op: HashMap<&'static str, OpStats>,
    pub open_close_cycles: u64,
}

impl Stats {
    fn record(&mut self, op: &'static str, elapsed: Duration, bytes_in: u64, bytes_out: u64) {
        let entry = self.by_op.entry(op).or_default();
        entry.calls += 1;
        entry.wall_time += elapsed;
        entry.bytes_in += bytes_in;
        entry.bytes_out += bytes_out;
    }
}

/// Artificial per-call delay and simulated bandwidth ceiling, configured
/// from `BORGSTORE_LATENCY` (microseconds) and `BORGSTORE_BANDWIDTH`
/// (bits/sec) at construction time — used in tests to emulate slow
/// backends without a real slow backend.
#[derive(Debug, Clone, Copy, Default)]
struct Throttle {
    latency: Option<Duration>,
    bandwidth_bits_per_sec: Option<f64>,
}

impl Throttle {
    fn from_env() -> Self {
        let latency = std::env::var("BORGSTORE_LATENCY")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|micros| Duration::from_secs_f64(micros / 1_000_000.0));
        let bandwidth_bits_per_sec = std::env::var("BORGSTORE_BANDWIDTH")
            .ok()
            .and_then(|v| v.parse::<f64>().ok());
        Self {
            latency,
            bandwidth_bits_per_sec,
        }
    }

    async fn apply(&self, bytes: u64) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(rate) = self.bandwidth_bits_per_sec {
            if rate > 0.0 {
                let seconds = (bytes as f64 * 8.0) / rate;
                if seconds > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
                }
            }
        }
    }
}

/// Wraps a `Backend`, recording per-operation call counts, wall time, and
/// byte counters, and logging each call at `DEBUG` as `{op, name, bytes,
/// seconds}`.
pub struct StatsBackend<B: Backend> {
    inner: B,
    stats: parking_lot::Mutex<Stats>,
    throttle: Throttle,
}

impl<B: Backend> StatsBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            stats: parking_lot::Mutex::new(Stats::default()),
            throttle: Throttle::from_env(),
        }
    }

    /// Snapshot of counters gathered so far.
    pub fn stats(&self) -> Stats {
        self.stats.lock().clone()
    }

    async fn timed<T>(
        &self,
        op: &'static str,
        name: &str,
        bytes_in: u64,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T>
    where
        T: MeasuredOutput,
    {
        self.throttle.apply(bytes_in).await;
        let start = Instant::now();
        let result = fut.await;
        let elapsed = start.elapsed();
        let bytes_out = result.as_ref().map(|v| v.measured_bytes()).unwrap_or(0);

        tracing::debug!(op, name, bytes = bytes_in + bytes_out, seconds = elapsed.as_secs_f64());
        self.stats.lock().record(op, elapsed, bytes_in, bytes_out);

        if bytes_out > 0 {
            self.throttle.apply(bytes_out).await;
        }
        result
    }
}

/// How many bytes a call's successful result represents, for bandwidth
/// throttling and the `bytes` field in the debug log.
trait MeasuredOutput {
    fn measured_bytes(&self) -> u64;
}

impl MeasuredOutput for () {
    fn measured_bytes(&self) -> u64 {
        0
    }
}

impl MeasuredOutput for Bytes {
    fn measured_bytes(&self) -> u64 {
        self.len() as u64
    }
}

impl MeasuredOutput for ItemInfo {
    fn measured_bytes(&self) -> u64 {
        0
    }
}

impl MeasuredOutput for Vec<DirEntry> {
    fn measured_bytes(&self) -> u64 {
        0
    }
}

#[async_trait]
impl<B: Backend> Backend for StatsBackend<B> {
    async fn create(&self) -> Result<()> {
        self.timed("create", "", 0, self.inner.create()).await
    }

    async fn destroy(&self) -> Result<()> {
        self.timed("destroy", "", 0, self.inner.destroy()).await
    }

    async fn open(&self) -> Result<()> {
        let result = self.timed("open", "", 0, self.inner.open()).await;
        if result.is_ok() {
            self.stats.lock().open_close_cycles += 1;
        }
        result
    }

    async fn close(&self) -> Result<()> {
        self.timed("close", "", 0, self.inner.close()).await
    }

    async fn mkdir(&self, name: &str) -> Result<()> {
        self.timed("mkdir", name, 0, self.inner.mkdir(name)).await
    }

    async fn rmdir(&self, name: &str) -> Result<()> {
        self.timed("rmdir", name, 0, self.inner.rmdir(name)).await
    }

    async fn info(&self, name: &str) -> Result<ItemInfo> {
        self.timed("info", name, 0, self.inner.info(name)).await
    }

    async fn load(&self, name: &str, offset: u64, size: Option<u64>) -> Result<Bytes> {
        self.timed("load", name, 0, self.inner.load(name, offset, size))
            .await
    }

    async fn store(&self, name: &str, value: Bytes) -> Result<()> {
        let bytes_in = value.len() as u64;
        self.timed("store", name, bytes_in, self.inner.store(name, value))
            .await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.timed("delete", name, 0, self.inner.delete(name)).await
    }

    async fn move_object(&self, src: &str, dst: &str) -> Result<()> {
        self.timed("move", src, 0, self.inner.move_object(src, dst))
            .await
    }

    async fn list(&self, name: &str) -> Result<Vec<DirEntry>> {
        self.timed("list", name, 0, self.inner.list(name)).await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}
