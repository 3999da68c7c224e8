//! Download metrics shared between the scheduler loops and whoever reports
//! progress.
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tokio::{sync::Mutex, time::Instant};

/// Exponential Moving Average (EMA) smoothing factor
/// Higher values = more responsive to changes, lower values = smoother
const EMA_ALPHA: f64 = 0.3;

/// Metrics sink of a download. It is handed to the torrent explicitly, so
/// several downloads in the same process keep separate numbers.
#[derive(Debug)]
pub struct Counter {
    // -- cumulative counters --
    pub total_downloaded: AtomicU64,
    pub pieces_written: AtomicU32,
    pub pieces_rejected: AtomicU32,

    // -- rate calculation --
    pub download_rate: AtomicU64,

    // -- internal state --
    window_downloaded: AtomicU64,
    last_update: Mutex<Instant>,
    ema_download: Mutex<f64>,
}

impl Default for Counter {
    fn default() -> Self {
        Self {
            total_downloaded: AtomicU64::new(0),
            pieces_written: AtomicU32::new(0),
            pieces_rejected: AtomicU32::new(0),
            download_rate: AtomicU64::new(0),
            window_downloaded: AtomicU64::new(0),
            last_update: Mutex::new(Instant::now()),
            ema_download: Mutex::new(0.0),
        }
    }
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the payload of a block that was accepted.
    pub fn record_download(&self, bytes: u64) {
        self.total_downloaded.fetch_add(bytes, Ordering::Relaxed);
        self.window_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_piece_written(&self) {
        self.pieces_written.fetch_add(1, Ordering::Relaxed);
    }

    /// A piece whose hash did not match and had to be downloaded again.
    pub fn record_piece_rejected(&self) {
        self.pieces_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pieces_written(&self) -> u32 {
        self.pieces_written.load(Ordering::Relaxed)
    }

    pub fn download_rate(&self) -> u64 {
        self.download_rate.load(Ordering::Relaxed)
    }

    /// Update rates with EMA smoothing
    pub async fn update_rates(&self) {
        let now = Instant::now();
        let mut last_update = self.last_update.lock().await;
        let elapsed = now.duration_since(*last_update).as_secs_f64();

        if elapsed < 0.001 {
            return;
        }

        let downloaded = self.window_downloaded.swap(0, Ordering::Relaxed);
        let dl_rate = downloaded as f64 / elapsed;

        let mut ema_dl = self.ema_download.lock().await;

        *ema_dl = if *ema_dl == 0.0 {
            dl_rate
        } else {
            EMA_ALPHA * dl_rate + (1.0 - EMA_ALPHA) * *ema_dl
        };

        // bytes/sec
        self.download_rate.store(*ema_dl as u64, Ordering::Relaxed);

        *last_update = now;
    }
}
