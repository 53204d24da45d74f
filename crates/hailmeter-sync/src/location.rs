//! # Location Provider
//!
//! The capability the controller uses to receive GPS fixes, injected at
//! construction time.
//!
//! ## Subscription Lifecycle
//! ```text
//! provider.subscribe() ──► LocationSubscription ──► next().await ... Some(sample)
//!                                 │
//!                       cancel() / CancelHandle::cancel()
//!                                 │
//!                                 ▼
//!                         next().await == None   (buffered samples discarded)
//! ```
//!
//! Samples may arrive duplicated, late or out of order; the meter copes.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use hailmeter_core::LocationSample;

/// Buffer between a provider task and its subscriber.
const SUBSCRIPTION_BUFFER: usize = 64;

// =============================================================================
// Provider Trait
// =============================================================================

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Starts a stream of fixes.
    fn subscribe(&self) -> LocationSubscription;

    /// Acquires one fresh fix. May be slow; callers bound it with a timeout.
    async fn current_fix(&self) -> Option<LocationSample>;

    /// The most recent fix seen, without waiting.
    fn last_known(&self) -> Option<LocationSample>;
}

// =============================================================================
// Subscription
// =============================================================================

/// A cancellable stream of samples.
pub struct LocationSubscription {
    rx: mpsc::Receiver<LocationSample>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

/// Cancels a subscription from another task.
#[derive(Clone)]
pub struct CancelHandle {
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }
}

impl LocationSubscription {
    /// Wraps a receiver fed by a provider.
    pub fn new(rx: mpsc::Receiver<LocationSample>) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        LocationSubscription {
            rx,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    /// Creates a subscription plus the sender a provider pushes into.
    pub fn channel() -> (mpsc::Sender<LocationSample>, Self) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        (tx, Self::new(rx))
    }

    /// Next sample; `None` once the provider is done or the subscription is
    /// cancelled.
    pub async fn next(&mut self) -> Option<LocationSample> {
        loop {
            if *self.cancel_rx.borrow_and_update() {
                self.rx.close();
                return None;
            }
            tokio::select! {
                biased;
                changed = self.cancel_rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                sample = self.rx.recv() => return sample,
            }
        }
    }

    /// Stops delivery immediately.
    pub fn cancel(&mut self) {
        self.cancel_tx.send_replace(true);
        self.rx.close();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancel_tx: Arc::clone(&self.cancel_tx),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }
}

// =============================================================================
// Replay Provider
// =============================================================================

/// Plays back a recorded trace.
///
/// `current_fix` answers with the newest delivered sample, or the first
/// sample of the trace before playback starts.
#[derive(Clone)]
pub struct ReplayLocationProvider {
    samples: Arc<Vec<LocationSample>>,
    pacing: Duration,
    fix_delay: Option<Duration>,
    last: Arc<Mutex<Option<LocationSample>>>,
}

impl ReplayLocationProvider {
    pub fn new(samples: Vec<LocationSample>) -> Self {
        ReplayLocationProvider {
            samples: Arc::new(samples),
            pacing: Duration::ZERO,
            fix_delay: None,
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Waits `pacing` between samples.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Makes `current_fix` take this long, like a cold GPS.
    pub fn with_fix_delay(mut self, delay: Duration) -> Self {
        self.fix_delay = Some(delay);
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[async_trait]
impl LocationProvider for ReplayLocationProvider {
    fn subscribe(&self) -> LocationSubscription {
        let (tx, subscription) = LocationSubscription::channel();
        let samples = Arc::clone(&self.samples);
        let last = Arc::clone(&self.last);
        let pacing = self.pacing;

        tokio::spawn(async move {
            for (index, sample) in samples.iter().enumerate() {
                if index > 0 && !pacing.is_zero() {
                    tokio::time::sleep(pacing).await;
                }
                if tx.send(*sample).await.is_err() {
                    debug!(delivered = index, "Replay subscriber went away");
                    return;
                }
                if let Ok(mut guard) = last.lock() {
                    *guard = Some(*sample);
                }
            }
            debug!(delivered = samples.len(), "Replay finished");
        });

        subscription
    }

    async fn current_fix(&self) -> Option<LocationSample> {
        if let Some(delay) = self.fix_delay {
            tokio::time::sleep(delay).await;
        }
        self.last_known().or_else(|| self.samples.first().copied())
    }

    fn last_known(&self) -> Option<LocationSample> {
        self.last.lock().ok().and_then(|guard| *guard)
    }
}
