//! Periodic status reporting at a runtime-adjustable interval

use crate::config::ConfigCell;
use crate::connector::SessionControl;
use crate::error::{AgentError, Result};
use fleetlink_proto::Envelope;
use serde::Serialize;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Produces the opaque status payload sent on every tick
pub trait StatusProvider: Send + Sync {
    /// Collect the current status
    fn collect(&self) -> serde_json::Value;
}

/// Basic process facts; richer metrics belong to a custom provider
#[derive(Debug)]
pub struct SystemStatusProvider {
    started: Instant,
}

impl Default for SystemStatusProvider {
    fn default() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemStatus {
    os: &'static str,
    arch: &'static str,
    pid: u32,
    uptime_seconds: u64,
}

impl StatusProvider for SystemStatusProvider {
    fn collect(&self) -> serde_json::Value {
        let status = SystemStatus {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            pid: std::process::id(),
            uptime_seconds: self.started.elapsed().as_secs(),
        };
        serde_json::to_value(status).unwrap_or_default()
    }
}

/// Outcome of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Interval changed; the ticker must be rebuilt at the new period
    Reschedule(u64),
    /// Status was queued on the session
    Sent,
    /// Not connected
    Skipped,
    /// Send failed; logged, not retried
    Failed,
}

/// Emits `status` envelopes while the agent is connected
pub struct HeartbeatScheduler {
    identity: String,
    config: Arc<ConfigCell>,
    provider: Arc<dyn StatusProvider>,
    session: OnceLock<Weak<dyn SessionControl>>,
    running: Mutex<Option<CancellationToken>>,
}

impl HeartbeatScheduler {
    /// Create a stopped scheduler
    pub fn new(
        identity: impl Into<String>,
        config: Arc<ConfigCell>,
        provider: Arc<dyn StatusProvider>,
    ) -> Self {
        Self {
            identity: identity.into(),
            config,
            provider,
            session: OnceLock::new(),
            running: Mutex::new(None),
        }
    }

    /// Bind the session statuses are sent on; allowed once
    pub fn bind(&self, session: Weak<dyn SessionControl>) -> Result<()> {
        self.session
            .set(session)
            .map_err(|_| AgentError::AlreadyWired("heartbeat scheduler"))
    }

    /// Whether the periodic task is running
    pub fn is_running(&self) -> bool {
        self.with_running(|slot| slot.is_some())
    }

    /// Start the periodic task; returns false if it was already running
    pub fn start(self: &Arc<Self>) -> bool {
        let token = CancellationToken::new();
        let started = self.with_running(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(token.clone());
            true
        });
        if !started {
            debug!("Heartbeat already running");
            return false;
        }

        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run(token).await });
        true
    }

    /// Cancel the periodic task if running
    pub fn stop(&self) {
        if let Some(token) = self.with_running(Option::take) {
            token.cancel();
            info!("Heartbeat stopped");
        }
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut scheduled = self.config.sync_frequency();
        let mut ticker = Self::ticker(scheduled);
        info!("Heartbeat started every {}s", scheduled);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Tick::Reschedule(seconds) = self.tick(scheduled).await {
                        info!("Heartbeat rescheduled from {}s to {}s", scheduled, seconds);
                        scheduled = seconds;
                        ticker = Self::ticker(scheduled);
                    }
                }
            }
        }
    }

    fn ticker(seconds: u64) -> Interval {
        let period = Duration::from_secs(seconds.max(1));
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Run one tick against the interval the ticker was built with
    pub async fn tick(&self, scheduled: u64) -> Tick {
        let live = self.config.sync_frequency();
        if live != scheduled {
            return Tick::Reschedule(live);
        }

        let Some(session) = self.session.get().and_then(Weak::upgrade) else {
            return Tick::Skipped;
        };
        if !session.is_connected() {
            return Tick::Skipped;
        }

        let status = Envelope::status(self.identity.clone(), self.provider.collect());
        match session.send(status).await {
            Ok(()) => {
                debug!("Status sent");
                Tick::Sent
            }
            Err(e) => {
                warn!("Failed to send status: {}", e);
                Tick::Failed
            }
        }
    }

    fn with_running<T>(&self, f: impl FnOnce(&mut Option<CancellationToken>) -> T) -> T {
        match self.running.lock() {
            Ok(mut slot) => f(&mut *slot),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }
}
