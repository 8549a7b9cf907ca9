//! Shutdown signalling, in-flight record tracking and the drain sequence

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use super::{lock, EngineInner, EngineState, FlushReport};

/// Broadcast flag telling background tasks to stop
#[derive(Debug, Clone)]
pub(crate) struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub(crate) fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub(crate) fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Count of records handed out and not yet acknowledged or dropped
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub(crate) fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            tracker: Arc::clone(self),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolve once no record is in flight
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Held by every outstanding record handle
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    tracker: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.tracker.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

impl<T> EngineInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Drain and stop; only the first call does any work
    ///
    /// 1. stop handing out records
    /// 2. wait for in-flight records, at most `graceful-shutdown-timeout`
    /// 3. stop the timers, letting a commit in progress finish
    /// 4. commit every dirty partition and close the store
    pub(super) async fn shutdown(&self) -> FlushReport {
        {
            let mut state = lock(&self.state);
            if *state != EngineState::Running {
                debug!("Shutdown already requested");
                return FlushReport::default();
            }
            *state = EngineState::Draining;
        }

        info!(
            in_flight = self.in_flight.count(),
            "Draining checkpoint engine"
        );

        let grace = self.config.graceful_shutdown_timeout;
        if tokio::time::timeout(grace, self.in_flight.wait_idle())
            .await
            .is_err()
        {
            warn!(
                "{} record(s) still in flight after {:?}; their offsets are not committed",
                self.in_flight.count(),
                grace
            );
        }

        self.shutdown.trigger();
        let timers = std::mem::take(&mut *lock(&self.timers));
        for timer in timers {
            if let Err(e) = timer.await {
                warn!("Commit timer ended abnormally: {}", e);
            }
        }

        let report = self.flush_all().await;

        if let Err(e) = self.store_call(self.store.close()).await {
            warn!("Failed to close {} state store: {}", self.store.backend_type(), e);
        }

        *lock(&self.state) = EngineState::Stopped;
        info!(
            persisted = report.persisted,
            failed = report.failed,
            "Checkpoint engine stopped"
        );
        report
    }
}

/// Resolve when the process receives SIGINT or SIGTERM
#[cfg(unix)]
pub async fn shutdown_requested() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to install signal handlers: {}", e);
            std::future::pending::<()>().await;
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, initiating graceful shutdown");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

/// Resolve when the process receives Ctrl+C
#[cfg(not(unix))]
pub async fn shutdown_requested() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
