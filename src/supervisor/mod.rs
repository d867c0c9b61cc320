//! Long-poll receive loop.
//!
//! Owns the single-instance lock, the update offset and the failure
//! backoff. Inbound events are handed to [`lanes::ConversationLanes`]
//! so a slow handler never stalls the poll.

/// Failure backoff
pub mod backoff;
/// Per-conversation ordered workers
pub mod lanes;
/// Single-instance advisory lock
pub mod lock;

use crate::bot::transport::{InboundEvent, InboundTransport, TransportError};
use crate::config;
use async_trait::async_trait;
use backoff::Backoff;
use lanes::ConversationLanes;
use lock::{InstanceLock, LockError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consumer of inbound events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one event. Failures are the handler's own business.
    async fn handle(&self, event: InboundEvent);
}

/// Lifecycle of the receive loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Not started
    Idle,
    /// Single-instance lock held, not yet polling
    Locked,
    /// Receiving updates
    Polling,
    /// Waiting out a failure delay
    Backoff,
    /// Shut down, lock released
    Stopped,
}

/// Result of a single poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Batch received; number of events dispatched
    Delivered(usize),
    /// Another consumer holds the update stream; wait this long
    Conflict(Duration),
    /// Any other failure; wait this long
    Fault(Duration),
}

impl CycleOutcome {
    /// Delay to wait before the next cycle, if any
    #[must_use]
    pub const fn delay(self) -> Option<Duration> {
        match self {
            Self::Delivered(_) => None,
            Self::Conflict(delay) | Self::Fault(delay) => Some(delay),
        }
    }
}

/// Tunables of the receive loop
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Long-poll wait per request
    pub poll_timeout: Duration,
    /// First failure delay
    pub backoff_min: Duration,
    /// Failure delay cap
    pub backoff_max: Duration,
    /// Idle time after which a conversation worker exits
    pub conversation_idle: Duration,
    /// Drop updates queued while the bot was offline
    pub skip_pending_updates: bool,
}

impl SupervisorOptions {
    /// Options from the environment getters and the given settings
    #[must_use]
    pub fn from_settings(settings: &config::Settings) -> Self {
        Self {
            poll_timeout: Duration::from_secs(config::get_poll_timeout_secs()),
            backoff_min: Duration::from_secs(config::get_backoff_min_secs()),
            backoff_max: Duration::from_secs(config::get_backoff_max_secs()),
            conversation_idle: Duration::from_secs(config::CONVERSATION_IDLE_SECS),
            skip_pending_updates: settings.skip_pending_updates,
        }
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(config::POLL_TIMEOUT_SECS),
            backoff_min: Duration::from_secs(config::BACKOFF_MIN_SECS),
            backoff_max: Duration::from_secs(config::BACKOFF_MAX_SECS),
            conversation_idle: Duration::from_secs(config::CONVERSATION_IDLE_SECS),
            skip_pending_updates: true,
        }
    }
}

/// Single consumer of the inbound update stream
pub struct PollingSupervisor {
    transport: Arc<dyn InboundTransport>,
    lanes: ConversationLanes,
    backoff: Backoff,
    offset: Option<i64>,
    poll_timeout: Duration,
    needs_prepare: bool,
    drop_pending: bool,
    state: SupervisorState,
}

impl PollingSupervisor {
    /// Creates an idle supervisor; nothing is polled until [`Self::run`].
    #[must_use]
    pub fn new(
        transport: Arc<dyn InboundTransport>,
        handler: Arc<dyn EventHandler>,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            transport,
            lanes: ConversationLanes::new(handler, options.conversation_idle),
            backoff: Backoff::new(options.backoff_min, options.backoff_max),
            offset: None,
            poll_timeout: options.poll_timeout,
            needs_prepare: true,
            drop_pending: options.skip_pending_updates,
            state: SupervisorState::Idle,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> SupervisorState {
        self.state
    }

    /// Offset that the next receive will acknowledge
    #[cfg(test)]
    const fn offset(&self) -> Option<i64> {
        self.offset
    }

    /// Runs one receive cycle.
    ///
    /// Entering polling (first cycle, or the first after a failure) clears
    /// any webhook registration first. A conflict clears it once more
    /// straight away. The returned delay is the caller's to wait.
    pub async fn poll_once(&mut self) -> CycleOutcome {
        if self.needs_prepare {
            self.prepare().await;
        }
        self.state = SupervisorState::Polling;

        match self.transport.receive(self.offset, self.poll_timeout).await {
            Ok(batch) => {
                if let Some(next) = batch.next_offset {
                    self.offset = Some(self.offset.map_or(next, |current| current.max(next)));
                }
                let count = batch.events.len();
                for event in batch.events {
                    self.lanes.dispatch(event);
                }
                if count > 0 {
                    debug!(count, offset = ?self.offset, "Dispatched inbound events");
                }
                self.backoff.reset();
                CycleOutcome::Delivered(count)
            }
            Err(TransportError::Conflict(cause)) => {
                let delay = self.backoff.next_delay();
                warn!(
                    delay_secs = delay.as_secs(),
                    "Another consumer is polling this bot ({cause}), clearing webhook and backing off"
                );
                if let Err(e) = self.transport.clear_registration(false).await {
                    warn!("Failed to clear webhook after conflict: {e}");
                }
                self.enter_backoff();
                CycleOutcome::Conflict(delay)
            }
            Err(TransportError::Fault(cause)) => {
                let delay = self.backoff.next_delay();
                error!(delay_secs = delay.as_secs(), "Polling failed: {cause}");
                self.enter_backoff();
                CycleOutcome::Fault(delay)
            }
        }
    }

    /// Takes the single-instance lock and polls until `cancel` fires.
    ///
    /// While another process holds the lock this waits without polling.
    ///
    /// # Errors
    ///
    /// Returns `LockError` if the lock file cannot be used at all.
    pub async fn run(
        &mut self,
        lock_path: &Path,
        lock_retry: Duration,
        cancel: CancellationToken,
    ) -> Result<(), LockError> {
        let Some(lock) = InstanceLock::acquire(lock_path, lock_retry, &cancel).await? else {
            info!("Shutdown requested before the polling lock was acquired");
            self.state = SupervisorState::Stopped;
            return Ok(());
        };
        self.state = SupervisorState::Locked;
        info!(lock = %lock.path().display(), "Starting long polling");

        loop {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                outcome = self.poll_once() => outcome,
            };
            let Some(delay) = outcome.delay() else {
                continue;
            };
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!("Stopping: draining conversation workers");
        self.lanes
            .shutdown(Duration::from_secs(config::SHUTDOWN_GRACE_SECS))
            .await;
        lock.release();
        self.state = SupervisorState::Stopped;
        info!("Polling stopped");
        Ok(())
    }

    async fn prepare(&mut self) {
        match self.transport.clear_registration(self.drop_pending).await {
            Ok(()) => {
                if self.drop_pending {
                    info!("Webhook cleared, pending updates dropped");
                }
                self.drop_pending = false;
            }
            Err(e) => warn!("Failed to clear webhook before polling: {e}"),
        }
        self.needs_prepare = false;
    }

    fn enter_backoff(&mut self) {
        self.needs_prepare = true;
        self.state = SupervisorState::Backoff;
    }
}
