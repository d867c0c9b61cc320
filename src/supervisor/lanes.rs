//! Per-conversation ordered workers.
//!
//! Each conversation gets its own queue and worker task: events of one
//! conversation are handled strictly in arrival order, while different
//! conversations proceed independently of each other and of the poll loop.
//!
//! A worker that goes idle closes its queue and exits; the next event starts
//! a replacement. Every worker of a conversation takes the conversation's
//! turn lock before handling anything, so a replacement never overlaps with
//! a predecessor that is still draining.

use super::EventHandler;
use crate::bot::transport::{ConversationId, InboundEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Held by whichever worker currently owns a conversation
type Turn = Arc<Mutex<()>>;

struct Lane {
    sender: mpsc::UnboundedSender<InboundEvent>,
    turn: Turn,
}

impl Lane {
    /// Queue closed and no worker (running or waiting) holds the turn
    fn is_retired(&self) -> bool {
        self.sender.is_closed() && Arc::strong_count(&self.turn) == 1
    }
}

/// Router of inbound events onto per-conversation workers
pub struct ConversationLanes {
    handler: Arc<dyn EventHandler>,
    idle_timeout: Duration,
    lanes: HashMap<ConversationId, Lane>,
    workers: JoinSet<()>,
}

impl ConversationLanes {
    /// Workers exit after `idle_timeout` without events.
    #[must_use]
    pub fn new(handler: Arc<dyn EventHandler>, idle_timeout: Duration) -> Self {
        Self {
            handler,
            idle_timeout,
            lanes: HashMap::new(),
            workers: JoinSet::new(),
        }
    }

    /// Queues an event on its conversation's worker, starting one if needed.
    pub fn dispatch(&mut self, event: InboundEvent) {
        self.reap();

        let conversation = event.conversation;
        let (event, turn) = match self.lanes.get(&conversation) {
            Some(lane) => match lane.sender.send(event) {
                Ok(()) => return,
                // Worker went idle and closed its queue; it may still be draining
                Err(mpsc::error::SendError(event)) => (event, Arc::clone(&lane.turn)),
            },
            None => (event, Turn::default()),
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        if sender.send(event).is_err() {
            error!(conversation, "New conversation queue closed immediately");
            return;
        }
        debug!(conversation, "Starting conversation worker");
        self.workers.spawn(run_lane(
            conversation,
            receiver,
            Arc::clone(&turn),
            Arc::clone(&self.handler),
            self.idle_timeout,
        ));
        self.lanes.insert(conversation, Lane { sender, turn });
    }

    /// Number of conversations with an open queue
    #[cfg(test)]
    fn active(&self) -> usize {
        self.lanes
            .values()
            .filter(|lane| !lane.sender.is_closed())
            .count()
    }

    /// Stops accepting events and waits up to `grace` for queued ones to finish.
    pub async fn shutdown(&mut self, grace: Duration) {
        self.lanes.clear();
        let drain = async {
            while let Some(result) = self.workers.join_next().await {
                log_worker_exit(result);
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("Conversation workers did not finish in time, aborting them");
            self.workers.abort_all();
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.workers.try_join_next() {
            log_worker_exit(result);
        }
        self.lanes.retain(|_, lane| !lane.is_retired());
    }
}

fn log_worker_exit(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Conversation worker panicked: {e}");
        }
    }
}

async fn run_lane(
    conversation: ConversationId,
    mut receiver: mpsc::UnboundedReceiver<InboundEvent>,
    turn: Turn,
    handler: Arc<dyn EventHandler>,
    idle_timeout: Duration,
) {
    // A replacement waits here until its predecessor has finished draining
    let _turn = turn.lock_owned().await;
    loop {
        match tokio::time::timeout(idle_timeout, receiver.recv()).await {
            Ok(Some(event)) => handler.handle(event).await,
            Ok(None) => break,
            Err(_) => {
                // Close first so the dispatcher starts a fresh worker, then
                // finish whatever slipped in before the close.
                receiver.close();
                while let Ok(event) = receiver.try_recv() {
                    handler.handle(event).await;
                }
                debug!(conversation, "Conversation worker idle, exiting");
                break;
            }
        }
    }
}
