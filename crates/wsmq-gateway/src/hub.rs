//! Connection registry.
//!
//! The [`Hub`] owns the set of live sessions. It runs as a single task and
//! is driven exclusively by [`HubCommand`]s sent through a [`HubHandle`],
//! so the live set needs no lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};
use crate::queue::OutboundQueue;

/// Commands accepted by the hub loop.
#[derive(Debug)]
pub enum HubCommand {
    /// Add a session to the live set.
    Register {
        /// Session identifier.
        session_id: Uuid,
        /// The session's outbound queue.
        queue: OutboundQueue,
    },
    /// Remove a session and close its queue.
    Unregister {
        /// Session identifier.
        session_id: Uuid,
    },
    /// Offer a payload to every live session.
    Broadcast {
        /// Text payload.
        payload: String,
    },
    /// Report the number of live sessions.
    Count {
        /// Reply channel.
        reply: oneshot::Sender<usize>,
    },
    /// Report whether a session is live.
    Contains {
        /// Session identifier.
        session_id: Uuid,
        /// Reply channel.
        reply: oneshot::Sender<bool>,
    },
}

/// The registry loop and the live set it owns.
#[derive(Debug)]
pub struct Hub {
    sessions: HashMap<Uuid, OutboundQueue>,
    commands: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Create a hub and the handle used to drive it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                sessions: HashMap::new(),
                commands: rx,
            },
            HubHandle {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
        )
    }

    /// Process commands until every [`HubHandle`] has been dropped.
    ///
    /// Queues of sessions still registered at that point are closed.
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.handle_command(command);
        }

        for queue in self.sessions.values() {
            queue.close();
        }
        debug!(remaining = self.sessions.len(), "hub stopped");
    }

    fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { session_id, queue } => {
                if let Some(previous) = self.sessions.insert(session_id, queue) {
                    warn!(session_id = %session_id, "session registered twice");
                    previous.close();
                }
                debug!(session_id = %session_id, live = self.sessions.len(), "session registered");
            }
            HubCommand::Unregister { session_id } => {
                if let Some(queue) = self.sessions.remove(&session_id) {
                    queue.close();
                    debug!(session_id = %session_id, live = self.sessions.len(), "session unregistered");
                }
            }
            HubCommand::Broadcast { payload } => {
                self.broadcast(&payload);
            }
            HubCommand::Count { reply } => {
                let _ = reply.send(self.sessions.len());
            }
            HubCommand::Contains { session_id, reply } => {
                let _ = reply.send(self.sessions.contains_key(&session_id));
            }
        }
    }

    /// Offer `payload` to every session; evict those that cannot take it.
    ///
    /// Returns the number of sessions the payload was enqueued on.
    fn broadcast(&mut self, payload: &str) -> usize {
        let mut delivered = 0;
        self.sessions.retain(|session_id, queue| {
            match queue.try_enqueue(payload) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(e) => {
                    warn!(session_id = %session_id, reason = %e, "evicting session");
                    queue.close();
                    false
                }
            }
        });
        delivered
    }
}

/// Cloneable sender of [`HubCommand`]s.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
    dropped: Arc<AtomicU64>,
}

impl HubHandle {
    async fn send(&self, command: HubCommand) -> ServerResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ServerError::ChannelSend("hub stopped".to_string()))
    }

    /// Add a session to the live set.
    pub async fn register(&self, session_id: Uuid, queue: OutboundQueue) -> ServerResult<()> {
        self.send(HubCommand::Register { session_id, queue }).await
    }

    /// Remove a session and close its queue. Absent sessions are ignored.
    pub async fn unregister(&self, session_id: Uuid) -> ServerResult<()> {
        self.send(HubCommand::Unregister { session_id }).await
    }

    /// Offer a payload to every live session.
    pub async fn broadcast(&self, payload: impl Into<String>) -> ServerResult<()> {
        self.send(HubCommand::Broadcast {
            payload: payload.into(),
        })
        .await
    }

    /// Offer a payload to every live session without waiting.
    ///
    /// Returns `false` (and drops the payload) if the hub is saturated or
    /// stopped. Callers on the broker delivery path cannot wait, so a
    /// saturated hub sheds the message for every session; each shed message
    /// is counted in [`HubHandle::dropped_broadcasts`].
    pub fn try_broadcast(&self, payload: impl Into<String>) -> bool {
        match self.tx.try_send(HubCommand::Broadcast {
            payload: payload.into(),
        }) {
            Ok(()) => true,
            Err(e) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %e, dropped, "broadcast dropped");
                false
            }
        }
    }

    /// Number of payloads [`HubHandle::try_broadcast`] has shed so far.
    #[must_use]
    pub fn dropped_broadcasts(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> ServerResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Count { reply }).await?;
        rx.await
            .map_err(|_| ServerError::Internal("hub dropped count reply".to_string()))
    }

    /// Whether a session is live.
    pub async fn contains(&self, session_id: Uuid) -> ServerResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Contains { session_id, reply })
            .await?;
        rx.await
            .map_err(|_| ServerError::Internal("hub dropped contains reply".to_string()))
    }
}
