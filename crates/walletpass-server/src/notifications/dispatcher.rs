//! Event-driven push fan-out.
//!
//! Listens on the [`EventBus`] and pushes every device registered for a pass
//! whenever that pass is updated. Push failures are logged and dropped; only
//! [`PushOutcome::TokenGone`] changes state, by deleting the registrations
//! that hold the dead token.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::events::{EventBus, PassEvent};
use crate::storage::PassDatabase;

use super::{NotificationError, PushOutcome, PushSender};

pub struct PushDispatcher {
    db: PassDatabase,
    sender: Arc<dyn PushSender>,
    events: EventBus,
}

impl PushDispatcher {
    pub fn new(db: PassDatabase, sender: Arc<dyn PushSender>, events: EventBus) -> Self {
        Self { db, sender, events }
    }

    /// Subscribe now and process events on a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        let rx = self.events.subscribe();
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: broadcast::Receiver<PassEvent>) {
        loop {
            match rx.recv().await {
                Ok(PassEvent::PassUpdated { pass_id }) => {
                    if let Err(e) = self.push_pass(pass_id).await {
                        warn!(pass_id, error = %e, "Push fan-out failed");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Push dispatcher lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Push every device registered for `pass_id`.
    ///
    /// Returns the number of pushes the transport accepted.
    #[instrument(skip(self))]
    pub async fn push_pass(&self, pass_id: i64) -> Result<usize, NotificationError> {
        let registrations = self.db.registrations_for_pass(pass_id).await?;
        let mut delivered = 0;

        for registration in &registrations {
            match self.sender.send(&registration.push_token).await {
                Ok(PushOutcome::Delivered) => delivered += 1,
                Ok(PushOutcome::TokenGone) => {
                    if let Err(e) = self.forget_token(&registration.push_token).await {
                        warn!(
                            device = %registration.device_library_identifier,
                            error = %e,
                            "Failed to remove registrations for dead push token"
                        );
                    }
                }
                Err(e) => warn!(
                    device = %registration.device_library_identifier,
                    error = %e,
                    "Push failed"
                ),
            }
        }

        info!(
            registrations = registrations.len(),
            delivered, "Pass update pushed"
        );
        Ok(delivered)
    }

    /// Drop every registration holding a token the transport rejected for good.
    async fn forget_token(&self, push_token: &str) -> Result<(), NotificationError> {
        let removed = self.db.delete_registrations_by_push_token(push_token).await?;
        info!(removed = removed.len(), "Removed registrations for dead push token");

        self.events.emit(PassEvent::PushTokenGone {
            push_token: push_token.to_string(),
        });
        for registration in removed {
            self.events.emit(PassEvent::PassUnregistered {
                pass_id: registration.pass_id,
                device_library_identifier: registration.device_library_identifier,
            });
        }
        Ok(())
    }
}
