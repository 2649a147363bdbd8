//! Push notifications telling devices that a pass changed.
//!
//! Wallet pushes carry no payload of interest: the device reacts by asking
//! the web service which serials changed. This module provides:
//! - [`PushSender`], the transport capability, selected once at startup
//! - [`ApnsClient`] for Apple Push Notification service (token auth)
//! - [`LogPushSender`] for deployments without push credentials
//! - [`PushDispatcher`], which turns [`PassEvent`](crate::events::PassEvent)s
//!   into pushes and prunes dead tokens

pub mod apns;
pub mod dispatcher;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use walletpass_core::config::{PushBackendKind, PushConfig};

pub use apns::ApnsClient;
pub use dispatcher::PushDispatcher;

/// Errors that can occur in the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Failed to read or parse the APNs token signing key.
    #[error("APNs credentials error: {0}")]
    Credentials(String),

    /// HTTP request to APNs failed.
    #[error("APNs request error: {0}")]
    Request(String),

    /// APNs returned a non-success status code.
    #[error("APNs API error (status {status}): {body}")]
    ApiError {
        /// HTTP status code returned by APNs.
        status: u16,
        /// Response body from APNs.
        body: String,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl From<walletpass_core::db::DatabaseError> for NotificationError {
    fn from(e: walletpass_core::db::DatabaseError) -> Self {
        Self::Database(e.to_string())
    }
}

/// What the push transport said about a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The token is permanently invalid; registrations holding it should go.
    TokenGone,
}

/// A transport that can wake a device holding `push_token`.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, push_token: &str) -> Result<PushOutcome, NotificationError>;
}

/// Logs pushes instead of sending them.
#[derive(Debug, Default)]
pub struct LogPushSender;

#[async_trait]
impl PushSender for LogPushSender {
    async fn send(&self, push_token: &str) -> Result<PushOutcome, NotificationError> {
        info!(
            push_token_prefix = %push_token.get(..8).unwrap_or(push_token),
            "Push skipped (log backend)"
        );
        Ok(PushOutcome::Delivered)
    }
}

/// Build the sender selected by `config.backend`.
///
/// The APNs topic is the pass type identifier.
pub fn sender_from_config(
    config: &PushConfig,
    team_identifier: Option<&str>,
    pass_type_identifier: Option<&str>,
) -> Result<Arc<dyn PushSender>, NotificationError> {
    match config.backend {
        PushBackendKind::Log => Ok(Arc::new(LogPushSender)),
        PushBackendKind::Apns => {
            let missing =
                |what: &str| NotificationError::Credentials(format!("{what} is not configured"));
            let key_path = config
                .auth_key_path
                .as_deref()
                .ok_or_else(|| missing("push.auth_key_path"))?;
            let key_id = config
                .auth_key_id
                .as_deref()
                .ok_or_else(|| missing("push.auth_key_id"))?;
            let team = team_identifier.ok_or_else(|| missing("pass.team_identifier"))?;
            let topic =
                pass_type_identifier.ok_or_else(|| missing("pass.pass_type_identifier"))?;

            Ok(Arc::new(ApnsClient::from_key_file(
                key_path,
                key_id,
                team,
                topic,
                config.sandbox,
            )?))
        }
    }
}
