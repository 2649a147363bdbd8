//! PassKit web service protocol.
//!
//! Transport-independent handlers for the five device-facing operations.
//! Each call reads and writes the database directly and holds no state of
//! its own between calls; the HTTP layer in [`crate::routes`] only maps
//! requests and outcomes.


use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use walletpass_core::log_parser::{self, LogStatus};
use walletpass_core::timestamp::{
    format_watermark, from_micros, http_date, parse_timestamp, to_micros, truncate_to_seconds,
};
use walletpass_crypto::constant_time_str_eq;

use crate::events::{EventBus, PassEvent};
use crate::storage::{DatabaseError, NewLog, Pass, PassDatabase};

/// Authorization scheme devices use for pass requests.
pub const AUTH_SCHEME: &str = "ApplePass";

/// Protocol-level failures. Mapped onto HTTP statuses by the routes.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Pass not found")]
    NotFound,

    /// Missing header, wrong scheme or wrong token; indistinguishable on
    /// purpose.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// How `latest_pass` hands out artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Stream the stored bytes.
    #[default]
    Proxy,
    /// Redirect to `<base_url>/<artifact name>` on external blob storage.
    Redirect { base_url: String },
}

impl DeliveryMode {
    pub fn from_redirect_base(base_url: Option<&str>) -> Self {
        base_url.map_or(Self::Proxy, |base| Self::Redirect {
            base_url: base.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    AlreadyRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    Removed,
    NotRegistered,
}

/// Body of a successful "updated serials" response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialNumbers {
    pub last_updated: String,
    pub serial_numbers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdatedSerials {
    Updated(SerialNumbers),
    /// Registrations exist but nothing is newer than the watermark.
    NoContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatestPass {
    NotModified,
    Redirect(String),
    Artifact {
        data: Vec<u8>,
        /// HTTP-date of `updated_at`, whole seconds.
        last_modified: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationBody {
    push_token: String,
}

#[derive(Debug, Deserialize)]
struct LogBody {
    logs: Vec<String>,
}

/// PassKit web service over a [`PassDatabase`].
#[derive(Clone)]
pub struct WebService {
    db: PassDatabase,
    events: EventBus,
    delivery: DeliveryMode,
}

impl WebService {
    pub const fn new(db: PassDatabase, events: EventBus, delivery: DeliveryMode) -> Self {
        Self {
            db,
            events,
            delivery,
        }
    }

    pub const fn db(&self) -> &PassDatabase {
        &self.db
    }

    /// Find a pass and check the request's `Authorization` header against
    /// its token.
    async fn authorized_pass(
        &self,
        pass_type_identifier: &str,
        serial_number: &str,
        authorization: Option<&str>,
    ) -> Result<Pass, ProtocolError> {
        let pass = self
            .db
            .find_pass(pass_type_identifier, serial_number)
            .await?
            .ok_or(ProtocolError::NotFound)?;

        let presented = authorization
            .and_then(|value| value.strip_prefix(AUTH_SCHEME))
            .and_then(|rest| rest.strip_prefix(' '))
            .ok_or(ProtocolError::Unauthorized)?;
        if !constant_time_str_eq(presented, &pass.authentication_token) {
            return Err(ProtocolError::Unauthorized);
        }
        Ok(pass)
    }

    /// Register a device to receive update pushes for a pass.
    #[instrument(skip(self, authorization, body))]
    pub async fn register_device(
        &self,
        device_library_identifier: &str,
        pass_type_identifier: &str,
        serial_number: &str,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<RegisterOutcome, ProtocolError> {
        let pass = self
            .authorized_pass(pass_type_identifier, serial_number, authorization)
            .await?;

        if self
            .db
            .get_registration(device_library_identifier, pass.id)
            .await?
            .is_some()
        {
            debug!("Device already registered");
            return Ok(RegisterOutcome::AlreadyRegistered);
        }

        let RegistrationBody { push_token } = serde_json::from_slice(body)
            .map_err(|e| ProtocolError::BadRequest(format!("Invalid registration body: {e}")))?;
        if push_token.is_empty() {
            return Err(ProtocolError::BadRequest("pushToken is empty".to_string()));
        }

        if !self
            .db
            .create_registration(device_library_identifier, &push_token, pass.id)
            .await?
        {
            // A concurrent request for the same device won.
            return Ok(RegisterOutcome::AlreadyRegistered);
        }

        info!(pass_id = pass.id, "Device registered");
        self.events.emit(PassEvent::PassRegistered {
            pass_id: pass.id,
            device_library_identifier: device_library_identifier.to_string(),
            push_token,
        });
        Ok(RegisterOutcome::Created)
    }

    /// Stop sending update pushes for a pass to a device.
    #[instrument(skip(self, authorization))]
    pub async fn unregister_device(
        &self,
        device_library_identifier: &str,
        pass_type_identifier: &str,
        serial_number: &str,
        authorization: Option<&str>,
    ) -> Result<UnregisterOutcome, ProtocolError> {
        let pass = self
            .authorized_pass(pass_type_identifier, serial_number, authorization)
            .await?;

        if !self
            .db
            .delete_registration(device_library_identifier, pass.id)
            .await?
        {
            return Ok(UnregisterOutcome::NotRegistered);
        }

        info!(pass_id = pass.id, "Device unregistered");
        self.events.emit(PassEvent::PassUnregistered {
            pass_id: pass.id,
            device_library_identifier: device_library_identifier.to_string(),
        });
        Ok(UnregisterOutcome::Removed)
    }

    /// Serial numbers of the most recently updated passes on a device.
    ///
    /// Only the cohort sharing the newest `updated_at` is returned, along
    /// with that timestamp as the next watermark.
    #[instrument(skip(self))]
    pub async fn updated_serials(
        &self,
        device_library_identifier: &str,
        pass_type_identifier: &str,
        passes_updated_since: Option<&str>,
    ) -> Result<UpdatedSerials, ProtocolError> {
        let since = passes_updated_since
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                parse_timestamp(s)
                    .map(to_micros)
                    .map_err(|e| ProtocolError::BadRequest(e.to_string()))
            })
            .transpose()?;

        if !self
            .db
            .has_registrations(device_library_identifier, pass_type_identifier)
            .await?
        {
            return Err(ProtocolError::NotFound);
        }

        let updates = self
            .db
            .registered_serials(device_library_identifier, pass_type_identifier, since)
            .await?;
        let Some(newest) = updates.iter().map(|u| u.updated_at).max() else {
            return Ok(UpdatedSerials::NoContent);
        };

        let serial_numbers = updates
            .into_iter()
            .filter(|u| u.updated_at == newest)
            .map(|u| u.serial_number)
            .collect();

        Ok(UpdatedSerials::Updated(SerialNumbers {
            last_updated: format_watermark(from_micros(newest)),
            serial_numbers,
        }))
    }

    /// The latest artifact of a pass, honoring `If-Modified-Since`.
    #[instrument(skip(self, authorization))]
    pub async fn latest_pass(
        &self,
        pass_type_identifier: &str,
        serial_number: &str,
        authorization: Option<&str>,
        if_modified_since: Option<&str>,
    ) -> Result<LatestPass, ProtocolError> {
        let pass = self
            .authorized_pass(pass_type_identifier, serial_number, authorization)
            .await?;
        let updated_at = truncate_to_seconds(pass.updated_at_utc());

        // An unreadable If-Modified-Since is ignored.
        if let Some(since) = if_modified_since.and_then(|s| parse_timestamp(s).ok()) {
            if truncate_to_seconds(since) >= updated_at {
                return Ok(LatestPass::NotModified);
            }
        }

        match &self.delivery {
            DeliveryMode::Redirect { base_url } => {
                Ok(LatestPass::Redirect(format!("{base_url}/{}", pass.data_name)))
            }
            DeliveryMode::Proxy => Ok(LatestPass::Artifact {
                data: pass.data,
                last_modified: http_date(updated_at),
            }),
        }
    }

    /// Store device log messages. Never fails; returns how many were stored.
    #[instrument(skip(self, body))]
    pub async fn submit_logs(&self, body: &[u8]) -> usize {
        let logs = match serde_json::from_slice::<LogBody>(body) {
            Ok(body) => body.logs,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed log submission");
                return 0;
            }
        };

        let mut stored = 0;
        for message in &logs {
            match self.store_log(message).await {
                Ok(()) => stored += 1,
                Err(e) => warn!(error = %e, "Failed to store device log"),
            }
        }
        stored
    }

    async fn store_log(&self, message: &str) -> Result<(), DatabaseError> {
        let received = Utc::now();
        let parsed = match log_parser::parse(message) {
            Ok(parsed) => parsed,
            Err(malformed) => {
                debug!(message = %malformed.message, "Unrecognized device log");
                self.db
                    .insert_log(&NewLog {
                        created_at: received.timestamp(),
                        status: LogStatus::Unknown.as_str(),
                        message,
                        ..NewLog::default()
                    })
                    .await?;
                return Ok(());
            }
        };

        let pass_id = match parsed.serial_number.as_deref() {
            Some(serial) => {
                self.db
                    .find_pass_id_for_log(serial, Some(&parsed.pass_type_identifier))
                    .await?
            }
            None => None,
        };

        self.db
            .insert_log(&NewLog {
                created_at: parsed.created_at.unwrap_or(received).timestamp(),
                status: parsed.status.as_str(),
                task_type: Some(&parsed.task_type),
                pass_type_identifier: Some(&parsed.pass_type_identifier),
                serial_number: parsed.serial_number.as_deref(),
                pass_id,
                web_service_url: Some(&parsed.web_service_url),
                device_id: parsed.device_id.as_deref(),
                msg: Some(&parsed.msg),
                message,
            })
            .await?;
        Ok(())
    }
}
