//! The stored pass and the repository seam the bundle builder persists through.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::DatabaseError;
use crate::timestamp::from_micros;

/// A pass row as stored by the server.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Pass {
    pub id: i64,
    pub pass_type_identifier: String,
    pub serial_number: String,
    #[serde(skip)]
    pub authentication_token: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Artifact file name, `<uuid>.pkpass`.
    pub data_name: String,
    pub created_at: i64,
    /// Microseconds since epoch; strictly increases on every rebuild.
    pub updated_at: i64,
}

impl Pass {
    pub fn updated_at_utc(&self) -> DateTime<Utc> {
        from_micros(self.updated_at)
    }
}

/// Values written when a pass is created or its artifact replaced.
#[derive(Debug, Clone, Copy)]
pub struct NewPass<'a> {
    pub pass_type_identifier: &'a str,
    pub serial_number: &'a str,
    pub authentication_token: &'a str,
    pub data: &'a [u8],
    pub data_name: &'a str,
}

/// Persistence operations the builder needs.
///
/// Implemented by the server's `PassDatabase`; tests can provide an
/// in-memory fake.
pub trait PassRepository: Send + Sync {
    /// Insert a new pass. Fails with `DatabaseError::Conflict` when the
    /// `(pass type, serial)` pair already exists.
    fn insert_pass(
        &self,
        pass: &NewPass<'_>,
    ) -> impl Future<Output = Result<Pass, DatabaseError>> + Send;

    /// Replace the artifact and identifiers of pass `id` in one write,
    /// advancing `updated_at`.
    fn replace_pass(
        &self,
        id: i64,
        pass: &NewPass<'_>,
    ) -> impl Future<Output = Result<Pass, DatabaseError>> + Send;
}
