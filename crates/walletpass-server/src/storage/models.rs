//! Data models for `WalletPass` server storage.

use serde::{Deserialize, Serialize};

pub use walletpass_core::Pass;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Registration {
    pub id: i64,
    pub device_library_identifier: String,
    pub push_token: String,
    pub pass_id: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LogEntry {
    pub id: i64,
    pub created_at: i64,
    pub status: Option<String>,
    pub task_type: Option<String>,
    pub pass_type_identifier: Option<String>,
    pub serial_number: Option<String>,
    pub pass_id: Option<i64>,
    pub web_service_url: Option<String>,
    pub device_id: Option<String>,
    pub msg: Option<String>,
    pub message: String,
}

/// Row values for [`LogEntry`] insertion.
#[derive(Debug, Clone, Default)]
pub struct NewLog<'a> {
    pub created_at: i64,
    pub status: &'a str,
    pub task_type: Option<&'a str>,
    pub pass_type_identifier: Option<&'a str>,
    pub serial_number: Option<&'a str>,
    pub pass_id: Option<i64>,
    pub web_service_url: Option<&'a str>,
    pub device_id: Option<&'a str>,
    pub msg: Option<&'a str>,
    pub message: &'a str,
}

/// One entry of the "updated serials" query.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SerialUpdate {
    pub serial_number: String,
    pub updated_at: i64,
}
