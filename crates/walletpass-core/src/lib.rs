//! `WalletPass` Core Library
//!
//! Shared functionality for `WalletPass` components:
//! - Pass bundle builder (`pass.json` + assets → signed `.pkpass`)
//! - Device diagnostic log parsing
//! - Pass model and the repository seam the builder persists through
//! - Configuration resolution, timestamps, tracing setup
//! - Common error types

pub mod bundle;
pub mod config;
pub mod db;
pub mod error;
pub mod log_parser;
pub mod pass;
pub mod timestamp;
pub mod tracing_init;

pub use bundle::{BuildState, PassBuilder, PassDefaults, PassIdentity};
pub use config::Config;
pub use error::{Error, Result};
pub use log_parser::{LogStatus, MalformedLog, ParsedLog};
pub use pass::{NewPass, Pass, PassRepository};
