//! SQLite storage for the `WalletPass` server.
//!
//! Provides persistence for passes, device registrations and device logs.

mod models;
mod queries;
mod queries_logs;


pub use models::*;
pub use walletpass_core::db::DatabaseError;

walletpass_core::define_database!(PassDatabase, "Pass database migrations complete");
