//! `WalletPass` Server
//!
//! PassKit web service endpoints, pass issuing, and push updates to
//! registered devices.

pub mod commands;
pub mod error;
pub mod events;
pub mod issuing;
pub mod notifications;
pub mod routes;
pub mod storage;
pub mod webservice;
