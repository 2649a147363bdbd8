//! `WalletPass` crypto primitives
//!
//! Everything a `.pkpass` bundle needs from cryptography, with no file I/O:
//! callers supply bytes and get bytes back.
//!
//! ## Primitives
//!
//! - **Manifest**: relative path → lowercase hex SHA-1 of the file content
//! - **Signature**: detached PKCS#7 (DER) over the exact manifest bytes, carrying
//!   the pass type certificate and the WWDR intermediate
//! - **Tokens**: OS-random serial numbers and authentication tokens

#[cfg(any(test, feature = "certs"))]
pub mod certs;
pub mod error;
pub mod manifest;
pub mod signing;
pub mod token;

pub use error::CryptoError;
pub use manifest::{Manifest, compute_manifest, sha1_hex};
pub use signing::{SigningIdentity, sign};
pub use token::{constant_time_str_eq, generate_authentication_token, generate_serial_number};
