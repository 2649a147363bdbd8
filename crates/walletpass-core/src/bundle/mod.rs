//! Pass bundle builder.
//!
//! Turns `pass.json` fields plus asset files into a signed `.pkpass`
//! archive, and parses an existing archive back into editable form.
//!
//! A builder moves through [`BuildState`]:
//!
//! ```text
//! Empty -> Loaded -> Populated -> Built -> Persisted
//! ```
//!
//! `Loaded` is optional (template directory or existing archive). Any
//! mutation after `Built` drops the artifact and returns to `Populated`.

mod archive;
mod builder;

pub use builder::PassBuilder;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// File names a pass archive reserves for itself.
pub const PASS_JSON: &str = "pass.json";
pub const MANIFEST_JSON: &str = "manifest.json";
pub const SIGNATURE: &str = "signature";

/// Deployment-wide values stamped into every `pass.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassDefaults {
    pub pass_type_identifier: Option<String>,
    pub team_identifier: Option<String>,
    pub web_service_url: Option<String>,
}

/// The system-issued fields of one pass. Owned by a single builder.
#[derive(Clone, PartialEq, Eq)]
pub struct PassIdentity {
    pub pass_type_identifier: Option<String>,
    pub serial_number: String,
    pub team_identifier: Option<String>,
    pub web_service_url: Option<String>,
    pub authentication_token: String,
}

impl std::fmt::Debug for PassIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassIdentity")
            .field("pass_type_identifier", &self.pass_type_identifier)
            .field("serial_number", &self.serial_number)
            .field("team_identifier", &self.team_identifier)
            .field("web_service_url", &self.web_service_url)
            .field("authentication_token", &"<redacted>")
            .finish()
    }
}

impl PassIdentity {
    /// The required `pass.json` keys with their resolved values.
    ///
    /// Fails if any of them is unset or empty.
    pub fn required_fields(&self) -> Result<Map<String, Value>> {
        let fields = [
            ("passTypeIdentifier", self.pass_type_identifier.as_deref()),
            ("serialNumber", Some(self.serial_number.as_str())),
            ("teamIdentifier", self.team_identifier.as_deref()),
            ("webServiceURL", self.web_service_url.as_deref()),
            ("authenticationToken", Some(self.authentication_token.as_str())),
        ];

        let mut resolved = Map::new();
        for (key, value) in fields {
            match value {
                Some(v) if !v.is_empty() => {
                    resolved.insert(key.to_string(), Value::String(v.to_string()));
                }
                _ => return Err(Error::Validation(format!("Required field {key} is not set"))),
            }
        }
        Ok(resolved)
    }
}

/// Where a builder is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Empty,
    Loaded,
    Populated,
    Built,
    Persisted,
}
