//! Pass manifest: relative file path → SHA-1 digest of its content.
//!
//! The manifest is the object that actually gets signed, so its JSON
//! serialization must be byte-stable: keys are kept sorted and the encoding
//! is compact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::CryptoError;

/// Digest map for every file in a pass bundle, except `manifest.json` and
/// `signature` themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(BTreeMap<String, String>);

impl Manifest {
    /// Digest for a single bundle path.
    pub fn digest(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    /// Iterate over `(path, digest)` pairs in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The exact bytes written to `manifest.json` and fed to the signer.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        serde_json::to_vec(&self.0).map_err(|e| CryptoError::Serialization(e.to_string()))
    }
}

/// Lowercase hex SHA-1 of `content`.
pub fn sha1_hex(content: &[u8]) -> String {
    hex::encode(Sha1::digest(content))
}

/// Compute the manifest for a set of bundle files.
pub fn compute_manifest(files: &BTreeMap<String, Vec<u8>>) -> Manifest {
    Manifest(
        files
            .iter()
            .map(|(path, content)| (path.clone(), sha1_hex(content)))
            .collect(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn files() -> BTreeMap<String, Vec<u8>> {
        let mut files = BTreeMap::new();
        files.insert("pass.json".to_string(), br#"{"formatVersion":1}"#.to_vec());
        files.insert("icon.png".to_string(), vec![0x89, 0x50, 0x4e, 0x47]);
        files.insert("en.lproj/pass.strings".to_string(), b"\"a\" = \"b\";".to_vec());
        files
    }

    #[test]
    fn sha1_of_known_input() {
        assert_eq!(sha1_hex(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn manifest_is_deterministic() {
        let a = compute_manifest(&files());
        let b = compute_manifest(&files());
        assert_eq!(a, b);
        assert_eq!(a.to_json_bytes().unwrap(), b.to_json_bytes().unwrap());
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn manifest_changes_only_for_changed_file() {
        let before = compute_manifest(&files());
        let mut changed = files();
        changed.insert("pass.json".to_string(), br#"{"formatVersion":2}"#.to_vec());
        let after = compute_manifest(&changed);

        assert_ne!(before.digest("pass.json"), after.digest("pass.json"));
        assert_eq!(before.digest("icon.png"), after.digest("icon.png"));
        assert_eq!(
            before.digest("en.lproj/pass.strings"),
            after.digest("en.lproj/pass.strings")
        );
    }

    #[test]
    fn json_is_sorted_and_compact() {
        let json = String::from_utf8(compute_manifest(&files()).to_json_bytes().unwrap()).unwrap();
        let en = json.find("en.lproj/pass.strings").unwrap();
        let icon = json.find("icon.png").unwrap();
        let pass = json.find("pass.json").unwrap();
        assert!(en < icon && icon < pass);
        assert!(!json.contains(": "));
    }

    #[test]
    fn empty_file_set_gives_empty_object() {
        let manifest = compute_manifest(&BTreeMap::new());
        assert!(manifest.is_empty());
        assert_eq!(manifest.to_json_bytes().unwrap(), b"{}");
    }
}
