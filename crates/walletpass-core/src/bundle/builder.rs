use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;
use walletpass_crypto::{
    Manifest, SigningIdentity, compute_manifest, generate_authentication_token,
    generate_serial_number,
};

use super::archive::{is_safe_path, read_archive, write_archive};
use super::{BuildState, MANIFEST_JSON, PASS_JSON, PassDefaults, PassIdentity, SIGNATURE};
use crate::error::{Error, Result};
use crate::pass::{NewPass, Pass, PassRepository};

/// Files never taken from a template directory.
const IGNORED_FILES: &[&str] = &[".DS_Store"];

/// Stages pass content and produces a signed `.pkpass` archive.
#[derive(Debug)]
pub struct PassBuilder {
    identity: PassIdentity,
    pass_data: Map<String, Value>,
    assets: BTreeMap<String, Vec<u8>>,
    state: BuildState,
    built: Option<Built>,
}

#[derive(Debug)]
struct Built {
    manifest: Manifest,
    artifact: Vec<u8>,
}

impl PassBuilder {
    /// An empty builder for a brand new pass, with a fresh serial number and
    /// authentication token.
    pub fn new(defaults: &PassDefaults) -> Result<Self> {
        let identity = PassIdentity {
            pass_type_identifier: defaults.pass_type_identifier.clone(),
            serial_number: generate_serial_number()?,
            team_identifier: defaults.team_identifier.clone(),
            web_service_url: defaults.web_service_url.clone(),
            authentication_token: generate_authentication_token()?,
        };
        Ok(Self::with_identity(identity))
    }

    /// An empty builder that keeps the identifiers of an existing pass.
    pub fn for_pass(defaults: &PassDefaults, pass: &Pass) -> Self {
        Self::with_identity(PassIdentity {
            pass_type_identifier: Some(pass.pass_type_identifier.clone()),
            serial_number: pass.serial_number.clone(),
            team_identifier: defaults.team_identifier.clone(),
            web_service_url: defaults.web_service_url.clone(),
            authentication_token: pass.authentication_token.clone(),
        })
    }

    /// A new pass staged from a template directory.
    ///
    /// `pass.json` (if present) becomes the editable fields; every other
    /// regular file, recursively, becomes an asset.
    pub fn from_directory(defaults: &PassDefaults, dir: &Path) -> Result<Self> {
        let mut files = BTreeMap::new();
        collect_files(dir, dir, &mut files)?;

        let mut builder = Self::new(defaults)?;
        builder.stage(files)?;
        debug!(dir = %dir.display(), assets = builder.assets.len(), "Template loaded");
        Ok(builder)
    }

    /// Parse a previously built archive back into editable form.
    ///
    /// The old manifest and signature are dropped; they are regenerated on
    /// the next build. Identifiers come from the archived `pass.json`.
    pub fn load_existing(defaults: &PassDefaults, archive: &[u8]) -> Result<Self> {
        let files = read_archive(archive)?;
        let pass_json = files
            .get(PASS_JSON)
            .ok_or_else(|| Error::Validation("Archive has no pass.json".to_string()))?;
        let data = parse_pass_json(pass_json)?;

        let archived = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
        let identity = PassIdentity {
            pass_type_identifier: archived("passTypeIdentifier")
                .or_else(|| defaults.pass_type_identifier.clone()),
            serial_number: archived("serialNumber").ok_or_else(|| {
                Error::Validation("Archived pass.json has no serialNumber".to_string())
            })?,
            team_identifier: defaults
                .team_identifier
                .clone()
                .or_else(|| archived("teamIdentifier")),
            web_service_url: defaults
                .web_service_url
                .clone()
                .or_else(|| archived("webServiceURL")),
            authentication_token: archived("authenticationToken").ok_or_else(|| {
                Error::Validation("Archived pass.json has no authenticationToken".to_string())
            })?,
        };

        let mut builder = Self::with_identity(identity);
        builder.stage(files)?;
        Ok(builder)
    }

    fn with_identity(identity: PassIdentity) -> Self {
        Self {
            identity,
            pass_data: Map::new(),
            assets: BTreeMap::new(),
            state: BuildState::Empty,
            built: None,
        }
    }

    /// Split loaded files into `pass.json` fields and assets.
    fn stage(&mut self, files: BTreeMap<String, Vec<u8>>) -> Result<()> {
        for (path, content) in files {
            match path.as_str() {
                PASS_JSON => self.pass_data = parse_pass_json(&content)?,
                MANIFEST_JSON | SIGNATURE => {}
                _ => {
                    self.assets.insert(path, content);
                }
            }
        }
        self.state = BuildState::Loaded;
        Ok(())
    }

    /// Set one top-level `pass.json` field.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.pass_data.insert(key.into(), value.into());
        self.touch();
        self
    }

    /// Replace all user-supplied `pass.json` fields.
    pub fn set_pass_data(&mut self, data: Map<String, Value>) -> &mut Self {
        self.pass_data = data;
        self.touch();
        self
    }

    /// Stage an asset at `path`, relative to the archive root.
    pub fn add_asset(
        &mut self,
        path: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Result<&mut Self> {
        let path = path.into();
        if !is_safe_path(&path) {
            return Err(Error::Validation(format!("Invalid asset path: {path}")));
        }
        if matches!(path.as_str(), PASS_JSON | MANIFEST_JSON | SIGNATURE) {
            return Err(Error::Validation(format!("{path} is reserved")));
        }
        self.assets.insert(path, content.into());
        self.touch();
        Ok(self)
    }

    /// Overlay a template directory onto the staged content.
    ///
    /// A template `pass.json` replaces the editable fields; other files
    /// replace assets of the same path. Identifiers are kept.
    pub fn merge_template(&mut self, dir: &Path) -> Result<&mut Self> {
        let mut files = BTreeMap::new();
        collect_files(dir, dir, &mut files)?;
        self.stage(files)?;
        self.touch();
        Ok(self)
    }

    fn touch(&mut self) {
        self.built = None;
        self.state = BuildState::Populated;
    }

    /// Validate, sign and zip the staged content.
    ///
    /// On error nothing changes: the previous artifact (if any) was already
    /// dropped by the last mutation and no new one is recorded.
    pub fn build(&mut self, signer: &SigningIdentity) -> Result<&[u8]> {
        if self.pass_data.is_empty() {
            return Err(Error::Validation("Cannot obtain data for pass.json".to_string()));
        }
        let required = self.identity.required_fields()?;

        let mut data = self.pass_data.clone();
        data.extend(required);
        let pass_json = serde_json::to_vec(&Value::Object(data))?;

        let mut files = self.assets.clone();
        files.insert(PASS_JSON.to_string(), pass_json);

        let manifest = compute_manifest(&files);
        let manifest_json = manifest.to_json_bytes()?;
        let signature = signer.sign(&manifest_json)?;

        let artifact = write_archive(
            files
                .iter()
                .map(|(path, content)| (path.as_str(), content.as_slice()))
                .chain([
                    (MANIFEST_JSON, manifest_json.as_slice()),
                    (SIGNATURE, signature.as_slice()),
                ]),
        )?;

        debug!(
            serial_number = %self.identity.serial_number,
            files = manifest.len(),
            bytes = artifact.len(),
            "Pass built"
        );

        self.state = BuildState::Built;
        let built = self.built.insert(Built { manifest, artifact });
        Ok(built.artifact.as_slice())
    }

    /// Persist the built artifact.
    ///
    /// Inserts a new pass when `existing` is `None`, otherwise replaces the
    /// artifact and identifiers of `existing` in a single write.
    pub async fn write_to_pass(
        &mut self,
        repo: &impl PassRepository,
        existing: Option<&Pass>,
    ) -> Result<Pass> {
        let Some(built) = self.built.as_ref() else {
            return Err(Error::Validation("Cannot save a pass that has not been built".to_string()));
        };
        let pass_type_identifier = self.identity.pass_type_identifier.as_deref().ok_or_else(|| {
            Error::Validation("Required field passTypeIdentifier is not set".to_string())
        })?;

        let data_name = existing.map_or_else(
            || format!("{}.pkpass", Uuid::new_v4()),
            |pass| pass.data_name.clone(),
        );
        let new_pass = NewPass {
            pass_type_identifier,
            serial_number: &self.identity.serial_number,
            authentication_token: &self.identity.authentication_token,
            data: &built.artifact,
            data_name: &data_name,
        };

        let pass = match existing {
            Some(pass) => repo.replace_pass(pass.id, &new_pass).await?,
            None => repo.insert_pass(&new_pass).await?,
        };

        info!(
            pass_id = pass.id,
            pass_type_identifier = %pass.pass_type_identifier,
            serial_number = %pass.serial_number,
            "Pass stored"
        );
        self.state = BuildState::Persisted;
        Ok(pass)
    }

    /// Manifest of the last successful build.
    pub fn manifest(&self) -> Option<&Manifest> {
        self.built.as_ref().map(|b| &b.manifest)
    }

    /// Archive bytes of the last successful build.
    pub fn artifact(&self) -> Option<&[u8]> {
        self.built.as_ref().map(|b| b.artifact.as_slice())
    }

    pub const fn identity(&self) -> &PassIdentity {
        &self.identity
    }

    pub fn pass_data(&self) -> &Map<String, Value> {
        &self.pass_data
    }

    pub fn assets(&self) -> impl Iterator<Item = &str> {
        self.assets.keys().map(String::as_str)
    }

    pub const fn state(&self) -> BuildState {
        self.state
    }
}

fn parse_pass_json(content: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice(content)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Validation("pass.json is not a JSON object".to_string())),
    }
}

/// Recursively read regular files under `dir`, keyed by their path relative
/// to `root` with `/` separators.
fn collect_files(root: &Path, dir: &Path, files: &mut BTreeMap<String, Vec<u8>>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, files)?;
            continue;
        }
        if !path.is_file() {
            continue;
        }
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if IGNORED_FILES.contains(&file_name) {
            continue;
        }

        let relative = path
            .strip_prefix(root)
            .map_err(|e| Error::Validation(e.to_string()))?
            .components()
            .map(|c| {
                c.as_os_str().to_str().map(str::to_string).ok_or_else(|| {
                    Error::Validation(format!("Non UTF-8 path: {}", path.display()))
                })
            })
            .collect::<Result<Vec<_>>>()?
            .join("/");

        files.insert(relative, std::fs::read(&path)?);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::Mutex;

    use walletpass_crypto::certs::generate_signing_identity;

    use super::*;
    use crate::db::DatabaseError;

    fn defaults() -> PassDefaults {
        PassDefaults {
            pass_type_identifier: Some("pass.com.example.test".into()),
            team_identifier: Some("TEAM123456".into()),
            web_service_url: Some("https://passes.example.com/".into()),
        }
    }

    fn signer() -> SigningIdentity {
        generate_signing_identity("pass.com.example.test", "TEAM123456").unwrap()
    }

    fn populated() -> PassBuilder {
        let mut builder = PassBuilder::new(&defaults()).unwrap();
        builder
            .set_field("formatVersion", 1)
            .set_field("organizationName", "Example")
            .set_field("description", "Test pass");
        builder.add_asset("icon.png", vec![0x89, b'P', b'N', b'G']).unwrap();
        builder
    }

    /// Keeps passes in memory; ids are the vector index + 1.
    #[derive(Default)]
    struct MemoryRepo {
        passes: Mutex<Vec<Pass>>,
    }

    fn to_pass(id: i64, new: &NewPass<'_>, updated_at: i64) -> Pass {
        Pass {
            id,
            pass_type_identifier: new.pass_type_identifier.to_string(),
            serial_number: new.serial_number.to_string(),
            authentication_token: new.authentication_token.to_string(),
            data: new.data.to_vec(),
            data_name: new.data_name.to_string(),
            created_at: 0,
            updated_at,
        }
    }

    impl PassRepository for MemoryRepo {
        async fn insert_pass(
            &self,
            pass: &NewPass<'_>,
        ) -> std::result::Result<Pass, DatabaseError> {
            let mut passes = self.passes.lock().unwrap();
            let id = i64::try_from(passes.len()).unwrap() + 1;
            let stored = to_pass(id, pass, 1);
            passes.push(stored.clone());
            Ok(stored)
        }

        async fn replace_pass(
            &self,
            id: i64,
            pass: &NewPass<'_>,
        ) -> std::result::Result<Pass, DatabaseError> {
            let mut passes = self.passes.lock().unwrap();
            let slot = passes
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| DatabaseError::NotFound(format!("Pass {id}")))?;
            let stored = to_pass(id, pass, slot.updated_at + 1);
            *slot = stored.clone();
            Ok(stored)
        }
    }

    // =========================================================================
    // Construction
    // =========================================================================

    #[test]
    fn new_builders_get_distinct_identities() {
        let a = PassBuilder::new(&defaults()).unwrap();
        let b = PassBuilder::new(&defaults()).unwrap();
        assert_ne!(a.identity().serial_number, b.identity().serial_number);
        assert_ne!(a.identity().authentication_token, b.identity().authentication_token);
        assert_eq!(a.state(), BuildState::Empty);
    }

    #[test]
    fn from_directory_stages_nested_assets_and_skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pass.json"), br#"{"description":"From disk"}"#).unwrap();
        std::fs::write(dir.path().join("icon.png"), b"icon").unwrap();
        std::fs::write(dir.path().join(".DS_Store"), b"junk").unwrap();
        std::fs::write(dir.path().join("signature"), b"stale").unwrap();
        std::fs::create_dir(dir.path().join("en.lproj")).unwrap();
        std::fs::write(dir.path().join("en.lproj/pass.strings"), b"x").unwrap();

        let builder = PassBuilder::from_directory(&defaults(), dir.path()).unwrap();

        assert_eq!(builder.state(), BuildState::Loaded);
        assert_eq!(builder.pass_data()["description"], "From disk");
        let assets: Vec<_> = builder.assets().collect();
        assert_eq!(assets, vec!["en.lproj/pass.strings", "icon.png"]);
    }

    #[test]
    fn merge_template_overlays_content_and_keeps_identity() {
        let mut builder = populated();
        let identity = builder.identity().clone();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pass.json"), br#"{"description":"Reissued"}"#).unwrap();
        std::fs::write(dir.path().join("logo.png"), b"logo").unwrap();

        builder.merge_template(dir.path()).unwrap();

        assert_eq!(builder.state(), BuildState::Populated);
        assert_eq!(builder.identity(), &identity);
        assert_eq!(builder.pass_data()["description"], "Reissued");
        let assets: Vec<_> = builder.assets().collect();
        assert_eq!(assets, vec!["icon.png", "logo.png"]);
    }

    #[test]
    fn add_asset_rejects_reserved_and_unsafe_paths() {
        let mut builder = PassBuilder::new(&defaults()).unwrap();
        assert!(builder.add_asset("manifest.json", vec![]).is_err());
        assert!(builder.add_asset("../icon.png", vec![]).is_err());
        assert!(builder.add_asset("/icon.png", vec![]).is_err());
    }

    // =========================================================================
    // Build
    // =========================================================================

    #[test]
    fn build_produces_manifest_over_pass_json_and_assets() {
        let mut builder = populated();
        builder.build(&signer()).unwrap();

        assert_eq!(builder.state(), BuildState::Built);
        let manifest = builder.manifest().unwrap();
        let paths: Vec<_> = manifest.iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["icon.png", "pass.json"]);
        assert_eq!(
            manifest.digest("icon.png"),
            Some(walletpass_crypto::sha1_hex(&[0x89, b'P', b'N', b'G']).as_str())
        );
    }

    #[test]
    fn required_fields_override_user_data() {
        let mut builder = populated();
        builder.set_field("serialNumber", "spoofed");
        builder.set_field("authenticationToken", "spoofed");
        builder.build(&signer()).unwrap();

        let files = read_archive(builder.artifact().unwrap()).unwrap();
        let data: Map<String, Value> = serde_json::from_slice(&files[PASS_JSON]).unwrap();
        assert_eq!(data["serialNumber"], builder.identity().serial_number.as_str());
        assert_eq!(
            data["authenticationToken"],
            builder.identity().authentication_token.as_str()
        );
        assert_eq!(data["teamIdentifier"], "TEAM123456");
        assert_eq!(data["organizationName"], "Example");
    }

    #[test]
    fn archive_contains_manifest_and_signature() {
        let mut builder = populated();
        builder.build(&signer()).unwrap();

        let files = read_archive(builder.artifact().unwrap()).unwrap();
        let keys: Vec<_> = files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["icon.png", "manifest.json", "pass.json", "signature"]);
        assert_eq!(
            files[MANIFEST_JSON],
            builder.manifest().unwrap().to_json_bytes().unwrap()
        );
        assert!(!files[SIGNATURE].is_empty());
    }

    #[test]
    fn empty_pass_data_is_rejected() {
        let mut builder = PassBuilder::new(&defaults()).unwrap();
        let err = builder.build(&signer()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(builder.artifact().is_none());
    }

    #[test]
    fn missing_team_identifier_is_rejected() {
        let defaults = PassDefaults {
            team_identifier: None,
            ..defaults()
        };
        let mut builder = PassBuilder::new(&defaults).unwrap();
        builder.set_field("description", "x");

        match builder.build(&signer()) {
            Err(Error::Validation(msg)) => assert!(msg.contains("teamIdentifier"), "{msg}"),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_ne!(builder.state(), BuildState::Built);
    }

    #[test]
    fn mutation_after_build_drops_artifact() {
        let mut builder = populated();
        builder.build(&signer()).unwrap();
        builder.set_field("description", "changed");
        assert!(builder.artifact().is_none());
        assert_eq!(builder.state(), BuildState::Populated);
    }

    // =========================================================================
    // Round trip
    // =========================================================================

    #[test]
    fn load_existing_rebuild_keeps_manifest() {
        let signer = signer();
        let mut original = populated();
        original.build(&signer).unwrap();

        let mut reloaded =
            PassBuilder::load_existing(&defaults(), original.artifact().unwrap()).unwrap();
        assert_eq!(reloaded.state(), BuildState::Loaded);
        assert_eq!(reloaded.identity(), original.identity());
        reloaded.build(&signer).unwrap();

        assert_eq!(reloaded.manifest(), original.manifest());
    }

    #[test]
    fn load_existing_requires_pass_json() {
        let archive = write_archive([("icon.png", b"x".as_slice())]).unwrap();
        assert!(matches!(
            PassBuilder::load_existing(&defaults(), &archive),
            Err(Error::Validation(_))
        ));
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[tokio::test]
    async fn write_before_build_fails() {
        let repo = MemoryRepo::default();
        let mut builder = populated();
        assert!(matches!(
            builder.write_to_pass(&repo, None).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn write_inserts_then_replaces() {
        let repo = MemoryRepo::default();
        let signer = signer();

        let mut builder = populated();
        builder.build(&signer).unwrap();
        let created = builder.write_to_pass(&repo, None).await.unwrap();
        assert_eq!(builder.state(), BuildState::Persisted);
        assert_eq!(created.serial_number, builder.identity().serial_number);
        assert_eq!(created.data, builder.artifact().unwrap());
        assert!(
            std::path::Path::new(&created.data_name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pkpass"))
        );

        let mut update = PassBuilder::load_existing(&defaults(), &created.data).unwrap();
        update.set_field("organizationName", "Renamed");
        update.build(&signer).unwrap();
        let replaced = update.write_to_pass(&repo, Some(&created)).await.unwrap();

        assert_eq!(replaced.id, created.id);
        assert_eq!(replaced.data_name, created.data_name);
        assert!(replaced.updated_at > created.updated_at);
        assert_eq!(repo.passes.lock().unwrap().len(), 1);
    }
}
