//! Issuing, updating and revoking passes.
//!
//! Every stored change emits [`PassEvent::PassUpdated`], which the push
//! dispatcher turns into device notifications.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};
use walletpass_core::{Pass, PassBuilder, PassDefaults, Result};
use walletpass_crypto::SigningIdentity;

use crate::events::{EventBus, PassEvent};
use crate::storage::PassDatabase;

#[derive(Clone)]
pub struct PassIssuer {
    db: PassDatabase,
    signer: Arc<SigningIdentity>,
    events: EventBus,
    defaults: PassDefaults,
}

impl PassIssuer {
    pub const fn new(
        db: PassDatabase,
        signer: Arc<SigningIdentity>,
        events: EventBus,
        defaults: PassDefaults,
    ) -> Self {
        Self {
            db,
            signer,
            events,
            defaults,
        }
    }

    /// A builder for a brand new pass.
    pub fn builder(&self) -> Result<PassBuilder> {
        PassBuilder::new(&self.defaults)
    }

    /// A builder for a new pass staged from a template directory.
    pub fn builder_from_template(&self, dir: &Path) -> Result<PassBuilder> {
        PassBuilder::from_directory(&self.defaults, dir)
    }

    /// Look up a stored pass by its public identifiers.
    pub async fn find(
        &self,
        pass_type_identifier: &str,
        serial_number: &str,
    ) -> Result<Option<Pass>> {
        Ok(self.db.find_pass(pass_type_identifier, serial_number).await?)
    }

    /// Build and store a new pass.
    #[instrument(skip_all)]
    pub async fn issue(&self, mut builder: PassBuilder) -> Result<Pass> {
        builder.build(&self.signer)?;
        let pass = builder.write_to_pass(&self.db, None).await?;

        info!(pass_id = pass.id, serial_number = %pass.serial_number, "Pass issued");
        self.events.emit(PassEvent::PassUpdated { pass_id: pass.id });
        Ok(pass)
    }

    /// Rebuild a stored pass with `edit` applied to its current content.
    #[instrument(skip_all, fields(pass_id = pass.id))]
    pub async fn update<F>(&self, pass: &Pass, edit: F) -> Result<Pass>
    where
        F: FnOnce(&mut PassBuilder) -> Result<()> + Send,
    {
        let mut builder = PassBuilder::load_existing(&self.defaults, &pass.data)?;
        edit(&mut builder)?;
        builder.build(&self.signer)?;
        let updated = builder.write_to_pass(&self.db, Some(pass)).await?;

        info!(serial_number = %updated.serial_number, "Pass updated");
        self.events.emit(PassEvent::PassUpdated { pass_id: updated.id });
        Ok(updated)
    }

    /// Remove a pass together with its registrations and logs.
    ///
    /// Returns `false` if it was already gone.
    #[instrument(skip_all, fields(pass_id = pass.id))]
    pub async fn delete(&self, pass: &Pass) -> Result<bool> {
        let removed = self.db.delete_pass(pass.id).await?;
        if removed {
            info!("Pass deleted");
        }
        Ok(removed)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use walletpass_crypto::certs::generate_signing_identity;

    use super::*;

    async fn issuer() -> (PassIssuer, EventBus) {
        let db = PassDatabase::open_in_memory().await.unwrap();
        let events = EventBus::new();
        let signer = generate_signing_identity("pass.com.example", "TEAM123456").unwrap();
        let defaults = PassDefaults {
            pass_type_identifier: Some("pass.com.example".into()),
            team_identifier: Some("TEAM123456".into()),
            web_service_url: Some("https://passes.example.com/".into()),
        };
        (
            PassIssuer::new(db, Arc::new(signer), events.clone(), defaults),
            events,
        )
    }

    fn sample(issuer: &PassIssuer) -> PassBuilder {
        let mut builder = issuer.builder().unwrap();
        builder
            .set_field("formatVersion", 1)
            .set_field("organizationName", "Example")
            .set_field("description", "Sample");
        builder
    }

    #[tokio::test]
    async fn issue_stores_and_announces() {
        let (issuer, events) = issuer().await;
        let mut rx = events.subscribe();

        let pass = issuer.issue(sample(&issuer)).await.unwrap();

        assert_eq!(pass.pass_type_identifier, "pass.com.example");
        assert!(!pass.data.is_empty());
        assert_eq!(rx.recv().await.unwrap(), PassEvent::PassUpdated { pass_id: pass.id });
    }

    #[tokio::test]
    async fn update_rebuilds_with_same_identity() {
        let (issuer, _) = issuer().await;
        let pass = issuer.issue(sample(&issuer)).await.unwrap();

        let updated = issuer
            .update(&pass, |b| {
                b.set_field("organizationName", "Renamed");
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(updated.id, pass.id);
        assert_eq!(updated.serial_number, pass.serial_number);
        assert_eq!(updated.authentication_token, pass.authentication_token);
        assert!(updated.updated_at > pass.updated_at);
        assert_ne!(updated.data, pass.data);
    }

    #[tokio::test]
    async fn failed_edit_leaves_pass_untouched() {
        let (issuer, _) = issuer().await;
        let pass = issuer.issue(sample(&issuer)).await.unwrap();

        let result = issuer
            .update(&pass, |b| b.add_asset("../escape", vec![1]).map(|_| ()))
            .await;
        assert!(result.is_err());

        let stored = issuer.db.get_pass(pass.id).await.unwrap();
        assert_eq!(stored.data, pass.data);
        assert_eq!(stored.updated_at, pass.updated_at);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn update_logs_never_carry_the_token() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (issuer, _) = issuer().await;
        let pass = issuer.issue(sample(&issuer)).await.unwrap();
        issuer
            .update(&pass, |b| {
                b.set_field("organizationName", "Renamed");
                Ok(())
            })
            .await
            .unwrap();
        issuer.delete(&pass).await.unwrap();

        let logs = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Pass updated"), "logs: {logs}");
        assert!(!logs.contains(&pass.authentication_token));
    }

    #[tokio::test]
    async fn find_by_public_identifiers() {
        let (issuer, _) = issuer().await;
        let pass = issuer.issue(sample(&issuer)).await.unwrap();

        let found = issuer
            .find(&pass.pass_type_identifier, &pass.serial_number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, pass.id);
        assert!(issuer.find("pass.com.example", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_pass() {
        let (issuer, _) = issuer().await;
        let pass = issuer.issue(sample(&issuer)).await.unwrap();

        assert!(issuer.delete(&pass).await.unwrap());
        assert!(!issuer.delete(&pass).await.unwrap());
    }
}
