//! Pass maintenance run from the command line.
//!
//! Outside `serve` no dispatcher task is listening on the bus, so an update
//! pushes registered devices itself before returning.

use std::path::PathBuf;

use serde_json::Value;
use tracing::{info, instrument};
use walletpass_core::Pass;

use crate::issuing::PassIssuer;
use crate::notifications::{NotificationError, PushDispatcher};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("No pass {pass_type_identifier}/{serial_number}")]
    PassNotFound {
        pass_type_identifier: String,
        serial_number: String,
    },

    #[error("Invalid field assignment {0:?}, expected KEY=VALUE")]
    InvalidAssignment(String),

    #[error(transparent)]
    Pass(#[from] walletpass_core::Error),

    #[error(transparent)]
    Push(#[from] NotificationError),
}

/// Changes applied to a stored pass: the template overlay first, then each
/// field in order.
#[derive(Debug, Clone, Default)]
pub struct PassEdit {
    pub template: Option<PathBuf>,
    pub fields: Vec<(String, Value)>,
}

impl PassEdit {
    pub fn new(template: Option<PathBuf>, assignments: &[String]) -> Result<Self, CommandError> {
        let fields = assignments
            .iter()
            .map(String::as_str)
            .map(parse_assignment)
            .collect::<Result<_, _>>()?;
        Ok(Self { template, fields })
    }
}

/// Parse `KEY=VALUE`. A value that reads as JSON keeps its JSON type; any
/// other value is a string.
pub fn parse_assignment(assignment: &str) -> Result<(String, Value), CommandError> {
    let (key, value) = assignment
        .split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .ok_or_else(|| CommandError::InvalidAssignment(assignment.to_string()))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

#[derive(Debug)]
pub struct UpdateReport {
    pub pass: Pass,
    /// Pushes the transport accepted.
    pub pushed: usize,
}

async fn stored_pass(
    issuer: &PassIssuer,
    pass_type_identifier: &str,
    serial_number: &str,
) -> Result<Pass, CommandError> {
    issuer
        .find(pass_type_identifier, serial_number)
        .await?
        .ok_or_else(|| CommandError::PassNotFound {
            pass_type_identifier: pass_type_identifier.to_string(),
            serial_number: serial_number.to_string(),
        })
}

/// Rebuild a stored pass with `edit` and push every registered device.
#[instrument(skip(issuer, dispatcher, edit))]
pub async fn update_pass(
    issuer: &PassIssuer,
    dispatcher: &PushDispatcher,
    pass_type_identifier: &str,
    serial_number: &str,
    edit: PassEdit,
) -> Result<UpdateReport, CommandError> {
    let pass = stored_pass(issuer, pass_type_identifier, serial_number).await?;

    let PassEdit { template, fields } = edit;
    let updated = issuer
        .update(&pass, move |builder| {
            if let Some(dir) = &template {
                builder.merge_template(dir)?;
            }
            for (key, value) in fields {
                builder.set_field(key, value);
            }
            Ok(())
        })
        .await?;

    let pushed = dispatcher.push_pass(updated.id).await?;
    info!(pushed, "Update pushed to registered devices");
    Ok(UpdateReport {
        pass: updated,
        pushed,
    })
}

/// Delete a stored pass. Its registrations and logs go with it.
#[instrument(skip(issuer))]
pub async fn delete_pass(
    issuer: &PassIssuer,
    pass_type_identifier: &str,
    serial_number: &str,
) -> Result<Pass, CommandError> {
    let pass = stored_pass(issuer, pass_type_identifier, serial_number).await?;
    issuer.delete(&pass).await?;
    Ok(pass)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use walletpass_core::PassDefaults;
    use walletpass_crypto::certs::generate_signing_identity;

    use super::*;
    use crate::events::EventBus;
    use crate::notifications::{PushOutcome, PushSender};
    use crate::storage::PassDatabase;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushSender for RecordingSender {
        async fn send(&self, push_token: &str) -> Result<PushOutcome, NotificationError> {
            self.sent.lock().unwrap().push(push_token.to_string());
            Ok(PushOutcome::Delivered)
        }
    }

    struct Setup {
        db: PassDatabase,
        issuer: PassIssuer,
        dispatcher: PushDispatcher,
        sender: Arc<RecordingSender>,
    }

    async fn setup() -> Setup {
        let db = PassDatabase::open_in_memory().await.unwrap();
        let events = EventBus::new();
        let signer = generate_signing_identity("pass.com.example", "TEAM123456").unwrap();
        let issuer = PassIssuer::new(
            db.clone(),
            Arc::new(signer),
            events.clone(),
            PassDefaults {
                pass_type_identifier: Some("pass.com.example".into()),
                team_identifier: Some("TEAM123456".into()),
                web_service_url: Some("https://passes.example.com/".into()),
            },
        );
        let sender = Arc::new(RecordingSender::default());
        let dispatcher = PushDispatcher::new(db.clone(), sender.clone(), events);
        Setup {
            db,
            issuer,
            dispatcher,
            sender,
        }
    }

    async fn issued(issuer: &PassIssuer) -> Pass {
        let mut builder = issuer.builder().unwrap();
        builder
            .set_field("formatVersion", 1)
            .set_field("organizationName", "Example")
            .set_field("description", "Sample");
        issuer.issue(builder).await.unwrap()
    }

    #[test]
    fn assignments_keep_json_types() {
        assert_eq!(
            parse_assignment("formatVersion=1").unwrap(),
            ("formatVersion".to_string(), Value::from(1))
        );
        assert_eq!(
            parse_assignment("description=Gate 4 = North").unwrap(),
            ("description".to_string(), Value::from("Gate 4 = North"))
        );
        assert_eq!(
            parse_assignment(r#"barcode={"format":"PKBarcodeFormatQR"}"#).unwrap().1["format"],
            "PKBarcodeFormatQR"
        );
    }

    #[test]
    fn assignment_needs_a_key() {
        assert!(matches!(
            parse_assignment("no-equals-sign"),
            Err(CommandError::InvalidAssignment(_))
        ));
        assert!(matches!(
            parse_assignment("=value"),
            Err(CommandError::InvalidAssignment(_))
        ));
    }

    #[tokio::test]
    async fn update_rebuilds_and_pushes_registered_devices() {
        let s = setup().await;
        let pass = issued(&s.issuer).await;
        s.db.create_registration("device-1", "tok-1", pass.id).await.unwrap();
        s.db.create_registration("device-2", "tok-2", pass.id).await.unwrap();

        let edit = PassEdit::new(None, &["organizationName=Renamed".to_string()]).unwrap();
        let report = update_pass(
            &s.issuer,
            &s.dispatcher,
            &pass.pass_type_identifier,
            &pass.serial_number,
            edit,
        )
        .await
        .unwrap();

        assert_eq!(report.pushed, 2);
        assert_eq!(report.pass.id, pass.id);
        assert!(report.pass.updated_at > pass.updated_at);
        assert_ne!(report.pass.data, pass.data);
        assert_eq!(*s.sender.sent.lock().unwrap(), vec!["tok-1", "tok-2"]);
    }

    #[tokio::test]
    async fn update_of_unknown_pass_fails() {
        let s = setup().await;
        let result = update_pass(
            &s.issuer,
            &s.dispatcher,
            "pass.com.example",
            "missing",
            PassEdit::default(),
        )
        .await;
        assert!(matches!(result, Err(CommandError::PassNotFound { .. })));
        assert!(s.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_pass_and_registrations() {
        let s = setup().await;
        let pass = issued(&s.issuer).await;
        s.db.create_registration("device-1", "tok-1", pass.id).await.unwrap();

        delete_pass(&s.issuer, &pass.pass_type_identifier, &pass.serial_number)
            .await
            .unwrap();

        let found = s
            .db
            .find_pass(&pass.pass_type_identifier, &pass.serial_number)
            .await
            .unwrap();
        assert!(found.is_none());
        assert!(s.db.registrations_for_pass(pass.id).await.unwrap().is_empty());
        assert!(matches!(
            delete_pass(&s.issuer, &pass.pass_type_identifier, &pass.serial_number).await,
            Err(CommandError::PassNotFound { .. })
        ));
    }
}
