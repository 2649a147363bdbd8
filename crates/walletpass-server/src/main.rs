//! `WalletPass` Server
//!
//! Serves the PassKit web service and issues, updates and deletes passes.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use walletpass_core::Pass;
use walletpass_core::config::{self, Config, SigningConfig};
use walletpass_core::tracing_init::{default_filter, init_tracing};
use walletpass_crypto::SigningIdentity;
use walletpass_crypto::certs::generate_signing_identity;

use walletpass_server::commands::{PassEdit, delete_pass, update_pass};
use walletpass_server::events::EventBus;
use walletpass_server::issuing::PassIssuer;
use walletpass_server::notifications::{PushDispatcher, PushSender, sender_from_config};
use walletpass_server::routes::{AppState, build_router};
use walletpass_server::storage::PassDatabase;
use walletpass_server::webservice::{DeliveryMode, WebService};

#[derive(Parser, Debug)]
#[command(name = "walletpass-server")]
#[command(version, about = "WalletPass server - PassKit web service and pass management")]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long, global = true, env = "WALLETPASS_CONFIG")]
    config: Option<PathBuf>,

    /// Path to SQLite database file.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Sign issued passes with an auto-generated throwaway certificate.
    /// Devices reject such passes; use for local testing only.
    #[arg(long, global = true)]
    dev_signing: bool,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web service.
    Serve {
        /// Address to listen on.
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Build, sign and store a pass from a template directory.
    Issue {
        /// Directory holding `pass.json` and the pass images.
        #[arg(long)]
        template: PathBuf,
    },
    /// Rebuild a stored pass and push its registered devices.
    Update {
        #[command(flatten)]
        pass: PassArgs,

        /// Directory whose `pass.json` and images replace the stored ones.
        #[arg(long)]
        template: Option<PathBuf>,

        /// Set a top-level `pass.json` field. Repeatable; JSON values keep
        /// their type.
        #[arg(long = "set", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
    /// Delete a stored pass with its registrations and logs.
    Delete {
        #[command(flatten)]
        pass: PassArgs,
    },
}

#[derive(Args, Debug)]
struct PassArgs {
    /// Pass type identifier; defaults to `pass.pass_type_identifier`.
    #[arg(long)]
    pass_type: Option<String>,

    /// Serial number of the stored pass.
    #[arg(long)]
    serial: String,
}

impl PassArgs {
    fn pass_type<'a>(&'a self, config: &'a Config) -> anyhow::Result<&'a str> {
        self.pass_type
            .as_deref()
            .or(config.pass.pass_type_identifier.as_deref())
            .context("--pass-type is required when pass.pass_type_identifier is not configured")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = config::load_config(cli.config.as_deref())?;
    init_tracing(
        &default_filter(&config.server.log_level),
        cli.log_json || config.server.log_json,
    );

    let db_path = match cli.db_path.clone().or_else(|| config.storage.database_path.clone()) {
        Some(path) => path,
        None => config::database_path()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine default database path"))?,
    };
    info!(path = %db_path.display(), "Opening pass database");
    let db = PassDatabase::open(&db_path).await?;

    let events = EventBus::new();

    match cli.command {
        Command::Serve { addr } => serve(&config, db, events, addr).await,
        Command::Issue { template } => {
            let issuer = pass_issuer(&config, db, events, cli.dev_signing)?;
            issue(&issuer, &template).await
        }
        Command::Update {
            pass,
            template,
            fields,
        } => {
            let edit = PassEdit::new(template, &fields)?;
            let dispatcher = PushDispatcher::new(db.clone(), push_sender(&config)?, events.clone());
            let issuer = pass_issuer(&config, db, events, cli.dev_signing)?;
            let report = update_pass(
                &issuer,
                &dispatcher,
                pass.pass_type(&config)?,
                &pass.serial,
                edit,
            )
            .await?;
            info!(
                serial_number = %report.pass.serial_number,
                pushed = report.pushed,
                "Pass updated"
            );
            Ok(())
        }
        Command::Delete { pass } => {
            let issuer = pass_issuer(&config, db, events, cli.dev_signing)?;
            let deleted = delete_pass(&issuer, pass.pass_type(&config)?, &pass.serial).await?;
            info!(serial_number = %deleted.serial_number, "Pass deleted");
            Ok(())
        }
    }
}

fn pass_issuer(
    config: &Config,
    db: PassDatabase,
    events: EventBus,
    dev_signing: bool,
) -> anyhow::Result<PassIssuer> {
    let signer = Arc::new(load_signing_identity(config, dev_signing)?);
    info!(subject = %signer.subject(), "Signing identity loaded");
    Ok(PassIssuer::new(db, signer, events, config.pass.defaults()))
}

fn push_sender(config: &Config) -> anyhow::Result<Arc<dyn PushSender>> {
    Ok(sender_from_config(
        &config.push,
        config.pass.team_identifier.as_deref(),
        config.pass.pass_type_identifier.as_deref(),
    )?)
}

async fn serve(
    config: &Config,
    db: PassDatabase,
    events: EventBus,
    addr: Option<SocketAddr>,
) -> anyhow::Result<()> {
    let addr = match addr {
        Some(addr) => addr,
        None => config
            .server
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address {}", config.server.listen_addr))?,
    };

    let dispatcher = PushDispatcher::new(db.clone(), push_sender(config)?, events.clone()).spawn();

    let delivery = DeliveryMode::from_redirect_base(config.storage.redirect_base_url.as_deref());
    let app = build_router(AppState {
        web: WebService::new(db, events, delivery),
    });

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        "Starting walletpass-server"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await?;

    dispatcher.abort();
    info!("Server stopped");
    Ok(())
}

async fn issue(issuer: &PassIssuer, template: &Path) -> anyhow::Result<()> {
    let builder = issuer
        .builder_from_template(template)
        .with_context(|| format!("Failed to stage template {}", template.display()))?;
    let pass = issuer.issue(builder).await?;

    info!(serial_number = %pass.serial_number, "Pass issued");
    print_issued(&pass);
    Ok(())
}

/// Identifiers for the operator, on stdout rather than the log sink.
#[allow(clippy::print_stdout)]
fn print_issued(pass: &Pass) {
    println!("pass_type_identifier: {}", pass.pass_type_identifier);
    println!("serial_number: {}", pass.serial_number);
    println!("authentication_token: {}", pass.authentication_token);
    println!("data_name: {}", pass.data_name);
}

fn load_signing_identity(config: &Config, dev_signing: bool) -> anyhow::Result<SigningIdentity> {
    if dev_signing {
        warn!("Using a throwaway signing certificate; devices will reject these passes");
        let pass_type = config
            .pass
            .pass_type_identifier
            .as_deref()
            .unwrap_or("pass.dev.walletpass");
        let team = config.pass.team_identifier.as_deref().unwrap_or("DEVTEAM000");
        return Ok(generate_signing_identity(pass_type, team)?);
    }

    let SigningConfig {
        certificate_path,
        key_path,
        pkcs12_path,
        key_password,
        wwdr_certificate_path,
    } = &config.signing;

    let wwdr = read(
        wwdr_certificate_path
            .as_deref()
            .context("signing.wwdr_certificate_path is not configured")?,
    )?;

    if let Some(pkcs12) = pkcs12_path {
        let archive = read(pkcs12)?;
        return Ok(SigningIdentity::from_pkcs12(
            &archive,
            key_password.as_deref().unwrap_or_default(),
            &wwdr,
        )?);
    }

    match (certificate_path, key_path) {
        (Some(cert), Some(key)) => Ok(SigningIdentity::from_pem(
            &read(cert)?,
            &read(key)?,
            &wwdr,
            key_password.as_deref(),
        )?),
        _ => anyhow::bail!(
            "Signing requires signing.pkcs12_path or both signing.certificate_path and signing.key_path (or --dev-signing)"
        ),
    }
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}
