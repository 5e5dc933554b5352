//! Library entry for the `tenantgate_coordinator` crate.
//!
//! Exposes `inner_main` so a workspace-level shim binary can call into the coordinator logic.
//!
//! Provides commands to launch the control service and a few operator helpers.
#![cfg_attr(
    test,
    expect(clippy::indexing_slicing, reason = "This is not problematic in tests",)
)]

extern crate alloc;
extern crate core;

pub mod app;
pub mod cli;
pub mod config;
pub mod files;
pub mod http;
pub mod pool_registry;
pub mod render;
pub mod runtime;

use std::env;
use std::fs;
use std::io::{self, BufRead as _};
use std::process;
use std::sync::Once;

use eyre::{Result, WrapErr as _, eyre};
use nix::sys::stat;
use secrecy::SecretString;
use tenantgate_common::{SecretCipher, generate_cipher_key, generate_secret};
use tracing::{Instrument as _, info};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

use cli::{Cli, Command, LogFormat, RenderArgs};
use config::GatewayConfig;
use render::{RenderInput, content_hash, render};

static INIT_TRACING: Once = Once::new();

/// The coordinator's main function; can be called from a shim binary.
///
/// Parses CLI and dispatches server startup or one of the helpers.
///
/// # Errors
///
/// Returns an error if the server fails to start or a helper gets invalid input.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    match invocation.command {
        Command::ControlService(args) => {
            // Rendered configs and registry files must not be group readable
            stat::umask(stat::Mode::S_IRWXG | stat::Mode::S_IRWXO);

            let config = &args.config;
            let config_path =
                fs::canonicalize(config).wrap_err(format!("Config file not found at: {config}"))?;

            init_tracing(args.log_format);

            let startup_span = tracing::info_span!("coord.startup", ?config_path, pid = ?process::id(), version = env!("CARGO_PKG_VERSION"));

            async {
                info!("Starting tenantgate");
                app::start(&config_path, args.port, args.bind.as_deref()).await
            }
            .instrument(startup_span)
            .await
        }
        Command::GenerateKey { cipher } => {
            let key = if cipher {
                generate_cipher_key()
            } else {
                generate_secret()
            };
            println!("{key}");
            Ok(())
        }
        Command::EncryptSecret { key } => {
            let cipher = SecretCipher::from_base64(&SecretString::from(key))
                .wrap_err("Invalid cipher key")?;
            let mut lines = io::stdin().lock().lines();
            let plaintext = read_secret_line(&mut lines, "plaintext")?;
            println!("{}", cipher.encrypt(&plaintext)?);
            Ok(())
        }
        Command::Render(args) => {
            let mut lines = io::stdin().lock().lines();
            let db_password = read_secret_line(&mut lines, "database password")?;
            let jwt_secret = read_secret_line(&mut lines, "JWT secret")?;
            print_rendered(&args, &db_password, &jwt_secret);
            Ok(())
        }
    }
}

fn init_tracing(log_format: LogFormat) {
    INIT_TRACING.call_once(move || {
        let default_level = if env::var("TENANTGATE_INTEGRATION_TEST").is_ok() {
            "error"
        } else {
            "info"
        };

        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
            )
            .with_timer(ChronoLocal::rfc_3339());

        match log_format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });
}

fn read_secret_line(
    lines: &mut impl Iterator<Item = io::Result<String>>,
    what: &str,
) -> Result<SecretString> {
    let line = lines
        .next()
        .ok_or_else(|| eyre!("Expected the {what} on stdin"))?
        .wrap_err(format!("Failed to read the {what} from stdin"))?;
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        return Err(eyre!("The {what} must not be empty"));
    }
    Ok(SecretString::from(trimmed))
}

fn print_rendered(args: &RenderArgs, db_password: &SecretString, jwt_secret: &SecretString) {
    let settings = GatewayConfig::default().settings();
    let text = render(
        &RenderInput {
            tenant_id: &args.tenant_id,
            db_name: args.db_name.as_deref().unwrap_or(&args.tenant_id),
            db_password,
            jwt_secret,
            host: &args.host,
            port: args.port,
        },
        &settings,
    );
    print!("{text}");
    eprintln!("sha256: {}", content_hash(&text));
}
