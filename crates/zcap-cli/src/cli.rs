//! CLI command definitions and argument parsing

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};

use zcap_core::capture::{verify_payload, CaptureRequest};
use zcap_core::config::ZcapConfig;
use zcap_core::content_key::ContentKeyState;
use zcap_core::errors::CoreError;
use zcap_core::payload::Visibility;
use zcap_core::services::Services;
use zcap_core::setup::SetupState;
use zcap_core::store::FileCredentialStore;
use zcap_crypto::utils::b64_decode;

use crate::config::{CliConfig, CliOverrides};
use crate::output::{
    BalancesView, CaptureView, DecryptView, OutputFormat, OutputFormatter, StatusView, VerifyView,
};
use crate::payload_file::{read_media, read_payload, write_payload};
use crate::ExitCode;

/// zcap - hardware-bound provenance signing for captured media
#[derive(Parser, Debug)]
#[command(name = "zcap")]
#[command(version, about = "Device setup, capture signing and verification")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: table, json or quiet
    #[arg(long, default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path
    #[arg(long, global = true, env = "ZCAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level for zcap targets (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Provenance API base URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Credential store directory
    #[arg(long, global = true)]
    pub storage_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create keys, escrow the content key and register this device
    Setup(SetupArgs),
    /// Show stored identity and registration state
    Status,
    /// Delete every key, credential and local setting
    Reset(ResetArgs),
    /// Show wallet balances
    Balances,
    /// Sign a media file
    Capture(CaptureArgs),
    /// Publish a signed payload file
    Publish(PayloadArgs),
    /// Decrypt a private payload with this device's content key
    Decrypt(DecryptArgs),
    /// Check a payload's digest and signatures
    Verify(PayloadArgs),
}

#[derive(Args, Debug)]
pub struct SetupArgs {
    /// Clear the previous failure and run again
    #[arg(long)]
    pub retry: bool,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Confirm the reset
    #[arg(long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Media file to sign
    pub file: PathBuf,

    /// Encrypt the media with the content key
    #[arg(long, conflicts_with = "public")]
    pub private: bool,

    /// Publish the media in the clear
    #[arg(long)]
    pub public: bool,

    /// Capture time in Unix seconds (default: now)
    #[arg(long)]
    pub timestamp: Option<i64>,

    /// Write the payload here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Publish after signing
    #[arg(long)]
    pub publish: bool,
}

#[derive(Args, Debug)]
pub struct PayloadArgs {
    /// Payload JSON file
    pub payload: PathBuf,
}

#[derive(Args, Debug)]
pub struct DecryptArgs {
    /// Payload JSON file
    pub payload: PathBuf,

    /// Write the decrypted media here
    #[arg(long)]
    pub out: Option<PathBuf>,
}

impl Cli {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            log_level: self.log_level.clone(),
            api_url: self.api_url.clone(),
            storage_dir: self.storage_dir.clone(),
        }
    }

    /// Execute the command with a resolved configuration
    pub async fn execute_with_config(self, config: ZcapConfig) -> anyhow::Result<ExitCode> {
        let formatter = OutputFormatter::new(self.output, self.verbose);

        // Verification needs no keys and no store.
        if let Commands::Verify(args) = &self.command {
            return args.verify(&formatter).await;
        }

        let services = build_services(&config, &formatter)?;
        match self.command {
            Commands::Setup(args) => args.execute(&services, &formatter).await,
            Commands::Status => status(&services, &formatter),
            Commands::Reset(args) => args.execute(&services, &formatter).await,
            Commands::Balances => balances(&services, &formatter).await,
            Commands::Capture(args) => args.execute(&services, &formatter).await,
            Commands::Publish(args) => args.publish(&services, &formatter).await,
            Commands::Decrypt(args) => args.execute(&services, &formatter).await,
            Commands::Verify(_) => Ok(ExitCode::Success),
        }
    }
}

/// Open the credential store and wire every service once.
pub fn build_services(config: &ZcapConfig, formatter: &OutputFormatter) -> anyhow::Result<Services> {
    let dir = CliConfig::storage_dir(config)?;
    formatter.progress(&format!("Opening credential store at {}", dir.display()));
    let store = FileCredentialStore::open(&dir)
        .with_context(|| format!("cannot open credential store at {}", dir.display()))?;
    let services = Services::from_config(config, Arc::new(store)).context("cannot build HTTP clients")?;
    debug!(store = %dir.display(), api = %config.api.base_url, "services ready");
    Ok(services)
}

/// Report a core failure and pick its exit code.
fn fail(formatter: &OutputFormatter, err: CoreError) -> ExitCode {
    let code = ExitCode::for_error(&err);
    let message = err.to_string();
    match formatter.format() {
        OutputFormat::Table => eprintln!("{}", formatter.format_error_with_code(&message, code)),
        _ => println!("{}", formatter.format_error_with_code(&message, code)),
    }
    code
}

fn print(text: String) {
    if !text.is_empty() {
        println!("{text}");
    }
}

impl SetupArgs {
    pub async fn execute(self, services: &Services, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let mut rx = services.setup.subscribe();
        let printer = {
            let formatter = *formatter;
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    let progress = rx.borrow_and_update().clone();
                    formatter.setup_progress(&progress);
                    if is_final(&progress.state) {
                        break;
                    }
                }
            })
        };

        let run = async {
            if self.retry {
                services.setup.retry().await
            } else {
                services.setup.run().await
            }
        };
        let Some(result) = run_until_interrupted(run, tokio::signal::ctrl_c()).await else {
            printer.abort();
            formatter.warning("Interrupted; run `zcap setup --retry` to resume");
            return Ok(ExitCode::GeneralError);
        };
        printer.abort();

        match result {
            Ok(outcome) => {
                print(formatter.format_setup(&outcome));
                if !outcome.fast_path {
                    formatter.success("Device registered");
                }
                Ok(ExitCode::Success)
            }
            Err(e) => {
                print(formatter.format_setup_failure(&e));
                if e.is_retryable() {
                    formatter.warning("Run `zcap setup --retry` to resume");
                } else if e.is_terminal() {
                    formatter.warning("This device cannot complete setup");
                }
                Ok(ExitCode::for_error(&e.source))
            }
        }
    }
}

/// Drive `work` to completion unless `interrupt` fires first. An interrupt
/// source that fails (no signal handler) is ignored.
async fn run_until_interrupted<T>(
    work: impl Future<Output = T>,
    interrupt: impl Future<Output = std::io::Result<()>>,
) -> Option<T> {
    tokio::pin!(work);
    let interrupted = tokio::select! {
        result = &mut work => return Some(result),
        interrupted = interrupt => interrupted,
    };
    match interrupted {
        Ok(()) => None,
        Err(e) => {
            debug!(error = %e, "no interrupt handler; setup cannot be cancelled");
            Some(work.await)
        }
    }
}

fn status(services: &Services, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
    let record = services.attestation.stored_record()?;
    let settings = services.settings.load();
    let content_key = match services.content.state()? {
        ContentKeyState::Absent => "absent",
        ContentKeyState::PresentUnescrowed => "present, not escrowed",
        ContentKeyState::PresentEscrowed => "present, escrowed",
    };

    let view = StatusView {
        hardware_key: services.device.public_key_base64()?,
        wallet_address: services.wallet.stored_address()?,
        content_key: content_key.to_string(),
        attestation_key_id: record.as_ref().map(|r| r.key_id.clone()),
        token_id: record.as_ref().map(|r| r.credential.token_id.clone()),
        receipt_url: record.as_ref().map(|r| r.credential.receipt_url.clone()),
        registered: services.attestation.has_stored_access_nft(),
        onboarding_complete: settings.onboarding_complete,
        last_setup_at: settings.last_setup_at.map(|t| t.to_rfc3339()),
        default_visibility: settings.default_visibility.to_string(),
    };
    print(formatter.format_status(&view));
    Ok(ExitCode::Success)
}

impl ResetArgs {
    pub async fn execute(self, services: &Services, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
        if !self.yes {
            formatter.warning("Reset deletes the hardware key, wallet, content key and registration.");
            formatter.warning("The wallet private key cannot be recovered afterwards. Pass --yes to confirm.");
            return Ok(ExitCode::InvalidInput);
        }
        let report = services.setup.reset_all_keys().await;
        print(formatter.format_reset(&report));
        if report.success() {
            info!("reset complete");
            Ok(ExitCode::Success)
        } else {
            Ok(ExitCode::GeneralError)
        }
    }
}

async fn balances(services: &Services, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
    let Some(address) = services.wallet.stored_address()? else {
        formatter.warning("No wallet; run `zcap setup` first");
        return Ok(ExitCode::NotSetUp);
    };
    formatter.progress("Querying ledger...");
    match services.wallet.get_balances().await {
        Ok(b) => {
            print(formatter.format_balances(&BalancesView {
                address,
                native: b.native.to_string(),
                token_a: b.token_a.to_string(),
                token_b: b.token_b.to_string(),
            }));
            Ok(ExitCode::Success)
        }
        Err(e) => Ok(fail(formatter, e.into())),
    }
}

impl CaptureArgs {
    pub async fn execute(self, services: &Services, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let media = read_media(&self.file).await?;
        let visibility = if self.private {
            Visibility::Private
        } else if self.public {
            Visibility::Public
        } else {
            services.settings.load().default_visibility
        };
        let timestamp = self.timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());

        formatter.progress(&format!("Signing {} ({} bytes, {})", self.file.display(), media.len(), visibility));
        let request = CaptureRequest {
            visibility,
            media,
            timestamp,
        };
        let payload = match services.signer.sign_capture(&request).await {
            Ok(p) => p,
            Err(e) => return Ok(fail(formatter, e.into())),
        };

        if let Some(out) = &self.out {
            write_payload(out, &payload).await?;
        }

        let mut published = false;
        if self.publish {
            formatter.progress("Publishing...");
            if let Err(e) = services.publisher.publish(&payload).await {
                return Ok(fail(formatter, e.into()));
            }
            published = true;
        }

        if self.out.is_none() {
            // The payload itself is the output.
            if !formatter.is_quiet() {
                println!("{}", serde_json::to_string_pretty(&payload)?);
            }
            return Ok(ExitCode::Success);
        }

        print(formatter.format_capture(&CaptureView {
            sha256: payload.sha256.clone(),
            visibility: visibility.to_string(),
            wallet_address: payload.eth.pubkey.clone(),
            hardware_key: payload.secp256r1.pubkey.clone(),
            written_to: self.out.as_ref().map(|p| p.display().to_string()),
            published,
        }));
        Ok(ExitCode::Success)
    }
}

impl PayloadArgs {
    pub async fn verify(&self, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let payload = read_payload(&self.payload).await?;
        let result = verify_payload(&payload);
        let view = VerifyView {
            sha256: payload.sha256.clone(),
            visibility: payload.content.visibility().to_string(),
            valid: result.is_ok(),
            reason: result.as_ref().err().map(|e| e.to_string()),
        };
        print(formatter.format_verify(&view));
        Ok(if view.valid {
            ExitCode::Success
        } else {
            ExitCode::Rejected
        })
    }

    pub async fn publish(&self, services: &Services, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let payload = read_payload(&self.payload).await?;
        if let Err(e) = verify_payload(&payload) {
            return Ok(fail(formatter, e.into()));
        }
        match services.publisher.publish(&payload).await {
            Ok(()) => {
                formatter.success(&format!("Published {}", payload.sha256));
                Ok(ExitCode::Success)
            }
            Err(e) => Ok(fail(formatter, e.into())),
        }
    }
}

impl DecryptArgs {
    pub async fn execute(self, services: &Services, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
        let payload = read_payload(&self.payload).await?;
        let content = match services.signer.decrypt_private_content(&payload) {
            Ok(c) => c,
            Err(e) => return Ok(fail(formatter, e.into())),
        };
        let media = b64_decode(&content.mediadata).context("decrypted mediadata is not base64")?;

        if let Some(out) = &self.out {
            tokio::fs::write(out, &media)
                .await
                .with_context(|| format!("cannot write {}", out.display()))?;
        }
        print(formatter.format_decrypt(&DecryptView {
            timestamp: content.metadata.timestamp,
            media_bytes: media.len(),
            written_to: self.out.as_ref().map(|p| p.display().to_string()),
        }));
        Ok(ExitCode::Success)
    }
}

/// True when a progress snapshot ends a run.
pub fn is_final(state: &SetupState) -> bool {
    matches!(state, SetupState::Completed { .. } | SetupState::Failed { .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capture() {
        let cli = Cli::try_parse_from([
            "zcap", "capture", "photo.jpg", "--private", "--timestamp", "1700000000", "--out", "p.json",
        ])
        .unwrap();
        let Commands::Capture(args) = cli.command else {
            panic!("expected capture");
        };
        assert!(args.private);
        assert_eq!(args.timestamp, Some(1_700_000_000));
        assert_eq!(args.out, Some(PathBuf::from("p.json")));
        assert!(!args.publish);
    }

    #[test]
    fn test_private_conflicts_with_public() {
        assert!(Cli::try_parse_from(["zcap", "capture", "a.jpg", "--private", "--public"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "zcap", "status", "--output", "json", "--log-level", "debug", "--log-json",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.log_json);
        assert_eq!(cli.overrides().log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_setup_retry_flag() {
        let cli = Cli::try_parse_from(["zcap", "setup", "--retry"]).unwrap();
        assert!(matches!(cli.command, Commands::Setup(SetupArgs { retry: true })));
    }

    #[test]
    fn test_reset_requires_explicit_flag_value() {
        let cli = Cli::try_parse_from(["zcap", "reset"]).unwrap();
        assert!(matches!(cli.command, Commands::Reset(ResetArgs { yes: false })));
    }

    #[test]
    fn test_is_final() {
        assert!(is_final(&SetupState::Completed { fast_path: false }));
        assert!(!is_final(&SetupState::CheckingExisting));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_interrupt_handler_does_not_cancel() {
        let work = async {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            7
        };
        let broken = async { Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "no handler")) };
        assert_eq!(run_until_interrupted(work, broken).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_cancels_work() {
        let work = async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            7
        };
        let pressed = async { Ok::<(), std::io::Error>(()) };
        assert_eq!(run_until_interrupted(work, pressed).await, None);
    }

    #[tokio::test]
    async fn test_verify_rejects_tampered_file() {
        use zcap_core::harness::TestRig;

        let rig = TestRig::new();
        rig.bootstrap().await;
        let payload = rig
            .services
            .signer
            .sign_capture(&CaptureRequest {
                visibility: Visibility::Public,
                media: b"frame".to_vec(),
                timestamp: 5,
            })
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        write_payload(&good, &payload).await.unwrap();
        let formatter = OutputFormatter::new(OutputFormat::Quiet, false);
        let code = PayloadArgs { payload: good }.verify(&formatter).await.unwrap();
        assert_eq!(code, ExitCode::Success);

        let mut tampered = payload;
        tampered.sha256 = "00".repeat(32);
        let bad = dir.path().join("bad.json");
        write_payload(&bad, &tampered).await.unwrap();
        let code = PayloadArgs { payload: bad }.verify(&formatter).await.unwrap();
        assert_eq!(code, ExitCode::Rejected);
    }
}
