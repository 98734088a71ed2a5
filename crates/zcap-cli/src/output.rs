//! Output formatting for CLI results
//!
//! Every command renders in one of three formats:
//! - Table: Human-readable tables (default)
//! - JSON: Structured JSON for scripting and automation
//! - Quiet: Minimal output, exit codes only

use std::str::FromStr;

use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use zcap_core::setup::{ResetReport, SetupError, SetupOutcome, SetupProgress, SetupState};

use crate::ExitCode;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// Standard JSON response wrapper for consistent schema
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success(data: T, command: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: Some(command.to_string()),
        }
    }

    /// A failure that still carries structured detail.
    pub fn failure(data: T, error: &str, command: &str) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(error.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: Some(command.to_string()),
        }
    }
}

impl JsonResponse<()> {
    pub fn error(message: &str) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: None,
        }
    }
}

// ============================================================================
// Views
// ============================================================================

/// Locally stored identity and registration state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub hardware_key: Option<String>,
    pub wallet_address: Option<String>,
    pub content_key: String,
    pub attestation_key_id: Option<String>,
    pub token_id: Option<String>,
    pub receipt_url: Option<String>,
    pub registered: bool,
    pub onboarding_complete: bool,
    pub last_setup_at: Option<String>,
    pub default_visibility: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupView {
    pub key_id: String,
    pub fast_path: bool,
    pub elapsed_ms: u128,
}

impl From<&SetupOutcome> for SetupView {
    fn from(o: &SetupOutcome) -> Self {
        Self {
            key_id: o.key_id.clone(),
            fast_path: o.fast_path,
            elapsed_ms: o.elapsed.as_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupFailureView {
    pub step: String,
    pub failed_steps: Vec<String>,
    pub retryable: bool,
    pub terminal: bool,
}

impl From<&SetupError> for SetupFailureView {
    fn from(e: &SetupError) -> Self {
        Self {
            step: e.step.label().to_string(),
            failed_steps: e.failed_steps.iter().map(|s| s.label().to_string()).collect(),
            retryable: e.is_retryable(),
            terminal: e.is_terminal(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BalancesView {
    pub address: String,
    pub native: String,
    pub token_a: String,
    pub token_b: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureView {
    pub sha256: String,
    pub visibility: String,
    pub wallet_address: String,
    pub hardware_key: String,
    pub written_to: Option<String>,
    pub published: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyView {
    pub sha256: String,
    pub visibility: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecryptView {
    pub timestamp: i64,
    pub media_bytes: usize,
    pub written_to: Option<String>,
}

// ============================================================================
// Formatter
// ============================================================================

/// Formats output for different modes
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_quiet(&self) -> bool {
        self.format == OutputFormat::Quiet
    }

    pub fn format_status(&self, status: &StatusView) -> String {
        self.render(status, "status", || {
            vec![
                ("Hardware Key", or_dash(status.hardware_key.as_deref().map(abbreviate))),
                ("Wallet", or_dash(status.wallet_address.as_deref())),
                ("Content Key", status.content_key.clone()),
                ("Registered", yes_no(status.registered)),
                ("Attestation Key", or_dash(status.attestation_key_id.as_deref().map(abbreviate))),
                ("Token ID", or_dash(status.token_id.as_deref())),
                ("Receipt", or_dash(status.receipt_url.as_deref())),
                ("Onboarding Complete", yes_no(status.onboarding_complete)),
                ("Last Setup", or_dash(status.last_setup_at.as_deref())),
                ("Default Visibility", status.default_visibility.clone()),
            ]
        })
    }

    pub fn format_setup(&self, outcome: &SetupOutcome) -> String {
        let view = SetupView::from(outcome);
        self.render(&view, "setup", || {
            vec![
                ("Attestation Key", abbreviate(&view.key_id)),
                ("Already Registered", yes_no(view.fast_path)),
                ("Elapsed", format!("{} ms", view.elapsed_ms)),
            ]
        })
    }

    pub fn format_setup_failure(&self, error: &SetupError) -> String {
        let view = SetupFailureView::from(error);
        match self.format {
            OutputFormat::Table => kv_table(&[
                ("Failed Step", view.step.clone()),
                ("Attempted", view.failed_steps.join(", ")),
                ("Error", error.source.to_string()),
                ("Retryable", yes_no(view.retryable)),
            ]),
            OutputFormat::Json => to_json(&JsonResponse::failure(&view, &error.source.to_string(), "setup")),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_reset(&self, report: &ResetReport) -> String {
        self.render(report, "reset", || {
            vec![
                ("Hardware Key", removed(report.hardware_key)),
                ("Attestation", removed(report.attestation)),
                ("Content Key", removed(report.content_key)),
                ("Wallet", removed(report.wallet)),
                ("Settings", removed(report.settings)),
            ]
        })
    }

    pub fn format_balances(&self, balances: &BalancesView) -> String {
        self.render(balances, "balances", || {
            vec![
                ("Address", balances.address.clone()),
                ("Native", balances.native.clone()),
                ("Token A", balances.token_a.clone()),
                ("Token B", balances.token_b.clone()),
            ]
        })
    }

    pub fn format_capture(&self, capture: &CaptureView) -> String {
        self.render(capture, "capture", || {
            vec![
                ("SHA-256", capture.sha256.clone()),
                ("Visibility", capture.visibility.clone()),
                ("Wallet", capture.wallet_address.clone()),
                ("Hardware Key", abbreviate(&capture.hardware_key)),
                ("Written To", or_dash(capture.written_to.as_deref())),
                ("Published", yes_no(capture.published)),
            ]
        })
    }

    pub fn format_verify(&self, verify: &VerifyView) -> String {
        self.render(verify, "verify", || {
            vec![
                ("SHA-256", verify.sha256.clone()),
                ("Visibility", verify.visibility.clone()),
                ("Valid", yes_no(verify.valid)),
                ("Reason", or_dash(verify.reason.as_deref())),
            ]
        })
    }

    pub fn format_decrypt(&self, decrypt: &DecryptView) -> String {
        self.render(decrypt, "decrypt", || {
            vec![
                ("Timestamp", decrypt.timestamp.to_string()),
                ("Media Bytes", decrypt.media_bytes.to_string()),
                ("Written To", or_dash(decrypt.written_to.as_deref())),
            ]
        })
    }

    /// One line per setup progress change, table mode only.
    pub fn setup_progress(&self, progress: &SetupProgress) {
        if self.format != OutputFormat::Table {
            return;
        }
        match &progress.state {
            SetupState::CheckingExisting => eprintln!("... checking existing registration"),
            SetupState::Running { step } => eprintln!("... {step}"),
            SetupState::Failed { step } => eprintln!("✗ {step}"),
            SetupState::Idle | SetupState::Completed { .. } => {}
        }
    }

    /// Format error with exit code context
    pub fn format_error_with_code(&self, message: &str, code: ExitCode) -> String {
        match self.format {
            OutputFormat::Table => format!("Error: {message}"),
            OutputFormat::Json => {
                let mut output = serde_json::to_value(JsonResponse::<()>::error(message))
                    .unwrap_or_else(|_| serde_json::json!({ "success": false, "error": message }));
                output["exit_code"] = serde_json::json!(code as i32);
                output["exit_code_name"] = serde_json::json!(code.name());
                to_json(&output)
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Progress message (only shown in verbose mode)
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("... {message}");
        }
    }

    pub fn success(&self, message: &str) {
        if self.format == OutputFormat::Table {
            println!("✓ {message}");
        }
    }

    pub fn warning(&self, message: &str) {
        if self.format == OutputFormat::Table {
            eprintln!("⚠ {message}");
        }
    }

    fn render<T: Serialize>(
        &self,
        value: &T,
        command: &str,
        rows: impl FnOnce() -> Vec<(&'static str, String)>,
    ) -> String {
        match self.format {
            OutputFormat::Table => kv_table(&rows()),
            OutputFormat::Json => to_json(&JsonResponse::success(value, command)),
            OutputFormat::Quiet => String::new(),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

fn kv_table(rows: &[(&str, String)]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Property", "Value"]);
    for (k, v) in rows {
        table.add_row(vec![k.to_string(), v.clone()]);
    }
    table.to_string()
}

fn yes_no(b: bool) -> String {
    (if b { "yes" } else { "no" }).to_string()
}

fn removed(ok: bool) -> String {
    (if ok { "removed" } else { "FAILED" }).to_string()
}

fn or_dash<S: Into<String>>(v: Option<S>) -> String {
    v.map(Into::into).unwrap_or_else(|| "-".to_string())
}

/// Shorten long identifiers for table display.
fn abbreviate(s: &str) -> String {
    if s.chars().count() <= 24 {
        return s.to_string();
    }
    let head: String = s.chars().take(12).collect();
    let tail: String = s.chars().rev().take(8).collect::<Vec<_>>().into_iter().rev().collect();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zcap_core::setup::SetupStep;
    use zcap_core::errors::{CoreError, KeyError};

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from_str("table").unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::from_str("JSON").unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str("quiet").unwrap(), OutputFormat::Quiet);
        assert!(OutputFormat::from_str("yaml").is_err());
    }

    #[test]
    fn test_setup_json_schema() {
        let formatter = OutputFormatter::new(OutputFormat::Json, false);
        let out = formatter.format_setup(&SetupOutcome {
            key_id: "key-1".into(),
            fast_path: true,
            elapsed: Duration::from_millis(12),
        });
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["command"], "setup");
        assert_eq!(v["data"]["key_id"], "key-1");
        assert_eq!(v["data"]["elapsed_ms"], 12);
    }

    #[test]
    fn test_setup_failure_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json, false);
        let err = SetupError {
            step: SetupStep::Wallet,
            failed_steps: vec![SetupStep::HardwareKey, SetupStep::Wallet],
            source: CoreError::Key(KeyError::KeyStorageFailed("disk full".into())),
        };
        let v: serde_json::Value = serde_json::from_str(&formatter.format_setup_failure(&err)).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["data"]["step"], "wallet");
        assert_eq!(v["data"]["failed_steps"][0], "hardware key");
    }

    #[test]
    fn test_quiet_prints_nothing() {
        let formatter = OutputFormatter::new(OutputFormat::Quiet, true);
        let view = BalancesView {
            address: "0xabc".into(),
            native: "1".into(),
            token_a: "0".into(),
            token_b: "0".into(),
        };
        assert!(formatter.format_balances(&view).is_empty());
        assert!(formatter.format_error_with_code("boom", ExitCode::Timeout).is_empty());
    }

    #[test]
    fn test_table_contains_values() {
        let formatter = OutputFormatter::new(OutputFormat::Table, false);
        let out = formatter.format_reset(&ResetReport {
            hardware_key: true,
            attestation: true,
            content_key: false,
            wallet: true,
            settings: true,
        });
        assert!(out.contains("FAILED"));
        assert!(out.contains("Content Key"));
    }

    #[test]
    fn test_error_json_has_exit_code() {
        let formatter = OutputFormatter::new(OutputFormat::Json, false);
        let v: serde_json::Value =
            serde_json::from_str(&formatter.format_error_with_code("no wallet", ExitCode::NotSetUp)).unwrap();
        assert_eq!(v["exit_code"], 6);
        assert_eq!(v["exit_code_name"], "NOT_SET_UP");
    }

    #[test]
    fn test_abbreviate() {
        assert_eq!(abbreviate("short"), "short");
        let long = "A".repeat(12) + &"B".repeat(20) + "CCCCCCCC";
        assert_eq!(abbreviate(&long), format!("{}…CCCCCCCC", "A".repeat(12)));
    }
}
