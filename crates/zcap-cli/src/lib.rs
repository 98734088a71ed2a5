//! zcap CLI - device setup and capture signing from the command line
//!
//! This crate provides a command-line interface for:
//! - Running, retrying and resetting the first-run device setup
//! - Inspecting stored identity, escrow and registration state
//! - Signing, verifying, decrypting and publishing capture payloads

pub mod cli;
pub mod config;
pub mod output;
pub mod payload_file;

#[cfg(test)]
mod proptests;

pub use cli::Cli;
pub use config::{CliConfig, CliOverrides};
pub use output::{JsonResponse, OutputFormat, OutputFormatter};

use zcap_core::errors::{AttestationError, CaptureError, CoreError, KeyError};

/// Exit codes for CLI operations
///
/// - 0: Success
/// - 1: General error
/// - 2: Rejected - the server or a signature check refused the input
/// - 3: Timeout
/// - 4: Connection failed
/// - 5: Invalid input
/// - 6: Not set up - run `zcap setup` first
/// - 7: Unsupported - this device cannot provide a required capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    Rejected = 2,
    Timeout = 3,
    ConnectionFailed = 4,
    InvalidInput = 5,
    NotSetUp = 6,
    Unsupported = 7,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::Rejected => "REJECTED",
            ExitCode::Timeout => "TIMEOUT",
            ExitCode::ConnectionFailed => "CONNECTION_FAILED",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::NotSetUp => "NOT_SET_UP",
            ExitCode::Unsupported => "UNSUPPORTED",
        }
    }

    /// Classify a core failure.
    pub fn for_error(err: &CoreError) -> Self {
        if err.is_terminal() {
            return ExitCode::Unsupported;
        }
        if err.is_timeout() {
            return ExitCode::Timeout;
        }
        match err {
            CoreError::Key(KeyError::NoKeyFound | KeyError::NoWalletFound) => ExitCode::NotSetUp,
            CoreError::Capture(CaptureError::MissingIdentity(_)) => ExitCode::NotSetUp,
            CoreError::Capture(
                CaptureError::Key(KeyError::NoKeyFound | KeyError::NoWalletFound)
                | CaptureError::Encryption(KeyError::NoKeyFound)
                | CaptureError::WalletSignature(KeyError::NoWalletFound)
                | CaptureError::HardwareSignature(KeyError::NoKeyFound),
            ) => ExitCode::NotSetUp,
            CoreError::Attestation(AttestationError::ValidationFailed { .. }) => ExitCode::Rejected,
            CoreError::Capture(CaptureError::Verification(_)) => ExitCode::Rejected,
            CoreError::Capture(CaptureError::Publish(_)) => ExitCode::Rejected,
            CoreError::Api(_) | CoreError::Escrow(_) | CoreError::Ledger(_) => {
                ExitCode::ConnectionFailed
            }
            CoreError::Key(KeyError::Escrow(_) | KeyError::Ledger(_)) => ExitCode::ConnectionFailed,
            CoreError::Attestation(a) if a.is_onboarding_failure() => ExitCode::ConnectionFailed,
            _ => ExitCode::GeneralError,
        }
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;
    use std::time::Duration;
    use zcap_core::errors::{ApiError, EscrowError};

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::Rejected as i32, 2);
        assert_eq!(ExitCode::Timeout as i32, 3);
        assert_eq!(ExitCode::NotSetUp as i32, 6);
        assert_eq!(ExitCode::Unsupported as i32, 7);
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            ExitCode::for_error(&CoreError::from(KeyError::SecureHardwareUnavailable)),
            ExitCode::Unsupported
        );
        assert_eq!(
            ExitCode::for_error(&CoreError::from(KeyError::Escrow(EscrowError::Timeout(
                Duration::from_secs(10)
            )))),
            ExitCode::Timeout
        );
        assert_eq!(
            ExitCode::for_error(&CoreError::from(AttestationError::ValidationFailed {
                status: 403,
                reason: "bad challenge".into()
            })),
            ExitCode::Rejected
        );
        assert_eq!(
            ExitCode::for_error(&CoreError::from(CaptureError::MissingIdentity("wallet"))),
            ExitCode::NotSetUp
        );
        assert_eq!(
            ExitCode::for_error(&CoreError::from(AttestationError::Key(KeyError::Escrow(
                EscrowError::Timeout(Duration::from_secs(10))
            )))),
            ExitCode::Timeout
        );
        assert_eq!(
            ExitCode::for_error(&CoreError::from(ApiError::Http("refused".into()))),
            ExitCode::ConnectionFailed
        );
        assert_eq!(
            ExitCode::for_error(&CoreError::from(KeyError::InvalidKeyData("x".into()))),
            ExitCode::GeneralError
        );
    }

    #[test]
    fn test_private_capture_without_content_key_is_not_set_up() {
        let err = CoreError::from(CaptureError::Encryption(KeyError::NoKeyFound));
        assert_eq!(ExitCode::for_error(&err), ExitCode::NotSetUp);
        let err = CoreError::from(CaptureError::WalletSignature(KeyError::NoWalletFound));
        assert_eq!(ExitCode::for_error(&err), ExitCode::NotSetUp);
        let err = CoreError::from(CaptureError::Encryption(KeyError::InvalidKeyData("x".into())));
        assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    }

    #[test]
    fn test_exit_code_names() {
        assert_eq!(ExitCode::Success.name(), "SUCCESS");
        assert_eq!(ExitCode::NotSetUp.name(), "NOT_SET_UP");
    }
}
