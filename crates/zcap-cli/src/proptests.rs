#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use std::time::Duration;

    use zcap_core::errors::{ApiError, AttestationError, CoreError, EscrowError, KeyError};

    use crate::output::{OutputFormat, OutputFormatter};
    use crate::ExitCode;

    fn core_error() -> impl Strategy<Value = CoreError> {
        prop_oneof![
            ".*".prop_map(|m| CoreError::from(ApiError::Http(m))),
            ".*".prop_map(|m| CoreError::from(KeyError::InvalidKeyData(m))),
            (400u16..600, ".*").prop_map(|(status, reason)| {
                CoreError::from(AttestationError::ValidationFailed { status, reason })
            }),
            ".*".prop_map(|m| CoreError::from(AttestationError::OnboardingFailed(m))),
            (1u64..120).prop_map(|s| CoreError::from(EscrowError::Timeout(Duration::from_secs(s)))),
        ]
    }

    proptest! {
        #[test]
        fn test_errors_never_exit_zero(err in core_error()) {
            prop_assert_ne!(ExitCode::for_error(&err), ExitCode::Success);
        }

        #[test]
        fn test_error_json_preserves_message(message in ".*") {
            let formatter = OutputFormatter::new(OutputFormat::Json, false);
            let out = formatter.format_error_with_code(&message, ExitCode::GeneralError);
            let v: serde_json::Value = serde_json::from_str(&out).unwrap();
            prop_assert_eq!(v["error"].as_str(), Some(message.as_str()));
            prop_assert_eq!(v["success"].as_bool(), Some(false));
        }
    }
}
