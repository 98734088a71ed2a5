//! First-run bootstrap state machine.
//!
//! Steps run in a fixed order, each feeding the next: hardware key, wallet,
//! content key escrow, attestation. The first failure halts the run. Every
//! step is idempotent, so a retry re-enters from the top and completed steps
//! return their existing artifacts immediately.
//!
//! Progress is published on a `watch` channel for UIs and the CLI.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::attestation::AttestationOrchestrator;
use crate::content_key::ContentKeyManager;
use crate::device_identity::DeviceIdentityKeyManager;
use crate::errors::CoreError;
use crate::settings::SettingsStore;
use crate::wallet::WalletKeyManager;

/// Default per-step progress delay.
pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(400);

// ============================================================================
// Types
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStep {
    HardwareKey,
    Wallet,
    ContentKey,
    Attestation,
}

impl SetupStep {
    pub const ORDER: [SetupStep; 4] = [
        SetupStep::HardwareKey,
        SetupStep::Wallet,
        SetupStep::ContentKey,
        SetupStep::Attestation,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SetupStep::HardwareKey => "hardware key",
            SetupStep::Wallet => "wallet",
            SetupStep::ContentKey => "content key escrow",
            SetupStep::Attestation => "device attestation",
        }
    }
}

impl std::fmt::Display for SetupStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SetupState {
    Idle,
    CheckingExisting,
    Running { step: SetupStep },
    Completed { fast_path: bool },
    Failed { step: SetupStep },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub step: SetupStep,
    pub ok: bool,
}

/// Snapshot of one bootstrap run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SetupProgress {
    pub state: SetupState,
    pub current_step: Option<SetupStep>,
    pub results: Vec<StepResult>,
    /// Steps attempted in the failed run, in order, ending with the one that failed.
    pub failed_steps: Vec<SetupStep>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl Default for SetupProgress {
    fn default() -> Self {
        Self {
            state: SetupState::Idle,
            current_step: None,
            results: Vec::new(),
            failed_steps: Vec::new(),
            error: None,
            elapsed: Duration::ZERO,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupOutcome {
    pub key_id: String,
    pub fast_path: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("setup failed at {step}: {source}")]
pub struct SetupError {
    pub step: SetupStep,
    pub failed_steps: Vec<SetupStep>,
    pub source: CoreError,
}

impl SetupError {
    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }

    pub fn is_terminal(&self) -> bool {
        self.source.is_terminal()
    }
}

/// Per-artifact outcome of a full reset. `true` means removed or already absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub hardware_key: bool,
    pub attestation: bool,
    pub content_key: bool,
    pub wallet: bool,
    pub settings: bool,
}

impl ResetReport {
    pub fn success(&self) -> bool {
        self.hardware_key && self.attestation && self.content_key && self.wallet && self.settings
    }
}

// ============================================================================
// State machine
// ============================================================================

/// Managers driven by the bootstrap.
pub struct SetupDeps {
    pub device: Arc<DeviceIdentityKeyManager>,
    pub wallet: Arc<WalletKeyManager>,
    pub content: Arc<ContentKeyManager>,
    pub attestation: Arc<AttestationOrchestrator>,
    pub settings: Arc<SettingsStore>,
}

pub struct SetupStateMachine {
    deps: SetupDeps,
    step_delay: Duration,
    progress: watch::Sender<SetupProgress>,
    run_lock: Mutex<()>,
}

impl SetupStateMachine {
    pub fn new(deps: SetupDeps) -> Self {
        let (progress, _) = watch::channel(SetupProgress::default());
        Self {
            deps,
            step_delay: DEFAULT_STEP_DELAY,
            progress,
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SetupProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> SetupProgress {
        self.progress.borrow().clone()
    }

    /// Run the bootstrap. Returns immediately when a valid registration exists.
    pub async fn run(&self) -> Result<SetupOutcome, SetupError> {
        let _guard = self.run_lock.lock().await;
        let started = Instant::now();
        let mut progress = SetupProgress {
            state: SetupState::CheckingExisting,
            ..SetupProgress::default()
        };
        self.publish(&progress);

        if let Ok(Some(record)) = self.deps.attestation.valid_record() {
            progress.state = SetupState::Completed { fast_path: true };
            progress.elapsed = started.elapsed();
            self.publish(&progress);
            info!(key_id = %record.key_id, "device already registered");
            return Ok(SetupOutcome {
                key_id: record.key_id,
                fast_path: true,
                elapsed: progress.elapsed,
            });
        }

        let mut attempted = Vec::with_capacity(SetupStep::ORDER.len());
        let mut key_id = None;

        for step in SetupStep::ORDER {
            progress.state = SetupState::Running { step };
            progress.current_step = Some(step);
            progress.elapsed = started.elapsed();
            self.publish(&progress);
            attempted.push(step);

            debug!(%step, "setup step starting");
            let result = self.run_step(step).await;
            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }

            match result {
                Ok(id) => {
                    progress.results.push(StepResult { step, ok: true });
                    if id.is_some() {
                        key_id = id;
                    }
                }
                Err(source) => {
                    warn!(%step, error = %source, "setup step failed");
                    progress.results.push(StepResult { step, ok: false });
                    progress.state = SetupState::Failed { step };
                    progress.failed_steps = attempted.clone();
                    progress.error = Some(source.to_string());
                    progress.elapsed = started.elapsed();
                    self.publish(&progress);
                    return Err(SetupError {
                        step,
                        failed_steps: attempted,
                        source,
                    });
                }
            }
        }

        if let Err(e) = self.deps.settings.mark_onboarded(Utc::now()) {
            warn!(error = %e, "failed to record onboarding in local settings");
        }

        progress.state = SetupState::Completed { fast_path: false };
        progress.current_step = None;
        progress.elapsed = started.elapsed();
        self.publish(&progress);
        info!(elapsed_ms = progress.elapsed.as_millis() as u64, "setup complete");

        let key_id = key_id.ok_or_else(|| SetupError {
            step: SetupStep::Attestation,
            failed_steps: attempted.clone(),
            source: CoreError::Attestation(crate::errors::AttestationError::InvalidRecord(
                "attestation produced no key id".into(),
            )),
        })?;
        Ok(SetupOutcome {
            key_id,
            fast_path: false,
            elapsed: progress.elapsed,
        })
    }

    /// Clear the last run's progress and run again.
    pub async fn retry(&self) -> Result<SetupOutcome, SetupError> {
        self.publish(&SetupProgress::default());
        self.run().await
    }

    async fn run_step(&self, step: SetupStep) -> Result<Option<String>, CoreError> {
        match step {
            SetupStep::HardwareKey => {
                self.deps.device.ensure_key().await?;
                Ok(None)
            }
            SetupStep::Wallet => {
                self.deps.wallet.create_or_load_wallet()?;
                Ok(None)
            }
            SetupStep::ContentKey => {
                self.deps.content.get_or_create_key().await?;
                Ok(None)
            }
            SetupStep::Attestation => Ok(Some(self.deps.attestation.attest_device_if_needed().await?)),
        }
    }

    /// Tear down every persisted artifact. Safe to call when some or all are
    /// already absent.
    pub async fn reset_all_keys(&self) -> ResetReport {
        let _guard = self.run_lock.lock().await;
        let report = ResetReport {
            hardware_key: self.deps.device.delete_key(),
            attestation: self.deps.attestation.remove_key_id(),
            content_key: self.deps.content.remove_key(),
            wallet: self.deps.wallet.delete_wallet(),
            settings: self.deps.settings.clear(),
        };
        self.publish(&SetupProgress::default());
        if report.success() {
            info!("all keys reset");
        } else {
            warn!(?report, "reset incomplete");
        }
        report
    }

    fn publish(&self, progress: &SetupProgress) {
        self.progress.send_replace(progress.clone());
    }
}
