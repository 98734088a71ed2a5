//! Service graph: every manager is built once and shared by handle.

use std::sync::Arc;

use crate::api::ProvenanceApi;
use crate::attestation::{AttestationDeps, AttestationOrchestrator};
use crate::capture::{CapturePayloadSigner, CapturePublisher};
use crate::config::ZcapConfig;
use crate::content_key::ContentKeyManager;
use crate::device_identity::DeviceIdentityKeyManager;
use crate::ledger::Ledger;
use crate::platform::{AttestationService, EscrowNetwork, HardwareKeystore};
use crate::settings::SettingsStore;
use crate::setup::{SetupDeps, SetupStateMachine};
use crate::store::CredentialStore;
use crate::wallet::{LedgerSettings, WalletKeyManager};

/// Host-provided collaborators.
pub struct Platform {
    pub store: Arc<dyn CredentialStore>,
    pub keystore: Arc<dyn HardwareKeystore>,
    pub attestor: Arc<dyn AttestationService>,
    pub escrow: Arc<dyn EscrowNetwork>,
    pub api: Arc<dyn ProvenanceApi>,
    pub ledger: Option<Arc<dyn Ledger>>,
}

#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn CredentialStore>,
    pub device: Arc<DeviceIdentityKeyManager>,
    pub wallet: Arc<WalletKeyManager>,
    pub content: Arc<ContentKeyManager>,
    pub attestation: Arc<AttestationOrchestrator>,
    pub setup: Arc<SetupStateMachine>,
    pub signer: Arc<CapturePayloadSigner>,
    pub publisher: Arc<CapturePublisher>,
    pub settings: Arc<SettingsStore>,
}

impl Services {
    pub fn build(platform: Platform, config: &ZcapConfig) -> Self {
        let ns = config.storage.namespace.as_str();
        let store = platform.store;

        let device = Arc::new(DeviceIdentityKeyManager::new(platform.keystore));

        let mut wallet = WalletKeyManager::new(store.clone(), ns);
        if let Some(ledger) = platform.ledger {
            wallet = wallet.with_ledger(LedgerSettings {
                ledger,
                tokens: config.token_contracts(),
                retry: config.retry_policy(),
            });
        }
        let wallet = Arc::new(wallet);

        let content = Arc::new(
            ContentKeyManager::new(store.clone(), ns, wallet.clone(), platform.escrow)
                .with_session_timeout(config.escrow_session_timeout()),
        );

        let attestation = Arc::new(
            AttestationOrchestrator::new(
                store.clone(),
                ns,
                AttestationDeps {
                    device: device.clone(),
                    wallet: wallet.clone(),
                    content: content.clone(),
                    attestor: platform.attestor,
                    api: platform.api.clone(),
                },
            )
            .with_challenge_mode(config.attestation.challenge_mode),
        );

        let settings = Arc::new(SettingsStore::new(store.clone(), ns));

        let setup = Arc::new(
            SetupStateMachine::new(SetupDeps {
                device: device.clone(),
                wallet: wallet.clone(),
                content: content.clone(),
                attestation: attestation.clone(),
                settings: settings.clone(),
            })
            .with_step_delay(config.step_delay()),
        );

        let signer = Arc::new(CapturePayloadSigner::new(
            device.clone(),
            wallet.clone(),
            content.clone(),
        ));
        let publisher = Arc::new(CapturePublisher::new(platform.api));

        Self {
            store,
            device,
            wallet,
            content,
            attestation,
            setup,
            signer,
            publisher,
            settings,
        }
    }

    /// Software keystore and attestor over `store`, HTTP clients from `config`.
    #[cfg(feature = "http")]
    pub fn from_config(
        config: &ZcapConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, crate::errors::ApiError> {
        use crate::http::{HttpEscrowBridge, HttpProvenanceApi, JsonRpcLedger};
        use crate::software::{SoftwareAttestor, SoftwareKeystore};

        let timeout = config.request_timeout();
        let platform = Platform {
            keystore: Arc::new(SoftwareKeystore::new(store.clone(), &config.storage.namespace)),
            attestor: Arc::new(SoftwareAttestor::new()),
            escrow: Arc::new(HttpEscrowBridge::new(&config.escrow.bridge_url, timeout)?),
            api: Arc::new(HttpProvenanceApi::new(&config.api.base_url, timeout)?),
            ledger: Some(Arc::new(JsonRpcLedger::new(&config.ledger.rpc_url, timeout)?)),
            store,
        };
        Ok(Self::build(platform, config))
    }
}
