//! In-process collaborators for tests and local runs.
//!
//! [`TestRig`] wires a full [`Services`] graph over software keys, a
//! recording provenance API and an in-memory escrow network, so flows can
//! be exercised end to end without a device or a network.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use zeroize::Zeroizing;

use zcap_crypto::content_key::ContentKeyRecord;
use zcap_crypto::hash::{sha256, sha256_hex};
use zcap_crypto::utils::{b64_decode, b64_encode};

use crate::api::{AccessNftRequest, ApiReply, ProvenanceApi};
use crate::attestation::ChallengeMode;
use crate::config::ZcapConfig;
use crate::errors::{ApiError, EscrowError, KeyError, LedgerError, StoreError};
use crate::ledger::Ledger;
use crate::payload::CapturePayload;
use crate::platform::{
    AccessPolicy, EncryptionResult, EscrowNetwork, EscrowSession, HardwareKeystore, SessionIdentity,
};
use crate::services::{Platform, Services};
use crate::setup::SetupOutcome;
use crate::software::{verify_software_statement, SoftwareAttestor, SoftwareKeystore};
use crate::store::{CredentialStore, InMemoryCredentialStore, StoreKey};

// ============================================================================
// Escrow network
// ============================================================================

#[derive(Default)]
struct EscrowCounters {
    sessions: AtomicUsize,
    encrypts: AtomicUsize,
    fail_next: AtomicBool,
    last_address: Mutex<Option<String>>,
}

/// Escrow network that seals under a throwaway key and counts sessions.
#[derive(Clone, Default)]
pub struct MemoryEscrowNetwork {
    counters: Arc<EscrowCounters>,
    connect_delay: Duration,
}

impl MemoryEscrowNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every session handshake by `delay`.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Make the next `encrypt` call fail.
    pub fn fail_next_encrypt(&self) {
        self.counters.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> usize {
        self.counters.sessions.load(Ordering::SeqCst)
    }

    pub fn encrypts(&self) -> usize {
        self.counters.encrypts.load(Ordering::SeqCst)
    }

    /// Depositor address of the most recent session.
    pub fn last_address(&self) -> Option<String> {
        self.counters
            .last_address
            .lock()
            .ok()
            .and_then(|a| a.clone())
    }
}

#[async_trait]
impl EscrowNetwork for MemoryEscrowNetwork {
    async fn connect(
        &self,
        identity: &SessionIdentity,
    ) -> Result<Box<dyn EscrowSession>, EscrowError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        self.counters.sessions.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.counters.last_address.lock() {
            *last = Some(identity.address.clone());
        }
        Ok(Box::new(MemoryEscrowSession {
            counters: self.counters.clone(),
        }))
    }
}

struct MemoryEscrowSession {
    counters: Arc<EscrowCounters>,
}

#[async_trait]
impl EscrowSession for MemoryEscrowSession {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptionResult, EscrowError> {
        if self.counters.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EscrowError::EncryptFailed("injected failure".into()));
        }
        self.counters.encrypts.fetch_add(1, Ordering::SeqCst);
        let sealed = ContentKeyRecord::generate()
            .and_then(|k| k.seal(plaintext))
            .map_err(|e| EscrowError::EncryptFailed(e.to_string()))?;
        Ok(EncryptionResult {
            ciphertext: b64_encode(&sealed),
            data_to_encrypt_hash: sha256_hex(plaintext),
        })
    }
}

// ============================================================================
// Hardware keystore
// ============================================================================

/// Software keystore whose signing can be slowed down or made to fail.
pub struct ScriptedKeystore {
    inner: SoftwareKeystore,
    sign_delay: Mutex<Duration>,
    fail_sign: AtomicBool,
    sign_calls: AtomicUsize,
}

impl ScriptedKeystore {
    pub fn new(store: Arc<dyn CredentialStore>, namespace: impl Into<String>) -> Self {
        Self {
            inner: SoftwareKeystore::new(store, namespace),
            sign_delay: Mutex::new(Duration::ZERO),
            fail_sign: AtomicBool::new(false),
            sign_calls: AtomicUsize::new(0),
        }
    }

    /// Hold every signature for `delay` before producing it.
    pub fn set_sign_delay(&self, delay: Duration) {
        if let Ok(mut d) = self.sign_delay.lock() {
            *d = delay;
        }
    }

    /// Make signing fail (after any delay) until called with `false`.
    pub fn fail_signing(&self, fail: bool) {
        self.fail_sign.store(fail, Ordering::SeqCst);
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HardwareKeystore for ScriptedKeystore {
    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn supports_signing(&self) -> bool {
        self.inner.supports_signing()
    }

    fn is_hardware_backed(&self) -> bool {
        self.inner.is_hardware_backed()
    }

    async fn generate_key(&self, tag: &str, policy: AccessPolicy) -> Result<Vec<u8>, KeyError> {
        self.inner.generate_key(tag, policy).await
    }

    fn public_key(&self, tag: &str) -> Result<Option<Vec<u8>>, KeyError> {
        self.inner.public_key(tag)
    }

    async fn sign(&self, tag: &str, data: &[u8]) -> Result<Vec<u8>, KeyError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.sign_delay.lock().map(|d| *d).unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sign.load(Ordering::SeqCst) {
            return Err(KeyError::SigningFailed("injected failure".into()));
        }
        self.inner.sign(tag, data).await
    }

    fn delete_key(&self, tag: &str) -> Result<bool, KeyError> {
        self.inner.delete_key(tag)
    }
}

// ============================================================================
// Provenance API
// ============================================================================

/// Provenance API that records every call.
///
/// Onboarding requests are checked the way a server would: the software
/// attestation statement must verify and commit to the submitted challenge
/// hash, and that hash must be the SHA-256 of the submitted plaintext.
/// Scripted replies pushed with [`RecordingApi::push_reply`] take precedence.
#[derive(Default)]
pub struct RecordingApi {
    nonce_calls: AtomicUsize,
    onboarding_calls: AtomicUsize,
    publish_calls: AtomicUsize,
    next_token: AtomicU64,
    replies: Mutex<VecDeque<ApiReply>>,
    last_request: Mutex<Option<AccessNftRequest>>,
    nonces: Mutex<Vec<String>>,
    published: Mutex<Vec<CapturePayload>>,
    publish_failure: Mutex<Option<String>>,
}

impl RecordingApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next onboarding request.
    pub fn push_reply(&self, reply: ApiReply) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
    }

    /// Make every publish fail with `message` until cleared with `None`.
    pub fn fail_publish(&self, message: Option<&str>) {
        if let Ok(mut f) = self.publish_failure.lock() {
            *f = message.map(str::to_string);
        }
    }

    pub fn nonce_calls(&self) -> usize {
        self.nonce_calls.load(Ordering::SeqCst)
    }

    pub fn onboarding_calls(&self) -> usize {
        self.onboarding_calls.load(Ordering::SeqCst)
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn network_calls(&self) -> usize {
        self.nonce_calls() + self.onboarding_calls() + self.publish_calls()
    }

    pub fn last_request(&self) -> Option<AccessNftRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }

    pub fn issued_nonces(&self) -> Vec<String> {
        self.nonces.lock().map(|n| n.clone()).unwrap_or_default()
    }

    pub fn published(&self) -> Vec<CapturePayload> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn judge(&self, request: &AccessNftRequest) -> ApiReply {
        match check_onboarding(request) {
            Ok(()) => {
                let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
                let body = serde_json::json!({
                    "irys": {
                        "id": format!("receipt-{}", token),
                        "url": format!("https://gateway.test/receipt-{}", token),
                    },
                    "nft": { "hash": sha256_hex(request.key_id.as_bytes()), "tokenId": token },
                });
                json_reply(200, &body)
            }
            Err(reason) => json_reply(403, &serde_json::json!({ "error": reason })),
        }
    }
}

fn json_reply(status: u16, body: &serde_json::Value) -> ApiReply {
    ApiReply {
        status,
        body: Bytes::from(body.to_string()),
    }
}

fn check_onboarding(request: &AccessNftRequest) -> Result<(), &'static str> {
    let statement = b64_decode(&request.attestation_receipt).map_err(|_| "receipt is not base64")?;
    let attested = verify_software_statement(&statement).map_err(|_| "attestation rejected")?;
    let challenge = b64_decode(&request.challenge_data).map_err(|_| "challenge is not base64")?;
    if challenge != attested {
        return Err("attestation does not cover challenge");
    }
    if challenge != sha256(request.challenge_data_plain.as_bytes()) {
        return Err("challenge mismatch");
    }
    Ok(())
}

#[async_trait]
impl ProvenanceApi for RecordingApi {
    async fn fetch_nonce(&self, _key_id: &str, _public_key_b64: &str) -> Result<String, ApiError> {
        self.nonce_calls.fetch_add(1, Ordering::SeqCst);
        let mut raw = [0u8; 16];
        getrandom::getrandom(&mut raw).map_err(|e| ApiError::Http(e.to_string()))?;
        let nonce = hex::encode(raw);
        if let Ok(mut n) = self.nonces.lock() {
            n.push(nonce.clone());
        }
        Ok(nonce)
    }

    async fn submit_access_nft(&self, request: &AccessNftRequest) -> Result<ApiReply, ApiError> {
        self.onboarding_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }
        let scripted = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        Ok(scripted.unwrap_or_else(|| self.judge(request)))
    }

    async fn publish(&self, payload: &CapturePayload) -> Result<(), ApiError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.publish_failure.lock().ok().and_then(|f| f.clone());
        if let Some(message) = failure {
            return Err(ApiError::Status { status: 400, message });
        }
        if let Ok(mut p) = self.published.lock() {
            p.push(payload.clone());
        }
        Ok(())
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// Fixed balances keyed by lowercase contract address.
#[derive(Default)]
pub struct FakeLedger {
    native: u128,
    tokens: HashMap<String, (u128, u8)>,
}

impl FakeLedger {
    pub fn new(native: u128) -> Self {
        Self {
            native,
            tokens: HashMap::new(),
        }
    }

    pub fn with_token(mut self, contract: &str, balance: u128, decimals: u8) -> Self {
        self.tokens
            .insert(contract.to_ascii_lowercase(), (balance, decimals));
        self
    }

    fn token(&self, contract: &str) -> Result<(u128, u8), LedgerError> {
        self.tokens
            .get(&contract.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| LedgerError::Rpc {
                code: -32000,
                message: "execution reverted".into(),
            })
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn native_balance(&self, _address: &str) -> Result<u128, LedgerError> {
        Ok(self.native)
    }

    async fn token_balance(&self, contract: &str, _address: &str) -> Result<u128, LedgerError> {
        Ok(self.token(contract)?.0)
    }

    async fn token_decimals(&self, contract: &str) -> Result<u8, LedgerError> {
        Ok(self.token(contract)?.1)
    }
}

// ============================================================================
// Credential store with injected faults
// ============================================================================

/// In-memory store whose operations fail for selected accounts.
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryCredentialStore,
    failing: Mutex<HashSet<String>>,
    reads: Mutex<HashMap<String, usize>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation on `account` until [`FaultyStore::heal`].
    pub fn fail_account(&self, account: &str) {
        if let Ok(mut f) = self.failing.lock() {
            f.insert(account.to_string());
        }
    }

    pub fn heal(&self) {
        if let Ok(mut f) = self.failing.lock() {
            f.clear();
        }
    }

    /// Number of `get` calls made for `account`.
    pub fn reads(&self, account: &str) -> usize {
        self.reads
            .lock()
            .map(|r| r.get(account).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn accounts(&self) -> Vec<String> {
        self.inner.accounts()
    }

    fn check(&self, key: &StoreKey) -> Result<(), StoreError> {
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(&key.account))
            .unwrap_or(false);
        if failing {
            Err(StoreError::OperationFailed(format!("injected fault on {}", key)))
        } else {
            Ok(())
        }
    }
}

impl CredentialStore for FaultyStore {
    fn get(&self, key: &StoreKey) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        if let Ok(mut r) = self.reads.lock() {
            *r.entry(key.account.clone()).or_insert(0) += 1;
        }
        self.check(key)?;
        self.inner.get(key)
    }

    fn set(&self, key: &StoreKey, value: &[u8]) -> Result<(), StoreError> {
        self.check(key)?;
        self.inner.set(key, value)
    }

    fn replace(&self, key: &StoreKey, value: &[u8]) -> Result<(), StoreError> {
        self.check(key)?;
        self.inner.replace(key, value)
    }

    fn delete(&self, key: &StoreKey) -> Result<bool, StoreError> {
        self.check(key)?;
        self.inner.delete(key)
    }
}

// ============================================================================
// Rig
// ============================================================================

/// Every collaborator plus the service graph built over them.
pub struct TestRig {
    pub store: Arc<FaultyStore>,
    pub keystore: Arc<ScriptedKeystore>,
    pub escrow: Arc<MemoryEscrowNetwork>,
    pub api: Arc<RecordingApi>,
    pub ledger: Arc<FakeLedger>,
    pub config: ZcapConfig,
    pub services: Services,
}

/// Token contracts the rig's ledger knows about.
pub const RIG_TOKEN_A: &str = "0x1111111111111111111111111111111111111111";
pub const RIG_TOKEN_B: &str = "0x2222222222222222222222222222222222222222";

impl TestRig {
    pub fn new() -> Self {
        Self::with_mode(ChallengeMode::Canonical)
    }

    pub fn with_mode(mode: ChallengeMode) -> Self {
        let mut config = ZcapConfig::default();
        config.setup.step_delay_ms = 0;
        config.ledger.retry_backoff_ms = 0;
        config.ledger.token_a = RIG_TOKEN_A.to_string();
        config.ledger.token_b = RIG_TOKEN_B.to_string();
        config.attestation.challenge_mode = mode;

        let store = Arc::new(FaultyStore::new());
        let escrow = Arc::new(MemoryEscrowNetwork::new());
        let api = Arc::new(RecordingApi::new());
        let ledger = Arc::new(
            FakeLedger::new(1_500_000_000_000_000_000)
                .with_token(RIG_TOKEN_A, 2_500_000, 6)
                .with_token(RIG_TOKEN_B, 0, 18),
        );

        let keystore = Arc::new(ScriptedKeystore::new(
            store.clone(),
            config.storage.namespace.clone(),
        ));
        let platform = Platform {
            store: store.clone(),
            keystore: keystore.clone(),
            attestor: Arc::new(SoftwareAttestor::new()),
            escrow: escrow.clone(),
            api: api.clone(),
            ledger: Some(ledger.clone()),
        };
        let services = Services::build(platform, &config);

        Self {
            store,
            keystore,
            escrow,
            api,
            ledger,
            config,
            services,
        }
    }

    /// Run setup to completion.
    ///
    /// # Panics
    ///
    /// Panics if setup fails.
    pub async fn bootstrap(&self) -> SetupOutcome {
        match self.services.setup.run().await {
            Ok(outcome) => outcome,
            Err(e) => panic!("bootstrap failed: {}", e),
        }
    }
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}
