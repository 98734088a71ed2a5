//! Remote ledger reads: native balance and ERC20-style token balances.
//!
//! Balance queries are best-effort network reads. They retry with a short
//! backoff and never touch wallet state.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use zcap_crypto::utils::decode_hex_0x;

use crate::errors::LedgerError;

/// `balanceOf(address)` selector.
pub const BALANCE_OF_SELECTOR: &str = "70a08231";
/// `decimals()` selector.
pub const DECIMALS_SELECTOR: &str = "313ce567";
/// Decimals of the chain's native currency.
pub const NATIVE_DECIMALS: u8 = 18;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Native balance in the smallest unit.
    async fn native_balance(&self, address: &str) -> Result<u128, LedgerError>;

    /// Raw token balance of `address` in the token at `contract`.
    async fn token_balance(&self, contract: &str, address: &str) -> Result<u128, LedgerError>;

    /// Declared decimals of the token at `contract`.
    async fn token_decimals(&self, contract: &str) -> Result<u8, LedgerError>;
}

// ============================================================================
// Amounts
// ============================================================================

/// An integer amount with its decimal scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TokenAmount {
    pub raw: u128,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn new(raw: u128, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    /// Lossy float conversion for display math.
    pub fn to_f64(&self) -> f64 {
        self.raw as f64 / 10f64.powi(i32::from(self.decimals))
    }
}

impl fmt::Display for TokenAmount {
    /// Exact decimal rendering with trailing zeros trimmed (`1.5`, `0.000001`, `42`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.raw.to_string();
        let scale = usize::from(self.decimals);
        if scale == 0 {
            return f.write_str(&digits);
        }
        let padded = if digits.len() <= scale {
            format!("{}{}", "0".repeat(scale - digits.len() + 1), digits)
        } else {
            digits
        };
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        let frac_part = frac_part.trim_end_matches('0');
        if frac_part.is_empty() {
            f.write_str(int_part)
        } else {
            write!(f, "{}.{}", int_part, frac_part)
        }
    }
}

/// The three balances reported for a wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Balances {
    pub native: TokenAmount,
    pub token_a: TokenAmount,
    pub token_b: TokenAmount,
}

/// Contracts queried for token balances.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenContracts {
    pub token_a: String,
    pub token_b: String,
}

/// Retry schedule for ledger reads.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Query all three balances of `address`, retrying each read.
pub async fn fetch_balances(
    ledger: &dyn Ledger,
    tokens: &TokenContracts,
    address: &str,
    retry: RetryPolicy,
) -> Result<Balances, LedgerError> {
    let native = with_retry(retry, "native_balance", || ledger.native_balance(address)).await?;
    let token_a = token_amount(ledger, &tokens.token_a, address, retry).await?;
    let token_b = token_amount(ledger, &tokens.token_b, address, retry).await?;

    Ok(Balances {
        native: TokenAmount::new(native, NATIVE_DECIMALS),
        token_a,
        token_b,
    })
}

async fn token_amount(
    ledger: &dyn Ledger,
    contract: &str,
    address: &str,
    retry: RetryPolicy,
) -> Result<TokenAmount, LedgerError> {
    let raw = with_retry(retry, "token_balance", || ledger.token_balance(contract, address)).await?;
    let decimals = with_retry(retry, "token_decimals", || ledger.token_decimals(contract)).await?;
    Ok(TokenAmount::new(raw, decimals))
}

async fn with_retry<T, F, Fut>(retry: RetryPolicy, what: &str, mut op: F) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, LedgerError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            // A well-formed RPC error will not change on retry.
            Err(e @ LedgerError::Rpc { .. }) | Err(e @ LedgerError::Overflow(_)) => return Err(e),
            Err(e) if attempt >= retry.max_retries => {
                warn!(what, attempts = attempt + 1, error = %e, "ledger read failed");
                return Err(e);
            }
            Err(e) => {
                attempt += 1;
                debug!(what, attempt, error = %e, "retrying ledger read");
                tokio::time::sleep(retry.backoff * attempt).await;
            }
        }
    }
}

// ============================================================================
// ABI helpers
// ============================================================================

/// Calldata for `balanceOf(address)`.
pub fn encode_balance_of(address: &str) -> Result<String, LedgerError> {
    let addr = decode_hex_0x(address)
        .map_err(|e| LedgerError::InvalidResponse(format!("bad address: {}", e)))?;
    if addr.len() != 20 {
        return Err(LedgerError::InvalidResponse(format!(
            "address must be 20 bytes, got {}",
            addr.len()
        )));
    }
    Ok(format!("0x{}{}{}", BALANCE_OF_SELECTOR, "0".repeat(24), hex::encode(addr)))
}

/// Calldata for `decimals()`.
pub fn encode_decimals() -> String {
    format!("0x{}", DECIMALS_SELECTOR)
}

/// Parse a hex quantity or a 32-byte ABI word into a `u128`.
pub fn parse_quantity(value: &str) -> Result<u128, LedgerError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    if digits.len() > 32 {
        return Err(LedgerError::Overflow(value.to_string()));
    }
    u128::from_str_radix(digits, 16).map_err(|e| LedgerError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_formatting() {
        assert_eq!(TokenAmount::new(1_500_000_000_000_000_000, 18).to_string(), "1.5");
        assert_eq!(TokenAmount::new(1, 6).to_string(), "0.000001");
        assert_eq!(TokenAmount::new(42_000_000, 6).to_string(), "42");
        assert_eq!(TokenAmount::new(0, 18).to_string(), "0");
        assert_eq!(TokenAmount::new(7, 0).to_string(), "7");
    }

    #[test]
    fn test_amount_to_f64() {
        let amt = TokenAmount::new(2_500_000, 6);
        assert!((amt.to_f64() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_encode_balance_of() {
        let data = encode_balance_of("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap();
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.starts_with("0x70a08231000000000000000000000000f39fd6"));
        assert!(encode_balance_of("0x1234").is_err());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(parse_quantity("0x1bc16d674ec80000").unwrap(), 2_000_000_000_000_000_000);
        let word = format!("0x{}{}", "0".repeat(62), "12");
        assert_eq!(parse_quantity(&word).unwrap(), 18);
        let huge = format!("0x1{}", "0".repeat(32));
        assert!(matches!(parse_quantity(&huge), Err(LedgerError::Overflow(_))));
        assert!(parse_quantity("0xzz").is_err());
    }

    struct Flaky {
        failures: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Ledger for Flaky {
        async fn native_balance(&self, _: &str) -> Result<u128, LedgerError> {
            use std::sync::atomic::Ordering;
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(LedgerError::Transport("connection reset".into()))
            } else {
                Ok(5)
            }
        }
        async fn token_balance(&self, _: &str, _: &str) -> Result<u128, LedgerError> {
            Ok(1_000_000)
        }
        async fn token_decimals(&self, _: &str) -> Result<u8, LedgerError> {
            Ok(6)
        }
    }

    fn tokens() -> TokenContracts {
        TokenContracts {
            token_a: "0x0000000000000000000000000000000000000001".into(),
            token_b: "0x0000000000000000000000000000000000000002".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_retries_transport_errors() {
        let ledger = Flaky {
            failures: std::sync::atomic::AtomicU32::new(2),
        };
        let balances = fetch_balances(&ledger, &tokens(), "0xabc", RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(balances.native, TokenAmount::new(5, 18));
        assert_eq!(balances.token_a.to_string(), "1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_gives_up_after_retries() {
        let ledger = Flaky {
            failures: std::sync::atomic::AtomicU32::new(10),
        };
        let err = fetch_balances(&ledger, &tokens(), "0xabc", RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Transport(_)));
    }
}
