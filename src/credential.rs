//! Rotating credential derivation and validation

use log::info;
use sha2::{Digest, Sha256};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Base secret the hourly credential is derived from
pub const BASE_KEY: &str = "e78639c5-88bf-45bf-81a6-53693830a574";

/// Non-rotating credential that is always accepted (the raw bytes of `BASE_KEY`)
pub const EMERGENCY_CREDENTIAL: Uuid = Uuid::from_u128(0xe78639c5_88bf_45bf_81a6_53693830a574);

/// Length of a rotation period in seconds
pub const PERIOD_SECS: u64 = 3600;

/// A credential together with the period it was derived for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credential {
    /// The 16 credential bytes
    pub id: Uuid,

    /// Unix seconds of the hour boundary this credential belongs to
    pub period: u64,
}

/// Unix seconds of the hour boundary containing `at`
pub fn period_at(at: SystemTime) -> u64 {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    secs - secs % PERIOD_SECS
}

/// Unix seconds of the current hour boundary
pub fn current_period() -> u64 {
    period_at(SystemTime::now())
}

/// Derive the credential for `period` from `base`.
///
/// `SHA-256(hex(SHA-256(base ++ decimal(period))))`, truncated to 16 bytes.
pub fn derive_credential(base: &str, period: u64) -> Uuid {
    let first = Sha256::digest(format!("{}{}", base, period).as_bytes());
    let second = Sha256::digest(hex::encode(first).as_bytes());

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&second[..16]);
    Uuid::from_bytes(bytes)
}

/// CredentialOracle hands out and checks session credentials.
///
/// The rotating value is cached with its period and recomputed on the first
/// read after the hour changes. Recomputation is deterministic, so two readers
/// racing on a rollover store the same value.
pub struct CredentialOracle {
    /// Secret the rotating credential is derived from
    base: String,

    /// Fixed override replacing rotation entirely
    fixed: Option<Uuid>,

    /// Last derived rotating credential
    cache: RwLock<Option<Credential>>,
}

impl CredentialOracle {
    /// Create an oracle that rotates hourly from `BASE_KEY`
    pub fn new() -> Self {
        Self::with_base(BASE_KEY)
    }

    /// Create an oracle that rotates hourly from a custom base secret
    pub fn with_base(base: &str) -> Self {
        CredentialOracle {
            base: base.to_string(),
            fixed: None,
            cache: RwLock::new(None),
        }
    }

    /// Create an oracle whose current credential never rotates
    pub fn with_fixed(fixed: Uuid) -> Self {
        CredentialOracle {
            base: BASE_KEY.to_string(),
            fixed: Some(fixed),
            cache: RwLock::new(None),
        }
    }

    /// Parse a fixed override in hyphenated or 32-hex-digit form
    pub fn parse_fixed(value: &str) -> Result<Self, uuid::Error> {
        Ok(Self::with_fixed(Uuid::parse_str(value.trim())?))
    }

    /// Whether rotation is disabled by a fixed override
    pub fn is_fixed(&self) -> bool {
        self.fixed.is_some()
    }

    /// The currently valid credential
    pub fn current(&self) -> Uuid {
        self.current_for(current_period())
    }

    /// The emergency credential
    pub fn emergency(&self) -> Uuid {
        EMERGENCY_CREDENTIAL
    }

    /// The credential valid during `period`, refreshing the cache if needed
    pub fn current_for(&self, period: u64) -> Uuid {
        if let Some(fixed) = self.fixed {
            return fixed;
        }

        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cred) = *cache {
                if cred.period == period {
                    return cred.id;
                }
            }
        }

        let id = derive_credential(&self.base, period);
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *cache = Some(Credential { id, period });
        info!("Credential rotated for period {}: {}", period, id);
        id
    }

    /// Check a presented credential against the current and emergency values
    pub fn validate(&self, presented: &[u8; 16]) -> bool {
        self.validate_at(presented, current_period())
    }

    /// Check a presented credential as of `period`
    pub fn validate_at(&self, presented: &[u8; 16], period: u64) -> bool {
        presented == self.current_for(period).as_bytes() || presented == EMERGENCY_CREDENTIAL.as_bytes()
    }
}

impl Default for CredentialOracle {
    fn default() -> Self {
        Self::new()
    }
}
