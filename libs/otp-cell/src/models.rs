use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored one-time-code token. One row per (contact, purpose); a reissue
/// overwrites the row instead of creating a sibling. The code itself is
/// never stored, only its keyed hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpToken {
    pub contact: String,
    pub purpose: String,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: i32,
    pub last_sent_at: DateTime<Utc>,
}

/// Result of a successful issue. The clear code exists only here, on its way
/// to the out-of-band notifier.
#[derive(Debug, Clone)]
pub struct IssuedOtp {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a verification attempt. All of these are ordinary business
/// outcomes; only storage trouble is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Code matched. The token has been deleted (single use).
    Verified,
    /// No token exists for this (contact, purpose).
    NotFound,
    /// Token was past its expiry; it has been deleted.
    Expired,
    /// Wrong code; the attempt counter went up.
    Incorrect { remaining_attempts: i32 },
    /// The attempt ceiling was hit; the token has been deleted and a fresh
    /// issue is required.
    AttemptsExceeded,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum OtpError {
    /// Resend throttling, not a failure: an unexpired code went out too
    /// recently. Retrying does not move the window.
    #[error("A code was sent recently; retry in {remaining_seconds}s")]
    CooldownActive { remaining_seconds: i64 },

    #[error("Database error: {0}")]
    DatabaseError(String),
}

#[derive(Debug, Clone)]
pub struct OtpPolicy {
    pub code_length: u32,
    pub ttl_minutes: i64,
    pub resend_cooldown_seconds: i64,
    pub max_attempts: i32,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            code_length: 6,
            ttl_minutes: 5,
            resend_cooldown_seconds: 60,
            max_attempts: 5,
        }
    }
}
