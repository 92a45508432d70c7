use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{IssuedOtp, OtpError, OtpPolicy, OtpToken, VerifyOutcome};

type HmacSha256 = Hmac<Sha256>;

/// Keyed hash of a code, bound to its (contact, purpose) pair so a hash
/// lifted from one row is useless against another.
pub fn code_hash(secret: &str, contact: &str, purpose: &str, code: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(contact.as_bytes());
    mac.update(b"\x00");
    mac.update(purpose.as_bytes());
    mac.update(b"\x00");
    mac.update(code.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

fn hash_matches(secret: &str, contact: &str, purpose: &str, candidate: &str, stored: &str) -> bool {
    let Ok(stored_bytes) = STANDARD.decode(stored) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(contact.as_bytes());
    mac.update(b"\x00");
    mac.update(purpose.as_bytes());
    mac.update(b"\x00");
    mac.update(candidate.as_bytes());
    // verify_slice is constant-time in the tag comparison
    mac.verify_slice(&stored_bytes).is_ok()
}

/// Fixed-length numeric code from the OS entropy source.
pub fn generate_numeric_code(length: u32) -> String {
    let max = 10u32.pow(length);
    let n: u32 = OsRng.gen_range(0..max);
    format!("{:0width$}", n, width = length as usize)
}

/// Issues and verifies one-time codes for a (contact, purpose) pair.
///
/// All counters live on the stored token row, never in process memory, so
/// any number of service instances can run side by side.
pub struct OtpService {
    supabase: Arc<SupabaseClient>,
    policy: OtpPolicy,
    hash_secret: String,
}

impl OtpService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_policy(config, OtpPolicy::default())
    }

    pub fn with_policy(config: &AppConfig, policy: OtpPolicy) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            policy,
            hash_secret: config.otp_hash_secret.clone(),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, config: &AppConfig) -> Self {
        Self {
            supabase,
            policy: OtpPolicy::default(),
            hash_secret: config.otp_hash_secret.clone(),
        }
    }

    pub fn policy(&self) -> &OtpPolicy {
        &self.policy
    }

    fn token_path(contact: &str, purpose: &str) -> String {
        format!(
            "/rest/v1/otp_tokens?contact=eq.{}&purpose=eq.{}",
            urlencoding::encode(contact),
            urlencoding::encode(purpose)
        )
    }

    fn representation_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    async fn fetch_token(
        &self,
        contact: &str,
        purpose: &str,
        auth_token: &str,
    ) -> Result<Option<OtpToken>, OtpError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &Self::token_path(contact, purpose), Some(auth_token), None)
            .await
            .map_err(|e| OtpError::DatabaseError(e.to_string()))?;

        match rows.into_iter().next() {
            None => Ok(None),
            Some(row) => serde_json::from_value(row)
                .map(Some)
                .map_err(|e| OtpError::DatabaseError(format!("Failed to parse otp token: {}", e))),
        }
    }

    async fn delete_token(&self, contact: &str, purpose: &str, auth_token: &str) -> Result<(), OtpError> {
        let _deleted: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &Self::token_path(contact, purpose),
                Some(auth_token),
                None,
                Some(Self::representation_headers()),
            )
            .await
            .map_err(|e| OtpError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Issue a fresh code for (contact, purpose), overwriting any previous
    /// token. Refused while the resend cooldown of an unexpired token is
    /// still running; the refusal carries the remaining wait.
    pub async fn issue(
        &self,
        contact: &str,
        purpose: &str,
        auth_token: &str,
    ) -> Result<IssuedOtp, OtpError> {
        let now = Utc::now();

        if let Some(existing) = self.fetch_token(contact, purpose, auth_token).await? {
            if existing.expires_at > now {
                let elapsed = (now - existing.last_sent_at).num_seconds();
                let remaining = self.policy.resend_cooldown_seconds - elapsed;
                if remaining > 0 {
                    debug!("Issue refused for {}: cooldown has {}s left", contact, remaining);
                    return Err(OtpError::CooldownActive { remaining_seconds: remaining });
                }
            }
        }

        let code = generate_numeric_code(self.policy.code_length);
        let expires_at = now + Duration::minutes(self.policy.ttl_minutes);

        let row = json!({
            "contact": contact,
            "purpose": purpose,
            "code_hash": code_hash(&self.hash_secret, contact, purpose, &code),
            "expires_at": expires_at.to_rfc3339(),
            "attempts": 0,
            "last_sent_at": now.to_rfc3339()
        });

        let mut headers = HeaderMap::new();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=merge-duplicates,return=representation"),
        );

        let _upserted: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/otp_tokens?on_conflict=contact,purpose",
                Some(auth_token),
                Some(row),
                Some(headers),
            )
            .await
            .map_err(|e| OtpError::DatabaseError(e.to_string()))?;

        info!("Issued {} code for contact {}", purpose, contact);
        Ok(IssuedOtp { code, expires_at })
    }

    /// Check a candidate code. The token is consumed on success, on expiry,
    /// and on hitting the attempt ceiling.
    pub async fn verify(
        &self,
        contact: &str,
        purpose: &str,
        candidate: &str,
        auth_token: &str,
    ) -> Result<VerifyOutcome, OtpError> {
        let now = Utc::now();

        let Some(token) = self.fetch_token(contact, purpose, auth_token).await? else {
            return Ok(VerifyOutcome::NotFound);
        };

        if token.expires_at <= now {
            debug!("Token for {} expired at {}", contact, token.expires_at);
            self.delete_token(contact, purpose, auth_token).await?;
            return Ok(VerifyOutcome::Expired);
        }

        if !hash_matches(&self.hash_secret, contact, purpose, candidate, &token.code_hash) {
            let attempts = token.attempts + 1;

            if attempts >= self.policy.max_attempts {
                warn!("Attempt ceiling reached for contact {}", contact);
                self.delete_token(contact, purpose, auth_token).await?;
                return Ok(VerifyOutcome::AttemptsExceeded);
            }

            let _updated: Vec<Value> = self
                .supabase
                .request_with_headers(
                    Method::PATCH,
                    &Self::token_path(contact, purpose),
                    Some(auth_token),
                    Some(json!({ "attempts": attempts })),
                    Some(Self::representation_headers()),
                )
                .await
                .map_err(|e| OtpError::DatabaseError(e.to_string()))?;

            return Ok(VerifyOutcome::Incorrect {
                remaining_attempts: self.policy.max_attempts - attempts,
            });
        }

        // Single use: a verified code can never verify again.
        self.delete_token(contact, purpose, auth_token).await?;
        info!("Verified {} code for contact {}", purpose, contact);
        Ok(VerifyOutcome::Verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_have_fixed_length() {
        for _ in 0..50 {
            let code = generate_numeric_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_is_deterministic_and_scoped() {
        let a = code_hash("secret", "a@example.com", "booking", "123456");
        let b = code_hash("secret", "a@example.com", "booking", "123456");
        assert_eq!(a, b);

        // Any change to contact, purpose, code or key changes the hash
        assert_ne!(a, code_hash("secret", "b@example.com", "booking", "123456"));
        assert_ne!(a, code_hash("secret", "a@example.com", "reset", "123456"));
        assert_ne!(a, code_hash("secret", "a@example.com", "booking", "654321"));
        assert_ne!(a, code_hash("other", "a@example.com", "booking", "123456"));
    }

    #[test]
    fn hash_matches_accepts_only_the_right_code() {
        let stored = code_hash("secret", "a@example.com", "booking", "123456");
        assert!(hash_matches("secret", "a@example.com", "booking", "123456", &stored));
        assert!(!hash_matches("secret", "a@example.com", "booking", "000000", &stored));
        assert!(!hash_matches("secret", "a@example.com", "booking", "123456", "not-base64!"));
    }
}
