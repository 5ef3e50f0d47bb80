//! Stream credentials
//!
//! Short-lived HS256 JWTs scoped to a single job. The `sub` claim is the job
//! id, so a credential issued for one job cannot open another job's stream.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use spool_core::domain::job::JobId;
use spool_core::dto::job::StreamCredential;
use uuid::Uuid;

/// Claims carried by a stream credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamClaims {
    /// Job the credential grants access to
    pub sub: String,
    /// Expiration time (UTC Unix timestamp)
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp)
    pub iat: i64,
    /// Unique token identifier for audit
    pub jti: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CredentialError {
    #[error("credential is invalid or expired")]
    Invalid,

    #[error("credential was issued for another job")]
    WrongJob,

    #[error("failed to sign credential: {0}")]
    Signing(String),
}

/// Issues and verifies stream credentials
#[derive(Clone)]
pub struct CredentialIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl CredentialIssuer {
    pub fn new(secret: &str, ttl: std::time::Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::minutes(10)),
        }
    }

    pub fn issue(&self, job_id: &JobId) -> Result<StreamCredential, CredentialError> {
        self.issue_at(job_id, Utc::now())
    }

    /// Issue a credential as if the current time were `now`
    pub fn issue_at(
        &self,
        job_id: &JobId,
        now: DateTime<Utc>,
    ) -> Result<StreamCredential, CredentialError> {
        let expires_at = now + self.ttl;
        let claims = StreamClaims {
            sub: job_id.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| CredentialError::Signing(e.to_string()))?;

        Ok(StreamCredential {
            job_id: job_id.clone(),
            token,
            // Second precision, matching the `exp` claim
            expires_at: timestamp(claims.exp),
        })
    }

    /// Verify `token` for `job_id`, returning its expiry
    pub fn verify(&self, job_id: &JobId, token: &str) -> Result<DateTime<Utc>, CredentialError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<StreamClaims>(token, &self.decoding, &validation)
            .map_err(|_| CredentialError::Invalid)?;

        if data.claims.sub != job_id.as_str() {
            return Err(CredentialError::WrongJob);
        }

        Ok(timestamp(data.claims.exp))
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or(DateTime::<Utc>::MAX_UTC)
}
