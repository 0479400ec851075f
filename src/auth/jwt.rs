use anyhow::Context;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::config::JwtConfig;

/// What a token may be used for. Carried as the `kind` claim.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Verification,
    Reset,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user email
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
}

/// Signing and verification material plus per-kind lifetimes.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    verification_ttl: Duration,
    reset_ttl: Duration,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> anyhow::Result<Self> {
        cfg.check_lifetimes()?;
        Ok(Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            algorithm: cfg.algorithm()?,
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::minutes(cfg.access_ttl_minutes),
            refresh_ttl: Duration::days(cfg.refresh_ttl_days),
            verification_ttl: Duration::hours(cfg.verification_ttl_hours),
            reset_ttl: Duration::minutes(cfg.reset_ttl_minutes),
        })
    }

    fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
            TokenKind::Verification => self.verification_ttl,
            TokenKind::Reset => self.reset_ttl,
        }
    }

    pub(crate) fn sign_with_expiry(
        &self,
        email: &str,
        kind: TokenKind,
        exp: OffsetDateTime,
    ) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: email.to_string(),
            iat: now.unix_timestamp().max(0) as usize,
            exp: exp.unix_timestamp().max(0) as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding)?;
        debug!(kind = ?kind, "jwt signed");
        Ok(token)
    }

    fn sign(&self, email: &str, kind: TokenKind) -> anyhow::Result<String> {
        let exp = OffsetDateTime::now_utc()
            .checked_add(self.ttl(kind))
            .with_context(|| format!("{:?} token expiry out of range", kind))?;
        self.sign_with_expiry(email, kind, exp)
    }

    pub fn sign_access(&self, email: &str) -> anyhow::Result<String> {
        self.sign(email, TokenKind::Access)
    }
    pub fn sign_refresh(&self, email: &str) -> anyhow::Result<String> {
        self.sign(email, TokenKind::Refresh)
    }
    pub fn sign_verification(&self, email: &str) -> anyhow::Result<String> {
        self.sign(email, TokenKind::Verification)
    }
    pub fn sign_reset(&self, email: &str) -> anyhow::Result<String> {
        self.sign(email, TokenKind::Reset)
    }

    /// Signature, issuer, audience and expiry check, any kind.
    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }

    /// Like [`JwtKeys::verify`] but rejects tokens minted for another purpose.
    pub fn verify_kind(&self, token: &str, kind: TokenKind) -> anyhow::Result<String> {
        let claims = self.verify(token)?;
        if claims.kind != kind {
            anyhow::bail!("expected {:?} token, got {:?}", kind, claims.kind);
        }
        Ok(claims.sub)
    }

    /// New access token for the subject of a live access or refresh token.
    /// The presented token keeps its own expiry.
    pub fn refresh(&self, token: &str) -> anyhow::Result<String> {
        let claims = self.verify(token)?;
        match claims.kind {
            TokenKind::Access | TokenKind::Refresh => self.sign_access(&claims.sub),
            other => anyhow::bail!("{:?} token cannot be refreshed", other),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config(secret: &str, issuer: &str, audience: &str) -> JwtConfig {
    JwtConfig {
        secret: secret.into(),
        algorithm: "HS256".into(),
        issuer: issuer.into(),
        audience: audience.into(),
        access_ttl_minutes: 5,
        refresh_ttl_days: 1,
        verification_ttl_hours: 1,
        reset_ttl_minutes: 10,
    }
}
