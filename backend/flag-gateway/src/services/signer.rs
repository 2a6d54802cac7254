// Signature generator - HMAC-SHA256 over the canonical parameter string
// Canonical form: keys sorted, `key=value` pairs joined by `&`

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("API secret must not be empty")]
    EmptySecret,

    #[error("Cannot sign an empty parameter set")]
    EmptyParams,

    #[error("HMAC error: {0}")]
    InvalidKey(String),
}

/// Produces origin request signatures from a parameter set and the API secret
#[derive(Clone)]
pub struct SignatureGenerator {
    secret: String,
}

impl fmt::Debug for SignatureGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureGenerator")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl SignatureGenerator {
    /// Create a signer. An empty secret is a configuration error.
    pub fn new(secret: impl Into<String>) -> Result<Self, SignerError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(SignerError::EmptySecret);
        }
        Ok(Self { secret })
    }

    /// Render parameters in canonical order: `a=1&b=2`
    pub fn canonical_string<'a, I>(params: I) -> String
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let sorted: BTreeMap<&str, &str> = params.into_iter().collect();
        sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Sign a parameter set, returning the lowercase hex digest
    pub fn sign<'a, I>(&self, params: I) -> Result<String, SignerError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let payload = Self::canonical_string(params);
        if payload.is_empty() {
            return Err(SignerError::EmptyParams);
        }

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check a hex signature against a parameter set (constant-time)
    pub fn verify<'a, I>(&self, params: I, signature: &str) -> bool
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let payload = Self::canonical_string(params);
        if payload.is_empty() {
            return false;
        }

        match self.mac() {
            Ok(mut mac) => {
                mac.update(payload.as_bytes());
                mac.verify_slice(&expected).is_ok()
            }
            Err(_) => false,
        }
    }

    fn mac(&self) -> Result<HmacSha256, SignerError> {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| SignerError::InvalidKey(e.to_string()))
    }
}
