use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("HMAC computation failed: {0}")]
    HmacError(String),
}

#[derive(Debug, Clone)]
pub struct BybitAuth {
    pub api_key: String,
    api_secret: String,
}

impl BybitAuth {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Build the v5 request signature.
    ///
    /// message = `{timestamp}{api_key}{recv_window}{payload}` where payload
    /// is the query string for GET and the JSON body for POST; the HMAC is
    /// hex-encoded.
    pub fn sign(
        &self,
        timestamp: &str,
        recv_window: &str,
        payload: &str,
    ) -> Result<String, AuthError> {
        let message = format!("{timestamp}{}{recv_window}{payload}", self.api_key);

        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| AuthError::HmacError(e.to_string()))?;
        mac.update(message.as_bytes());
        let digest = mac.finalize().into_bytes();

        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_produces_hex_sha256_output() {
        let auth = BybitAuth::new("key".into(), "secret".into());
        let sig = auth.sign("1700000000000", "5000", "symbol=BTCUSDT").unwrap();

        // 32-byte digest, hex-encoded
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sign_is_deterministic_and_payload_sensitive() {
        let auth = BybitAuth::new("key".into(), "secret".into());
        let a = auth.sign("1700000000000", "5000", "a=1").unwrap();
        let b = auth.sign("1700000000000", "5000", "a=1").unwrap();
        let c = auth.sign("1700000000000", "5000", "a=2").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
