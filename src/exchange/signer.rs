//! Request signing capability.
//!
//! Clients receive a [`Signer`] at construction and sign every mutating
//! request with it; the resulting signature doubles as the request's [`TxRef`].

use super::types::{TraderId, TxRef};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Capability to authorize requests on behalf of one trader.
pub trait Signer: Send + Sync {
    /// Identity whose requests this signer authorizes.
    fn trader(&self) -> TraderId;

    /// Sign an opaque request payload, returning a hex signature.
    fn sign(&self, message: &[u8]) -> String;
}

/// HMAC-SHA256 signer backed by an in-memory secret.
pub struct LocalSigner {
    trader: TraderId,
    secret: Vec<u8>,
}

impl LocalSigner {
    pub fn new(trader: TraderId, secret: impl AsRef<[u8]>) -> Self {
        Self {
            trader,
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Check a signature produced by [`Signer::sign`].
    pub fn verify(&self, message: &[u8], signature: &str) -> bool {
        let Ok(raw) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return false;
        };
        mac.update(message);
        mac.verify_slice(&raw).is_ok()
    }
}

impl Signer for LocalSigner {
    fn trader(&self) -> TraderId {
        self.trader.clone()
    }

    fn sign(&self, message: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("trader", &self.trader)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Build the canonical payload for a request and sign it.
pub fn sign_request(
    signer: &dyn Signer,
    operation: &str,
    fields: &[(&str, String)],
    nonce: u64,
) -> TxRef {
    let mut payload = format!("op={}&trader={}", operation, signer.trader());
    for (key, value) in fields {
        payload.push('&');
        payload.push_str(key);
        payload.push('=');
        payload.push_str(value);
    }
    payload.push_str(&format!("&nonce={}", nonce));
    TxRef::new(signer.sign(payload.as_bytes()))
}
