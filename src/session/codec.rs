//! Compact `header.payload.signature` encoding, HMAC-SHA256 signed.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::claims::Claims;
use super::error::SessionError;

type HmacSha256 = Hmac<Sha256>;

const ALG: &str = "HS256";

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Signs and verifies encoded claims with one shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, SessionError> {
        let mac = HmacSha256::new_from_slice(secret.as_ref())
            .map_err(|e| SessionError::Encoding(e.to_string()))?;
        Ok(Self { mac })
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, SessionError> {
        let header = Header {
            alg: ALG.to_string(),
            typ: "JWT".to_string(),
        };
        let header = serde_json::to_vec(&header).map_err(|e| SessionError::Encoding(e.to_string()))?;
        let payload = serde_json::to_vec(claims).map_err(|e| SessionError::Encoding(e.to_string()))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes()));

        Ok(format!("{signing_input}.{signature}"))
    }

    /// Check structure and signature, then decode the claims.
    ///
    /// Expiry and type are left to the caller.
    pub fn decode(&self, token: &str) -> Result<Claims, SessionError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SessionError::Malformed);
        };

        let header = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| SessionError::Malformed)?;
        let header: Header = serde_json::from_slice(&header).map_err(|_| SessionError::Malformed)?;
        if header.alg != ALG {
            return Err(SessionError::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| SessionError::Malformed)?;
        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        let expected = self.sign(signing_input.as_bytes());
        if !bool::from(expected.ct_eq(&signature)) {
            return Err(SessionError::InvalidSignature);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| SessionError::Malformed)?;
        serde_json::from_slice(&payload).map_err(|_| SessionError::Malformed)
    }

    fn sign(&self, input: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }
}
