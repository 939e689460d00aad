//! Signed, expiring capsules for client-held state.
//!
//! A capsule is `base64url(json envelope) "." base64url(hmac-sha256)`. The
//! envelope binds a purpose string and an expiry to the payload so a capsule
//! minted for one use (say a block token) is never accepted for another (a
//! session cookie).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Shortest key accepted from configuration.
pub const MIN_KEY_BYTES: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapsuleError {
    #[error("malformed capsule")]
    Malformed,
    #[error("capsule signature mismatch")]
    BadSignature,
    #[error("capsule purpose mismatch")]
    WrongPurpose,
    #[error("capsule expired")]
    Expired,
    #[error("capsule signing key must be at least {MIN_KEY_BYTES} bytes")]
    WeakKey,
    #[error("failed to encode capsule")]
    Encode,
    #[error("failed to generate capsule key")]
    Rng,
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "p")]
    purpose: String,
    exp: i64,
    #[serde(rename = "d")]
    payload: T,
}

pub struct CapsuleSealer {
    key: SecretSlice<u8>,
}

impl std::fmt::Debug for CapsuleSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapsuleSealer").finish_non_exhaustive()
    }
}

impl CapsuleSealer {
    /// Build from configured key material.
    ///
    /// # Errors
    /// Returns `WeakKey` if the key is shorter than [`MIN_KEY_BYTES`].
    pub fn new(key: &[u8]) -> Result<Self, CapsuleError> {
        if key.len() < MIN_KEY_BYTES {
            return Err(CapsuleError::WeakKey);
        }
        Ok(Self {
            key: SecretSlice::from(key.to_vec()),
        })
    }

    /// Build with a fresh random key. Capsules sealed by one process are then
    /// unreadable by any other.
    ///
    /// # Errors
    /// Returns `Rng` if the OS random source fails.
    pub fn random() -> Result<Self, CapsuleError> {
        let mut key = vec![0u8; MIN_KEY_BYTES];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|_| CapsuleError::Rng)?;
        Ok(Self {
            key: SecretSlice::from(key),
        })
    }

    /// Seal `payload` for `purpose`, valid until `expires_at`.
    ///
    /// # Errors
    /// Returns `Encode` if the payload cannot be serialized.
    pub fn seal<T: Serialize>(
        &self,
        purpose: &str,
        payload: &T,
        expires_at: i64,
    ) -> Result<String, CapsuleError> {
        let envelope = Envelope {
            purpose: purpose.to_string(),
            exp: expires_at,
            payload,
        };
        let json = serde_json::to_vec(&envelope).map_err(|_| CapsuleError::Encode)?;
        let body = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(body.as_bytes())?.finalize().into_bytes());
        Ok(format!("{body}.{signature}"))
    }

    /// Verify and decode a capsule.
    ///
    /// # Errors
    /// Returns an error if the capsule is malformed, the signature does not
    /// verify, it was sealed for another purpose, or it has expired.
    pub fn open<T: DeserializeOwned>(
        &self,
        purpose: &str,
        capsule: &str,
        now: i64,
    ) -> Result<T, CapsuleError> {
        let (body, signature) = capsule.split_once('.').ok_or(CapsuleError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| CapsuleError::Malformed)?;
        self.mac(body.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| CapsuleError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| CapsuleError::Malformed)?;
        let envelope: Envelope<T> =
            serde_json::from_slice(&json).map_err(|_| CapsuleError::Malformed)?;
        if envelope.purpose != purpose {
            return Err(CapsuleError::WrongPurpose);
        }
        if envelope.exp <= now {
            return Err(CapsuleError::Expired);
        }
        Ok(envelope.payload)
    }

    /// Compare two secrets without leaking where they differ.
    #[must_use]
    pub fn secrets_match(&self, expected: &str, presented: &str) -> bool {
        match (self.mac(expected.as_bytes()), self.mac(presented.as_bytes())) {
            (Ok(expected), Ok(presented)) => expected.finalize() == presented.finalize(),
            _ => false,
        }
    }

    fn mac(&self, body: &[u8]) -> Result<HmacSha256, CapsuleError> {
        let mut mac = HmacSha256::new_from_slice(self.key.expose_secret())
            .map_err(|_| CapsuleError::WeakKey)?;
        mac.update(body);
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Payload {
        sid: String,
    }

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";
    const NOW: i64 = 1_700_000_000;

    fn payload() -> Payload {
        Payload {
            sid: "abc".to_string(),
        }
    }

    #[test]
    fn opens_what_it_sealed() -> Result<(), CapsuleError> {
        let sealer = CapsuleSealer::new(KEY)?;
        let capsule = sealer.seal("session", &payload(), NOW + 60)?;
        let opened: Payload = sealer.open("session", &capsule, NOW)?;
        assert_eq!(opened, payload());
        Ok(())
    }

    #[test]
    fn secrets_match_only_identical_values() -> Result<(), CapsuleError> {
        let sealer = CapsuleSealer::new(KEY)?;
        assert!(sealer.secrets_match("hunter22", "hunter22"));
        assert!(!sealer.secrets_match("hunter22", "hunter2"));
        assert!(!sealer.secrets_match("hunter22", ""));
        Ok(())
    }

    #[test]
    fn purpose_is_enforced() -> Result<(), CapsuleError> {
        let sealer = CapsuleSealer::new(KEY)?;
        let capsule = sealer.seal("session", &payload(), NOW + 60)?;
        assert_eq!(
            sealer.open::<Payload>("block", &capsule, NOW),
            Err(CapsuleError::WrongPurpose)
        );
        Ok(())
    }

    #[test]
    fn expiry_is_enforced() -> Result<(), CapsuleError> {
        let sealer = CapsuleSealer::new(KEY)?;
        let capsule = sealer.seal("session", &payload(), NOW + 60)?;
        assert_eq!(
            sealer.open::<Payload>("session", &capsule, NOW + 60),
            Err(CapsuleError::Expired)
        );
        Ok(())
    }

    #[test]
    fn tampering_breaks_signature() -> Result<(), CapsuleError> {
        let sealer = CapsuleSealer::new(KEY)?;
        let capsule = sealer.seal("session", &payload(), NOW + 60)?;
        let (_, signature) = capsule.split_once('.').ok_or(CapsuleError::Malformed)?;

        let forged_body = URL_SAFE_NO_PAD.encode(br#"{"p":"session","exp":9999999999,"d":{"sid":"evil"}}"#);
        let forged = format!("{forged_body}.{signature}");
        assert_eq!(
            sealer.open::<Payload>("session", &forged, NOW),
            Err(CapsuleError::BadSignature)
        );
        Ok(())
    }

    #[test]
    fn other_keys_are_rejected() -> Result<(), CapsuleError> {
        let capsule = CapsuleSealer::new(KEY)?.seal("session", &payload(), NOW + 60)?;
        let other = CapsuleSealer::random()?;
        assert_eq!(
            other.open::<Payload>("session", &capsule, NOW),
            Err(CapsuleError::BadSignature)
        );
        Ok(())
    }

    #[test]
    fn garbage_is_malformed() -> Result<(), CapsuleError> {
        let sealer = CapsuleSealer::new(KEY)?;
        assert_eq!(
            sealer.open::<Payload>("session", "no-dot", NOW),
            Err(CapsuleError::Malformed)
        );
        assert_eq!(
            sealer.open::<Payload>("session", "abc.!!!", NOW),
            Err(CapsuleError::Malformed)
        );
        Ok(())
    }

    #[test]
    fn short_keys_are_refused() {
        assert!(matches!(
            CapsuleSealer::new(b"short"),
            Err(CapsuleError::WeakKey)
        ));
    }
}
