//! Random `state`, `nonce` and PKCE material.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use thiserror::Error;

const RANDOM_BYTES: usize = 32;
const COMPARE_KEY: &[u8] = b"doorgate.oidc.compare";

#[derive(Debug, Error)]
#[error("os random source failed")]
pub struct EntropyError;

/// 32 random bytes, base64url without padding (43 characters).
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn random_token() -> Result<String, EntropyError> {
    let mut bytes = [0u8; RANDOM_BYTES];
    OsRng.try_fill_bytes(&mut bytes).map_err(|_| EntropyError)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// `S256` code challenge for `verifier`.
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Compare a presented token with the expected one in constant time.
///
/// Both sides are reduced to HMAC tags first; tag equality does not
/// short-circuit on the first differing byte.
#[must_use]
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    let tag = |token: &str| {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(COMPARE_KEY).ok()?;
        mac.update(token.as_bytes());
        Some(mac.finalize())
    };
    match (tag(expected), tag(presented)) {
        (Some(expected), Some(presented)) => expected == presented,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_length_is_within_rfc_bounds() -> Result<(), EntropyError> {
        let verifier = random_token()?;
        assert_eq!(verifier.len(), 43);
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(verifier, random_token()?);
        Ok(())
    }

    #[test]
    fn challenge_matches_rfc7636_example() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn tokens_match_only_identical_values() -> Result<(), EntropyError> {
        let state = random_token()?;
        assert!(tokens_match(&state, &state.clone()));
        assert!(!tokens_match(&state, &random_token()?));
        assert!(!tokens_match(&state, &state[..42]));
        assert!(!tokens_match(&state, ""));
        Ok(())
    }
}
