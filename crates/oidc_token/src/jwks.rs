use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::jwt::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Parse a JWKS from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not valid JSON or doesn't match the expected JWKS shape.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Find a key by `kid` (Key ID).
    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    /// Pick the verification key for a token header.
    ///
    /// Issuers with a single signing key often omit `kid`; in that case the only
    /// RSA key in the set is used.
    #[must_use]
    pub fn select(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.find_by_kid(kid),
            None => {
                let mut rsa_keys = self.keys.iter().filter(|k| k.kty == "RSA");
                let first = rsa_keys.next()?;
                if rsa_keys.next().is_some() {
                    None
                } else {
                    Some(first)
                }
            }
        }
    }

    /// Build a JWKS from an RSA private key (PEM or DER).
    ///
    /// The public key is derived from the private key. Used by test issuers.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be parsed.
    pub fn from_rsa_private_key_pem_or_der(
        private_key_pem_or_der: &[u8],
        kid: impl Into<String>,
    ) -> Result<Self, Error> {
        let private_key = decode_private_key(private_key_pem_or_der)?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            keys: vec![Jwk::from_rsa_public_key(&public_key, kid)],
        })
    }
}

/// A single JSON Web Key. Only RSA members are modelled; other key types
/// deserialize with empty `n`/`e` and are skipped during selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl Jwk {
    #[must_use]
    pub fn from_rsa_public_key(public_key: &RsaPublicKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            kid: Some(kid.into()),
            n: Some(Base64UrlUnpadded::encode_string(&public_key.n().to_bytes_be())),
            e: Some(Base64UrlUnpadded::encode_string(&public_key.e().to_bytes_be())),
        }
    }

    /// Convert this JWK to an `RsaPublicKey`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not RSA, the base64url values cannot be
    /// decoded, or the RSA key is invalid.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, Error> {
        if self.kty != "RSA" {
            return Err(Error::InvalidKeyType);
        }
        if self.key_use.as_deref().is_some_and(|u| u != "sig") {
            return Err(Error::InvalidKeyType);
        }
        let (Some(n), Some(e)) = (self.n.as_deref(), self.e.as_deref()) else {
            return Err(Error::InvalidKeyType);
        };
        let n_bytes = Base64UrlUnpadded::decode_vec(n).map_err(|_| Error::Base64)?;
        let e_bytes = Base64UrlUnpadded::decode_vec(e).map_err(|_| Error::Base64)?;
        let n = BigUint::from_bytes_be(&n_bytes);
        let e = BigUint::from_bytes_be(&e_bytes);
        RsaPublicKey::new(n, e).map_err(Error::Rsa)
    }
}

pub(crate) fn decode_private_key(pem_or_der: &[u8]) -> Result<RsaPrivateKey, Error> {
    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| Error::KeyParse)?;
        if let Ok(k) = RsaPrivateKey::from_pkcs8_pem(s) {
            return Ok(k);
        }
        if let Ok(k) = RsaPrivateKey::from_pkcs1_pem(s) {
            return Ok(k);
        }
        return Err(Error::KeyParse);
    }

    if let Ok(k) = RsaPrivateKey::from_pkcs8_der(pem_or_der) {
        return Ok(k);
    }
    if let Ok(k) = RsaPrivateKey::from_pkcs1_der(pem_or_der) {
        return Ok(k);
    }
    Err(Error::KeyParse)
}
