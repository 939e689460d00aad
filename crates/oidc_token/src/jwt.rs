use crate::jwks::{Jwks, decode_private_key};
use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::errors::Error as RsaError;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// Clock skew tolerated on `exp`, `nbf` and `iat`.
pub const DEFAULT_LEEWAY_SECONDS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdTokenHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// `aud` may be a single string or an array of strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::Single(aud) => aud == client_id,
            Self::Multiple(auds) => auds.iter().any(|aud| aud == client_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

/// Expected values for a single verification.
#[derive(Debug, Clone, Copy)]
pub struct Validation<'a> {
    pub issuer: &'a str,
    pub client_id: &'a str,
    pub nonce: &'a str,
    pub now_unix_seconds: i64,
    pub leeway_seconds: i64,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("invalid key type")]
    InvalidKeyType,
    #[error("failed to parse RSA key")]
    KeyParse,
    #[error("rsa error")]
    Rsa(#[from] RsaError),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("token issued in the future")]
    IssuedInFuture,
    #[error("nonce mismatch")]
    NonceMismatch,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn split_token(token: &str) -> Result<(&str, &str, &str), Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() || header_b64.is_empty() || claims_b64.is_empty() {
        return Err(Error::TokenFormat);
    }
    Ok((header_b64, claims_b64, sig_b64))
}

/// Decode the header without verifying anything. Callers use the `kid` to
/// decide whether their cached JWKS needs a refresh.
///
/// # Errors
///
/// Returns an error if the token is malformed.
pub fn decode_header(token: &str) -> Result<IdTokenHeader, Error> {
    let (header_b64, _, _) = split_token(token)?;
    b64d_json(header_b64)
}

/// Create an RS256 signed token. Used by test issuers.
///
/// # Errors
///
/// Returns an error if the private key cannot be parsed or the claims cannot be encoded.
pub fn sign_rs256(
    private_key_pem_or_der: &[u8],
    kid: impl Into<String>,
    claims: &IdTokenClaims,
) -> Result<String, Error> {
    let header = IdTokenHeader {
        alg: "RS256".to_string(),
        typ: Some("JWT".to_string()),
        kid: Some(kid.into()),
    };
    let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(claims)?);

    let private_key = decode_private_key(private_key_pem_or_der)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify an RS256 ID token and return its decoded claims.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - no key in `jwks` matches the header,
/// - the signature is invalid,
/// - the claims fail validation (`iss`, `aud`, `exp`, `nbf`, `iat`, `nonce`).
pub fn verify_rs256(
    token: &str,
    jwks: &Jwks,
    validation: &Validation<'_>,
) -> Result<IdTokenClaims, Error> {
    let (header_b64, claims_b64, sig_b64) = split_token(token)?;

    let header: IdTokenHeader = b64d_json(header_b64)?;
    if header.alg != "RS256" {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let jwk = jwks
        .select(header.kid.as_deref())
        .ok_or_else(|| Error::UnknownKid(header.kid.clone().unwrap_or_default()))?;

    let public_key = jwk.to_rsa_public_key()?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
    let signature =
        Signature::try_from(signature_bytes.as_slice()).map_err(|_| Error::InvalidSignature)?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| Error::InvalidSignature)?;

    let claims: IdTokenClaims = b64d_json(claims_b64)?;
    validate_claims(&claims, validation)?;

    Ok(claims)
}

fn validate_claims(claims: &IdTokenClaims, validation: &Validation<'_>) -> Result<(), Error> {
    let now = validation.now_unix_seconds;
    let leeway = validation.leeway_seconds;

    if claims.iss != validation.issuer {
        return Err(Error::InvalidIssuer);
    }
    if !claims.aud.contains(validation.client_id) {
        return Err(Error::InvalidAudience);
    }
    if claims.exp.saturating_add(leeway) <= now {
        return Err(Error::Expired);
    }
    if claims.nbf.is_some_and(|nbf| nbf.saturating_sub(leeway) > now) {
        return Err(Error::NotYetValid);
    }
    if claims.iat.saturating_sub(leeway) > now {
        return Err(Error::IssuedInFuture);
    }
    if claims.nonce.as_deref() != Some(validation.nonce) {
        return Err(Error::NonceMismatch);
    }
    Ok(())
}
