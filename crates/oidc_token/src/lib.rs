//! Verification of OpenID Connect ID tokens signed with `RS256`.
//!
//! The issuer publishes its signing keys as a JWKS document; [`verify_rs256`]
//! checks the signature against the key named by the token header and then
//! validates the standard claims (`iss`, `aud`, `exp`, `nbf`, `iat`, `nonce`).

mod jwks;
mod jwt;

pub use jwks::{Jwk, Jwks};
pub use jwt::{
    Audience, DEFAULT_LEEWAY_SECONDS, Error, IdTokenClaims, IdTokenHeader, Validation,
    decode_header, sign_rs256, verify_rs256,
};
