// src/signing.rs

//! Manifest signature verification
//!
//! Every install is gated by an ed25519 signature over the SHA-256 digest of
//! the manifest bytes. Keys and tokens travel as base64 strings; the signing
//! side lives in the release tooling, the verifying side runs on-device
//! before any state is mutated. Verification fails closed: a token or key
//! that does not parse is a verification failure, not a pass.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

/// Decode a base64 string into an exact-length byte array
fn decode_exact<const N: usize>(input: &str, what: &str) -> Result<[u8; N]> {
    let bytes = BASE64
        .decode(input)
        .map_err(|e| Error::SignatureVerification(format!("invalid base64 {}: {}", what, e)))?;
    bytes.try_into().map_err(|_| {
        Error::SignatureVerification(format!("{} must decode to {} bytes", what, N))
    })
}

/// Verify a signed token against manifest bytes and a public key
///
/// The token must be an ed25519 signature over the SHA-256 digest of the
/// manifest bytes, issued by the holder of the matching secret key.
pub fn verify_manifest(manifest: &[u8], signed_token: &str, public_key: &str) -> Result<()> {
    let key_bytes: [u8; 32] = decode_exact(public_key, "public key")?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| Error::SignatureVerification(format!("invalid public key: {}", e)))?;

    let sig_bytes: [u8; 64] = decode_exact(signed_token, "signed token")?;
    let signature = Signature::from_bytes(&sig_bytes);

    let digest = Sha256::digest(manifest);
    verifying_key
        .verify(&digest, &signature)
        .map_err(|_| Error::SignatureVerification("digest mismatch".to_string()))
}

/// Sign manifest bytes with a base64 secret key, returning the signed token
///
/// Counterpart of [`verify_manifest`], used by release tooling and tests.
pub fn sign_manifest(manifest: &[u8], secret_key: &str) -> Result<String> {
    let key_bytes: [u8; 32] = decode_exact(secret_key, "secret key")?;
    let signing_key = SigningKey::from_bytes(&key_bytes);

    let digest = Sha256::digest(manifest);
    let signature = signing_key.sign(&digest);
    Ok(BASE64.encode(signature.to_bytes()))
}

/// Generate a fresh keypair, returned as (secret, public) base64 strings
pub fn generate_keypair() -> (String, String) {
    let signing_key = SigningKey::generate(&mut rand_core::OsRng);
    (
        BASE64.encode(signing_key.to_bytes()),
        BASE64.encode(signing_key.verifying_key().to_bytes()),
    )
}
