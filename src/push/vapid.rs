use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jwt_simple::prelude::ES256KeyPair;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use std::path::Path;
use thiserror::Error;

use crate::config::VapidClaims;

/// The signing key is read once per run. A key that cannot be read is kept
/// as `Unavailable` so every encode reports the same cause instead of the
/// whole run aborting.
#[derive(Debug, Clone)]
pub enum VapidKeyStatus {
    Ready(Vec<u8>),
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct VapidCredentials {
    pub key: VapidKeyStatus,
    pub claims: VapidClaims,
}

pub fn load_vapid_key(path: &Path) -> VapidKeyStatus {
    match std::fs::read(path) {
        Ok(pem) => VapidKeyStatus::Ready(pem),
        Err(err) => VapidKeyStatus::Unavailable(format!(
            "cannot read private key {}: {err}",
            path.display()
        )),
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedVapidKeys {
    /// PKCS#8 PEM, suitable as the private key file.
    pub private_key_pem: String,
    /// Uncompressed P-256 point, base64url. Browsers use it as `applicationServerKey`.
    pub public_key: String,
}

#[derive(Debug, Error)]
pub enum KeygenError {
    #[error("failed to encode private key as PEM: {0}")]
    Pem(String),
    #[error("failed to derive public key: {0}")]
    PublicKey(#[from] web_push::WebPushError),
}

pub fn generate_vapid_keys() -> Result<GeneratedVapidKeys, KeygenError> {
    let mut rng = OsRng;
    generate_vapid_keys_with_rng(&mut rng)
}

pub(crate) fn generate_vapid_keys_with_rng<R: RngCore + CryptoRng>(
    rng: &mut R,
) -> Result<GeneratedVapidKeys, KeygenError> {
    let key_pair = generate_es256_keypair_with_rng(rng);
    let private_key_pem = key_pair
        .to_pem()
        .map_err(|err| KeygenError::Pem(err.to_string()))?;
    let raw_private_key = URL_SAFE_NO_PAD.encode(key_pair.to_bytes());
    let public_key =
        web_push::VapidSignatureBuilder::from_base64_no_sub(&raw_private_key)?.get_public_key();

    Ok(GeneratedVapidKeys {
        private_key_pem,
        public_key: URL_SAFE_NO_PAD.encode(public_key),
    })
}

fn generate_es256_keypair_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> ES256KeyPair {
    let mut key_bytes = [0u8; 32];
    loop {
        rng.fill_bytes(&mut key_bytes);
        if let Ok(key_pair) = ES256KeyPair::from_bytes(&key_bytes) {
            return key_pair;
        }
    }
}
