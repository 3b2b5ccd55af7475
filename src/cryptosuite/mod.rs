use ::crypto::digest::Digest;
use ::crypto::sha2::Sha256;
use sawtooth_sdk::signing::secp256k1::{Secp256k1Context, Secp256k1PrivateKey, Secp256k1PublicKey};
use sawtooth_sdk::signing::Context;

use crate::error::{Error, Result};

/// Hashing and signing primitives used to build and check Fabric messages.
///
/// Key and certificate material is passed around as the raw bytes read from
/// the MSP directories; how those bytes are interpreted is up to the suite.
pub trait CryptoSuite: Send + Sync {
    fn hash(&self, message: &[u8]) -> Vec<u8>;

    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Vec<u8>>;

    fn verify(&self, certificate: &[u8], signature: &[u8], message: &[u8]) -> Result<bool>;

    /// Returns `(private_key, certificate)` encoded the way they are stored on disk.
    fn new_key_pair(&self) -> Result<(Vec<u8>, Vec<u8>)>;
}

// Keys are stored as hex text, the certificate is the hex encoded public key.
#[derive(Default)]
pub struct Secp256k1Suite;

impl Secp256k1Suite {
    pub fn new() -> Secp256k1Suite {
        Secp256k1Suite
    }
}

fn key_text(material: &[u8]) -> Result<&str> {
    std::str::from_utf8(material)
        .map(str::trim)
        .map_err(|err| Error::CryptoError(format!("key material is not text: {}", err)))
}

impl CryptoSuite for Secp256k1Suite {
    fn hash(&self, message: &[u8]) -> Vec<u8> {
        sha256(message)
    }

    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        let context = Secp256k1Context::new();
        let key = Secp256k1PrivateKey::from_hex(key_text(private_key)?)?;
        let signature = context.sign(message, &key)?;
        Ok(hex::decode(signature)?)
    }

    fn verify(&self, certificate: &[u8], signature: &[u8], message: &[u8]) -> Result<bool> {
        let context = Secp256k1Context::new();
        let key = Secp256k1PublicKey::from_hex(key_text(certificate)?)?;
        Ok(context.verify(&hex::encode(signature), message, &key)?)
    }

    fn new_key_pair(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let context = Secp256k1Context::new();
        let private_key = context.new_random_private_key()?;
        let public_key = context.get_public_key(private_key.as_ref())?;
        Ok((
            private_key.as_hex().into_bytes(),
            public_key.as_hex().into_bytes(),
        ))
    }
}

pub fn sha256(message: &[u8]) -> Vec<u8> {
    let mut sha = Sha256::new();
    sha.input(message);
    let mut out = vec![0u8; sha.output_bytes()];
    sha.result(&mut out);
    out
}
