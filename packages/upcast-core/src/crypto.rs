//! Session cipher and key wrapping for the streaming handshake.
//!
//! Audio is encrypted with AES-128 in CBC mode under a random per-session key.
//! The key itself travels to the receiver wrapped with RSA-OAEP (SHA-1) under
//! the receiver family's fixed public key.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand_core::{OsRng, RngCore};
use rsa::{BigUint, Oaep, RsaPublicKey};
use sha1::Sha1;
use thiserror::Error;

/// Cipher block and key size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Receiver public modulus, base64.
const RECEIVER_MODULUS: &str = concat!(
    "59dE8qLieItsH1WgjrcFRKj6eUWqi+bGLOX1HL3U3GhC/j0Qg90u3sG/1CUtwC",
    "5vOYvfDmFI6oSFXi5ELabWJmT2dKHzBJKa3k9ok+8t9ucRqMd6DZHJ2YCCLlDR",
    "KSKv6kDqnw4UwPdpOMXziC/AMj3Z/lUVX1G7WSHCAWKf1zNS1eLvqr+boEjXuB",
    "OitnZ/bDzPHrTOZz0Dew0uowxf/+sG+NCK3eQJVxqcaJ/vEHKIVd2M+5qL71yJ",
    "Q+87X6oV3eaYvt3zWZYD6z5vYTcrtij2VZ9Zmni/UAaHqn9JdsBWLUEpVviYnh",
    "imNVvYFZeCXg/IdTQ+x4IRdiXNv5hEew==",
);

/// Receiver public exponent, base64.
const RECEIVER_EXPONENT: &str = "AQAB";

/// Errors raised while wrapping the session key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("receiver public key is unusable: {0}")]
    PublicKey(String),

    #[error("key wrapping failed: {0}")]
    Encrypt(String),
}

/// Per-session AES state.
///
/// `chain_vector` is the CBC feedback register: it starts at `iv` and holds
/// the previous ciphertext block after every [`encrypt_block`](Self::encrypt_block).
#[derive(Clone)]
pub struct CipherContext {
    key: [u8; BLOCK_SIZE],
    iv: [u8; BLOCK_SIZE],
    chain_vector: [u8; BLOCK_SIZE],
    cipher: Aes128,
}

impl CipherContext {
    /// Creates a context with a fresh random key and IV.
    pub fn generate() -> Self {
        let mut key = [0u8; BLOCK_SIZE];
        let mut iv = [0u8; BLOCK_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self::from_parts(key, iv)
    }

    /// Creates a context from a known key and IV.
    pub fn from_parts(key: [u8; BLOCK_SIZE], iv: [u8; BLOCK_SIZE]) -> Self {
        Self {
            key,
            iv,
            chain_vector: iv,
            cipher: Aes128::new(GenericArray::from_slice(&key)),
        }
    }

    pub fn key(&self) -> &[u8; BLOCK_SIZE] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; BLOCK_SIZE] {
        &self.iv
    }

    pub fn chain_vector(&self) -> &[u8; BLOCK_SIZE] {
        &self.chain_vector
    }

    /// Restarts chaining from the IV.
    pub fn reset(&mut self) {
        self.chain_vector = self.iv;
    }

    /// One CBC step: XOR with the chain vector, encrypt, feed back.
    pub fn encrypt_block(&mut self, block: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
        let mut buf: aes::Block = GenericArray::clone_from_slice(&block);
        for (b, c) in buf.iter_mut().zip(self.chain_vector.iter()) {
            *b ^= c;
        }
        self.cipher.encrypt_block(&mut buf);
        self.chain_vector.copy_from_slice(&buf);
        self.chain_vector
    }

    /// Encrypts every full block of `data` in place, continuing the chain.
    ///
    /// A trailing partial block is left as plaintext. Returns the number of
    /// bytes encrypted.
    pub fn encrypt_stream(&mut self, data: &mut [u8]) -> usize {
        let mut done = 0;
        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(chunk);
            chunk.copy_from_slice(&self.encrypt_block(block));
            done += BLOCK_SIZE;
        }
        done
    }

    /// Encrypts one audio packet: the chain restarts at the IV first.
    pub fn encrypt_packet(&mut self, data: &mut [u8]) -> usize {
        self.reset();
        self.encrypt_stream(data)
    }

    /// Wraps this context's key for the receiver.
    pub fn wrapped_key(&self) -> Result<Vec<u8>, CryptoError> {
        wrap_key(&self.key)
    }
}

impl std::fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherContext").finish_non_exhaustive()
    }
}

fn receiver_public_key() -> Result<RsaPublicKey, CryptoError> {
    let n = STANDARD
        .decode(RECEIVER_MODULUS)
        .map_err(|e| CryptoError::PublicKey(e.to_string()))?;
    let e = STANDARD
        .decode(RECEIVER_EXPONENT)
        .map_err(|e| CryptoError::PublicKey(e.to_string()))?;
    RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
        .map_err(|e| CryptoError::PublicKey(e.to_string()))
}

/// Encrypts `key` for the receiver with RSA-OAEP (SHA-1).
pub fn wrap_key(key: &[u8; BLOCK_SIZE]) -> Result<Vec<u8>, CryptoError> {
    let public = receiver_public_key()?;
    public
        .encrypt(&mut OsRng, Oaep::new::<Sha1>(), key)
        .map_err(|e| CryptoError::Encrypt(e.to_string()))
}

/// Random bytes for the `Apple-Challenge` header.
pub fn challenge() -> [u8; BLOCK_SIZE] {
    let mut bytes = [0u8; BLOCK_SIZE];
    OsRng.fill_bytes(&mut bytes);
    bytes
}
