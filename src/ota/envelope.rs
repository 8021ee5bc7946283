//! Firmware Envelope Codec
//!
//! Encrypts and decrypts whole firmware images with AES-256-CBC under a
//! pre-shared key. Artifact layout: `[16-byte IV][PKCS#7-padded ciphertext]`.
//! Padding validation on decrypt is the integrity signal: a wrong key or a
//! tampered artifact almost always surfaces as `PaddingInvalid`.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256 key length in bytes.
pub const KEY_SIZE: usize = 32;

/// AES block / IV length in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Envelope codec errors
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("malformed artifact: need a 16-byte IV followed by a positive multiple of 16 ciphertext bytes")]
    MalformedArtifact,
    #[error("padding invalid: wrong key or corrupted artifact")]
    PaddingInvalid,
    #[error("refusing known-weak key: every byte is 0x{0:02x}")]
    InsecureKey(u8),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// The 32-byte pre-shared update key.
///
/// The codec performs no derivation or storage; the key is provisioned out
/// of band and injected at startup. Debug output never prints key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct OtaKey([u8; KEY_SIZE]);

impl OtaKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a hex-encoded key (64 hex digits).
    pub fn from_hex(s: &str) -> Result<Self, EnvelopeError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| EnvelopeError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| {
                EnvelopeError::InvalidKey(format!("expected {} bytes, got {}", KEY_SIZE, v.len()))
            })?;
        Ok(Self(bytes))
    }

    /// Hex-encode the key for provisioning files.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Generate a fresh uniformly random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Reject the all-zero key and other single-repeated-byte keys.
    ///
    /// The reference tooling shipped with a hardcoded zero key; a device
    /// must fail loudly at startup rather than run with it.
    pub fn ensure_strong(&self) -> Result<(), EnvelopeError> {
        let first = self.0[0];
        if self.0.iter().all(|&b| b == first) {
            return Err(EnvelopeError::InsecureKey(first));
        }
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for OtaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OtaKey(..)")
    }
}

/// Encrypt a firmware image into a release artifact.
///
/// Generates a fresh random IV per call and returns `IV || ciphertext`.
/// Empty input is legal and still produces one full padding block.
pub fn encrypt(plaintext: &[u8], key: &OtaKey) -> Vec<u8> {
    let mut iv = [0u8; BLOCK_SIZE];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(&key.0.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut artifact = Vec::with_capacity(BLOCK_SIZE + ciphertext.len());
    artifact.extend_from_slice(&iv);
    artifact.extend_from_slice(&ciphertext);
    artifact
}

/// Decrypt a release artifact back into the firmware image.
pub fn decrypt(artifact: &[u8], key: &OtaKey) -> Result<Vec<u8>, EnvelopeError> {
    // Need the IV plus at least one ciphertext block.
    if artifact.len() < BLOCK_SIZE * 2 {
        return Err(EnvelopeError::MalformedArtifact);
    }
    let (iv, ciphertext) = artifact.split_at(BLOCK_SIZE);
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(EnvelopeError::MalformedArtifact);
    }

    let mut iv_block = [0u8; BLOCK_SIZE];
    iv_block.copy_from_slice(iv);

    Aes256CbcDec::new(&key.0.into(), &iv_block.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| EnvelopeError::PaddingInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> OtaKey {
        let mut bytes = [0u8; KEY_SIZE];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        OtaKey::from_bytes(bytes)
    }

    #[test]
    fn test_round_trip() {
        let key = test_key();
        for len in [0usize, 1, 15, 16, 17, 1024, 4093] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let artifact = encrypt(&plaintext, &key);
            assert_eq!(artifact.len() % BLOCK_SIZE, 0);
            assert!(artifact.len() >= BLOCK_SIZE * 2);
            let recovered = decrypt(&artifact, &key).unwrap();
            assert_eq!(recovered, plaintext);
        }
    }

    #[test]
    fn test_empty_plaintext_produces_one_padding_block() {
        let artifact = encrypt(&[], &test_key());
        assert_eq!(artifact.len(), BLOCK_SIZE * 2);
        assert_eq!(decrypt(&artifact, &test_key()).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_iv_is_fresh_per_encryption() {
        let key = test_key();
        let a = encrypt(b"same input", &key);
        let b = encrypt(b"same input", &key);
        assert_ne!(a[..BLOCK_SIZE], b[..BLOCK_SIZE]);
        assert_ne!(a[BLOCK_SIZE..], b[BLOCK_SIZE..]);
    }

    #[test]
    fn test_malformed_artifacts_rejected() {
        let key = test_key();
        assert!(matches!(decrypt(&[], &key), Err(EnvelopeError::MalformedArtifact)));
        assert!(matches!(decrypt(&[0u8; 15], &key), Err(EnvelopeError::MalformedArtifact)));
        // IV but no ciphertext
        assert!(matches!(decrypt(&[0u8; 16], &key), Err(EnvelopeError::MalformedArtifact)));
        // Post-IV length not a multiple of 16
        assert!(matches!(decrypt(&[0u8; 37], &key), Err(EnvelopeError::MalformedArtifact)));
    }

    #[test]
    fn test_tampering_is_detected() {
        let key = test_key();
        let plaintext: Vec<u8> = (0..2048).map(|i| (i * 7 % 256) as u8).collect();
        let artifact = encrypt(&plaintext, &key);

        let mut padding_failures = 0;
        let trials = 64;
        for trial in 0..trials {
            let mut tampered = artifact.clone();
            // Flip a single bit somewhere in the ciphertext region.
            let bit = (trial * 131 + 17) % ((artifact.len() - BLOCK_SIZE) * 8);
            let byte = BLOCK_SIZE + bit / 8;
            tampered[byte] ^= 1 << (bit % 8);

            match decrypt(&tampered, &key) {
                Err(EnvelopeError::PaddingInvalid) => padding_failures += 1,
                Err(e) => panic!("unexpected error: {e}"),
                // CBC bit-flips can survive unpadding, but never reproduce
                // the original image.
                Ok(recovered) => assert_ne!(recovered, plaintext),
            }
        }
        assert!(padding_failures >= trials - 4, "only {padding_failures}/{trials} trials failed padding");
    }

    #[test]
    fn test_wrong_key_never_recovers_plaintext() {
        let plaintext = b"firmware image bytes".to_vec();
        let artifact = encrypt(&plaintext, &test_key());

        for _ in 0..20 {
            let wrong = OtaKey::generate();
            match decrypt(&artifact, &wrong) {
                Err(EnvelopeError::PaddingInvalid) => {}
                Err(e) => panic!("unexpected error: {e}"),
                Ok(recovered) => assert_ne!(recovered, plaintext),
            }
        }
    }

    #[test]
    fn test_key_hex_round_trip() {
        let key = OtaKey::generate();
        let parsed = OtaKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_key_hex_rejects_bad_input() {
        assert!(matches!(OtaKey::from_hex("zz"), Err(EnvelopeError::InvalidKey(_))));
        assert!(matches!(OtaKey::from_hex("00ff"), Err(EnvelopeError::InvalidKey(_))));
    }

    #[test]
    fn test_weak_keys_rejected() {
        let zero = OtaKey::from_bytes([0u8; KEY_SIZE]);
        assert!(matches!(zero.ensure_strong(), Err(EnvelopeError::InsecureKey(0))));

        let repeated = OtaKey::from_bytes([0xab; KEY_SIZE]);
        assert!(matches!(repeated.ensure_strong(), Err(EnvelopeError::InsecureKey(0xab))));

        assert!(test_key().ensure_strong().is_ok());
        assert!(OtaKey::generate().ensure_strong().is_ok());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = OtaKey::generate();
        assert_eq!(format!("{:?}", key), "OtaKey(..)");
    }
}
