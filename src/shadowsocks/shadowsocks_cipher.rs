use aws_lc_rs::aead::{AES_128_GCM, AES_192_GCM, AES_256_GCM, Algorithm, CHACHA20_POLY1305};

use super::TAG_LEN;

pub const SUPPORTED_CIPHERS: &[&str] = &[
    "chacha20-ietf-poly1305",
    "aes-256-gcm",
    "aes-192-gcm",
    "aes-128-gcm",
];

#[derive(Clone, Copy)]
pub struct ShadowsocksCipher {
    name: &'static str,
    algorithm: &'static Algorithm,
    salt_len: usize,
}

impl ShadowsocksCipher {
    fn chacha20_ietf_poly1305() -> Self {
        Self::new("chacha20-ietf-poly1305", &CHACHA20_POLY1305, 32)
    }

    fn aes_256_gcm() -> Self {
        Self::new("aes-256-gcm", &AES_256_GCM, 32)
    }

    fn aes_192_gcm() -> Self {
        Self::new("aes-192-gcm", &AES_192_GCM, 24)
    }

    fn aes_128_gcm() -> Self {
        Self::new("aes-128-gcm", &AES_128_GCM, 16)
    }

    fn new(name: &'static str, algorithm: &'static Algorithm, salt_len: usize) -> Self {
        debug_assert_eq!(algorithm.tag_len(), TAG_LEN);
        Self {
            name,
            algorithm,
            salt_len,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn algorithm(&self) -> &'static Algorithm {
        self.algorithm
    }

    pub fn key_len(&self) -> usize {
        self.algorithm.key_len()
    }

    pub fn salt_len(&self) -> usize {
        self.salt_len
    }
}

impl std::fmt::Debug for ShadowsocksCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ShadowsocksCipher({})", self.name)
    }
}

impl PartialEq for ShadowsocksCipher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ShadowsocksCipher {}

impl TryFrom<&str> for ShadowsocksCipher {
    type Error = std::io::Error;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        match name.to_ascii_lowercase().as_str() {
            "chacha20-ietf-poly1305" | "chacha20-poly1305" => {
                Ok(ShadowsocksCipher::chacha20_ietf_poly1305())
            }
            "aes-256-gcm" => Ok(ShadowsocksCipher::aes_256_gcm()),
            "aes-192-gcm" => Ok(ShadowsocksCipher::aes_192_gcm()),
            "aes-128-gcm" => Ok(ShadowsocksCipher::aes_128_gcm()),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "unsupported cipher: {} (supported: {})",
                    name,
                    SUPPORTED_CIPHERS.join(", ")
                ),
            )),
        }
    }
}
