use md5::{Digest, Md5};

const SS_SUBKEY_INFO: &[&[u8]] = &[b"ss-subkey"];

/// Master key derived from a shadowsocks password.
#[derive(Clone)]
pub struct ShadowsocksKey {
    key_bytes: Box<[u8]>,
}

impl ShadowsocksKey {
    pub fn new(password: &str, key_len: usize) -> Self {
        Self {
            key_bytes: get_key_bytes(password, key_len),
        }
    }

    /// Derives the per-session subkey for `salt` with HKDF-SHA1.
    pub fn create_session_key(&self, salt: &[u8]) -> std::io::Result<Box<[u8]>> {
        let mut session_key = vec![0u8; self.key_bytes.len()];
        aws_lc_rs::hkdf::Salt::new(aws_lc_rs::hkdf::HKDF_SHA1_FOR_LEGACY_USE_ONLY, salt)
            .extract(&self.key_bytes)
            .expand(SS_SUBKEY_INFO, SliceKeyType(&self.key_bytes))
            .and_then(|okm| okm.fill(&mut session_key))
            .map_err(|_| std::io::Error::other("failed to derive session key"))?;
        Ok(session_key.into_boxed_slice())
    }
}

impl std::fmt::Debug for ShadowsocksKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowsocksKey")
            .field("key_len", &self.key_bytes.len())
            .finish_non_exhaustive()
    }
}

struct SliceKeyType<'a>(&'a [u8]);

impl aws_lc_rs::hkdf::KeyType for SliceKeyType<'_> {
    fn len(&self) -> usize {
        self.0.len()
    }
}

// EVP_BytesToKey with MD5 and no salt.
fn get_key_bytes(key: &str, cipher_key_len: usize) -> Box<[u8]> {
    let key = key.as_bytes();
    let mut ret = vec![];
    let mut context = Md5::new();
    loop {
        context.update(key);
        let digest: [u8; 16] = context.finalize().into();
        ret.extend(digest.iter());
        if ret.len() >= cipher_key_len {
            break;
        }
        context = Md5::new();
        context.update(digest);
    }
    ret.truncate(cipher_key_len);
    ret.into_boxed_slice()
}
