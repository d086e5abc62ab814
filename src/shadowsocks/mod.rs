mod location;
mod shadowsocks_cipher;
mod shadowsocks_key;
mod shadowsocks_packet;
mod shadowsocks_stream;

pub use location::{read_location_from_slice, write_location_to_vec};
pub use shadowsocks_cipher::{SUPPORTED_CIPHERS, ShadowsocksCipher};
pub use shadowsocks_key::ShadowsocksKey;
pub use shadowsocks_packet::{ShadowsocksPacketStream, open_packet, seal_packet};
pub use shadowsocks_stream::ShadowsocksStream;

use rand::RngCore;

pub const TAG_LEN: usize = 16;

/// Largest payload carried by one stream chunk.
pub const MAX_PAYLOAD_LEN: usize = 0x3fff;

/// Random bytes that must remain in a salt after the prefix.
pub const MIN_RANDOM_SALT_LEN: usize = 8;

/// Returns the longest prefix allowed for a cipher's salt.
pub fn max_prefix_len(cipher: &ShadowsocksCipher) -> usize {
    cipher.salt_len() - MIN_RANDOM_SALT_LEN
}

/// Builds a salt starting with `prefix` and filled up with random bytes.
fn generate_salt(salt_len: usize, prefix: &[u8]) -> std::io::Result<Vec<u8>> {
    if prefix.len() + MIN_RANDOM_SALT_LEN > salt_len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!(
                "salt prefix is {} bytes, at most {} allowed",
                prefix.len(),
                salt_len.saturating_sub(MIN_RANDOM_SALT_LEN)
            ),
        ));
    }
    let mut salt = vec![0u8; salt_len];
    salt[0..prefix.len()].copy_from_slice(prefix);
    rand::thread_rng().fill_bytes(&mut salt[prefix.len()..]);
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salt_keeps_prefix() {
        let salt = generate_salt(16, b"GET ").unwrap();
        assert_eq!(salt.len(), 16);
        assert_eq!(&salt[0..4], b"GET ");
    }

    #[test]
    fn test_salt_prefix_limit() {
        assert!(generate_salt(16, &[0u8; 8]).is_ok());
        assert!(generate_salt(16, &[0u8; 9]).is_err());
        let cipher = ShadowsocksCipher::try_from("aes-128-gcm").unwrap();
        assert_eq!(max_prefix_len(&cipher), 8);
    }
}
