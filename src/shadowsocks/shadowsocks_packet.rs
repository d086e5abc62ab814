use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use aws_lc_rs::aead::{Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use futures::ready;
use log::debug;
use tokio::io::ReadBuf;

use super::location::read_location_from_slice;
use super::shadowsocks_cipher::ShadowsocksCipher;
use super::shadowsocks_key::ShadowsocksKey;
use super::{TAG_LEN, generate_salt};
use crate::async_stream::{
    AsyncFlushMessage, AsyncMessageStream, AsyncReadMessage, AsyncShutdownMessage,
    AsyncWriteMessage,
};

const MAX_DATAGRAM_LEN: usize = 65535;

fn packet_key(
    cipher: &ShadowsocksCipher,
    key: &ShadowsocksKey,
    salt: &[u8],
) -> std::io::Result<LessSafeKey> {
    let session_key = key.create_session_key(salt)?;
    let unbound_key = UnboundKey::new(cipher.algorithm(), &session_key)
        .map_err(|_| std::io::Error::other("invalid session key"))?;
    Ok(LessSafeKey::new(unbound_key))
}

/// Encrypts one datagram as `[salt][sealed payload]`. Every packet has its
/// own salt, so the all-zero nonce is never reused with a key.
pub fn seal_packet(
    cipher: &ShadowsocksCipher,
    key: &ShadowsocksKey,
    payload: &[u8],
) -> std::io::Result<Vec<u8>> {
    let salt_len = cipher.salt_len();
    let mut packet = generate_salt(salt_len, &[])?;
    let sealing_key = packet_key(cipher, key, &packet)?;

    packet.reserve(payload.len() + TAG_LEN);
    packet.extend_from_slice(payload);
    let tag = sealing_key
        .seal_in_place_separate_tag(
            Nonce::assume_unique_for_key([0u8; NONCE_LEN]),
            Aad::empty(),
            &mut packet[salt_len..],
        )
        .map_err(|_| std::io::Error::other("failed to encrypt packet"))?;
    packet.extend_from_slice(tag.as_ref());
    Ok(packet)
}

/// Decrypts a datagram in place, returning the plaintext.
pub fn open_packet<'a>(
    cipher: &ShadowsocksCipher,
    key: &ShadowsocksKey,
    packet: &'a mut [u8],
) -> std::io::Result<&'a mut [u8]> {
    let salt_len = cipher.salt_len();
    if packet.len() < salt_len + TAG_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("packet too short ({} bytes)", packet.len()),
        ));
    }
    let (salt, sealed) = packet.split_at_mut(salt_len);
    let opening_key = packet_key(cipher, key, salt)?;
    opening_key
        .open_in_place(
            Nonce::assume_unique_for_key([0u8; NONCE_LEN]),
            Aad::empty(),
            sealed,
        )
        .map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "failed to decrypt packet (wrong password or cipher?)",
            )
        })
}

/// A datagram session relayed through a shadowsocks server.
///
/// Writes are sent to the server as `[address header][payload]`, sealed.
/// Reads drop anything that does not decrypt or parse.
pub struct ShadowsocksPacketStream {
    socket: Box<dyn AsyncMessageStream>,
    cipher: ShadowsocksCipher,
    key: Arc<ShadowsocksKey>,
    target_header: Vec<u8>,
    pending_packet: Option<Vec<u8>>,
    read_scratch: Box<[u8]>,
}

impl ShadowsocksPacketStream {
    pub fn new(
        socket: Box<dyn AsyncMessageStream>,
        cipher: ShadowsocksCipher,
        key: Arc<ShadowsocksKey>,
        target_header: Vec<u8>,
    ) -> Self {
        Self {
            socket,
            cipher,
            key,
            target_header,
            pending_packet: None,
            read_scratch: vec![0u8; MAX_DATAGRAM_LEN].into_boxed_slice(),
        }
    }
}

impl AsyncReadMessage for ShadowsocksPacketStream {
    fn poll_read_message(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        loop {
            let mut read_buf = ReadBuf::new(&mut this.read_scratch);
            ready!(Pin::new(&mut this.socket).poll_read_message(cx, &mut read_buf))?;
            let packet_len = read_buf.filled().len();

            let plaintext =
                match open_packet(&this.cipher, &this.key, &mut this.read_scratch[0..packet_len]) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        debug!("Dropping shadowsocks packet: {}", e);
                        continue;
                    }
                };

            let header_len = match read_location_from_slice(plaintext) {
                Ok((_, header_len)) => header_len,
                Err(e) => {
                    debug!("Dropping shadowsocks packet with bad address: {}", e);
                    continue;
                }
            };

            let payload = &plaintext[header_len..];
            let len = std::cmp::min(payload.len(), buf.remaining());
            buf.put_slice(&payload[0..len]);
            return Poll::Ready(Ok(()));
        }
    }
}

impl AsyncWriteMessage for ShadowsocksPacketStream {
    fn poll_write_message(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let packet = match this.pending_packet.take() {
            Some(packet) => packet,
            None => {
                let mut plaintext = Vec::with_capacity(this.target_header.len() + buf.len());
                plaintext.extend_from_slice(&this.target_header);
                plaintext.extend_from_slice(buf);
                seal_packet(&this.cipher, &this.key, &plaintext)?
            }
        };

        match Pin::new(&mut this.socket).poll_write_message(cx, &packet) {
            Poll::Pending => {
                this.pending_packet = Some(packet);
                Poll::Pending
            }
            Poll::Ready(result) => Poll::Ready(result),
        }
    }
}

impl AsyncFlushMessage for ShadowsocksPacketStream {
    fn poll_flush_message(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().socket).poll_flush_message(cx)
    }
}

impl AsyncShutdownMessage for ShadowsocksPacketStream {
    fn poll_shutdown_message(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().socket).poll_shutdown_message(cx)
    }
}

impl AsyncMessageStream for ShadowsocksPacketStream {}
