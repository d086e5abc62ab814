use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use aws_lc_rs::aead::{
    Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey,
};
use aws_lc_rs::error::Unspecified;
use futures::ready;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::shadowsocks_cipher::ShadowsocksCipher;
use super::shadowsocks_key::ShadowsocksKey;
use super::{MAX_PAYLOAD_LEN, TAG_LEN, generate_salt};
use crate::async_stream::AsyncStream;

/// Little-endian counter nonce, starting at zero for every session key.
pub struct IncreasingSequence([u8; NONCE_LEN]);

impl IncreasingSequence {
    fn new() -> IncreasingSequence {
        IncreasingSequence([0u8; NONCE_LEN])
    }
}

impl NonceSequence for IncreasingSequence {
    fn advance(&mut self) -> Result<Nonce, Unspecified> {
        let ret = Nonce::assume_unique_for_key(self.0);
        for i in self.0.iter_mut() {
            *i = i.wrapping_add(1);
            if *i > 0 {
                break;
            }
        }
        Ok(ret)
    }
}

enum ReadState {
    Salt,
    Length,
    Payload(usize),
}

// Writes are encrypted eagerly; drain before accepting more once this much
// ciphertext is queued.
const MAX_QUEUED_WRITE_LEN: usize = MAX_PAYLOAD_LEN + 2 + 2 * TAG_LEN;

/// Client side of a shadowsocks AEAD stream.
///
/// The first bytes written to the underlying stream are the salt, whose
/// leading bytes are the configured prefix. Every write after that becomes
/// one or more chunks of `[sealed length][sealed payload]`.
pub struct ShadowsocksStream {
    stream: Box<dyn AsyncStream>,

    cipher: ShadowsocksCipher,
    key: Arc<ShadowsocksKey>,

    sealing_key: SealingKey<IncreasingSequence>,
    opening_key: Option<OpeningKey<IncreasingSequence>>,

    read_state: ReadState,
    read_scratch: Box<[u8]>,
    unprocessed_buf: Vec<u8>,
    processed_buf: Vec<u8>,
    processed_offset: usize,

    write_buf: Vec<u8>,
    write_offset: usize,
}

impl ShadowsocksStream {
    pub fn new(
        stream: Box<dyn AsyncStream>,
        cipher: ShadowsocksCipher,
        key: Arc<ShadowsocksKey>,
        prefix: &[u8],
    ) -> std::io::Result<Self> {
        let salt = generate_salt(cipher.salt_len(), prefix)?;
        let session_key = key.create_session_key(&salt)?;
        let unbound_key = UnboundKey::new(cipher.algorithm(), &session_key)
            .map_err(|_| std::io::Error::other("invalid session key"))?;
        let sealing_key = SealingKey::new(unbound_key, IncreasingSequence::new());

        Ok(Self {
            stream,

            cipher,
            key,

            sealing_key,
            opening_key: None,

            read_state: ReadState::Salt,
            read_scratch: vec![0u8; MAX_QUEUED_WRITE_LEN].into_boxed_slice(),
            unprocessed_buf: Vec::new(),
            processed_buf: Vec::new(),
            processed_offset: 0,

            // The salt goes out together with the first chunk.
            write_buf: salt,
            write_offset: 0,
        })
    }

    fn encrypt_single(&mut self, input: &[u8]) -> std::io::Result<()> {
        let length_start = self.write_buf.len();
        self.write_buf
            .extend_from_slice(&(input.len() as u16).to_be_bytes());
        self.seal_from(length_start)?;

        let payload_start = self.write_buf.len();
        self.write_buf.extend_from_slice(input);
        self.seal_from(payload_start)
    }

    fn seal_from(&mut self, start: usize) -> std::io::Result<()> {
        let tag = self
            .sealing_key
            .seal_in_place_separate_tag(Aad::empty(), &mut self.write_buf[start..])
            .map_err(|_| std::io::Error::other("failed to encrypt chunk"))?;
        self.write_buf.extend_from_slice(tag.as_ref());
        Ok(())
    }

    fn poll_write_cache(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        while self.write_offset < self.write_buf.len() {
            let written = ready!(
                Pin::new(&mut self.stream).poll_write(cx, &self.write_buf[self.write_offset..])
            )?;
            if written == 0 {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "EOF while writing cached encrypted data",
                )));
            }
            self.write_offset += written;
        }
        self.write_buf.clear();
        self.write_offset = 0;
        Poll::Ready(Ok(()))
    }

    fn pending_write_len(&self) -> usize {
        self.write_buf.len() - self.write_offset
    }

    /// Processes as much of `unprocessed_buf` as possible. Returns false when
    /// more ciphertext is needed.
    fn try_decrypt(&mut self) -> std::io::Result<bool> {
        match self.read_state {
            ReadState::Salt => {
                let salt_len = self.cipher.salt_len();
                if self.unprocessed_buf.len() < salt_len {
                    return Ok(false);
                }
                let session_key = self
                    .key
                    .create_session_key(&self.unprocessed_buf[0..salt_len])?;
                let unbound_key = UnboundKey::new(self.cipher.algorithm(), &session_key)
                    .map_err(|_| std::io::Error::other("invalid session key"))?;
                self.opening_key = Some(OpeningKey::new(unbound_key, IncreasingSequence::new()));
                self.unprocessed_buf.drain(0..salt_len);
                self.read_state = ReadState::Length;
                Ok(true)
            }
            ReadState::Length => {
                if self.unprocessed_buf.len() < 2 + TAG_LEN {
                    return Ok(false);
                }
                let plaintext = self.open_front(2 + TAG_LEN)?;
                let payload_len = u16::from_be_bytes([plaintext[0], plaintext[1]]) as usize;
                if payload_len > MAX_PAYLOAD_LEN {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("chunk length {} exceeds maximum", payload_len),
                    ));
                }
                self.read_state = ReadState::Payload(payload_len);
                Ok(true)
            }
            ReadState::Payload(payload_len) => {
                if self.unprocessed_buf.len() < payload_len + TAG_LEN {
                    return Ok(false);
                }
                let plaintext = self.open_front(payload_len + TAG_LEN)?;
                self.processed_buf.clear();
                self.processed_buf.extend_from_slice(&plaintext);
                self.processed_offset = 0;
                self.read_state = ReadState::Length;
                Ok(true)
            }
        }
    }

    fn open_front(&mut self, len: usize) -> std::io::Result<Vec<u8>> {
        let opening_key = self
            .opening_key
            .as_mut()
            .ok_or_else(|| std::io::Error::other("salt not received"))?;
        let mut sealed: Vec<u8> = self.unprocessed_buf.drain(0..len).collect();
        let plaintext_len = opening_key
            .open_in_place(Aad::empty(), &mut sealed)
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "failed to decrypt chunk (wrong password or cipher?)",
                )
            })?
            .len();
        sealed.truncate(plaintext_len);
        Ok(sealed)
    }

    fn is_at_chunk_boundary(&self) -> bool {
        self.unprocessed_buf.is_empty() && !matches!(self.read_state, ReadState::Payload(_))
    }
}

impl AsyncRead for ShadowsocksStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.processed_offset < this.processed_buf.len() {
                let available = &this.processed_buf[this.processed_offset..];
                let len = std::cmp::min(available.len(), buf.remaining());
                buf.put_slice(&available[0..len]);
                this.processed_offset += len;
                return Poll::Ready(Ok(()));
            }

            if buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            if this.try_decrypt()? {
                continue;
            }

            let mut read_buf = ReadBuf::new(&mut this.read_scratch);
            ready!(Pin::new(&mut this.stream).poll_read(cx, &mut read_buf))?;
            let filled = read_buf.filled();
            if filled.is_empty() {
                if this.is_at_chunk_boundary() {
                    return Poll::Ready(Ok(()));
                }
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "EOF in the middle of an encrypted chunk",
                )));
            }
            this.unprocessed_buf.extend_from_slice(filled);
        }
    }
}

impl AsyncWrite for ShadowsocksStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if this.pending_write_len() >= MAX_QUEUED_WRITE_LEN {
            ready!(this.poll_write_cache(cx))?;
        }

        let packet_data_size = std::cmp::min(buf.len(), MAX_PAYLOAD_LEN);
        this.encrypt_single(&buf[0..packet_data_size])?;

        // Anything left over is sent by the next write or flush.
        if let Poll::Ready(Err(e)) = this.poll_write_cache(cx) {
            return Poll::Ready(Err(e));
        }

        Poll::Ready(Ok(packet_data_size))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_write_cache(cx))?;
        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_write_cache(cx))?;
        Pin::new(&mut this.stream).poll_shutdown(cx)
    }
}

impl AsyncStream for ShadowsocksStream {}
