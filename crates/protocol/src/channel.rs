//! Encrypted send/receive over a byte stream.
//!
//! Sending: encode → pad → IV → encrypt → frame → one write.
//! Receiving runs the linear [`ReceiveStage`] sequence; any stage may fail and
//! no stage is revisited.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroizing;

use crate::cipher::{AesCbc, BlockCipher};
use crate::codec::{JsonCodec, PayloadCodec};
use crate::error::Result;
use crate::framing::{Frame, FrameCodec};
use crate::iv::generate_iv;
use crate::keys::{KeyDirectory, SymmetricKey};
use crate::padding::{pad, padded_len, unpad};

/// Progress of a single receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStage {
    /// Reading the 4-byte length prefix.
    AwaitingLength,
    /// Reading and parsing the frame body.
    AwaitingBody,
    /// Looking up the sender's key.
    AwaitingKeyResolution,
    /// Decrypting the ciphertext.
    AwaitingDecrypt,
    /// Stripping padding.
    AwaitingUnpad,
    /// Decoding the payload.
    AwaitingDecode,
    /// Payload delivered.
    Done,
}

/// A payload together with the sender that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received<T> {
    /// Sender identifier carried by the frame (already authenticated by key lookup).
    pub sender_id: String,
    /// The decoded payload.
    pub payload: T,
}

impl<T> Received<T> {
    /// Discard the sender and keep the payload.
    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// Encrypted message channel.
///
/// Holds only configuration; streams and keys are passed to each call, so a
/// channel can be cloned and shared freely between connections.
#[derive(Debug, Clone)]
pub struct EncryptedChannel<P = JsonCodec, C = AesCbc> {
    frames: FrameCodec,
    codec: P,
    cipher: C,
}

impl Default for EncryptedChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl EncryptedChannel {
    /// JSON payloads, AES-CBC, default frame size limit.
    pub fn new() -> Self {
        Self::with_parts(FrameCodec::new(), JsonCodec, AesCbc)
    }
}

impl<P: PayloadCodec, C: BlockCipher> EncryptedChannel<P, C> {
    /// Build a channel from explicit components.
    pub fn with_parts(frames: FrameCodec, codec: P, cipher: C) -> Self {
        Self {
            frames,
            codec,
            cipher,
        }
    }

    /// Replace the frame size limit.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.frames = FrameCodec::with_max_frame_size(max_frame_size);
        self
    }

    /// The frame codec in use.
    pub fn frame_codec(&self) -> &FrameCodec {
        &self.frames
    }

    /// The payload codec in use.
    pub fn payload_codec(&self) -> &P {
        &self.codec
    }

    /// Pad, encrypt and frame `plaintext` in memory.
    ///
    /// The size limit is checked before any cryptographic work.
    pub fn seal(&self, sender_id: &str, plaintext: &[u8], key: &SymmetricKey) -> Result<Frame> {
        self.frames
            .check_size(sender_id.len(), padded_len(plaintext.len()))?;

        let padded = Zeroizing::new(pad(plaintext));
        let iv = generate_iv()?;
        let ciphertext = self.cipher.encrypt(key, &iv, &padded)?;

        Ok(Frame::new(sender_id, iv, ciphertext))
    }

    /// Authenticate the sender, decrypt and unpad a received frame.
    ///
    /// The key lookup happens first, so no decryption is attempted for an
    /// unknown sender.
    pub fn open(&self, frame: &Frame, keys: &KeyDirectory) -> Result<Vec<u8>> {
        let mut stage = ReceiveStage::AwaitingKeyResolution;
        self.open_tracked(frame, keys, &mut stage)
    }

    /// Send raw bytes as one encrypted frame.
    pub async fn send_encrypted_raw<W: AsyncWrite + Unpin>(
        &self,
        stream: &mut W,
        sender_id: &str,
        data: &[u8],
        key: &SymmetricKey,
    ) -> Result<()> {
        let frame = self.seal(sender_id, data, key)?;
        let bytes = self.frames.encode(&frame)?;

        tracing::debug!(
            sender = sender_id,
            plaintext_len = data.len(),
            frame_len = bytes.len(),
            "sending encrypted frame"
        );

        stream.write_all(&bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Encode `payload`, then send it as one encrypted frame.
    ///
    /// Everything is built in memory first: on any error before the write,
    /// nothing reaches the stream.
    pub async fn send_encrypted<W, T>(
        &self,
        stream: &mut W,
        sender_id: &str,
        payload: &T,
        key: &SymmetricKey,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        T: Serialize + ?Sized,
    {
        let data = Zeroizing::new(self.codec.encode(payload)?);
        self.send_encrypted_raw(stream, sender_id, &data, key).await
    }

    /// Receive one frame and return its decrypted bytes with the sender.
    pub async fn receive_encrypted_raw<R: AsyncRead + Unpin>(
        &self,
        stream: &mut R,
        keys: &KeyDirectory,
    ) -> Result<Received<Vec<u8>>> {
        self.receive_with(stream, keys, |plaintext| Ok(plaintext)).await
    }

    /// Receive one frame and decode its payload.
    pub async fn receive_encrypted<R, T>(&self, stream: &mut R, keys: &KeyDirectory) -> Result<T>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        self.receive_encrypted_from(stream, keys)
            .await
            .map(Received::into_payload)
    }

    /// Receive one frame and decode its payload, keeping the sender id.
    pub async fn receive_encrypted_from<R, T>(
        &self,
        stream: &mut R,
        keys: &KeyDirectory,
    ) -> Result<Received<T>>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        self.receive_with(stream, keys, |plaintext| {
            let plaintext = Zeroizing::new(plaintext);
            self.codec.decode(&plaintext)
        })
            .await
    }

    /// Run the receive state machine, finishing with `decode`.
    pub(crate) async fn receive_with<R, T, F>(
        &self,
        stream: &mut R,
        keys: &KeyDirectory,
        decode: F,
    ) -> Result<Received<T>>
    where
        R: AsyncRead + Unpin,
        F: FnOnce(Vec<u8>) -> Result<T>,
    {
        let mut stage = ReceiveStage::AwaitingLength;
        let result = self.receive_stages(stream, keys, decode, &mut stage).await;

        match &result {
            Ok(received) => tracing::debug!(sender = %received.sender_id, "received encrypted frame"),
            Err(e) if e.is_clean_close() => tracing::debug!("stream closed between frames"),
            Err(e) => tracing::warn!(stage = ?stage, error = %e, "rejected incoming frame"),
        }

        result
    }

    async fn receive_stages<R, T, F>(
        &self,
        stream: &mut R,
        keys: &KeyDirectory,
        decode: F,
        stage: &mut ReceiveStage,
    ) -> Result<Received<T>>
    where
        R: AsyncRead + Unpin,
        F: FnOnce(Vec<u8>) -> Result<T>,
    {
        *stage = ReceiveStage::AwaitingLength;
        let body_len = self.frames.read_prefix(stream).await?;

        *stage = ReceiveStage::AwaitingBody;
        let frame = self.frames.read_body(stream, body_len).await?;

        *stage = ReceiveStage::AwaitingKeyResolution;
        let plaintext = self.open_tracked(&frame, keys, stage)?;

        *stage = ReceiveStage::AwaitingDecode;
        let payload = decode(plaintext)?;

        *stage = ReceiveStage::Done;
        Ok(Received {
            sender_id: frame.sender_id,
            payload,
        })
    }

    fn open_tracked(&self, frame: &Frame, keys: &KeyDirectory, stage: &mut ReceiveStage) -> Result<Vec<u8>> {
        *stage = ReceiveStage::AwaitingKeyResolution;
        let key = keys.resolve(&frame.sender_id)?;

        *stage = ReceiveStage::AwaitingDecrypt;
        let padded = Zeroizing::new(self.cipher.decrypt(key, &frame.iv, &frame.ciphertext)?);

        *stage = ReceiveStage::AwaitingUnpad;
        unpad(&padded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde::Deserialize;
    use serde_json::{json, Value};

    use super::*;
    use crate::cipher::BLOCK_SIZE;
    use crate::codec::MsgpackCodec;
    use crate::error::ProtocolError;
    use crate::iv::Iv;

    fn zero_key() -> SymmetricKey {
        SymmetricKey::new(vec![0u8; 16]).unwrap()
    }

    fn directory(sender: &str, key: &SymmetricKey) -> KeyDirectory {
        KeyDirectory::new().with_key(sender, key.clone())
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        n: u32,
    }

    /// Cipher wrapper that counts decrypt calls.
    #[derive(Clone, Default)]
    struct CountingCipher {
        decrypts: Arc<AtomicUsize>,
    }

    impl BlockCipher for CountingCipher {
        fn encrypt(&self, key: &SymmetricKey, iv: &Iv, plaintext: &[u8]) -> Result<Vec<u8>> {
            AesCbc.encrypt(key, iv, plaintext)
        }

        fn decrypt(&self, key: &SymmetricKey, iv: &Iv, ciphertext: &[u8]) -> Result<Vec<u8>> {
            self.decrypts.fetch_add(1, Ordering::SeqCst);
            AesCbc.decrypt(key, iv, ciphertext)
        }
    }

    #[tokio::test]
    async fn test_alice_scenario() {
        let channel = EncryptedChannel::new();
        let key = zero_key();
        let payload = json!({"n": 1});

        let mut wire = Vec::new();
        channel
            .send_encrypted(&mut wire, "alice", &payload, &key)
            .await
            .unwrap();

        // sender_id_length field
        assert_eq!(u16::from_be_bytes([wire[4], wire[5]]), 5);
        assert_eq!(&wire[6..11], b"alice");

        // ciphertext_length field follows the IV
        let ct_start = 11 + BLOCK_SIZE;
        let ct_len = u32::from_be_bytes(wire[ct_start..ct_start + 4].try_into().unwrap()) as usize;
        assert!(ct_len > 0);
        assert_eq!(ct_len % BLOCK_SIZE, 0);
        assert_eq!(wire.len(), ct_start + 4 + ct_len);

        let mut stream: &[u8] = &wire;
        let received: Value = channel
            .receive_encrypted(&mut stream, &directory("alice", &key))
            .await
            .unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_roundtrip_typed_payload_over_duplex() {
        let channel = EncryptedChannel::new();
        let key = SymmetricKey::generate(32).unwrap();
        let keys = directory("client", &key);

        let (mut client, mut server) = tokio::io::duplex(64);
        let sender = channel.clone();
        let send_key = key.clone();
        let writer = tokio::spawn(async move {
            for n in 0..5 {
                sender
                    .send_encrypted(&mut client, "client", &Counter { n }, &send_key)
                    .await
                    .unwrap();
            }
        });

        for n in 0..5 {
            let received: Received<Counter> = channel
                .receive_encrypted_from(&mut server, &keys)
                .await
                .unwrap();
            assert_eq!(received.sender_id, "client");
            assert_eq!(received.payload, Counter { n });
        }
        writer.await.unwrap();

        // Writer dropped its end: clean shutdown
        let err = channel
            .receive_encrypted::<_, Counter>(&mut server, &keys)
            .await
            .unwrap_err();
        assert!(err.is_clean_close());
    }

    #[tokio::test]
    async fn test_raw_roundtrip_all_lengths() {
        let channel = EncryptedChannel::new();
        let key = SymmetricKey::generate(24).unwrap();
        let keys = directory("raw", &key);

        for len in 0..=4 * BLOCK_SIZE {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let mut wire = Vec::new();
            channel
                .send_encrypted_raw(&mut wire, "raw", &data, &key)
                .await
                .unwrap();

            let mut stream: &[u8] = &wire;
            let received = channel.receive_encrypted_raw(&mut stream, &keys).await.unwrap();
            assert_eq!(received.payload, data, "len={}", len);
        }
    }

    #[tokio::test]
    async fn test_msgpack_channel_roundtrip() {
        let channel = EncryptedChannel::with_parts(FrameCodec::new(), MsgpackCodec, AesCbc);
        let key = zero_key();

        let mut wire = Vec::new();
        channel
            .send_encrypted(&mut wire, "alice", &Counter { n: 9 }, &key)
            .await
            .unwrap();

        let mut stream: &[u8] = &wire;
        let received: Counter = channel
            .receive_encrypted(&mut stream, &directory("alice", &key))
            .await
            .unwrap();
        assert_eq!(received, Counter { n: 9 });
    }

    #[tokio::test]
    async fn test_identical_payloads_encrypt_differently() {
        let channel = EncryptedChannel::new();
        let key = zero_key();

        let mut first = Vec::new();
        let mut second = Vec::new();
        channel.send_encrypted(&mut first, "alice", &Counter { n: 1 }, &key).await.unwrap();
        channel.send_encrypted(&mut second, "alice", &Counter { n: 1 }, &key).await.unwrap();

        assert_eq!(first.len(), second.len());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_sender_skips_decryption() {
        let cipher = CountingCipher::default();
        let channel = EncryptedChannel::with_parts(FrameCodec::new(), JsonCodec, cipher.clone());
        let key = zero_key();

        let mut wire = Vec::new();
        channel
            .send_encrypted(&mut wire, "mallory", &Counter { n: 1 }, &key)
            .await
            .unwrap();

        let mut stream: &[u8] = &wire;
        let err = channel
            .receive_encrypted::<_, Counter>(&mut stream, &directory("alice", &key))
            .await
            .unwrap_err();

        assert!(matches!(err, ProtocolError::UnknownSender { ref sender_id } if sender_id == "mallory"));
        assert_eq!(cipher.decrypts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_payload_writes_nothing() {
        let channel = EncryptedChannel::new().with_max_frame_size(256);
        let key = zero_key();
        let payload = vec![0u8; 512];

        let mut wire = Vec::new();
        let err = channel
            .send_encrypted_raw(&mut wire, "alice", &payload, &key)
            .await
            .unwrap_err();

        assert!(matches!(err, ProtocolError::MessageTooLarge { max: 256, .. }));
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_unencodable_payload_is_encode_error() {
        let channel = EncryptedChannel::new();
        let key = zero_key();
        let mut payload = std::collections::BTreeMap::new();
        payload.insert((1u8, 2u8), "tuple keys have no JSON form");

        let mut wire = Vec::new();
        let err = channel
            .send_encrypted(&mut wire, "alice", &payload, &key)
            .await
            .unwrap_err();

        assert!(matches!(err, ProtocolError::Encode(_)), "got {:?}", err);
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_payload_at_limit_is_accepted() {
        // body = 22 fixed + 5 sender + padded payload
        let max = 22 + 5 + 4 * BLOCK_SIZE;
        let channel = EncryptedChannel::new().with_max_frame_size(max);
        let key = zero_key();

        let mut wire = Vec::new();
        channel
            .send_encrypted_raw(&mut wire, "alice", &[1u8; 4 * BLOCK_SIZE - 1], &key)
            .await
            .unwrap();
        assert_eq!(wire.len(), 4 + max);

        let err = channel
            .send_encrypted_raw(&mut Vec::new(), "alice", &[1u8; 4 * BLOCK_SIZE], &key)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_truncated_streams() {
        let channel = EncryptedChannel::new();
        let key = zero_key();
        let keys = directory("alice", &key);

        let mut empty: &[u8] = &[];
        let err = channel.receive_encrypted_raw(&mut empty, &keys).await.unwrap_err();
        assert!(matches!(err, ProtocolError::EndOfStream));

        let mut wire = Vec::new();
        channel
            .send_encrypted(&mut wire, "alice", &Counter { n: 1 }, &key)
            .await
            .unwrap();

        let mut header_only: &[u8] = &wire[..4];
        let err = channel.receive_encrypted_raw(&mut header_only, &keys).await.unwrap_err();
        assert!(matches!(err, ProtocolError::IncompleteFrame { received: 4, .. }));

        let mut torn: &[u8] = &wire[..wire.len() - 1];
        let err = channel.receive_encrypted_raw(&mut torn, &keys).await.unwrap_err();
        assert!(matches!(err, ProtocolError::IncompleteFrame { .. }));
    }

    #[tokio::test]
    async fn test_wrong_key_fails_padding_or_decode() {
        let channel = EncryptedChannel::new();
        let send_key = zero_key();
        let other_key = SymmetricKey::new(vec![1u8; 16]).unwrap();

        let mut wire = Vec::new();
        channel
            .send_encrypted(&mut wire, "alice", &Counter { n: 1 }, &send_key)
            .await
            .unwrap();

        let mut stream: &[u8] = &wire;
        let err = channel
            .receive_encrypted::<_, Counter>(&mut stream, &directory("alice", &other_key))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Padding(_) | ProtocolError::Decode(_)
        ));
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_detected() {
        let channel = EncryptedChannel::new();
        let key = zero_key();
        let keys = directory("alice", &key);
        let payload = json!({"field1": "value1", "field2": "value2", "message": "Hello server!"});

        let mut wire = Vec::new();
        channel.send_encrypted(&mut wire, "alice", &payload, &key).await.unwrap();

        let ct_start = 4 + 2 + 5 + BLOCK_SIZE + 4;
        let ct_bits = (wire.len() - ct_start) * 8;

        let mut detected = 0;
        for bit in 0..ct_bits {
            let mut tampered = wire.clone();
            tampered[ct_start + bit / 8] ^= 1 << (bit % 8);

            let mut stream: &[u8] = &tampered;
            match channel.receive_encrypted::<_, Value>(&mut stream, &keys).await {
                Err(ProtocolError::Padding(_)) | Err(ProtocolError::Decode(_)) => detected += 1,
                Ok(value) => assert_ne!(value, payload, "tampering went unnoticed"),
                Err(other) => panic!("unexpected error kind: {:?}", other),
            }
        }

        // Flips in the last block's low bits can leave valid padding; the
        // garbled block then has to fail JSON parsing instead.
        assert!(detected * 100 >= ct_bits * 99, "{} of {} flips detected", detected, ct_bits);
    }

    #[test]
    fn test_seal_open_in_memory() {
        let channel = EncryptedChannel::new();
        let key = zero_key();
        let frame = channel.seal("alice", b"hello", &key).unwrap();

        assert_eq!(frame.sender_id, "alice");
        assert_eq!(frame.ciphertext.len(), BLOCK_SIZE);

        let plaintext = channel.open(&frame, &directory("alice", &key)).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn test_seal_rejects_long_sender() {
        let channel = EncryptedChannel::new();
        let sender = "s".repeat(70_000);
        assert!(matches!(
            channel.seal(&sender, b"x", &zero_key()),
            Err(ProtocolError::SenderTooLong { .. })
        ));
    }
}
