//! Property-based tests for the encrypted channel.
//!
//! 1. **Round-trip**: receive(send(p, k)) == p for all payloads and key sizes
//! 2. **Padding**: unpad(pad(d)) == d and the padded length is block aligned
//! 3. **Framing**: any frame survives arbitrary chunking of the stream
//! 4. **Robustness**: decoding arbitrary bytes never panics

use std::collections::BTreeMap;

use proptest::prelude::*;
use simes_protocol::{
    pad, unpad, EncryptedChannel, Frame, FrameCodec, KeyDirectory, SymmetricKey, BLOCK_SIZE,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 16),
        prop::collection::vec(any::<u8>(), 24),
        prop::collection::vec(any::<u8>(), 32),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_raw_roundtrip(
        data in prop::collection::vec(any::<u8>(), 0..2048),
        key_bytes in key_strategy(),
        sender in "[a-z]{1,16}",
    ) {
        let key = SymmetricKey::new(key_bytes).unwrap();
        let keys = KeyDirectory::new().with_key(sender.clone(), key.clone());
        let channel = EncryptedChannel::new();

        let received = runtime().block_on(async {
            let mut wire = Vec::new();
            channel.send_encrypted_raw(&mut wire, &sender, &data, &key).await.unwrap();
            let mut stream = wire.as_slice();
            channel.receive_encrypted_raw(&mut stream, &keys).await.unwrap()
        });

        prop_assert_eq!(received.sender_id, sender);
        prop_assert_eq!(received.payload, data);
    }

    #[test]
    fn prop_structured_roundtrip(
        map in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..16),
        key_bytes in key_strategy(),
    ) {
        let key = SymmetricKey::new(key_bytes).unwrap();
        let keys = KeyDirectory::new().with_key("alice", key.clone());
        let channel = EncryptedChannel::new();

        let received: BTreeMap<String, i64> = runtime().block_on(async {
            let mut wire = Vec::new();
            channel.send_encrypted(&mut wire, "alice", &map, &key).await.unwrap();
            let mut stream = wire.as_slice();
            channel.receive_encrypted(&mut stream, &keys).await.unwrap()
        });

        prop_assert_eq!(received, map);
    }

    #[test]
    fn prop_pad_unpad(data in prop::collection::vec(any::<u8>(), 0..=4 * BLOCK_SIZE)) {
        let padded = pad(&data);
        prop_assert_eq!(padded.len() % BLOCK_SIZE, 0);
        prop_assert!(padded.len() > data.len());
        prop_assert!(padded.len() - data.len() <= BLOCK_SIZE);
        prop_assert_eq!(unpad(&padded).unwrap(), data);
    }

    #[test]
    fn prop_frame_survives_chunking(
        sender in "\\PC{0,20}",
        iv in any::<[u8; 16]>(),
        blocks in 1usize..8,
        chunk in 1usize..64,
    ) {
        let codec = FrameCodec::new();
        let frame = Frame::new(sender, iv, vec![0x5A; blocks * BLOCK_SIZE]);
        let encoded = codec.encode(&frame).unwrap();

        let decoded = runtime().block_on(async {
            let (mut tx, mut rx) = tokio::io::duplex(chunk);
            let writer = tokio::spawn(async move {
                use tokio::io::AsyncWriteExt;
                for piece in encoded.chunks(chunk) {
                    tx.write_all(piece).await.unwrap();
                }
            });
            let decoded = codec.read_frame(&mut rx).await.unwrap();
            writer.await.unwrap();
            decoded
        });

        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn prop_decode_arbitrary_bytes_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let codec = FrameCodec::new();
        let _ = codec.decode(&data);
        let _ = codec.try_decode(&data);
    }
}
