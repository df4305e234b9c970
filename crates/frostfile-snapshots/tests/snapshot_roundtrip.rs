//! End-to-end scenarios over fabricated snapshot fixtures: segments written
//! by `SegmentWriter`, indexes built by `IndexBuilder`, read back through
//! the typed readers.

use std::fs::OpenOptions;
use std::path::Path;
use std::time::Duration;

use alloy_consensus::{Header, SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{keccak256, Address, Bytes, Signature, TxKind, U256};
use alloy_rlp::Encodable;
use tempfile::TempDir;

use frostfile_snapshots::{
    BodySnapshot, Decompressor, HeaderSnapshot, IndexBuilder, RecSplitIndex, SegmentWriter,
    SnapshotPath, SnapshotType, StoredBlockBody, TransactionSnapshot,
};

// ---------------------------------------------------------------
// Fixture helpers
// ---------------------------------------------------------------

fn make_header(number: u64) -> Header {
    Header {
        number,
        parent_hash: keccak256(number.to_le_bytes()),
        gas_limit: 30_000_000,
        gas_used: 11_000 * (number % 100),
        timestamp: 1_600_000_000 + number * 12,
        extra_data: Bytes::from(number.to_be_bytes().to_vec()),
        ..Default::default()
    }
}

fn legacy_txn(nonce: u64) -> TxEnvelope {
    let tx = TxLegacy {
        chain_id: Some(1),
        nonce,
        gas_price: 7,
        gas_limit: 21_000,
        to: TxKind::Call(Address::repeat_byte(0x42)),
        value: U256::from(nonce * 1_000),
        input: Default::default(),
    };
    let signature = Signature::new(U256::from(nonce + 1), U256::from(nonce + 2), false);
    TxEnvelope::from(tx.into_signed(signature))
}

fn typed_txn(nonce: u64) -> TxEnvelope {
    let tx = TxEip1559 {
        chain_id: 1,
        nonce,
        gas_limit: 60_000,
        max_fee_per_gas: 120,
        max_priority_fee_per_gas: 3,
        to: TxKind::Call(Address::repeat_byte(0x43)),
        value: U256::from(nonce),
        access_list: Default::default(),
        input: Default::default(),
    };
    let signature = Signature::new(U256::from(nonce + 5), U256::from(nonce + 6), true);
    TxEnvelope::from(tx.into_signed(signature))
}

/// Word offsets of a finished segment, recovered by scanning it once.
fn word_offsets(segment: &Path) -> Vec<u64> {
    let decompressor = Decompressor::open(segment).unwrap();
    let mut offsets = Vec::new();
    let mut it = decompressor.make_iterator();
    let mut offset = 0u64;
    let mut buf = Vec::new();
    while it.has_next() {
        offsets.push(offset);
        buf.clear();
        offset = it.next(&mut buf).unwrap();
    }
    offsets
}

/// Headers segment `[0, 1000)` holding blocks `0..count`, plus its index.
fn build_header_snapshot(dir: &TempDir, count: u64) -> (HeaderSnapshot, Vec<Header>) {
    let path = SnapshotPath::from(dir.path(), 1, 0, 1_000, SnapshotType::Headers);
    let headers: Vec<Header> = (0..count).map(make_header).collect();

    let mut writer = SegmentWriter::create(path.path());
    for header in &headers {
        let mut word = vec![header.hash_slow()[0]];
        header.encode(&mut word);
        writer.add_word(&word);
    }
    writer.finish().unwrap();

    let offsets = word_offsets(path.path());
    let mut builder = IndexBuilder::new(path.block_from(), 8);
    for (header, &offset) in headers.iter().zip(&offsets) {
        builder.add_key(header.hash_slow().as_slice(), offset);
    }
    builder.build(path.index_file().path()).unwrap();

    let mut snapshot = HeaderSnapshot::new(path).unwrap();
    snapshot.reopen_segment().unwrap();
    snapshot.reopen_index().unwrap();
    (snapshot, headers)
}

/// Bodies segment `[1_500_000, 1_501_000)`: first block carries 3 txns,
/// the last one 5, everything in between is empty.
fn build_body_snapshot(dir: &TempDir) -> (BodySnapshot, Vec<StoredBlockBody>) {
    let path = SnapshotPath::from(dir.path(), 1, 1_500_000, 1_501_000, SnapshotType::Bodies);
    let block_count = path.block_to() - path.block_from();
    let bodies: Vec<StoredBlockBody> = (0..block_count)
        .map(|i| StoredBlockBody {
            base_txn_id: if i == 0 { 7_000_000 } else { 7_000_003 },
            txn_count: match i {
                0 => 3,
                i if i == block_count - 1 => 5,
                _ => 0,
            },
            ommers: vec![],
        })
        .collect();

    let mut writer = SegmentWriter::create(path.path());
    for body in &bodies {
        let mut word = Vec::new();
        body.encode(&mut word);
        writer.add_word(&word);
    }
    writer.finish().unwrap();

    let offsets = word_offsets(path.path());
    let mut builder = IndexBuilder::new(path.block_from(), 8);
    for (i, &offset) in offsets.iter().enumerate() {
        let number = path.block_from() + i as u64;
        builder.add_key(&number.to_le_bytes(), offset);
    }
    builder.build(path.index_file().path()).unwrap();

    let mut snapshot = BodySnapshot::new(path).unwrap();
    snapshot.reopen_segment().unwrap();
    snapshot.reopen_index().unwrap();
    (snapshot, bodies)
}

struct TxnFixture {
    snapshot: TransactionSnapshot,
    envelopes: Vec<TxEnvelope>,
    senders: Vec<Address>,
    /// Block number each transaction belongs to.
    blocks: Vec<u64>,
}

/// Transactions segment matching the body fixture: ids 7000000..7000008,
/// three in the first block and five in the last, mixing legacy and typed.
fn build_txn_snapshot(dir: &TempDir) -> TxnFixture {
    let path = SnapshotPath::from(dir.path(), 1, 1_500_000, 1_501_000, SnapshotType::Transactions);
    let envelopes: Vec<TxEnvelope> = (0..8)
        .map(|i| {
            if i % 2 == 0 {
                legacy_txn(i)
            } else {
                typed_txn(i)
            }
        })
        .collect();
    let senders: Vec<Address> = (0..8).map(|i| Address::repeat_byte(0xA0 + i as u8)).collect();
    let blocks: Vec<u64> = (0..8)
        .map(|i| if i < 3 { 1_500_000 } else { 1_500_999 })
        .collect();

    let mut writer = SegmentWriter::create(path.path());
    for (envelope, sender) in envelopes.iter().zip(&senders) {
        let mut word = vec![envelope.trie_hash()[0]];
        word.extend_from_slice(sender.as_slice());
        envelope.network_encode(&mut word);
        writer.add_word(&word);
    }
    writer.finish().unwrap();

    let offsets = word_offsets(path.path());
    let mut builder = IndexBuilder::new(7_000_000, 8);
    for (envelope, &offset) in envelopes.iter().zip(&offsets) {
        builder.add_key(envelope.trie_hash().as_slice(), offset);
    }
    builder
        .build(path.index_file_for_type(SnapshotType::Transactions).path())
        .unwrap();

    let mut builder = IndexBuilder::new(path.block_from(), 8);
    for (envelope, &block) in envelopes.iter().zip(&blocks) {
        builder.add_key(envelope.trie_hash().as_slice(), block);
    }
    builder
        .build(path.index_file_for_type(SnapshotType::TransactionsToBlock).path())
        .unwrap();

    let mut snapshot = TransactionSnapshot::new(path).unwrap();
    snapshot.reopen_segment().unwrap();
    snapshot.reopen_index().unwrap();
    TxnFixture {
        snapshot,
        envelopes,
        senders,
        blocks,
    }
}

fn backdate(path: &Path, reference: &Path, by: Duration) {
    let reference_mtime = std::fs::metadata(reference).unwrap().modified().unwrap();
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(reference_mtime - by).unwrap();
}

// ---------------------------------------------------------------
// Headers
// ---------------------------------------------------------------

#[test]
fn test_header_by_number_roundtrip() {
    let dir = TempDir::new().unwrap();
    let (snapshot, headers) = build_header_snapshot(&dir, 500);

    let found = snapshot.header_by_number(499).unwrap().unwrap();
    assert_eq!(found.hash_slow(), headers[499].hash_slow());

    // Inside the block range but beyond the key set.
    assert!(snapshot.header_by_number(500).unwrap().is_none());
    // Outside the block range entirely.
    assert!(snapshot.header_by_number(1_000).unwrap().is_none());
    assert!(snapshot.header_by_number(5_000_000).unwrap().is_none());
}

#[test]
fn test_header_by_number_is_identity_over_range() {
    let dir = TempDir::new().unwrap();
    let (snapshot, _) = build_header_snapshot(&dir, 64);
    for n in 0..64 {
        let header = snapshot.header_by_number(n).unwrap().unwrap();
        assert_eq!(header.number, n);
    }
}

#[test]
fn test_header_by_hash_roundtrip() {
    let dir = TempDir::new().unwrap();
    let (snapshot, headers) = build_header_snapshot(&dir, 64);
    for header in &headers {
        let hash = header.hash_slow();
        let found = snapshot.header_by_hash(&hash).unwrap().unwrap();
        assert_eq!(found.hash_slow(), hash);
        assert_eq!(found.number, header.number);
    }
}

#[test]
fn test_header_by_hash_foreign_key_revalidation() {
    let dir = TempDir::new().unwrap();
    let (snapshot, _) = build_header_snapshot(&dir, 64);
    let index = RecSplitIndex::open(
        snapshot.snapshot().path().index_file().path(),
    )
    .unwrap();

    for i in 0..50u64 {
        let foreign = keccak256((1_000_000 + i).to_be_bytes());
        // The MPH happily resolves the foreign key to some ordinal...
        assert!(index.lookup(foreign.as_slice()) < index.key_count());
        // ...but the reader re-validates and reports absence.
        assert!(snapshot.header_by_hash(&foreign).unwrap().is_none());
    }
}

#[test]
fn test_for_each_header_ascending_and_bounded() {
    let dir = TempDir::new().unwrap();
    let (snapshot, _) = build_header_snapshot(&dir, 100);
    let (from, to) = (snapshot.snapshot().block_from(), snapshot.snapshot().block_to());

    let mut prev = None;
    let completed = snapshot
        .for_each_header(|header| {
            assert!(header.number >= from && header.number < to);
            if let Some(p) = prev {
                assert!(header.number > p);
            }
            prev = Some(header.number);
            true
        })
        .unwrap();
    assert!(completed);
    assert_eq!(prev, Some(99));
}

#[test]
fn test_for_each_header_walker_short_circuit() {
    let dir = TempDir::new().unwrap();
    let (snapshot, _) = build_header_snapshot(&dir, 30);
    let mut seen = 0;
    let completed = snapshot
        .for_each_header(|_| {
            seen += 1;
            seen < 10
        })
        .unwrap();
    assert!(!completed);
    assert_eq!(seen, 10);
}

#[test]
fn test_stale_index_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (mut snapshot, headers) = build_header_snapshot(&dir, 32);
    let hash = headers[7].hash_slow();
    assert!(snapshot.header_by_hash(&hash).unwrap().is_some());

    // Make the index strictly older than its segment, as if the segment
    // had been regenerated afterwards.
    let seg_path = snapshot.snapshot().path().path().to_path_buf();
    let idx_path = snapshot.snapshot().path().index_file().path().to_path_buf();
    backdate(&idx_path, &seg_path, Duration::from_secs(60));

    snapshot.reopen_segment().unwrap();
    snapshot.reopen_index().unwrap();
    assert!(snapshot.header_by_hash(&hash).unwrap().is_none());
    assert!(snapshot.header_by_number(7).unwrap().is_none());
}

#[test]
fn test_corrupt_word_aborts_scan_but_spares_others() {
    let dir = TempDir::new().unwrap();
    let (mut snapshot, headers) = build_header_snapshot(&dir, 40);
    let seg_path = snapshot.snapshot().path().path().to_path_buf();
    let idx_path = snapshot.snapshot().path().index_file().path().to_path_buf();

    // Locate header 3's word in the file (words are stored as literals) and
    // break the RLP prefix of its parent_hash field.
    let mut encoded = vec![headers[3].hash_slow()[0]];
    headers[3].encode(&mut encoded);
    let mut bytes = std::fs::read(&seg_path).unwrap();
    let at = bytes
        .windows(encoded.len())
        .position(|w| w == encoded)
        .expect("header word present verbatim");
    let rlp_list_header_len = 1 + (encoded[1] as usize - 0xf7);
    bytes[at + 1 + rlp_list_header_len] ^= 0xFF;
    std::fs::write(&seg_path, &bytes).unwrap();

    // Rewriting the segment bumped its mtime past the index's; restore the
    // index's freshness so only the corruption is under test.
    let file = OpenOptions::new().write(true).open(&idx_path).unwrap();
    file.set_modified(std::time::SystemTime::now() + Duration::from_secs(60))
        .unwrap();

    snapshot.reopen_segment().unwrap();
    snapshot.reopen_index().unwrap();

    let completed = snapshot.for_each_header(|_| true).unwrap();
    assert!(!completed, "scan must abort at the corrupt word");

    assert!(snapshot.header_by_number(3).unwrap().is_none());
    let ten = snapshot.header_by_number(10).unwrap().unwrap();
    assert_eq!(ten.number, 10);
    assert!(snapshot
        .header_by_hash(&headers[10].hash_slow())
        .unwrap()
        .is_some());
}

// ---------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------

#[test]
fn test_body_by_number() {
    let dir = TempDir::new().unwrap();
    let (snapshot, bodies) = build_body_snapshot(&dir);

    let first = snapshot.body_by_number(1_500_000).unwrap().unwrap();
    assert_eq!(first, bodies[0]);
    assert_eq!(first.base_txn_id, 7_000_000);
    assert_eq!(first.txn_count, 3);

    let last = snapshot.body_by_number(1_500_999).unwrap().unwrap();
    assert_eq!(last.base_txn_id, 7_000_003);
    assert_eq!(last.txn_count, 5);

    assert!(snapshot.body_by_number(1_400_000).unwrap().is_none());
    assert!(snapshot.body_by_number(1_501_000).unwrap().is_none());
}

#[test]
fn test_compute_txs_amount() {
    let dir = TempDir::new().unwrap();
    let (snapshot, bodies) = build_body_snapshot(&dir);

    let (first_tx_id, total) = snapshot.compute_txs_amount().unwrap();
    assert_eq!((first_tx_id, total), (7_000_000, 8));

    // Agreement with the per-body sum.
    let sum: u64 = bodies.iter().map(|b| b.txn_count).sum();
    assert_eq!(total, sum);
}

#[test]
fn test_compute_txs_amount_empty_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = SnapshotPath::from(dir.path(), 1, 0, 1_000, SnapshotType::Bodies);
    SegmentWriter::create(path.path()).finish().unwrap();

    let mut snapshot = BodySnapshot::new(path).unwrap();
    snapshot.reopen_segment().unwrap();
    assert!(matches!(
        snapshot.compute_txs_amount(),
        Err(frostfile_snapshots::Error::EmptySnapshot(_))
    ));
}

#[test]
fn test_for_each_body_numbers_follow_positions() {
    let dir = TempDir::new().unwrap();
    let (snapshot, _) = build_body_snapshot(&dir);
    let mut expected = snapshot.snapshot().block_from();
    let completed = snapshot
        .for_each_body(|number, _| {
            assert_eq!(number, expected);
            expected += 1;
            true
        })
        .unwrap();
    assert!(completed);
    assert_eq!(expected, snapshot.snapshot().block_to());
}

// ---------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------

#[test]
fn test_txn_by_id_restores_sender() {
    let dir = TempDir::new().unwrap();
    let fixture = build_txn_snapshot(&dir);

    // Third transaction of the range starting at id 7000000.
    let txn = fixture.snapshot.txn_by_id(7_000_002).unwrap().unwrap();
    assert_eq!(txn.envelope.trie_hash(), fixture.envelopes[2].trie_hash());
    assert_eq!(txn.sender, Some(fixture.senders[2]));

    assert!(fixture.snapshot.txn_by_id(6_999_999).unwrap().is_none());
    assert!(fixture.snapshot.txn_by_id(7_000_008).unwrap().is_none());
}

#[test]
fn test_txn_by_hash_with_revalidation() {
    let dir = TempDir::new().unwrap();
    let fixture = build_txn_snapshot(&dir);

    for (i, envelope) in fixture.envelopes.iter().enumerate() {
        let hash = envelope.trie_hash();
        let txn = fixture.snapshot.txn_by_hash(&hash).unwrap().unwrap();
        assert_eq!(txn.envelope.trie_hash(), hash);
        assert_eq!(txn.sender, Some(fixture.senders[i]));
    }

    let foreign = keccak256(b"not a transaction");
    assert!(fixture.snapshot.txn_by_hash(&foreign).unwrap().is_none());
}

#[test]
fn test_txn_range_returns_exactly_count() {
    let dir = TempDir::new().unwrap();
    let fixture = build_txn_snapshot(&dir);

    let txns = fixture.snapshot.txn_range(7_000_000, 8, true).unwrap();
    assert_eq!(txns.len(), 8);
    for (i, txn) in txns.iter().enumerate() {
        assert_eq!(txn.envelope.trie_hash(), fixture.envelopes[i].trie_hash());
        assert_eq!(txn.sender, Some(fixture.senders[i]));
    }

    let without_senders = fixture.snapshot.txn_range(7_000_003, 2, false).unwrap();
    assert_eq!(without_senders.len(), 2);
    assert!(without_senders.iter().all(|t| t.sender.is_none()));
    assert_eq!(
        without_senders[0].envelope.trie_hash(),
        fixture.envelopes[3].trie_hash()
    );
}

#[test]
fn test_txn_rlp_range_agrees_with_txn_range() {
    let dir = TempDir::new().unwrap();
    let fixture = build_txn_snapshot(&dir);

    let payloads = fixture.snapshot.txn_rlp_range(7_000_000, 8).unwrap();
    let txns = fixture.snapshot.txn_range(7_000_000, 8, false).unwrap();
    assert_eq!(payloads.len(), txns.len());
    for (payload, txn) in payloads.iter().zip(&txns) {
        // The stripped payload is the EIP-2718 encoding of the same
        // transaction: legacy = RLP list, typed = type tag ‖ RLP.
        assert_eq!(payload, &txn.envelope.encoded_2718());
    }
}

#[test]
fn test_block_num_by_txn_hash() {
    let dir = TempDir::new().unwrap();
    let fixture = build_txn_snapshot(&dir);

    for (envelope, &block) in fixture.envelopes.iter().zip(&fixture.blocks) {
        let found = fixture
            .snapshot
            .block_num_by_txn_hash(&envelope.trie_hash())
            .unwrap();
        assert_eq!(found, Some(block));
    }

    let foreign = keccak256(b"missing");
    assert!(fixture
        .snapshot
        .block_num_by_txn_hash(&foreign)
        .unwrap()
        .is_none());
}

#[test]
fn test_txn_lookups_without_index_return_none() {
    let dir = TempDir::new().unwrap();
    let path = SnapshotPath::from(dir.path(), 1, 0, 1_000, SnapshotType::Transactions);
    SegmentWriter::create(path.path()).finish().unwrap();

    let mut snapshot = TransactionSnapshot::new(path).unwrap();
    snapshot.reopen_segment().unwrap();
    // No index files on disk at all.
    snapshot.reopen_index().unwrap();

    let hash = keccak256(b"anything");
    assert!(snapshot.txn_by_hash(&hash).unwrap().is_none());
    assert!(snapshot.txn_by_id(0).unwrap().is_none());
    assert!(snapshot.block_num_by_txn_hash(&hash).unwrap().is_none());
    assert!(snapshot.txn_range(0, 4, true).unwrap().is_empty());
}

#[test]
fn test_reopen_index_requires_open_segment() {
    let dir = TempDir::new().unwrap();
    let path = SnapshotPath::from(dir.path(), 1, 0, 1_000, SnapshotType::Headers);
    SegmentWriter::create(path.path()).finish().unwrap();

    let mut snapshot = HeaderSnapshot::new(path).unwrap();
    assert!(matches!(
        snapshot.reopen_index(),
        Err(frostfile_snapshots::Error::SegmentNotOpen)
    ));
}
