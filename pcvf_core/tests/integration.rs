//! End-to-end tests of the compressed-vector write pipeline: construct a
//! writer against a paged file, append records, close, then reopen the file
//! and walk the section back, decoding every bytestream.
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use pcvf_codecs::{decode_bytestream, DecodedColumn, StandardEncoderFactory};
use pcvf_core::format::{DATA_PACKET_HEADER_SIZE, TARGET_PACKET_SIZE};
use pcvf_core::reader::{PacketKind, SectionReader};
use pcvf_core::{
    BufferValues, CompressedVectorNode, CompressedVectorWriter, Error, PagedFile, ProtoNode,
    Prototype, SourceBuffer,
};

fn new_file(dir: &tempfile::TempDir, name: &str) -> Rc<RefCell<PagedFile>> {
    Rc::new(RefCell::new(
        PagedFile::create(dir.path().join(name)).unwrap(),
    ))
}

fn close_file(file: &Rc<RefCell<PagedFile>>) {
    file.borrow_mut().close().unwrap();
}

fn read_back(path: &Path) -> (PagedFile, pcvf_core::SectionContents) {
    let mut file = PagedFile::open(path).unwrap();
    let section_start = file.section_logical_start();
    assert_ne!(section_start, 0, "file header should locate the section");
    let contents = SectionReader::new(&mut file, section_start)
        .read_section()
        .unwrap();
    (file, contents)
}

// ── scenarios ──────────────────────────────────────────────────────────────

/// Empty write: one `write(0)` still produces a data packet (header plus
/// padding, 8 bytes) so the section header has something to point at.
#[test]
fn empty_write_emits_header_only_packet() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "empty.pcvf");
    let proto = Prototype::new(vec![ProtoNode::integer("intensity", 0, 1000)]);
    let node = CompressedVectorNode::new(proto, file.clone());

    let buffers = vec![SourceBuffer::integers("intensity", vec![])];
    let mut writer =
        CompressedVectorWriter::new(node.clone(), buffers, &StandardEncoderFactory).unwrap();
    writer.write(0).unwrap();
    writer.close().unwrap();
    close_file(&file);

    assert_eq!(node.record_count(), 0);

    let (file, contents) = read_back(&dir.path().join("empty.pcvf"));
    assert_eq!(contents.data_packet_count, 1);
    assert_eq!(contents.packets.len(), 2); // one data + one index
    assert_eq!(contents.packets[0].kind, PacketKind::Data);
    assert_eq!(contents.packets[0].length, DATA_PACKET_HEADER_SIZE + 2);
    assert_eq!(contents.packets[0].bytestream_count, 0);
    assert_eq!(
        contents.header.data_physical_offset,
        file.logical_to_physical(contents.packets[0].logical_offset)
    );
    assert_eq!(file.record_count(), 0);
}

/// Single-packet write: three int32-style fields, 100 records.
#[test]
fn single_packet_three_fields() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "three.pcvf");
    let proto = Prototype::new(vec![
        ProtoNode::integer("x", -1000, 1000),
        ProtoNode::integer("y", -1000, 1000),
        ProtoNode::integer("z", -1000, 1000),
    ]);
    let node = CompressedVectorNode::new(proto.clone(), file.clone());

    let xs: Vec<i64> = (0..100).map(|i| i - 50).collect();
    let ys: Vec<i64> = (0..100).map(|i| i * 7 % 1000).collect();
    let zs: Vec<i64> = (0..100).map(|i| -i).collect();
    let buffers = vec![
        SourceBuffer::integers("x", xs.clone()),
        SourceBuffer::integers("y", ys.clone()),
        SourceBuffer::integers("z", zs.clone()),
    ];

    let mut writer =
        CompressedVectorWriter::new(node.clone(), buffers, &StandardEncoderFactory).unwrap();
    writer.write(100).unwrap();
    assert_eq!(writer.record_count(), 100);
    writer.close().unwrap();
    close_file(&file);

    assert_eq!(node.record_count(), 100);

    let (file, contents) = read_back(&dir.path().join("three.pcvf"));
    assert_eq!(file.record_count(), 100);
    assert_eq!(contents.data_packet_count, 1);
    assert_eq!(contents.packets[0].bytestream_count, 3);
    assert_eq!(contents.bytestreams.len(), 3);

    let proto_fields = [("x", &xs), ("y", &ys), ("z", &zs)];
    for (i, (path, expected)) in proto_fields.iter().enumerate() {
        let field = proto.field(path).unwrap();
        let decoded = decode_bytestream(field, &contents.bytestreams[i], 100).unwrap();
        assert_eq!(decoded, DecodedColumn::Integer((*expected).clone()));
    }
}

/// Multi-packet pacing: enough records that the 75% fill threshold emits
/// many packets, each well formed, with the packet count near
/// total_payload / TARGET_PACKET_SIZE.
#[test]
fn multi_packet_pacing() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "pacing.pcvf");
    // 20 bits per value per stream.
    let proto = Prototype::new(vec![
        ProtoNode::integer("a", 0, (1 << 20) - 1),
        ProtoNode::integer("b", 0, (1 << 20) - 1),
    ]);
    let node = CompressedVectorNode::new(proto, file.clone());

    const TOTAL: u64 = 1_000_000;
    const BATCH: u64 = 50_000;

    let a = SourceBuffer::integers("a", vec![]);
    let b = SourceBuffer::integers("b", vec![]);
    let mut writer = CompressedVectorWriter::new(
        node,
        vec![a.clone(), b.clone()],
        &StandardEncoderFactory,
    )
    .unwrap();

    let mask = (1u64 << 20) - 1;
    for batch in 0..TOTAL / BATCH {
        let start = batch * BATCH;
        let values: Vec<i64> = (start..start + BATCH)
            .map(|i| (i.wrapping_mul(2654435761) & mask) as i64)
            .collect();
        a.refill(BufferValues::Integer(values.clone())).unwrap();
        b.refill(BufferValues::Integer(values)).unwrap();
        writer.write(BATCH).unwrap();
    }
    writer.close().unwrap();
    close_file(&file);

    let (_, contents) = read_back(&dir.path().join("pacing.pcvf"));

    // 2 streams × 20 bits × 1M records = 5 MB of stream payload.
    let total_payload: usize = contents.bytestreams.iter().map(|s| s.len()).sum();
    assert_eq!(total_payload, 2 * (TOTAL as usize * 20).div_ceil(8));

    let expected_packets = total_payload.div_ceil(TARGET_PACKET_SIZE) as i64;
    let got_packets = contents.data_packet_count as i64;
    assert!(
        (got_packets - expected_packets).abs() <= 1,
        "expected about {expected_packets} data packets, got {got_packets}"
    );

    // Every packet: multiple of 4, bounded, data before the single index.
    for packet in &contents.packets {
        assert_eq!(packet.length % 4, 0);
        assert!(packet.length <= pcvf_core::DATA_PACKET_MAX);
    }
    assert_eq!(
        contents
            .packets
            .iter()
            .filter(|p| p.kind == PacketKind::Index)
            .count(),
        1
    );
}

/// A write larger than a buffer's capacity is rejected and leaves the
/// writer usable.
#[test]
fn oversized_write_is_rejected_writer_survives() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "oversized.pcvf");
    let proto = Prototype::new(vec![ProtoNode::integer("v", 0, 255)]);
    let node = CompressedVectorNode::new(proto.clone(), file.clone());

    let buffer = SourceBuffer::integers("v", (0..10).collect());
    let mut writer =
        CompressedVectorWriter::new(node, vec![buffer], &StandardEncoderFactory).unwrap();

    assert!(matches!(
        writer.write(11),
        Err(Error::BadApiArgument(_))
    ));

    // Writer is still open and a write within capacity succeeds.
    assert!(writer.is_open());
    writer.write(5).unwrap();
    writer.close().unwrap();
    close_file(&file);

    let (file, contents) = read_back(&dir.path().join("oversized.pcvf"));
    assert_eq!(file.record_count(), 5);
    let decoded =
        decode_bytestream(proto.field("v").unwrap(), &contents.bytestreams[0], 5).unwrap();
    assert_eq!(decoded, DecodedColumn::Integer((0..5).collect()));
}

/// Re-binding with a differently shaped buffer set is rejected.
#[test]
fn incompatible_rebind_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "rebind.pcvf");
    let proto = Prototype::new(vec![
        ProtoNode::integer("x", 0, 100),
        ProtoNode::integer("y", 0, 100),
        ProtoNode::integer("z", 0, 100),
    ]);
    let node = CompressedVectorNode::new(proto, file.clone());

    let buffers = vec![
        SourceBuffer::integers("x", vec![1, 2]),
        SourceBuffer::integers("y", vec![3, 4]),
        SourceBuffer::integers("z", vec![5, 6]),
    ];
    let mut writer =
        CompressedVectorWriter::new(node, buffers, &StandardEncoderFactory).unwrap();

    // Two buffers instead of three.
    let fewer = vec![
        SourceBuffer::integers("x", vec![1, 2]),
        SourceBuffer::integers("y", vec![3, 4]),
    ];
    assert!(matches!(
        writer.write_with(&fewer, 2),
        Err(Error::BuffersNotCompatible(_))
    ));

    // Same shape but a path swapped.
    let renamed = vec![
        SourceBuffer::integers("x", vec![1, 2]),
        SourceBuffer::integers("z", vec![3, 4]),
        SourceBuffer::integers("y", vec![5, 6]),
    ];
    assert!(matches!(
        writer.write_with(&renamed, 2),
        Err(Error::BuffersNotCompatible(_))
    ));

    writer.write(2).unwrap();
    writer.close().unwrap();
    close_file(&file);
}

/// `close` is idempotent: the second call is a no-op and the file does not
/// change.
#[test]
fn close_after_close_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "close.pcvf");
    let proto = Prototype::new(vec![ProtoNode::integer("v", 0, 7)]);
    let node = CompressedVectorNode::new(proto, file.clone());

    let buffer = SourceBuffer::integers("v", vec![1, 2, 3]);
    let mut writer =
        CompressedVectorWriter::new(node, vec![buffer], &StandardEncoderFactory).unwrap();
    writer.write(3).unwrap();
    writer.close().unwrap();

    let frontier = file.borrow().unused_logical_start();
    let length = file.borrow().physical_length();

    writer.close().unwrap();
    assert_eq!(file.borrow().unused_logical_start(), frontier);
    assert_eq!(file.borrow().physical_length(), length);
    assert!(!writer.is_open());

    // Write after close is rejected.
    assert!(matches!(writer.write(1), Err(Error::WriterNotOpen)));

    close_file(&file);
}

// ── round-trip & lifecycle ─────────────────────────────────────────────────

/// Append-then-read over a mixed-type prototype with nested structure:
/// every decoded column equals the written values (exactly, for lossless
/// codecs; quantized values are chosen to be representable).
#[test]
fn mixed_prototype_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "mixed.pcvf");
    let proto = Prototype::new(vec![
        ProtoNode::scaled_integer("cartesianX", -400_000, 400_000, 0.001, 0.0),
        ProtoNode::integer("intensity", 0, 4095),
        ProtoNode::structure(
            "color",
            vec![
                ProtoNode::integer("red", 0, 255),
                ProtoNode::integer("green", 0, 255),
            ],
        ),
        ProtoNode::double("timestamp"),
        ProtoNode::string("label"),
    ]);
    let node = CompressedVectorNode::new(proto.clone(), file.clone());

    const N: usize = 257;
    let xs: Vec<f64> = (0..N).map(|i| (i as f64 - 128.0) * 0.125).collect();
    let intensities: Vec<i64> = (0..N).map(|i| (i * 17 % 4096) as i64).collect();
    let reds: Vec<i64> = (0..N).map(|i| (i % 256) as i64).collect();
    let greens: Vec<i64> = (0..N).map(|i| (255 - i % 256) as i64).collect();
    let stamps: Vec<f64> = (0..N).map(|i| 1.7e9 + i as f64 * 0.01).collect();
    let labels: Vec<String> = (0..N).map(|i| format!("pt{i}")).collect();

    // Buffers supplied out of prototype order on purpose; the writer must
    // reorder streams by bytestream number.
    let buffers = vec![
        SourceBuffer::strings("label", labels.clone()),
        SourceBuffer::integers("color/green", greens.clone()),
        SourceBuffer::reals("cartesianX", xs.clone()),
        SourceBuffer::reals("timestamp", stamps.clone()),
        SourceBuffer::integers("intensity", intensities.clone()),
        SourceBuffer::integers("color/red", reds.clone()),
    ];

    let mut writer =
        CompressedVectorWriter::new(node, buffers, &StandardEncoderFactory).unwrap();
    writer.write(N as u64).unwrap();
    writer.close().unwrap();
    close_file(&file);

    let (file, contents) = read_back(&dir.path().join("mixed.pcvf"));
    assert_eq!(file.record_count(), N as u64);
    assert_eq!(contents.bytestreams.len(), 6);

    // Streams come back in depth-first prototype order.
    let expect: Vec<(&str, DecodedColumn)> = vec![
        ("cartesianX", DecodedColumn::Real(xs)),
        ("intensity", DecodedColumn::Integer(intensities)),
        ("color/red", DecodedColumn::Integer(reds)),
        ("color/green", DecodedColumn::Integer(greens)),
        ("timestamp", DecodedColumn::Real(stamps)),
        ("label", DecodedColumn::Str(labels)),
    ];
    for (i, (path, expected)) in expect.iter().enumerate() {
        let field = proto.field(path).unwrap();
        let decoded =
            decode_bytestream(field, &contents.bytestreams[i], N as u64).unwrap();
        assert_eq!(&decoded, expected, "column '{path}'");
    }
}

/// Records accumulate across multiple writes through refilled buffers.
#[test]
fn records_accumulate_across_writes() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "accumulate.pcvf");
    let proto = Prototype::new(vec![ProtoNode::integer("v", 0, 1023)]);
    let node = CompressedVectorNode::new(proto.clone(), file.clone());

    let buffer = SourceBuffer::integers("v", vec![]);
    let mut writer =
        CompressedVectorWriter::new(node.clone(), vec![buffer.clone()], &StandardEncoderFactory)
            .unwrap();

    let mut all = Vec::new();
    for batch in 0..4u64 {
        let values: Vec<i64> = (0..10).map(|i| (batch * 100 + i) as i64 % 1024).collect();
        all.extend(values.clone());
        buffer.refill(BufferValues::Integer(values)).unwrap();
        writer.write(10).unwrap();
    }
    assert_eq!(writer.record_count(), 40);
    writer.close().unwrap();
    close_file(&file);

    assert_eq!(node.record_count(), 40);
    let (_, contents) = read_back(&dir.path().join("accumulate.pcvf"));
    let decoded =
        decode_bytestream(proto.field("v").unwrap(), &contents.bytestreams[0], 40).unwrap();
    assert_eq!(decoded, DecodedColumn::Integer(all));
}

/// A constant field (min == max) occupies zero bits on disk and decodes
/// back to the constant.
#[test]
fn constant_field_uses_zero_bits() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "constant.pcvf");
    let proto = Prototype::new(vec![
        ProtoNode::integer("flag", 7, 7),
        ProtoNode::integer("v", 0, 15),
    ]);
    let node = CompressedVectorNode::new(proto.clone(), file.clone());

    let buffers = vec![
        SourceBuffer::integers("flag", vec![7; 20]),
        SourceBuffer::integers("v", (0..20).map(|i| i % 16).collect()),
    ];
    let mut writer =
        CompressedVectorWriter::new(node, buffers, &StandardEncoderFactory).unwrap();
    writer.write(20).unwrap();
    writer.close().unwrap();
    close_file(&file);

    let (_, contents) = read_back(&dir.path().join("constant.pcvf"));
    assert!(contents.bytestreams[0].is_empty(), "constant stream is empty");
    let decoded =
        decode_bytestream(proto.field("flag").unwrap(), &contents.bytestreams[0], 20).unwrap();
    assert_eq!(decoded, DecodedColumn::Integer(vec![7; 20]));
}

/// Closing a writer that never wrote still yields a decodable section:
/// close inserts the guaranteeing zero-record packet itself.
#[test]
fn close_without_writes_still_emits_data_packet() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "nowrites.pcvf");
    let proto = Prototype::new(vec![ProtoNode::integer("v", 0, 1)]);
    let node = CompressedVectorNode::new(proto, file.clone());

    let buffer = SourceBuffer::integers("v", vec![]);
    let mut writer =
        CompressedVectorWriter::new(node, vec![buffer], &StandardEncoderFactory).unwrap();
    writer.close().unwrap();
    close_file(&file);

    let (file, contents) = read_back(&dir.path().join("nowrites.pcvf"));
    assert_eq!(file.record_count(), 0);
    assert_eq!(contents.data_packet_count, 1);
    assert_eq!(contents.packets[0].bytestream_count, 0);
}

/// A value outside its declared range aborts the write.
#[test]
fn out_of_range_value_aborts_write() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "range.pcvf");
    let proto = Prototype::new(vec![ProtoNode::integer("v", 0, 10)]);
    let node = CompressedVectorNode::new(proto, file.clone());

    let buffer = SourceBuffer::integers("v", vec![5, 99]);
    let mut writer =
        CompressedVectorWriter::new(node, vec![buffer], &StandardEncoderFactory).unwrap();
    assert!(matches!(
        writer.write(2),
        Err(Error::ValueOutOfRange(_))
    ));

    writer.close().unwrap();
    close_file(&file);
}

/// Construction rejects an empty buffer set and buffer sets that do not
/// cover the prototype exactly.
#[test]
fn construction_validates_buffer_set() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "construct.pcvf");
    let proto = Prototype::new(vec![
        ProtoNode::integer("x", 0, 100),
        ProtoNode::integer("y", 0, 100),
    ]);
    let node = CompressedVectorNode::new(proto, file.clone());

    assert!(matches!(
        CompressedVectorWriter::new(node.clone(), vec![], &StandardEncoderFactory),
        Err(Error::BadApiArgument(_))
    ));

    // Missing field.
    assert!(matches!(
        CompressedVectorWriter::new(
            node.clone(),
            vec![SourceBuffer::integers("x", vec![])],
            &StandardEncoderFactory
        ),
        Err(Error::BuffersNotCompatible(_))
    ));

    // Duplicate field.
    assert!(matches!(
        CompressedVectorWriter::new(
            node.clone(),
            vec![
                SourceBuffer::integers("x", vec![]),
                SourceBuffer::integers("x", vec![]),
            ],
            &StandardEncoderFactory
        ),
        Err(Error::BuffersNotCompatible(_))
    ));

    // Unknown extra field.
    assert!(matches!(
        CompressedVectorWriter::new(
            node.clone(),
            vec![
                SourceBuffer::integers("x", vec![]),
                SourceBuffer::integers("y", vec![]),
                SourceBuffer::integers("w", vec![]),
            ],
            &StandardEncoderFactory
        ),
        Err(Error::BuffersNotCompatible(_))
    ));

    // Wrong value kind for the field type.
    assert!(matches!(
        CompressedVectorWriter::new(
            node,
            vec![
                SourceBuffer::reals("x", vec![]),
                SourceBuffer::integers("y", vec![]),
            ],
            &StandardEncoderFactory
        ),
        Err(Error::BuffersNotCompatible(_))
    ));
}

/// A node's section can be written exactly once; file close is rejected
/// while a writer is open.
#[test]
fn single_section_per_node_and_writer_counting() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "once.pcvf");
    let proto = Prototype::new(vec![ProtoNode::integer("v", 0, 3)]);
    let node = CompressedVectorNode::new(proto, file.clone());

    let buffer = SourceBuffer::integers("v", vec![1]);
    let mut writer =
        CompressedVectorWriter::new(node.clone(), vec![buffer.clone()], &StandardEncoderFactory)
            .unwrap();

    // File refuses to close under an open writer.
    assert!(matches!(
        file.borrow_mut().close(),
        Err(Error::OpenWriter(1))
    ));

    writer.write(1).unwrap();
    writer.close().unwrap();

    // Second writer on the same node is rejected.
    assert!(matches!(
        CompressedVectorWriter::new(node, vec![buffer], &StandardEncoderFactory),
        Err(Error::BadApiArgument(_))
    ));

    close_file(&file);
}

/// Dropping an open writer closes the section (drop guard path).
#[test]
fn drop_closes_open_writer() {
    let dir = tempfile::tempdir().unwrap();
    let file = new_file(&dir, "dropped.pcvf");
    let proto = Prototype::new(vec![ProtoNode::integer("v", 0, 63)]);
    let node = CompressedVectorNode::new(proto.clone(), file.clone());

    {
        let buffer = SourceBuffer::integers("v", (0..30).collect());
        let mut writer =
            CompressedVectorWriter::new(node.clone(), vec![buffer], &StandardEncoderFactory)
                .unwrap();
        writer.write(30).unwrap();
        // No explicit close; the drop guard must finish the section.
    }

    assert!(node.is_written());
    assert_eq!(node.record_count(), 30);
    close_file(&file);

    let (_, contents) = read_back(&dir.path().join("dropped.pcvf"));
    let decoded =
        decode_bytestream(proto.field("v").unwrap(), &contents.bytestreams[0], 30).unwrap();
    assert_eq!(decoded, DecodedColumn::Integer((0..30).collect()));
}
