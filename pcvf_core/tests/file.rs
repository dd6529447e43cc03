//! Paged-file tests: logical/physical addressing, page checksums, header
//! patch-back, and corruption detection.
use std::io::{Read, Seek, SeekFrom, Write};

use pcvf_core::file::{PagedFile, PAGE_PAYLOAD, PAGE_SIZE};
use pcvf_core::format::FILE_HEADER_SIZE;
use pcvf_core::Error;

#[test]
fn logical_physical_translation() {
    let dir = tempfile::tempdir().unwrap();
    let file = PagedFile::create(dir.path().join("t.pcvf")).unwrap();

    assert_eq!(file.logical_to_physical(0), 0);
    assert_eq!(file.logical_to_physical(PAGE_PAYLOAD - 1), PAGE_PAYLOAD - 1);
    // First byte of the second page skips the first page's checksum.
    assert_eq!(file.logical_to_physical(PAGE_PAYLOAD), PAGE_SIZE);
    assert_eq!(
        file.logical_to_physical(5 * PAGE_PAYLOAD + 7),
        5 * PAGE_SIZE + 7
    );

    assert_eq!(file.physical_to_logical(PAGE_SIZE).unwrap(), PAGE_PAYLOAD);
    assert_eq!(
        file.physical_to_logical(5 * PAGE_SIZE + 7).unwrap(),
        5 * PAGE_PAYLOAD + 7
    );
    // An offset inside a checksum is not addressable.
    assert!(file.physical_to_logical(PAGE_PAYLOAD + 1).is_err());
}

#[test]
fn write_read_roundtrip_across_page_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.pcvf");
    let mut file = PagedFile::create(&path).unwrap();

    // Spans three pages.
    let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let logical = file.allocate_space(data.len() as u64, false).unwrap();
    assert_eq!(logical, FILE_HEADER_SIZE);
    file.seek(logical);
    file.write(&data).unwrap();
    file.close().unwrap();

    let mut reopened = PagedFile::open(&path).unwrap();
    let mut back = vec![0u8; data.len()];
    reopened.read_at(logical, &mut back).unwrap();
    assert_eq!(back, data);

    // File is whole pages.
    assert_eq!(reopened.physical_length() % PAGE_SIZE, 0);
}

#[test]
fn patch_back_into_reserved_region() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.pcvf");
    let mut file = PagedFile::create(&path).unwrap();

    let slot = file.allocate_space(32, true).unwrap();
    let tail = file.allocate_space(100, false).unwrap();
    file.seek(tail);
    file.write(&[0xABu8; 100]).unwrap();

    // Patch the earlier slot after later data landed.
    file.seek(slot);
    file.write(&[0xCDu8; 32]).unwrap();
    file.close().unwrap();

    let mut reopened = PagedFile::open(&path).unwrap();
    let mut patched = [0u8; 32];
    reopened.read_at(slot, &mut patched).unwrap();
    assert_eq!(patched, [0xCDu8; 32]);
    let mut kept = [0u8; 100];
    reopened.read_at(tail, &mut kept).unwrap();
    assert_eq!(kept, [0xABu8; 100]);
}

#[test]
fn corrupted_page_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.pcvf");
    let mut file = PagedFile::create(&path).unwrap();
    let logical = file.allocate_space(2000, false).unwrap();
    file.seek(logical);
    file.write(&vec![7u8; 2000]).unwrap();
    file.close().unwrap();

    // Flip one payload byte in the second page behind the checksum's back.
    let mut raw = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .unwrap();
    raw.seek(SeekFrom::Start(PAGE_SIZE + 10)).unwrap();
    let mut byte = [0u8; 1];
    raw.read_exact(&mut byte).unwrap();
    byte[0] ^= 0xFF;
    raw.seek(SeekFrom::Start(PAGE_SIZE + 10)).unwrap();
    raw.write_all(&byte).unwrap();
    raw.sync_all().unwrap();

    let mut reopened = PagedFile::open(&path).unwrap();
    let mut back = vec![0u8; 2000];
    let err = reopened.read_at(logical, &mut back).unwrap_err();
    assert!(matches!(err, Error::BadChecksum { page: 1 }));
}

#[test]
fn open_rejects_non_pcvf_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bogus.pcvf");

    // Right page granularity, wrong magic.
    std::fs::write(&path, vec![0u8; PAGE_SIZE as usize]).unwrap();
    assert!(matches!(
        PagedFile::open(&path),
        Err(Error::BadChecksum { .. }) | Err(Error::BadFileHeader(_))
    ));

    // Not even page-aligned.
    std::fs::write(&path, b"short").unwrap();
    assert!(matches!(
        PagedFile::open(&path),
        Err(Error::BadFileHeader(_))
    ));
}

#[test]
fn header_round_trips_through_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.pcvf");
    let mut file = PagedFile::create(&path).unwrap();
    file.allocate_space(500, false).unwrap();
    file.seek(FILE_HEADER_SIZE);
    file.write(&vec![1u8; 500]).unwrap();
    file.close().unwrap();
    // Close twice is fine.
    file.close().unwrap();

    let reopened = PagedFile::open(&path).unwrap();
    assert_eq!(reopened.section_logical_start(), 0);
    assert_eq!(reopened.record_count(), 0);
    assert_eq!(reopened.physical_length(), PAGE_SIZE);
}
