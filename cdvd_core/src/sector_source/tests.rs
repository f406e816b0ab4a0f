// SPDX-License-Identifier: GPL-3.0
// tests.rs - Copyright Phillip Potter, 2026, under GPLv3 only.

use super::{
    SectorSource, SourceError, SourceKind,
    block_dump_source::{BlockDumpHeader, BlockDumpSectorSource, BlockDumpWriter},
    compressed_source::{CompressedIndexedSectorSource, CompressedSourceConfig, index::CompressionIndex},
    flat_source::FlatSectorSource,
    multipart_source::MultipartSectorSource,
};
use flate2::{Compression, write::GzEncoder};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

// Tests for the sector sources.

/// Builds an image where every byte is a function of its offset, so any
/// misplaced read shows up.
fn patterned_image(length: usize) -> Vec<u8> {
    (0..length).map(|i| ((i * 7 + i / 251) % 256) as u8).collect()
}

fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {

    let path = dir.path().join(name);
    fs::write(&path, data).unwrap();
    path
}

/// Gzips `data`, forcing a deflate block boundary after every `flush_every`
/// bytes so the index has somewhere to place checkpoints.
fn gzip_with_boundaries(data: &[u8], flush_every: usize) -> Vec<u8> {

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for piece in data.chunks(flush_every) {
        encoder.write_all(piece).unwrap();
        encoder.flush().unwrap();
    }
    encoder.finish().unwrap()
}

fn open_compressed(path: &Path, span: u64) -> CompressedIndexedSectorSource {

    let config = CompressedSourceConfig {
        span,
        cached_chunks: 4,
    };
    CompressedIndexedSectorSource::open(path, config).unwrap()
}

#[test]
fn test_flat_read_returns_requested_blocks() {

    let dir = TempDir::new().unwrap();
    let image = patterned_image(2048 * 20);
    let path = write_file(&dir, "game.iso", &image);

    let mut source = FlatSectorSource::open(&path).unwrap();
    assert_eq!(source.kind(), SourceKind::Flat);
    assert_eq!(source.block_count(), 20);

    // Reading blocks 3 and 4 should give exactly those bytes.
    let mut buffer = vec![0u8; 2048 * 2];
    let read = source.read_sync(&mut buffer, 3, 2).unwrap();
    assert_eq!(read, 4096);
    assert_eq!(&buffer[..], &image[3 * 2048..5 * 2048]);
}

#[test]
fn test_flat_negative_offset_zero_fills() {

    let dir = TempDir::new().unwrap();
    let image = patterned_image(2352 * 4);
    let path = write_file(&dir, "game.bin", &image);

    let mut source = FlatSectorSource::open(&path).unwrap();
    source.set_block_size(2352);
    source.set_data_offset(-8);

    // Block 0 should start with 8 zero bytes, followed by the file start.
    let mut buffer = vec![0xAAu8; 2352];
    source.read_sync(&mut buffer, 0, 1).unwrap();
    assert!(buffer[..8].iter().all(|&b| b == 0));
    assert_eq!(&buffer[8..], &image[..2352 - 8]);
}

#[test]
fn test_flat_out_of_range_is_rejected() {

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "small.iso", &patterned_image(2048 * 4));
    let mut source = FlatSectorSource::open(&path).unwrap();

    let result = source.submit_read(3, 2);
    assert!(matches!(result, Err(SourceError::OutOfRange { first: 3, end: 5, count: 4 })));

    let result = source.submit_read(0, 0);
    assert!(matches!(result, Err(SourceError::OutOfRange { .. })));
}

#[test]
fn test_flat_missing_file_reports_not_found() {

    let dir = TempDir::new().unwrap();
    let result = FlatSectorSource::open(&dir.path().join("nothing.iso"));
    assert!(matches!(result, Err(SourceError::NotFound(_))));
}

#[test]
fn test_flat_only_one_read_outstanding() {

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "game.iso", &patterned_image(2048 * 4));
    let mut source = FlatSectorSource::open(&path).unwrap();

    source.submit_read(0, 1).unwrap();
    assert!(matches!(source.submit_read(1, 1), Err(SourceError::ReadPending)));

    let mut buffer = vec![0u8; 2048];
    source.await_read(&mut buffer).unwrap();
    assert!(matches!(source.await_read(&mut buffer), Err(SourceError::NoReadPending)));
}

#[test]
fn test_flat_cancel_discards_result() {

    let dir = TempDir::new().unwrap();
    let image = patterned_image(2048 * 8);
    let path = write_file(&dir, "game.iso", &image);
    let mut source = FlatSectorSource::open(&path).unwrap();

    // Cancelling with nothing outstanding should be a no-op.
    source.cancel_read();

    // A cancelled read must never show up in a later await.
    source.submit_read(1, 1).unwrap();
    source.cancel_read();

    let mut buffer = vec![0u8; 2048];
    source.read_sync(&mut buffer, 6, 1).unwrap();
    assert_eq!(&buffer[..], &image[6 * 2048..7 * 2048]);
}

#[test]
fn test_flat_truncated_file_reports_short_read() {

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "shrinking.iso", &patterned_image(2048 * 4));
    let mut source = FlatSectorSource::open(&path).unwrap();

    // Shrink the file behind the source's back.
    fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(2048 * 3 + 100)
        .unwrap();

    let mut buffer = vec![0u8; 2048];
    let result = source.read_sync(&mut buffer, 3, 1);
    assert!(matches!(result, Err(SourceError::ShortRead { expected: 2048, actual: 100 })));
}

#[test]
fn test_flat_small_destination_is_rejected() {

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "game.iso", &patterned_image(2048 * 4));
    let mut source = FlatSectorSource::open(&path).unwrap();

    let mut buffer = vec![0u8; 100];
    let result = source.read_sync(&mut buffer, 0, 1);
    assert!(matches!(result, Err(SourceError::BufferTooSmall { expected: 2048, actual: 100 })));
}

#[test]
fn test_block_dump_written_sectors_read_back() {

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("capture.dump");
    let header = BlockDumpHeader {
        block_size: 2352,
        block_count: 1000,
        block_offset: 0,
    };

    // Capture sectors 16 and 17 out of order, then 16 again with other data.
    let first = vec![0x16u8; 2352];
    let second = vec![0x17u8; 2352];
    let mut writer = BlockDumpWriter::create(&path, header).unwrap();
    writer.write_sector(17, &second).unwrap();
    writer.write_sector(16, &first).unwrap();
    writer.write_sector(16, &vec![0xEEu8; 2352]).unwrap();
    assert_eq!(writer.written(), 3);
    writer.finish().unwrap();

    let mut source = BlockDumpSectorSource::open(&path).unwrap();
    assert_eq!(source.kind(), SourceKind::BlockDump);
    assert_eq!(source.header(), header);
    assert_eq!(source.block_count(), 1000);
    assert_eq!(source.captured_count(), 2);

    // Both sectors in one read, with the first capture of 16 winning.
    let mut buffer = vec![0u8; 2352 * 2];
    source.read_sync(&mut buffer, 16, 2).unwrap();
    assert_eq!(&buffer[..2352], &first[..]);
    assert_eq!(&buffer[2352..], &second[..]);
}

#[test]
fn test_block_dump_missing_sector_is_distinct_error() {

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("capture.dump");
    let header = BlockDumpHeader {
        block_size: 2048,
        block_count: 100,
        block_offset: 0,
    };

    let mut writer = BlockDumpWriter::create(&path, header).unwrap();
    writer.write_sector(5, &[1u8; 2048]).unwrap();
    writer.finish().unwrap();

    let mut source = BlockDumpSectorSource::open(&path).unwrap();
    assert!(source.contains(5));
    assert!(!source.contains(6));

    let mut buffer = vec![0u8; 2048];
    let result = source.read_sync(&mut buffer, 6, 1);
    assert!(matches!(result, Err(SourceError::SectorNotCaptured(6))));
}

#[test]
fn test_block_dump_rejects_ragged_length() {

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("capture.dump");
    let header = BlockDumpHeader {
        block_size: 2048,
        block_count: 10,
        block_offset: 0,
    };

    let mut writer = BlockDumpWriter::create(&path, header).unwrap();
    writer.write_sector(0, &[0u8; 2048]).unwrap();
    writer.finish().unwrap();

    // Chop a few bytes off the single record.
    let length = fs::metadata(&path).unwrap().len();
    fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(length - 3)
        .unwrap();

    let result = BlockDumpSectorSource::open(&path);
    assert!(matches!(result, Err(SourceError::InvalidFormat(_))));
}

#[test]
fn test_block_dump_records_must_lie_inside_the_disc() {

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("capture.dump");
    let header = BlockDumpHeader {
        block_size: 2048,
        block_count: 10,
        block_offset: 0,
    };

    let mut writer = BlockDumpWriter::create(&path, header).unwrap();
    assert!(matches!(
        writer.write_sector(10, &[0u8; 2048]),
        Err(SourceError::OutOfRange { .. })
    ));
    writer.write_sector(9, &[0u8; 2048]).unwrap();
    writer.finish().unwrap();
    assert!(BlockDumpSectorSource::open(&path).is_ok());

    // Retag the only record with a sector past the end of the disc.
    let mut bytes = fs::read(&path).unwrap();
    bytes[16..20].copy_from_slice(&12u32.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    let result = BlockDumpSectorSource::open(&path);
    assert!(matches!(result, Err(SourceError::InvalidFormat(_))));
}

#[test]
fn test_block_dump_writer_rejects_wrong_payload_size() {

    let dir = TempDir::new().unwrap();
    let header = BlockDumpHeader {
        block_size: 2048,
        block_count: 10,
        block_offset: 0,
    };

    let mut writer = BlockDumpWriter::create(&dir.path().join("capture.dump"), header).unwrap();
    let result = writer.write_sector(0, &[0u8; 2352]);
    assert!(matches!(result, Err(SourceError::InvalidFormat(_))));
}

#[test]
fn test_block_dump_detect_restores_block_size() {

    let dir = TempDir::new().unwrap();

    // A plain image should be left as it was found.
    let plain_path = write_file(&dir, "game.iso", &patterned_image(2048 * 2));
    let mut plain = FlatSectorSource::open(&plain_path).unwrap();
    plain.set_block_size(2352);
    assert!(!BlockDumpSectorSource::detect(&mut plain).unwrap());
    assert_eq!(plain.block_size(), 2352);

    // A blockdump should be recognised.
    let dump_path = dir.path().join("capture.dump");
    let header = BlockDumpHeader {
        block_size: 2048,
        block_count: 1,
        block_offset: 0,
    };
    BlockDumpWriter::create(&dump_path, header).unwrap().finish().unwrap();

    let mut dump = FlatSectorSource::open(&dump_path).unwrap();
    assert!(BlockDumpSectorSource::detect(&mut dump).unwrap());
}

#[test]
fn test_multipart_discovery_and_split_read() {

    let dir = TempDir::new().unwrap();
    let image = patterned_image(2048 * 30);

    // Split the image across game.iso, game.i00 and game.i01.
    write_file(&dir, "game.iso", &image[..2048 * 10]);
    write_file(&dir, "game.i00", &image[2048 * 10..2048 * 22]);
    write_file(&dir, "game.i01", &image[2048 * 22..]);

    let first = FlatSectorSource::open(&dir.path().join("game.iso")).unwrap();
    let mut source = MultipartSectorSource::discover(first).unwrap();
    assert_eq!(source.kind(), SourceKind::Multipart);
    assert_eq!(source.block_count(), 30);

    // A read straddling all three parts equals the contiguous image.
    let mut buffer = vec![0u8; 2048 * 16];
    source.read_sync(&mut buffer, 8, 16).unwrap();
    assert_eq!(&buffer[..], &image[2048 * 8..2048 * 24]);
}

#[test]
fn test_multipart_numbering_starts_at_one_for_00_extension() {

    let dir = TempDir::new().unwrap();
    let image = patterned_image(2048 * 6);

    write_file(&dir, "game.i00", &image[..2048 * 3]);
    write_file(&dir, "game.i01", &image[2048 * 3..]);

    let first = FlatSectorSource::open(&dir.path().join("game.i00")).unwrap();
    let mut source = MultipartSectorSource::discover(first).unwrap();
    assert_eq!(source.block_count(), 6);

    let mut buffer = vec![0u8; 2048 * 6];
    source.read_sync(&mut buffer, 0, 6).unwrap();
    assert_eq!(buffer, image);
}

#[test]
fn test_multipart_cancel_reaches_every_spanned_part() {

    let dir = TempDir::new().unwrap();
    let image = patterned_image(2048 * 30);

    write_file(&dir, "game.iso", &image[..2048 * 10]);
    write_file(&dir, "game.i00", &image[2048 * 10..2048 * 22]);
    write_file(&dir, "game.i01", &image[2048 * 22..]);

    let first = FlatSectorSource::open(&dir.path().join("game.iso")).unwrap();
    let mut source = MultipartSectorSource::discover(first).unwrap();

    // Nothing outstanding yet.
    source.cancel_read();

    // Blocks 8 to 11 straddle the first two parts.
    source.submit_read(8, 4).unwrap();
    source.cancel_read();

    let mut buffer = vec![0u8; 2048 * 4];
    assert!(matches!(source.await_read(&mut buffer), Err(SourceError::NoReadPending)));

    // Both parts take a fresh read straight away.
    source.submit_read(9, 4).unwrap();
    assert_eq!(source.await_read(&mut buffer).unwrap(), 2048 * 4);
    assert_eq!(&buffer[..], &image[2048 * 9..2048 * 13]);

    source.read_sync(&mut buffer, 12, 4).unwrap();
    assert_eq!(&buffer[..], &image[2048 * 12..2048 * 16]);
}

#[test]
fn test_multipart_non_ascii_extension() {

    let dir = TempDir::new().unwrap();
    let image = patterned_image(2048 * 6);

    // A lone file whose extension starts with a multi-byte character.
    let path = write_file(&dir, "game.\u{e9}0", &image);
    let first = FlatSectorSource::open(&path).unwrap();
    let source = MultipartSectorSource::discover(first).unwrap();
    assert_eq!(source.kind(), SourceKind::Flat);

    // The same prefix followed by 00 still numbers from one.
    write_file(&dir, "disc.\u{e9}00", &image[..2048 * 4]);
    write_file(&dir, "disc.\u{e9}01", &image[2048 * 4..]);
    let first = FlatSectorSource::open(&dir.path().join("disc.\u{e9}00")).unwrap();
    let mut source = MultipartSectorSource::discover(first).unwrap();
    assert_eq!(source.block_count(), 6);

    let mut buffer = vec![0u8; 2048 * 6];
    source.read_sync(&mut buffer, 0, 6).unwrap();
    assert_eq!(buffer, image);
}

#[test]
fn test_block_dump_and_compressed_cancel() {

    let dir = TempDir::new().unwrap();

    let dump_path = dir.path().join("capture.dump");
    let header = BlockDumpHeader {
        block_size: 2048,
        block_count: 8,
        block_offset: 0,
    };
    let mut writer = BlockDumpWriter::create(&dump_path, header).unwrap();
    writer.write_sector(3, &[0x33u8; 2048]).unwrap();
    writer.finish().unwrap();

    let image = patterned_image(2048 * 16);
    let gz_path = write_file(&dir, "game.iso.gz", &gzip_with_boundaries(&image, 8192));

    let mut sources: Vec<Box<dyn SectorSource>> = vec![
        Box::new(BlockDumpSectorSource::open(&dump_path).unwrap()),
        Box::new(open_compressed(&gz_path, 16 * 1024)),
    ];

    for source in sources.iter_mut() {
        let mut buffer = vec![0u8; 2048];

        // A no-op with nothing outstanding, and a cancelled read never arrives.
        source.cancel_read();
        source.submit_read(3, 1).unwrap();
        source.cancel_read();
        assert!(matches!(source.await_read(&mut buffer), Err(SourceError::NoReadPending)));

        source.read_sync(&mut buffer, 3, 1).unwrap();
        match source.kind() {
            SourceKind::BlockDump => assert!(buffer.iter().all(|&b| b == 0x33)),
            _ => assert_eq!(&buffer[..], &image[3 * 2048..4 * 2048]),
        }
    }
}

#[test]
fn test_multipart_single_file_stays_flat() {

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "game.iso", &patterned_image(2048 * 2));

    let first = FlatSectorSource::open(&path).unwrap();
    let source = MultipartSectorSource::discover(first).unwrap();
    assert_eq!(source.kind(), SourceKind::Flat);
}

#[test]
fn test_multipart_block_size_change_reflows_parts() {

    let dir = TempDir::new().unwrap();
    let image = patterned_image(2352 * 8);

    write_file(&dir, "game.bin", &image[..2352 * 5]);
    write_file(&dir, "game.b00", &image[2352 * 5..]);

    let first = FlatSectorSource::open(&dir.path().join("game.bin")).unwrap();
    let mut source = MultipartSectorSource::discover(first).unwrap();
    source.set_block_size(2352);
    assert_eq!(source.block_count(), 8);

    let mut buffer = vec![0u8; 2352 * 2];
    source.read_sync(&mut buffer, 4, 2).unwrap();
    assert_eq!(&buffer[..], &image[2352 * 4..2352 * 6]);
}

#[test]
fn test_compressed_reads_match_uncompressed_image() {

    let dir = TempDir::new().unwrap();
    let image = patterned_image(2048 * 600);
    let path = write_file(&dir, "game.iso.gz", &gzip_with_boundaries(&image, 40_000));

    assert!(CompressedIndexedSectorSource::can_handle(&path));

    let mut source = open_compressed(&path, 128 * 1024);
    assert_eq!(source.kind(), SourceKind::CompressedIndexed);
    assert_eq!(source.uncompressed_size(), image.len() as u64);
    assert_eq!(source.block_count(), 600);
    assert!(source.index().checkpoints.len() > 1);

    // Random reads, in no particular order, across chunk boundaries.
    let mut buffer = vec![0u8; 2048 * 5];
    for &first in &[590u32, 0, 127, 300, 128, 12, 599 - 4] {
        source.read_sync(&mut buffer, first, 5).unwrap();
        let start = first as usize * 2048;
        assert_eq!(&buffer[..], &image[start..start + 2048 * 5], "blocks from {}", first);
    }
}

#[test]
fn test_compressed_extract_agrees_with_every_checkpoint() {

    let dir = TempDir::new().unwrap();
    let image = patterned_image(900_000);
    let path = write_file(&dir, "game.iso.gz", &gzip_with_boundaries(&image, 50_000));

    let mut source = open_compressed(&path, 100_000);
    let offsets: Vec<u64> = source
        .index()
        .checkpoints
        .iter()
        .map(|c| c.uncompressed_offset)
        .collect();

    // Decompressing straight from each checkpoint must give the original bytes.
    let mut buffer = vec![0u8; 4096];
    for offset in offsets {
        let expected_length = 4096.min(image.len() - offset as usize);
        let produced = source.extract(offset, &mut buffer[..expected_length]).unwrap();
        assert_eq!(produced, expected_length);
        assert_eq!(&buffer[..produced], &image[offset as usize..offset as usize + produced]);
    }
}

#[test]
fn test_compressed_sidecar_is_written_and_reused() {

    let dir = TempDir::new().unwrap();
    let image = patterned_image(300_000);
    let path = write_file(&dir, "game.iso.gz", &gzip_with_boundaries(&image, 30_000));
    let sidecar = CompressionIndex::sidecar_path(&path);

    let first = open_compressed(&path, 64 * 1024);
    assert!(sidecar.is_file());

    let loaded = CompressionIndex::load(&sidecar, fs::metadata(&path).unwrap().len()).unwrap();
    assert_eq!(&loaded, first.index());

    // Deleting the sidecar and opening again should rebuild the same index.
    drop(first);
    fs::remove_file(&sidecar).unwrap();
    let second = open_compressed(&path, 64 * 1024);
    assert_eq!(second.index(), &loaded);
}

#[test]
fn test_compressed_corrupt_sidecar_is_rejected_and_rebuilt() {

    let dir = TempDir::new().unwrap();
    let image = patterned_image(200_000);
    let path = write_file(&dir, "game.iso.gz", &gzip_with_boundaries(&image, 20_000));
    let sidecar = CompressionIndex::sidecar_path(&path);
    let compressed_size = fs::metadata(&path).unwrap().len();

    let original = open_compressed(&path, 32 * 1024).index().clone();

    // A bad signature is refused outright.
    let mut bytes = fs::read(&sidecar).unwrap();
    bytes[0] = b'X';
    fs::write(&sidecar, &bytes).unwrap();
    assert!(matches!(
        CompressionIndex::load(&sidecar, compressed_size),
        Err(SourceError::InvalidFormat(_))
    ));

    // So is one with trailing junk, or one recorded against another image size.
    original.save(&sidecar).unwrap();
    let mut bytes = fs::read(&sidecar).unwrap();
    bytes.push(0);
    fs::write(&sidecar, &bytes).unwrap();
    assert!(CompressionIndex::load(&sidecar, compressed_size).is_err());

    original.save(&sidecar).unwrap();
    assert!(CompressionIndex::load(&sidecar, compressed_size + 1).is_err());

    // Opening with a broken sidecar still works, and leaves a good one behind.
    fs::write(&sidecar, b"garbage").unwrap();
    let mut source = open_compressed(&path, 32 * 1024);
    assert_eq!(source.index(), &original);

    let mut buffer = vec![0u8; 2048];
    source.read_sync(&mut buffer, 50, 1).unwrap();
    assert_eq!(&buffer[..], &image[50 * 2048..51 * 2048]);
    assert!(CompressionIndex::load(&sidecar, compressed_size).is_ok());
}

#[test]
fn test_compressed_concatenated_members_read_as_one_stream() {

    let dir = TempDir::new().unwrap();
    let image = patterned_image(2048 * 40);

    let mut compressed = gzip_with_boundaries(&image[..2048 * 25], 10_000);
    compressed.extend(gzip_with_boundaries(&image[2048 * 25..], 10_000));
    let path = write_file(&dir, "split.gz", &compressed);

    let mut source = open_compressed(&path, 16 * 1024);
    assert_eq!(source.block_count(), 40);

    let mut buffer = vec![0u8; 2048 * 4];
    source.read_sync(&mut buffer, 23, 4).unwrap();
    assert_eq!(&buffer[..], &image[2048 * 23..2048 * 27]);
}
