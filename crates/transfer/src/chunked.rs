use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use crate::hasher::chunk_digest;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// ChunkLayout
// ---------------------------------------------------------------------------

/// Fixed partition of a file into `ceil(file_size / chunk_size)` chunks.
///
/// Every chunk is exactly `chunk_size` bytes except the last, which holds
/// the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    file_size: u64,
    chunk_size: u64,
    total_chunks: u32,
}

impl ChunkLayout {
    /// Computes the layout for a file of `file_size` bytes.
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize(chunk_size));
        }
        if file_size == 0 {
            return Err(TransferError::EmptyFile);
        }
        let total_chunks = u32::try_from(file_size.div_ceil(chunk_size))
            .map_err(|_| TransferError::InvalidChunkSize(chunk_size))?;
        Ok(Self {
            file_size,
            chunk_size,
            total_chunks,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Byte range `[start, end)` covered by chunk `index`.
    pub fn range(&self, index: u32) -> Result<Range<u64>, TransferError> {
        if index >= self.total_chunks {
            return Err(TransferError::ChunkOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        let start = u64::from(index) * self.chunk_size;
        let end = std::cmp::min(start + self.chunk_size, self.file_size);
        Ok(start..end)
    }

    /// Length in bytes of chunk `index`.
    pub fn chunk_len(&self, index: u32) -> Result<u64, TransferError> {
        self.range(index).map(|r| r.end - r.start)
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A chunk of file data ready for submission.
///
/// The digest is computed on construction, so a `Chunk` can never be sent
/// unverified.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 0-based chunk index.
    pub index: u32,
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// Short digest of `data`.
    pub digest: String,
}

impl Chunk {
    /// Wraps `data` and computes its digest.
    pub fn new(index: u32, offset: u64, data: Vec<u8>) -> Self {
        let digest = chunk_digest(&data);
        Self {
            index,
            offset,
            data,
            digest,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Random-access chunk reader over a read-only source file.
///
/// Reading the same index twice yields identical bytes, which is what makes
/// retries and resubmission after resume safe.
pub struct ChunkReader {
    file: std::fs::File,
    layout: ChunkLayout,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used.
    pub fn open(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            layout: ChunkLayout::new(file_size, chunk_size)?,
        })
    }

    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    /// Reads chunk `index` and computes its digest.
    ///
    /// Fails with `UnexpectedEof` if the file shrank since it was opened.
    pub fn read_chunk(&mut self, index: u32) -> Result<Chunk, TransferError> {
        let range = self.layout.range(index)?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        self.file.seek(SeekFrom::Start(range.start))?;
        self.file.read_exact(&mut buf)?;
        Ok(Chunk::new(index, range.start, buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    use crate::hasher::verify_chunk_digest;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn layout_spec_scenario() {
        let layout = ChunkLayout::new(10_500_000, 5_000_000).unwrap();
        assert_eq!(layout.total_chunks(), 3);
        let sizes: Vec<u64> = (0..3).map(|i| layout.chunk_len(i).unwrap()).collect();
        assert_eq!(sizes, vec![5_000_000, 5_000_000, 500_000]);
    }

    #[test]
    fn layout_ranges_cover_file_without_gaps() {
        for (file_size, chunk_size) in [(1u64, 1u64), (10, 3), (4096, 1024), (4097, 1024), (7, 100)] {
            let layout = ChunkLayout::new(file_size, chunk_size).unwrap();
            assert_eq!(
                u64::from(layout.total_chunks()),
                file_size.div_ceil(chunk_size)
            );

            let mut expected_start = 0;
            for i in 0..layout.total_chunks() {
                let r = layout.range(i).unwrap();
                assert_eq!(r.start, expected_start, "gap before chunk {i}");
                if i + 1 < layout.total_chunks() {
                    assert_eq!(r.end - r.start, chunk_size);
                }
                expected_start = r.end;
            }
            assert_eq!(expected_start, file_size);

            let last = layout.chunk_len(layout.total_chunks() - 1).unwrap();
            assert_eq!(
                last,
                file_size - chunk_size * u64::from(layout.total_chunks() - 1)
            );
        }
    }

    #[test]
    fn layout_rejects_degenerate_inputs() {
        assert!(matches!(
            ChunkLayout::new(10, 0),
            Err(TransferError::InvalidChunkSize(0))
        ));
        assert!(matches!(
            ChunkLayout::new(0, 10),
            Err(TransferError::EmptyFile)
        ));
    }

    #[test]
    fn layout_out_of_range() {
        let layout = ChunkLayout::new(10, 4).unwrap();
        assert!(matches!(
            layout.range(3),
            Err(TransferError::ChunkOutOfRange { index: 3, total: 3 })
        ));
    }

    #[test]
    fn reader_reads_all_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let mut reader = ChunkReader::open(&path, 4).unwrap();
        assert_eq!(reader.layout().total_chunks(), 3);

        let c0 = reader.read_chunk(0).unwrap();
        assert_eq!(c0.offset, 0);
        assert_eq!(&c0.data, b"AABB");
        assert!(verify_chunk_digest(&c0.data, &c0.digest));

        let c2 = reader.read_chunk(2).unwrap();
        assert_eq!(c2.offset, 8);
        assert_eq!(&c2.data, b"EE");

        let c1 = reader.read_chunk(1).unwrap();
        assert_eq!(&c1.data, b"CCDD");

        assert!(reader.read_chunk(3).is_err());
    }

    #[test]
    fn reader_is_idempotent_per_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut reader = ChunkReader::open(&path, 3).unwrap();
        let a = reader.read_chunk(1).unwrap();
        let _ = reader.read_chunk(3).unwrap();
        let b = reader.read_chunk(1).unwrap();
        assert_eq!(a.data, b.data);
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn reader_chunks_reassemble_original() {
        let dir = tempfile::tempdir().unwrap();
        let original = b"The quick brown fox jumps over the lazy dog";
        let path = create_test_file(dir.path(), "fox.txt", original);

        let mut reader = ChunkReader::open(&path, 10).unwrap();
        let mut rebuilt = Vec::new();
        for i in 0..reader.layout().total_chunks() {
            rebuilt.extend(reader.read_chunk(i).unwrap().data);
        }
        assert_eq!(&rebuilt, original);
    }

    #[test]
    fn reader_default_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"x");
        let reader = ChunkReader::open(&path, 0).unwrap();
        assert_eq!(reader.layout().chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(reader.layout().total_chunks(), 1);
    }

    #[test]
    fn reader_detects_truncated_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");
        let mut reader = ChunkReader::open(&path, 4).unwrap();

        std::fs::write(&path, b"0123").unwrap();
        assert!(matches!(reader.read_chunk(2), Err(TransferError::Io(_))));
    }
}
