//! On-disk snapshot layout
//!
//! All integers are little-endian:
//!
//! ```text
//! [u32 app version code][u32 version length][version bytes]
//! [u32 data index, u32::MAX when absent][pad to 8]
//! [u64 size limit]
//! [10 x u64 size group]
//! per persisted pool: [u64 count][count x u64 region tail]
//! [serialized buffer, size_group[0] bytes]
//! [u32 adler-32 of every byte above]
//! ```
//!
//! Which pools are persisted depends on the collector family, so a file is
//! only readable by a process running the same family.

use crate::error::{SnapshotError, SnapshotResult};
use adler2::Adler32;
use otter_heap::space::align8;
use otter_heap::{CollectorKind, Runtime};
use otter_serializer::{POOL_COUNT, SIZE_GROUP_LEN, SerializeData, persisted_pools};
use std::sync::Arc;

const NO_DATA_INDEX: u32 = u32::MAX;
const CHECKSUM_SIZE: usize = 4;

/// Adler-32 of `bytes`
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut adler = Adler32::new();
    adler.write_slice(bytes);
    adler.checksum()
}

/// Decoded snapshot file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    /// Application build that wrote the file
    pub app_version_code: u32,
    /// Logical version that wrote the file
    pub version: String,
    /// Shared-object chunk index recorded at save time
    pub data_index: Option<u32>,
    /// Size limit the module table was serialized under
    pub size_limit: u64,
    /// Buffer size, capacity, per-space sizes and incomplete flag
    pub size_group: [u64; SIZE_GROUP_LEN],
    /// Region tails per pool
    pub remain: [Vec<u64>; POOL_COUNT],
    /// Serialized module table
    pub buffer: Vec<u8>,
}

impl SnapshotFile {
    /// Capture serialized data for writing
    pub fn from_data(data: &SerializeData, app_version_code: u32, version: &str) -> Self {
        Self {
            app_version_code,
            version: version.to_string(),
            data_index: data.data_index(),
            size_limit: data.size_limit() as u64,
            size_group: data.size_group(),
            remain: std::array::from_fn(|pool| data.remain_sizes(pool).to_vec()),
            buffer: data.as_bytes().to_vec(),
        }
    }

    /// Rebuild serialized data owned by `runtime`.
    ///
    /// The recorded data index is not carried over: registry indices do
    /// not survive the process that published them.
    pub fn into_data(self, runtime: Arc<Runtime>) -> SerializeData {
        SerializeData::from_parts(
            runtime,
            self.buffer,
            self.size_group,
            self.remain,
            self.size_limit as usize,
            None,
        )
    }

    fn header_size(&self) -> usize {
        align8(4 + 4 + self.version.len() + 4) + 8
    }

    /// Exact encoded size under `collector`
    pub fn file_size(&self, collector: CollectorKind) -> usize {
        let vectors: usize = persisted_pools(collector)
            .iter()
            .map(|&pool| 8 + 8 * self.remain[pool].len())
            .sum();
        self.header_size() + SIZE_GROUP_LEN * 8 + vectors + self.buffer.len() + CHECKSUM_SIZE
    }

    /// Encode the whole file, checksum included
    pub fn encode(&self, collector: CollectorKind) -> Vec<u8> {
        let size = self.file_size(collector);
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&self.app_version_code.to_le_bytes());
        out.extend_from_slice(&(self.version.len() as u32).to_le_bytes());
        out.extend_from_slice(self.version.as_bytes());
        out.extend_from_slice(&self.data_index.unwrap_or(NO_DATA_INDEX).to_le_bytes());
        out.resize(align8(out.len()), 0);
        out.extend_from_slice(&self.size_limit.to_le_bytes());
        for value in self.size_group {
            out.extend_from_slice(&value.to_le_bytes());
        }
        for &pool in persisted_pools(collector) {
            out.extend_from_slice(&(self.remain[pool].len() as u64).to_le_bytes());
            for tail in &self.remain[pool] {
                out.extend_from_slice(&tail.to_le_bytes());
            }
        }
        out.extend_from_slice(&self.buffer);
        let sum = checksum(&out);
        out.extend_from_slice(&sum.to_le_bytes());
        debug_assert_eq!(out.len(), size);
        out
    }

    /// Verify the checksum and decode a file written under `collector`
    pub fn decode(bytes: &[u8], collector: CollectorKind) -> SnapshotResult<Self> {
        let content_len = bytes
            .len()
            .checked_sub(CHECKSUM_SIZE)
            .ok_or(SnapshotError::Truncated(bytes.len()))?;
        let (content, trailer) = bytes.split_at(content_len);
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed = checksum(content);
        if stored != computed {
            return Err(SnapshotError::ChecksumMismatch { stored, computed });
        }

        let mut reader = Reader { bytes: content, pos: 0 };
        let app_version_code = reader.u32()?;
        let version_len = reader.u32()? as usize;
        let version = String::from_utf8(reader.take(version_len)?.to_vec())
            .map_err(|_| SnapshotError::InvalidLayout("version string is not UTF-8".into()))?;
        let data_index = match reader.u32()? {
            NO_DATA_INDEX => None,
            index => Some(index),
        };
        reader.align8()?;
        let size_limit = reader.u64()?;

        let mut size_group = [0u64; SIZE_GROUP_LEN];
        for slot in size_group.iter_mut() {
            *slot = reader.u64()?;
        }

        let mut remain: [Vec<u64>; POOL_COUNT] = Default::default();
        for &pool in persisted_pools(collector) {
            let count = reader.u64()? as usize;
            if count > reader.remaining() / 8 {
                return Err(SnapshotError::Truncated(reader.pos));
            }
            remain[pool] = (0..count).map(|_| reader.u64()).collect::<SnapshotResult<_>>()?;
        }

        let buffer_len = usize::try_from(size_group[0])
            .map_err(|_| SnapshotError::InvalidLayout("buffer size overflows".into()))?;
        let buffer = reader.take(buffer_len)?.to_vec();
        if reader.remaining() != 0 {
            return Err(SnapshotError::InvalidLayout(format!(
                "{} unexpected bytes after the buffer",
                reader.remaining()
            )));
        }

        Ok(Self {
            app_version_code,
            version,
            data_index,
            size_limit,
            size_group,
            remain,
            buffer,
        })
    }

    /// Reject files written by another build or version
    pub fn check_versions(&self, app_version_code: u32, version: &str) -> SnapshotResult<()> {
        if self.app_version_code != app_version_code {
            return Err(SnapshotError::AppVersionMismatch {
                expected: app_version_code,
                found: self.app_version_code,
            });
        }
        if self.version != version {
            return Err(SnapshotError::VersionMismatch {
                expected: version.to_string(),
                found: self.version.clone(),
            });
        }
        Ok(())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize) -> SnapshotResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(SnapshotError::Truncated(self.pos));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u32(&mut self) -> SnapshotResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> SnapshotResult<u64> {
        let mut word = [0u8; 8];
        word.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(word))
    }

    fn align8(&mut self) -> SnapshotResult<()> {
        let padding = align8(self.pos) - self.pos;
        self.take(padding).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SnapshotFile {
        let buffer = vec![0x00, 0x20, 0, 0, 0, 0x0A, 0, 0, 0];
        let mut size_group = [0u64; SIZE_GROUP_LEN];
        size_group[0] = buffer.len() as u64;
        size_group[2] = 32;
        let mut remain: [Vec<u64>; POOL_COUNT] = Default::default();
        remain[0] = vec![24, 8];
        remain[2] = vec![16];
        SnapshotFile {
            app_version_code: 3,
            version: "1.2.0".to_string(),
            data_index: None,
            size_limit: 1 << 20,
            size_group,
            remain,
            buffer,
        }
    }

    #[test]
    fn test_encode_matches_precomputed_size() {
        let file = sample();
        let bytes = file.encode(CollectorKind::Regional);
        assert_eq!(bytes.len(), file.file_size(CollectorKind::Regional));

        // app version, version length, "1.2.0", data index, padding
        assert_eq!(&bytes[0..4], &3u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &5u32.to_le_bytes());
        assert_eq!(&bytes[8..13], b"1.2.0");
        assert_eq!(&bytes[13..17], &u32::MAX.to_le_bytes());
        assert_eq!(&bytes[17..24], &[0; 7]);
        assert_eq!(&bytes[24..32], &(1u64 << 20).to_le_bytes());

        let trailer = &bytes[bytes.len() - 4..];
        assert_eq!(trailer, &checksum(&bytes[..bytes.len() - 4]).to_le_bytes());
    }

    #[test]
    fn test_decode_restores_persisted_pools() {
        let file = sample();
        let decoded = SnapshotFile::decode(&file.encode(CollectorKind::Regional), CollectorKind::Regional).unwrap();
        assert_eq!(decoded, file);

        let compact = SnapshotFile::decode(&file.encode(CollectorKind::Compacting), CollectorKind::Compacting).unwrap();
        assert_eq!(compact.remain[0], vec![24, 8]);
        assert!(compact.remain[2].is_empty());
        assert_eq!(
            file.file_size(CollectorKind::Regional) - file.file_size(CollectorKind::Compacting),
            16
        );
    }

    #[test]
    fn test_flipped_byte_fails_checksum() {
        let mut bytes = sample().encode(CollectorKind::Regional);
        bytes[30] ^= 0x40;
        let err = SnapshotFile::decode(&bytes, CollectorKind::Regional).unwrap_err();
        assert!(matches!(err, SnapshotError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_short_content_is_truncated() {
        let mut bytes = 1u32.to_le_bytes().to_vec();
        let sum = checksum(&bytes);
        bytes.extend_from_slice(&sum.to_le_bytes());
        let err = SnapshotFile::decode(&bytes, CollectorKind::Regional).unwrap_err();
        assert!(matches!(err, SnapshotError::Truncated(4)));

        let err = SnapshotFile::decode(&[1, 2], CollectorKind::Regional).unwrap_err();
        assert!(matches!(err, SnapshotError::Truncated(2)));
    }

    #[test]
    fn test_version_gate() {
        let file = sample();
        assert!(file.check_versions(3, "1.2.0").is_ok());
        assert!(matches!(
            file.check_versions(4, "1.2.0"),
            Err(SnapshotError::AppVersionMismatch { expected: 4, found: 3 })
        ));
        assert!(matches!(
            file.check_versions(3, "1.3.0"),
            Err(SnapshotError::VersionMismatch { .. })
        ));
    }
}
