//! On-disk layout of a [`TileCache`].
//!
//! One directory per cache. Each payload lives in its own file named `{zoom_level}_{x}_{y}.tile`, and `index.meta` lists every
//! id with its timestamps. Every file is framed as
//!
//! ```text
//! [16-byte ASCII version tag, space padded][u64 LE body length][body]
//! ```
//!
//! so a reader can reject files written by an incompatible version, or cut short by a crash, before it looks at the body.

use super::{CacheMeta, CacheObject, CacheValue, TileCache};
use crate::TileId;

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{AlignedVec, Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const VERSION_TAG_LEN: usize = 16;
const HEADER_LEN: usize = VERSION_TAG_LEN + 8;

pub const INDEX_FILE_NAME: &str = "index.meta";
const INDEX_TMP_FILE_NAME: &str = "index.meta.tmp";

/// A payload type with a stable, versioned byte encoding.
pub trait Persist: Sized {
    /// ASCII, at most [`VERSION_TAG_LEN`] bytes. Change it whenever the encoding changes.
    const VERSION_TAG: &'static str;

    fn encode(&self) -> Result<Vec<u8>, CacheIoError>;

    fn decode(bytes: &[u8]) -> Result<Self, CacheIoError>;
}

#[derive(Debug, Error)]
pub enum CacheIoError {
    #[error("cache I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("version tag mismatch: expected {expected:?}, found {found:?}")]
    VersionMismatch { expected: String, found: String },
    #[error("file is truncated or has trailing bytes")]
    Truncated,
    #[error("corrupt cache data: {0}")]
    Corrupt(String),
    #[error("failed to encode payload")]
    Encode,
}

/// Encodes any rkyv-archivable value. Used to implement [`Persist::encode`].
pub fn encode_archived<T>(value: &T) -> Result<Vec<u8>, CacheIoError>
where
    T: Serialize<AllocSerializer<256>>,
{
    rkyv::to_bytes::<_, 256>(value)
        .map(|bytes| bytes.to_vec())
        .map_err(|_| CacheIoError::Encode)
}

/// Validates and decodes bytes produced by [`encode_archived`]. Used to implement [`Persist::decode`].
pub fn decode_archived<T>(bytes: &[u8]) -> Result<T, CacheIoError>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    // File contents have no alignment guarantee.
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    let archived = rkyv::check_archived_root::<T>(&aligned)
        .map_err(|_| CacheIoError::Corrupt("archive validation failed".into()))?;
    archived
        .deserialize(&mut Infallible)
        .map_err(|_| CacheIoError::Corrupt("archive deserialization failed".into()))
}

fn padded_tag(tag: &str) -> [u8; VERSION_TAG_LEN] {
    assert!(
        tag.is_ascii() && tag.len() <= VERSION_TAG_LEN,
        "Version tag {:?} must be ASCII and at most {} bytes",
        tag,
        VERSION_TAG_LEN
    );
    let mut padded = [b' '; VERSION_TAG_LEN];
    padded[..tag.len()].copy_from_slice(tag.as_bytes());
    padded
}

pub fn frame(tag: &str, body: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(HEADER_LEN + body.len());
    framed.extend_from_slice(&padded_tag(tag));
    framed.extend_from_slice(&(body.len() as u64).to_le_bytes());
    framed.extend_from_slice(body);
    framed
}

/// Checks the framing written by [`frame`] and returns the body.
pub fn unframe<'a>(tag: &str, framed: &'a [u8]) -> Result<&'a [u8], CacheIoError> {
    if framed.len() < HEADER_LEN {
        return Err(CacheIoError::Truncated);
    }
    let (found_tag, rest) = framed.split_at(VERSION_TAG_LEN);
    if found_tag != padded_tag(tag) {
        return Err(CacheIoError::VersionMismatch {
            expected: tag.to_owned(),
            found: String::from_utf8_lossy(found_tag).trim_end().to_owned(),
        });
    }
    let (len_bytes, body) = rest.split_at(8);
    let mut len = [0; 8];
    len.copy_from_slice(len_bytes);
    if u64::from_le_bytes(len) != body.len() as u64 {
        return Err(CacheIoError::Truncated);
    }
    Ok(body)
}

pub fn tile_file_name(id: TileId) -> String {
    format!("{}_{}_{}.tile", id.zoom_level, id.x, id.y)
}

fn tile_path(dir: &Path, id: TileId) -> PathBuf {
    dir.join(tile_file_name(id))
}

#[derive(Archive, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[archive(check_bytes)]
struct IndexEntry {
    id: TileId,
    created: u64,
    visited: u64,
}

#[derive(Archive, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[archive(check_bytes)]
struct CacheIndex {
    entries: Vec<IndexEntry>,
}

impl Persist for CacheIndex {
    const VERSION_TAG: &'static str = "TSINDEX01";

    fn encode(&self) -> Result<Vec<u8>, CacheIoError> {
        encode_archived(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CacheIoError> {
        decode_archived(bytes)
    }
}

fn write_framed<T: Persist>(path: &Path, value: &T) -> Result<(), CacheIoError> {
    fs::write(path, frame(T::VERSION_TAG, &value.encode()?))?;
    Ok(())
}

fn read_framed<T: Persist>(path: &Path) -> Result<T, CacheIoError> {
    let bytes = fs::read(path)?;
    T::decode(unframe(T::VERSION_TAG, &bytes)?)
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl<T: CacheValue + Persist> TileCache<T> {
    /// Writes every payload changed since the last write, deletes files of payloads no longer cached, then replaces the index.
    ///
    /// Returns the number of payload files written. If anything fails, the record of what is on disk is forgotten so the next
    /// write starts over from scratch.
    pub fn write_to_disk(&mut self, dir: &Path) -> Result<usize, CacheIoError> {
        let result = self.write_changes(dir);
        if result.is_err() {
            self.on_disk.clear();
        }
        result
    }

    fn write_changes(&mut self, dir: &Path) -> Result<usize, CacheIoError> {
        fs::create_dir_all(dir)?;

        let mut num_written = 0;
        for (id, object) in self.entries.iter() {
            if self.on_disk.contains(id) {
                continue;
            }
            write_framed(&tile_path(dir, *id), &object.data)?;
            self.on_disk.insert(*id);
            num_written += 1;
        }

        let stale: Vec<TileId> = self
            .on_disk
            .iter()
            .filter(|&&id| !self.entries.contains_key(&id))
            .copied()
            .collect();
        for id in stale {
            remove_file_if_exists(&tile_path(dir, id))?;
            self.on_disk.remove(&id);
        }

        let index = CacheIndex {
            entries: self
                .entries
                .iter()
                .map(|(id, object)| IndexEntry {
                    id: *id,
                    created: object.meta.created,
                    visited: object.meta.visited,
                })
                .collect(),
        };
        let tmp_path = dir.join(INDEX_TMP_FILE_NAME);
        write_framed(&tmp_path, &index)?;
        fs::rename(&tmp_path, dir.join(INDEX_FILE_NAME))?;

        log::debug!(
            "Wrote {} of {} tiles to {}",
            num_written,
            self.entries.len(),
            dir.display()
        );
        Ok(num_written)
    }

    /// Replaces the contents of this cache with what was written to `dir`.
    ///
    /// A directory without an index reads as an empty cache. On any error the cache is left empty; the caller should treat the
    /// whole directory as lost.
    pub fn read_from_disk(&mut self, dir: &Path) -> Result<usize, CacheIoError> {
        self.entries.clear();
        self.on_disk.clear();

        let result = self.read_entries(dir);
        if result.is_err() {
            self.entries.clear();
            self.on_disk.clear();
        }
        result
    }

    fn read_entries(&mut self, dir: &Path) -> Result<usize, CacheIoError> {
        let index: CacheIndex = match read_framed(&dir.join(INDEX_FILE_NAME)) {
            Ok(index) => index,
            Err(CacheIoError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut latest_time = self.time;
        for entry in index.entries {
            let data: T = read_framed(&tile_path(dir, entry.id))?;
            if data.tile_id() != entry.id {
                return Err(CacheIoError::Corrupt(format!(
                    "{} holds tile {}",
                    tile_file_name(entry.id),
                    data.tile_id()
                )));
            }
            latest_time = latest_time.max(entry.created).max(entry.visited / 100 + 1);
            self.entries.insert(
                entry.id,
                CacheObject {
                    meta: CacheMeta {
                        visited: entry.visited,
                        created: entry.created,
                    },
                    data,
                },
            );
            self.on_disk.insert(entry.id);
        }
        // Keep the clock ahead of every restored stamp.
        self.time = latest_time + 1;

        log::debug!("Read {} tiles from {}", self.entries.len(), dir.display());

        Ok(self.entries.len())
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;
    use crate::{NetworkStatus, Quad, QuadTile};

    fn test_quad(id: TileId) -> Quad {
        let byte = (id.x + id.y) as u8;
        Quad::new(
            id,
            [
                QuadTile::good(vec![byte; 10], 1000),
                QuadTile::good(vec![byte, 1], 1001),
                QuadTile::empty(NetworkStatus::NotFound, 1002),
                QuadTile::good(vec![], 1003),
            ],
        )
    }

    fn test_cache() -> TileCache<Quad> {
        let mut cache = TileCache::new();
        for id in [TileId::ROOT, TileId::new(1, 0, 1), TileId::new(2, 3, 2)] {
            cache.insert(test_quad(id));
            cache.advance_time();
        }
        cache
    }

    #[test]
    fn disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = test_cache();
        assert_eq!(cache.write_to_disk(dir.path()).unwrap(), 3);

        let mut restored = TileCache::<Quad>::new();
        assert_eq!(restored.read_from_disk(dir.path()).unwrap(), 3);
        for (id, object) in cache.iter() {
            assert_eq!(restored.peek(id), &object.data);
            assert_eq!(restored.meta(id), Some(object.meta));
        }
        assert!(restored.time() >= cache.time());
    }

    #[test]
    fn writes_are_incremental() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = test_cache();
        cache.write_to_disk(dir.path()).unwrap();

        assert_eq!(cache.write_to_disk(dir.path()).unwrap(), 0);

        let removed = TileId::new(1, 0, 1);
        cache.remove(removed);
        cache.insert(test_quad(TileId::new(1, 1, 1)));
        assert_eq!(cache.write_to_disk(dir.path()).unwrap(), 1);
        assert!(!dir.path().join(tile_file_name(removed)).exists());

        let mut restored = TileCache::<Quad>::new();
        assert_eq!(restored.read_from_disk(dir.path()).unwrap(), 3);
        assert!(!restored.contains(removed));
    }

    #[test]
    fn overwrite_in_same_tick_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let id = TileId::new(1, 0, 0);
        let mut cache = TileCache::new();
        cache.insert(Quad::uniform(id, NetworkStatus::NotFound, 1000));
        assert_eq!(cache.write_to_disk(dir.path()).unwrap(), 1);

        let newer = test_quad(id);
        cache.insert(newer.clone());
        assert_eq!(cache.write_to_disk(dir.path()).unwrap(), 1);

        let mut restored = TileCache::<Quad>::new();
        assert_eq!(restored.read_from_disk(dir.path()).unwrap(), 1);
        assert_eq!(restored.peek(id), &newer);
        assert_eq!(restored.peek(id).tiles[0].data, vec![1; 10]);
    }

    #[test]
    fn missing_index_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = test_cache();
        assert_eq!(cache.read_from_disk(dir.path()).unwrap(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn truncated_file_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = test_cache();
        cache.write_to_disk(dir.path()).unwrap();

        let path = dir.path().join(tile_file_name(TileId::new(2, 3, 2)));
        let original = fs::read(&path).unwrap();
        for cut in 0..original.len() {
            fs::write(&path, &original[..cut]).unwrap();
            let mut restored = TileCache::<Quad>::new();
            assert!(restored.read_from_disk(dir.path()).is_err(), "cut at {}", cut);
            assert!(restored.is_empty());
        }

        fs::write(&path, &original).unwrap();
        let mut restored = TileCache::<Quad>::new();
        assert_eq!(restored.read_from_disk(dir.path()).unwrap(), 3);
    }

    #[test]
    fn truncated_index_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = test_cache();
        cache.write_to_disk(dir.path()).unwrap();

        let path = dir.path().join(INDEX_FILE_NAME);
        let original = fs::read(&path).unwrap();
        fs::write(&path, &original[..original.len() - 1]).unwrap();

        let mut restored = TileCache::<Quad>::new();
        assert!(matches!(
            restored.read_from_disk(dir.path()),
            Err(CacheIoError::Truncated)
        ));
        assert!(restored.is_empty());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let framed = frame("TSQUAD00", b"body");
        match unframe(Quad::VERSION_TAG, &framed) {
            Err(CacheIoError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, "TSQUAD01");
                assert_eq!(found, "TSQUAD00");
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(unframe("TSQUAD00", &framed).unwrap(), b"body");
    }

    #[test]
    fn failed_write_forgets_disk_state() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"").unwrap();

        let mut cache = test_cache();
        assert!(cache.write_to_disk(&blocker).is_err());
        assert!(cache.on_disk.is_empty());

        // A good directory afterward gets every payload.
        assert_eq!(cache.write_to_disk(dir.path()).unwrap(), 3);
    }
}
