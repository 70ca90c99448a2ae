use crate::{decode_archived, encode_archived, CacheIoError, CacheValue, Persist, TileId};

use rkyv::{Archive, Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of fetching one tile, ordered from best to worst.
#[derive(
    Archive, Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize,
)]
#[archive(check_bytes)]
pub enum NetworkStatus {
    Good,
    /// The server has no data at this location. This is a legitimate answer and it gets cached like any other.
    NotFound,
    /// The fetch failed. Never cached.
    NetworkError,
}

#[derive(Archive, Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[archive(check_bytes)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    /// Unix time in seconds when the tile was fetched.
    pub timestamp: u64,
}

impl NetworkInfo {
    pub fn new(status: NetworkStatus, timestamp: u64) -> Self {
        Self { status, timestamp }
    }

    pub fn now(status: NetworkStatus) -> Self {
        Self::new(status, unix_now())
    }
}

/// The undecoded payload of a single tile.
#[derive(Archive, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[archive(check_bytes)]
pub struct QuadTile {
    pub info: NetworkInfo,
    pub data: Vec<u8>,
}

impl QuadTile {
    pub fn good(data: Vec<u8>, timestamp: u64) -> Self {
        Self {
            info: NetworkInfo::new(NetworkStatus::Good, timestamp),
            data,
        }
    }

    pub fn empty(status: NetworkStatus, timestamp: u64) -> Self {
        Self {
            info: NetworkInfo::new(status, timestamp),
            data: Vec::new(),
        }
    }
}

/// The unit of network I/O: the payloads of all 4 children of `id`, in [`TileId::children`] order.
#[derive(Archive, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[archive(check_bytes)]
pub struct Quad {
    pub id: TileId,
    pub tiles: [QuadTile; 4],
}

impl Quad {
    pub fn new(id: TileId, tiles: [QuadTile; 4]) -> Self {
        Self { id, tiles }
    }

    /// A quad whose children all share the same status and carry no data.
    pub fn uniform(id: TileId, status: NetworkStatus, timestamp: u64) -> Self {
        let tile = QuadTile::empty(status, timestamp);
        Self::new(id, [tile.clone(), tile.clone(), tile.clone(), tile])
    }

    /// The worst status of any child.
    pub fn status(&self) -> NetworkStatus {
        self.tiles
            .iter()
            .map(|t| t.info.status)
            .max()
            .unwrap_or(NetworkStatus::Good)
    }

    /// The oldest fetch time of any child.
    pub fn timestamp(&self) -> u64 {
        self.tiles
            .iter()
            .map(|t| t.info.timestamp)
            .min()
            .unwrap_or(0)
    }

    pub fn is_usable(&self) -> bool {
        self.status() != NetworkStatus::NetworkError
    }

    /// Seconds since the oldest child was fetched, relative to `now` (unix seconds).
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp())
    }

    /// The tile ids this quad carries payloads for, paired with those payloads.
    pub fn child_tiles(&self) -> impl Iterator<Item = (TileId, &QuadTile)> {
        self.id.children().into_iter().zip(self.tiles.iter())
    }
}

impl CacheValue for Quad {
    fn tile_id(&self) -> TileId {
        self.id
    }
}

impl Persist for Quad {
    const VERSION_TAG: &'static str = "TSQUAD01";

    fn encode(&self) -> Result<Vec<u8>, CacheIoError> {
        encode_archived(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CacheIoError> {
        decode_archived(bytes)
    }
}

/// Current unix time in seconds. A clock set before 1970 reads as 0.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
