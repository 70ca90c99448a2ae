use crate::{RefineParams, MAX_ZOOM_LEVEL};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Tuning of one tile scheduler.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Texels along each edge of a tile.
    pub tile_edge_resolution: u32,
    pub max_zoom_level: u8,
    /// Quads kept in main memory.
    pub ram_quad_quota: usize,
    /// Quads resident on the GPU. Each takes one array slot per child tile.
    pub gpu_quad_quota: usize,
    /// Tiles are refined while a texel would cover at least this many pixels.
    pub error_threshold_px: f64,
    pub update_debounce_ms: u64,
    pub purge_debounce_ms: u64,
    pub persist_debounce_ms: u64,
    /// Cached quads older than this are fetched again when the view needs them.
    pub retirement_age_secs: u64,
    /// The RAM cache may exceed its quota by this many quads before a purge runs.
    pub ram_purge_hysteresis: usize,
    /// Writing the cache to disk longer than this gets logged.
    pub persist_budget_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            tile_edge_resolution: 256,
            max_zoom_level: 19,
            ram_quad_quota: 4096,
            gpu_quad_quota: 256,
            error_threshold_px: 2.0,
            update_debounce_ms: 50,
            purge_debounce_ms: 1000,
            persist_debounce_ms: 5000,
            retirement_age_secs: 7 * SECONDS_PER_DAY,
            ram_purge_hysteresis: 64,
            persist_budget_ms: 50,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("max_zoom_level {0} is deeper than any addressable tile")]
    ZoomTooDeep(u8),
    #[error("error_threshold_px must be finite and positive, got {0}")]
    BadErrorThreshold(f64),
    #[error("gpu_quad_quota {0} needs more GPU slots than a u32 can count")]
    GpuQuotaTooLarge(usize),
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_edge_resolution == 0 {
            return Err(ConfigError::Zero {
                field: "tile_edge_resolution",
            });
        }
        if self.ram_quad_quota == 0 {
            return Err(ConfigError::Zero {
                field: "ram_quad_quota",
            });
        }
        if self.gpu_quad_quota == 0 {
            return Err(ConfigError::Zero {
                field: "gpu_quad_quota",
            });
        }
        if self.gpu_quad_quota > (u32::MAX / 4) as usize {
            return Err(ConfigError::GpuQuotaTooLarge(self.gpu_quad_quota));
        }
        if self.max_zoom_level > MAX_ZOOM_LEVEL {
            return Err(ConfigError::ZoomTooDeep(self.max_zoom_level));
        }
        if !(self.error_threshold_px.is_finite() && self.error_threshold_px > 0.0) {
            return Err(ConfigError::BadErrorThreshold(self.error_threshold_px));
        }
        Ok(())
    }

    pub fn refine_params(&self) -> RefineParams {
        RefineParams {
            error_threshold_px: self.error_threshold_px,
            tile_edge_size: self.tile_edge_resolution,
            max_zoom: self.max_zoom_level,
        }
    }

    /// Every quad holds 4 tiles, each with its own slot.
    pub fn gpu_slot_capacity(&self) -> u32 {
        4 * self.gpu_quad_quota as u32
    }

    pub fn update_debounce(&self) -> Duration {
        Duration::from_millis(self.update_debounce_ms)
    }

    pub fn purge_debounce(&self) -> Duration {
        Duration::from_millis(self.purge_debounce_ms)
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    pub fn persist_budget(&self) -> Duration {
        Duration::from_millis(self.persist_budget_ms)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
