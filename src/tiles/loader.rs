//! Content loader seam and shared loader plumbing

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use glam::DMat4;

use crate::asset::AssetAccessor;
use crate::renderer::PrepareRendererResources;
use crate::runtime::{AsyncSystem, Future};

use super::bounds::BoundingVolume;
use super::content::{TileContent, TileLoadState, TileRenderContent};
use super::id::TileId;
use super::tile::{TileArena, TileIndex, TileInitializer};

/// Injected collaborators shared by loaders and the content manager.
#[derive(Clone)]
pub struct TilesetExternals {
    pub system: AsyncSystem,
    pub accessor: Arc<dyn AssetAccessor>,
    pub preparer: Arc<dyn PrepareRendererResources>,
}

/// Snapshot of the tile fields a loader needs, detached from the arena so
/// load work can run off the main lane.
#[derive(Clone)]
pub struct TileLoadInput {
    pub tile_index: TileIndex,
    pub tile_id: TileId,
    pub bounding_volume: BoundingVolume,
    pub transform: DMat4,
}

/// What a load produced. `state` must be one of `ContentLoaded`, `Failed`
/// or `FailedTemporarily`; the manager coerces anything else to `Failed`.
pub struct TileLoadResult {
    pub state: TileLoadState,
    pub content: TileContent,
    pub http_status: u16,
    /// Base URL for resolving external references of the content.
    pub base_url: String,
    pub initializer: Option<TileInitializer>,
}

impl TileLoadResult {
    pub fn success(content: TileContent, base_url: String) -> Self {
        Self {
            state: TileLoadState::ContentLoaded,
            content,
            http_status: 0,
            base_url,
            initializer: None,
        }
    }

    pub fn empty_success() -> Self {
        Self::success(TileContent::Render(TileRenderContent::default()), String::new())
    }

    pub fn failed(http_status: u16) -> Self {
        Self {
            state: TileLoadState::Failed,
            content: TileContent::Render(TileRenderContent::default()),
            http_status,
            base_url: String::new(),
            initializer: None,
        }
    }

    pub fn retry_later(http_status: u16) -> Self {
        Self {
            state: TileLoadState::FailedTemporarily,
            content: TileContent::Unknown,
            http_status,
            base_url: String::new(),
            initializer: None,
        }
    }

    pub fn with_initializer(mut self, initializer: TileInitializer) -> Self {
        self.initializer = Some(initializer);
        self
    }
}

/// Map an HTTP status to the resulting load state. Status 0 stands for a
/// transport-level failure.
pub fn state_for_http_failure(status: u16) -> TileLoadState {
    match status {
        401 => TileLoadState::FailedTemporarily,
        0 => TileLoadState::FailedTemporarily,
        s if s >= 500 => TileLoadState::FailedTemporarily,
        _ => TileLoadState::Failed,
    }
}

/// Turns an opaque byte payload at a URL into tile content.
pub trait TilesetContentLoader: Send + Sync {
    fn load_tile_content(
        &self,
        input: TileLoadInput,
        externals: &TilesetExternals,
        headers: Vec<(String, String)>,
    ) -> Future<TileLoadResult>;
}

/// Attribution requested by the hosting service for loaded data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub html: String,
    pub collapsible: bool,
}

/// What loader creation yields: the loader itself plus the initial tile
/// tree and the headers every content request must carry.
pub struct LoaderResult {
    pub loader: Arc<dyn TilesetContentLoader>,
    pub arena: TileArena,
    pub root: TileIndex,
    pub request_headers: Vec<(String, String)>,
    pub attributions: Vec<Attribution>,
}

/// Per-tile exponential backoff for transient failures, tracked by the
/// loader and keyed by arena index.
pub struct BackoffTracker {
    base_delay: Duration,
    max_delay: Duration,
    entries: Mutex<HashMap<TileIndex, (u32, Instant)>>,
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl BackoffTracker {
    /// Whether a new attempt for this tile is allowed yet.
    pub fn is_ready(&self, tile: TileIndex) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(&tile) {
            Some((attempts, last)) => {
                let exp = attempts.saturating_sub(1).min(16);
                let delay = self
                    .base_delay
                    .saturating_mul(1u32 << exp)
                    .min(self.max_delay);
                last.elapsed() >= delay
            }
            None => true,
        }
    }

    pub fn record_failure(&self, tile: TileIndex) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(tile).or_insert((0, Instant::now()));
        entry.0 = entry.0.saturating_add(1);
        entry.1 = Instant::now();
    }

    pub fn clear(&self, tile: TileIndex) {
        self.entries.lock().unwrap().remove(&tile);
    }
}
