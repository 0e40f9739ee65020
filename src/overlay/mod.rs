//! Raster overlay streaming and binding to geometry tiles

mod provider;
mod uv;

pub use provider::{
    OverlayTileState, RasterMappedToTile, RasterOverlayTile, RasterOverlayTileProvider,
};
pub use uv::{create_overlay_texture_coordinates, OverlayUvSpec};

use std::sync::{Arc, Mutex};

use crate::asset::AssetAccessor;
use crate::geodesy::{GeographicTilingScheme, Projection};
use crate::runtime::AsyncSystem;

/// Configuration of a raster overlay layer.
#[derive(Debug, Clone)]
pub struct RasterOverlayOptions {
    pub name: String,
    /// URL template with `{z}`, `{x}`, `{y}` placeholders.
    pub url_template: String,
    pub projection: Projection,
    pub tiling: GeographicTilingScheme,
    pub maximum_level: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

/// A source of externally-streamed imagery.
pub struct RasterOverlay {
    pub options: RasterOverlayOptions,
}

impl RasterOverlay {
    pub fn new(options: RasterOverlayOptions) -> Self {
        Self { options }
    }

    /// Create the real tile provider. Creation goes through a future so
    /// overlays whose configuration requires a metadata fetch can slot in
    /// without changing the collection machinery.
    fn create_tile_provider(
        &self,
        overlay_id: u32,
        system: &AsyncSystem,
    ) -> crate::runtime::Future<RasterOverlayTileProvider> {
        system.resolved(RasterOverlayTileProvider::new(
            overlay_id,
            self.options.clone(),
        ))
    }
}

/// Owns the overlays of a tileset and the providers that serve their tiles.
///
/// Each overlay registers a placeholder provider immediately; the real
/// provider is created asynchronously and swapped in on the main lane.
pub struct RasterOverlayCollection {
    overlays: Vec<Arc<RasterOverlay>>,
    placeholders: Vec<Arc<RasterOverlayTileProvider>>,
    providers: Arc<Mutex<Vec<Option<Arc<RasterOverlayTileProvider>>>>>,
}

impl Default for RasterOverlayCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl RasterOverlayCollection {
    pub fn new() -> Self {
        Self {
            overlays: Vec::new(),
            placeholders: Vec::new(),
            providers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register an overlay and kick off provider creation. Returns the
    /// overlay id used for its texture-coordinate attribute.
    pub fn add(&mut self, overlay: RasterOverlay, system: &AsyncSystem) -> u32 {
        let overlay_id = self.overlays.len() as u32;
        let overlay = Arc::new(overlay);

        self.placeholders.push(Arc::new(
            RasterOverlayTileProvider::placeholder(overlay_id, overlay.options.projection),
        ));
        self.providers.lock().unwrap().push(None);

        let providers = self.providers.clone();
        overlay
            .create_tile_provider(overlay_id, system)
            .then_in_main(move |provider| {
                let mut slots = providers.lock().unwrap();
                if let Some(slot) = slots.get_mut(overlay_id as usize) {
                    *slot = Some(Arc::new(provider));
                }
            });

        self.overlays.push(overlay);
        overlay_id
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    /// The provider for an overlay: the real one once created, the
    /// placeholder until then.
    pub fn provider(&self, overlay_id: u32) -> Option<Arc<RasterOverlayTileProvider>> {
        let slots = self.providers.lock().unwrap();
        match slots.get(overlay_id as usize) {
            Some(Some(real)) => Some(real.clone()),
            Some(None) => self.placeholders.get(overlay_id as usize).cloned(),
            None => None,
        }
    }

    /// Projection specs for generating per-vertex texture coordinates.
    pub fn uv_specs(&self) -> Vec<OverlayUvSpec> {
        self.overlays
            .iter()
            .enumerate()
            .map(|(i, o)| OverlayUvSpec {
                overlay_id: i as u32,
                projection: o.options.projection,
            })
            .collect()
    }

    /// Bind overlay tiles to a geometry tile's projected rectangle and
    /// start their texture fetches.
    pub fn bind_to_tile(
        &self,
        geometry_rectangle: &crate::geodesy::GlobeRectangle,
        system: &AsyncSystem,
        accessor: &Arc<dyn AssetAccessor>,
    ) -> Vec<RasterMappedToTile> {
        let mut mapped = Vec::new();
        for overlay_id in 0..self.overlays.len() as u32 {
            let Some(provider) = self.provider(overlay_id) else {
                continue;
            };
            if provider.is_placeholder() {
                // Real provider not ready; the tile rebinds next update.
                continue;
            }
            if let Some(binding) = provider.map_to_geometry_tile(geometry_rectangle, overlay_id) {
                provider.load_tile_texture(binding.tile.clone(), system, accessor);
                mapped.push(binding);
            }
        }
        mapped
    }
}
