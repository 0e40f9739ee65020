//! terrastream: a client runtime for streaming massive, hierarchically
//! organised 3D geospatial datasets (3D Tiles and quantized-mesh terrain)
//! into a real-time renderer.
//!
//! The crate owns tile lifecycle and selection, content decoding, and
//! raster overlay binding. Transport and rendering are injected: an
//! [`asset::AssetAccessor`] fetches bytes, a
//! [`renderer::PrepareRendererResources`] turns decoded meshes into
//! renderer resources. The embedding application drives everything by
//! calling [`tiles::Tileset::update_view`] and
//! [`runtime::AsyncSystem::pump`] once per frame.

pub mod asset;
pub mod error;
pub mod geodesy;
pub mod ion;
pub mod mesh;
pub mod overlay;
pub mod quantized;
pub mod renderer;
pub mod runtime;
pub mod tiles;

pub use error::{Error, Result};
