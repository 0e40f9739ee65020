//! Quantized-mesh terrain payload decoding

mod decoder;

pub use decoder::{decode_quantized_mesh, QuantizedMeshResult, SKIRT_HEIGHT};
