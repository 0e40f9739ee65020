//! In-memory mesh graph and binary-glTF loading

mod external;
mod glb;
mod model;
mod normals;

pub use external::resolve_external_data;
pub use glb::parse_glb;
pub use model::{
    transform_position, Accessor, AccessorKind, Buffer, BufferView, ComponentType, Image, Material,
    Mesh, Model, Node, Primitive, PrimitiveLocation, PrimitiveMode, Scene,
};
pub use normals::generate_missing_normals_smooth;

pub(crate) use model::le;
