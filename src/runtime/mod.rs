//! Two-lane task system: a worker pool for CPU-bound decoding and a
//! cooperative main lane drained by an explicit [`AsyncSystem::pump`] call.

mod future;
mod system;

pub use future::{Future, Promise};
pub use system::AsyncSystem;
