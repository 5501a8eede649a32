//! Resource management
//!
//! Models, materials, shaders and render targets consumed by the render queue and
//! the lighting engine. Asset loading is external; these types wrap ready-to-bind
//! device resources.

mod material;
mod mesh;
mod model;
mod render_target;
mod shader;

pub use material::*;
pub use mesh::*;
pub use model::*;
pub use render_target::*;
pub use shader::*;
