//! Scene state consumed by the renderer: camera, lights, environments and culling

mod camera;
mod culling;
mod environment;
mod frustum;
mod light;
mod transform;

pub use camera::*;
pub use culling::*;
pub use environment::*;
pub use frustum::*;
pub use light::*;
pub use transform::*;
