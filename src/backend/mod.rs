//! Device abstraction layer
//!
//! This module provides the immediate-context device interface the engine renders through:
//! - `RenderDevice`: state setters, binds, copies and draws issued in frame order
//! - `RecordingDevice`: headless device that records every command

pub mod recording;
pub mod traits;
pub mod types;

pub use recording::*;
pub use traits::*;
pub use types::*;
