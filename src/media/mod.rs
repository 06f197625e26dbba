//! Media sources, fan-out and local preview.
//!
//! Capture and encoding run in an `ffmpeg` process, preview in `ffplay`.
//! Everything between them and the peer connection is H.264 Annex-B [`Frame`]s.

pub mod display;
pub mod frame;
pub mod relay;
pub mod source;

pub use display::*;
pub use frame::*;
pub use relay::*;
pub use source::*;
