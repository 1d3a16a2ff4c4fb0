//! Value types shared between feeders and consumers.
//!
//! The structs in [`config`] are embedded verbatim in the shared frame record,
//! so they are `#[repr(C)]` and [`bytemuck::Pod`]: readers copy them straight
//! out of memory another process wrote, without validation. They also derive
//! serde traits so feeders can keep overlay layouts in YAML.
//!
//! - [`ShmConfig`] is the frame-wide configuration replaced on every submit
//! - [`OverlayFrameConfig`] places one overlay on the shared texture and on the consumer
//! - [`ConsumerKind`] / [`ConsumerPattern`] select which consumers a frame targets
//! - [`HeaderFlags`] holds the record's flag word
//! - [`UpdateRate`] controls frame watcher throttling

mod config;
mod consumer;
mod flags;
mod update_rate;

pub use config::{
    GazeTargetScale, OverlayFrameConfig, PixelPoint, PixelRect, PixelSize, ShmConfig, Upscaling,
    VrLayout, VrOpacity, VrOverlayConfig, VrPose, VrRenderConfig, VrSize,
};
pub use consumer::{ConsumerKind, ConsumerPattern};
pub use flags::HeaderFlags;
pub use update_rate::UpdateRate;
