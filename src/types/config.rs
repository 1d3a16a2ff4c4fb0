//! Frame configuration published by the feeder alongside every frame.
//!
//! Everything here lives inside the shared record, so every type is
//! `#[repr(C)]` plain-old-data: integers, floats and byte flags only, with
//! explicit padding. Any bit pattern another process leaves behind is a valid
//! value.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::ConsumerPattern;

/// Texture dimensions in pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Pixel offset; may be negative for screen coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

/// Rectangle in pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct PixelRect {
    pub offset: PixelPoint,
    pub size: PixelSize,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { offset: PixelPoint { x, y }, size: PixelSize { width, height } }
    }
}

/// Position and rotation of a VR layer, in meters and radians.
///
/// `eye_y` is relative to the user's eye height rather than the floor.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct VrPose {
    pub x: f32,
    pub eye_y: f32,
    pub z: f32,
    pub rx: f32,
    pub ry: f32,
    pub rz: f32,
}

/// Physical size of a VR layer in meters.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct VrSize {
    pub width: f32,
    pub height: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct VrLayout {
    pub pose: VrPose,
    pub size: VrSize,
}

/// Scale applied to a layer's bounds when testing whether the user looks at it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct GazeTargetScale {
    pub vertical: f32,
    pub horizontal: f32,
}

impl Default for GazeTargetScale {
    fn default() -> Self {
        Self { vertical: 1.0, horizontal: 1.0 }
    }
}

/// Layer opacity when looked at versus not.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct VrOpacity {
    pub normal: f32,
    pub gaze: f32,
}

impl Default for VrOpacity {
    fn default() -> Self {
        Self { normal: 1.0, gaze: 1.0 }
    }
}

/// Per-overlay VR placement.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct VrOverlayConfig {
    pub layout: VrLayout,
    pub enable_gaze_zoom: u8,
    #[serde(skip)]
    pub _pad: [u8; 3],
    pub zoom_scale: f32,
    pub gaze_target_scale: GazeTargetScale,
    pub opacity: VrOpacity,
}

impl Default for VrOverlayConfig {
    fn default() -> Self {
        Self {
            layout: VrLayout::default(),
            enable_gaze_zoom: 0,
            _pad: [0; 3],
            zoom_scale: 2.0,
            gaze_target_scale: GazeTargetScale::default(),
            opacity: VrOpacity::default(),
        }
    }
}

impl VrOverlayConfig {
    pub fn gaze_zoom_enabled(&self) -> bool {
        self.enable_gaze_zoom != 0
    }
}

/// Placement of one overlay within the shared texture and on the consumer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct OverlayFrameConfig {
    /// Feeder-assigned identity, stable across frames.
    pub overlay_id: u64,
    /// Source rectangle inside the shared texture.
    pub location_on_texture: PixelRect,
    /// Destination on a flat (non-VR) consumer.
    pub screen_rect: PixelRect,
    pub vr: VrOverlayConfig,
    pub vr_enabled: u8,
    #[serde(skip)]
    pub _pad: [u8; 7],
}

impl OverlayFrameConfig {
    pub fn is_vr_enabled(&self) -> bool {
        self.vr_enabled != 0
    }
}

/// Upscaling policy for VR consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Upscaling {
    #[default]
    Automatic,
    AlwaysOff,
    AlwaysOn,
}

impl Upscaling {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Upscaling::AlwaysOff,
            2 => Upscaling::AlwaysOn,
            // Unknown values come from a newer or confused writer
            _ => Upscaling::Automatic,
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Upscaling::Automatic => 0,
            Upscaling::AlwaysOff => 1,
            Upscaling::AlwaysOn => 2,
        }
    }
}

/// Render parameters shared by every VR consumer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct VrRenderConfig {
    pub always_update_swapchain: u8,
    pub upscaling: u8,
    pub enable_gaze_input_focus: u8,
    pub force_zoom: u8,
    #[serde(skip)]
    pub _pad: [u8; 4],
    /// Bumped by the feeder whenever the user asks to recenter.
    pub recenter_count: u64,
}

impl VrRenderConfig {
    pub fn upscaling(&self) -> Upscaling {
        Upscaling::from_raw(self.upscaling)
    }

    pub fn set_upscaling(&mut self, upscaling: Upscaling) {
        self.upscaling = upscaling.to_raw();
    }
}

/// Frame-wide configuration, replaced wholesale on every submit.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct ShmConfig {
    /// Overlay that receives input when no other layer claims it.
    pub global_input_layer_id: u64,
    pub vr: VrRenderConfig,
    /// Consumer kinds this frame is meant for.
    pub target: ConsumerPattern,
    pub texture_size: PixelSize,
    pub tint: [f32; 4],
    #[serde(skip)]
    pub _pad: [u8; 4],
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            global_input_layer_id: 0,
            vr: VrRenderConfig::default(),
            target: ConsumerPattern::ANY,
            texture_size: PixelSize::default(),
            tint: [1.0; 4],
            _pad: [0; 4],
        }
    }
}
