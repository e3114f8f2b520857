//! Opaque request/response contract of the third-party effects engine.
//!
//! Every call returns `Ok` or an [`EngineCode`]. Handles are destroyed by dropping them.

use serde::Serialize;
use vfx_core::prelude::FrameGeometry;

use crate::env::PlatformContext;

/// Non-zero status returned by an engine call.
///
/// # Example
/// ```rust
/// use vfx_engine::backend::EngineCode;
///
/// let err = EngineCode(-3);
/// assert_eq!(err.to_string(), "effects engine returned -3");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("effects engine returned {0}")]
pub struct EngineCode(pub i32);

pub type EngineResult<T = ()> = Result<T, EngineCode>;

/// Shape of an RGBA buffer handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbaLayout {
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: usize,
}

impl RgbaLayout {
    pub fn len(&self) -> usize {
        self.stride * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<FrameGeometry> for RgbaLayout {
    fn from(g: FrameGeometry) -> Self {
        Self {
            width: g.width,
            height: g.height,
            stride: g.rgba_stride(),
        }
    }
}

/// What a handle needs to validate its license.
#[derive(Debug, Clone)]
pub struct LicenseRequest<'a> {
    pub license_path: &'a str,
    pub platform: Option<PlatformContext>,
}

/// Handles that must pass a license check before use.
pub trait Licensed: Send {
    fn check_license(&mut self, request: &LicenseRequest<'_>) -> EngineResult;
}

/// Core beautification / composer handle.
pub trait EffectHandle: Licensed {
    fn init(&mut self, model_dir: &str) -> EngineResult;
    fn set_composer_mode(&mut self, mode: i32, order_type: i32) -> EngineResult;
    /// Replace the active composer node list. An empty slice clears it.
    fn set_nodes(&mut self, paths: &[&str]) -> EngineResult;
    fn update_node(&mut self, path: &str, key: &str, intensity: f32) -> EngineResult;
    /// Load a sticker resource, or clear it with `None`.
    fn set_sticker(&mut self, path: Option<&str>) -> EngineResult;
    fn set_dimensions(&mut self, width: u32, height: u32) -> EngineResult;
    /// Run detection algorithms the active effects depend on.
    fn algorithm_buffer(&mut self, rgba: &[u8], layout: RgbaLayout, timestamp_ms: u64)
    -> EngineResult;
    /// Render effects into `rgba` in place.
    fn process_buffer(
        &mut self,
        rgba: &mut [u8],
        layout: RgbaLayout,
        timestamp_ms: u64,
    ) -> EngineResult;
}

/// Tunable face detector parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceParam {
    /// Frames between full detections.
    DetectInterval,
    MaxFaceCount,
}

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FaceBox {
    pub id: i32,
    pub rect: Rect,
    pub score: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FaceInfo {
    pub faces: Vec<FaceBox>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FaceAttributes {
    pub age: f32,
    pub boy_prob: f32,
    pub attractive: f32,
    pub happy_score: f32,
    pub expression: i32,
    pub racial: i32,
}

pub trait FaceDetectHandle: Licensed {
    fn set_param(&mut self, param: FaceParam, value: f32) -> EngineResult;
    fn detect(&mut self, rgba: &[u8], layout: RgbaLayout) -> EngineResult<FaceInfo>;
}

pub trait FaceAttributeHandle: Licensed {
    /// Attributes for each face, in the order given.
    fn detect_batch(
        &mut self,
        rgba: &[u8],
        layout: RgbaLayout,
        faces: &[FaceBox],
    ) -> EngineResult<Vec<FaceAttributes>>;
}

/// Secondary models a hand detector loads after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandModel {
    Box,
    Gesture,
    KeyPoint,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Hand {
    pub id: i32,
    pub rect: Rect,
    pub action: i32,
    pub rot_angle: f32,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HandInfo {
    pub hands: Vec<Hand>,
}

pub trait HandDetectHandle: Licensed {
    fn set_model(&mut self, model: HandModel, path: &str) -> EngineResult;
    fn detect(&mut self, rgba: &[u8], layout: RgbaLayout) -> EngineResult<HandInfo>;
}

/// Scene lighting classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LightInfo {
    pub class: i32,
    pub prob: f32,
}

pub trait LightDetectHandle: Licensed {
    fn detect(&mut self, rgba: &[u8], layout: RgbaLayout) -> EngineResult<LightInfo>;
}

/// Entry point of an effects engine binding.
pub trait EffectsBackend: Send + Sync {
    fn create_effect(&self) -> EngineResult<Box<dyn EffectHandle>>;

    fn create_face_detector(&self, model_path: &str) -> EngineResult<Box<dyn FaceDetectHandle>>;

    fn create_face_attributes(
        &self,
        model_path: &str,
    ) -> EngineResult<Box<dyn FaceAttributeHandle>>;

    fn create_hand_detector(&self, model_path: &str) -> EngineResult<Box<dyn HandDetectHandle>>;

    fn create_light_detector(&self, model_path: &str)
    -> EngineResult<Box<dyn LightDetectHandle>>;

    /// Largest face count the detector supports.
    fn max_face_count(&self) -> u32 {
        10
    }
}
