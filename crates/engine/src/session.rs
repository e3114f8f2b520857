//! Owned effects-engine state: lazily created handles, settings and the per-frame call sequence.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    backend::{
        EffectHandle, EffectsBackend, EngineResult, FaceAttributeHandle, FaceAttributes,
        FaceDetectHandle, FaceInfo, FaceParam, HandDetectHandle, HandInfo, HandModel,
        LicenseRequest, LightDetectHandle, LightInfo, Licensed, RgbaLayout,
    },
    env::{DetachedEnvironment, ExecutionEnvironment, ThreadAttachment},
    settings::{ConfigError, DEFAULT_VENDOR, EffectSettings},
};

/// Composer mode pushed right after init: composer enabled, default node ordering.
const COMPOSER_MODE: (i32, i32) = (1, 0);

/// Per-session knobs that are not part of the configuration document.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Vendor segment of configuration keys (`plugin.<vendor>.…`).
    pub vendor: String,
    /// Frames between full face detections.
    pub face_detect_interval: u32,
    /// Upper bound on tracked faces; clamped to what the backend supports.
    pub max_faces: Option<u32>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            vendor: DEFAULT_VENDOR.to_owned(),
            face_detect_interval: 15,
            max_faces: None,
        }
    }
}

enum Slot<H> {
    NotAttempted,
    Ready(H),
    Failed,
}

impl<H> Slot<H> {
    fn is_ready(&self) -> bool {
        matches!(self, Slot::Ready(_))
    }

    /// Create the handle on first use; a failed create sticks until [`Slot::rearm`].
    fn get_or_create(
        &mut self,
        op: &'static str,
        create: impl FnOnce() -> EngineResult<H>,
        setup: impl FnOnce(&mut H),
    ) -> Option<&mut H> {
        if let Slot::NotAttempted = self {
            *self = match create() {
                Ok(mut handle) => {
                    setup(&mut handle);
                    debug!(op, "engine handle created");
                    Slot::Ready(handle)
                }
                Err(err) => {
                    warn!(op, code = err.0, "engine handle creation failed");
                    Slot::Failed
                }
            };
        }
        match self {
            Slot::Ready(handle) => Some(handle),
            _ => None,
        }
    }

    fn rearm(&mut self) {
        if let Slot::Failed = self {
            *self = Slot::NotAttempted;
        }
    }

    fn clear(&mut self) -> bool {
        let had = self.is_ready();
        *self = Slot::NotAttempted;
        had
    }
}

fn check(op: &'static str, result: EngineResult) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!(op, code = err.0, "effects engine call failed");
            false
        }
    }
}

fn license<H: Licensed + ?Sized>(
    op: &'static str,
    handle: &mut H,
    env: &dyn ExecutionEnvironment,
    license_path: &str,
) {
    let _attached = ThreadAttachment::new(env);
    let request = LicenseRequest {
        license_path,
        platform: env.platform_context(),
    };
    check(op, handle.check_license(&request));
}

/// Results of one face detection pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FaceDetection {
    #[serde(flatten)]
    pub info: FaceInfo,
    pub attributes: Vec<FaceAttributes>,
}

/// Everything detected on one frame, as reported to the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face: Option<FaceDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hand: Option<HandInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light: Option<LightInfo>,
}

impl DetectionReport {
    pub fn is_empty(&self) -> bool {
        self.face.is_none() && self.hand.is_none() && self.light.is_none()
    }
}

/// One filter's view of the effects engine.
///
/// Handles are created lazily the first time a frame needs them and dropped by
/// [`release`](Self::release). Engine failures are logged and never returned.
///
/// # Example
/// ```rust
/// # #[cfg(feature = "test-support")]
/// # {
/// use vfx_engine::{
///     session::EffectsEngineSession,
///     testing::{FakeBackend, HandleKind},
/// };
///
/// let backend = FakeBackend::default();
/// let mut session = EffectsEngineSession::new(backend.shared());
/// session
///     .apply_configuration(r#"{"plugin.bytedance.aiEffectEnabled": true}"#)
///     .unwrap();
/// assert!(session.ensure_core_engine());
/// session.release();
/// assert_eq!(backend.stats().dropped(HandleKind::Effect), 1);
/// # }
/// ```
pub struct EffectsEngineSession {
    backend: Arc<dyn EffectsBackend>,
    env: Arc<dyn ExecutionEnvironment>,
    options: SessionOptions,
    settings: EffectSettings,
    effect: Slot<Box<dyn EffectHandle>>,
    face_detect: Slot<Box<dyn FaceDetectHandle>>,
    face_attributes: Slot<Box<dyn FaceAttributeHandle>>,
    hand_detect: Slot<Box<dyn HandDetectHandle>>,
    light_detect: Slot<Box<dyn LightDetectHandle>>,
    applied_sticker: Option<String>,
}

impl EffectsEngineSession {
    pub fn new(backend: Arc<dyn EffectsBackend>) -> Self {
        Self::with_options(
            backend,
            Arc::new(DetachedEnvironment),
            SessionOptions::default(),
        )
    }

    pub fn with_options(
        backend: Arc<dyn EffectsBackend>,
        env: Arc<dyn ExecutionEnvironment>,
        options: SessionOptions,
    ) -> Self {
        Self {
            backend,
            env,
            options,
            settings: EffectSettings::default(),
            effect: Slot::NotAttempted,
            face_detect: Slot::NotAttempted,
            face_attributes: Slot::NotAttempted,
            hand_detect: Slot::NotAttempted,
            light_detect: Slot::NotAttempted,
            applied_sticker: None,
        }
    }

    pub fn settings(&self) -> &EffectSettings {
        &self.settings
    }

    pub fn vendor(&self) -> &str {
        &self.options.vendor
    }

    /// Apply a configuration document and give failed handles another chance.
    pub fn apply_configuration(&mut self, document: &str) -> Result<(), ConfigError> {
        self.rearm();
        self.settings
            .apply_document(document, &self.options.vendor)
            .inspect_err(|err| warn!(code = err.code(), %err, "configuration rejected"))
    }

    /// Current settings in document form.
    pub fn snapshot_document(&self) -> serde_json::Value {
        self.settings.to_document(&self.options.vendor)
    }

    /// Let slots whose creation failed be attempted again.
    pub fn rearm(&mut self) {
        self.effect.rearm();
        self.face_detect.rearm();
        self.face_attributes.rearm();
        self.hand_detect.rearm();
        self.light_detect.rearm();
    }

    /// Create → license → init → composer mode, once per attempt. Returns whether a handle exists.
    pub fn ensure_core_engine(&mut self) -> bool {
        let backend = &self.backend;
        let env = self.env.as_ref();
        let settings = &self.settings;
        self.effect
            .get_or_create(
                "create_effect",
                || backend.create_effect(),
                |handle| {
                    license("effect_check_license", handle.as_mut(), env, &settings.license_path);
                    check("effect_init", handle.init(&settings.model_dir));
                    let (mode, order) = COMPOSER_MODE;
                    check("composer_set_mode", handle.set_composer_mode(mode, order));
                },
            )
            .is_some()
    }

    /// Create the face detector when face attributes are enabled.
    pub fn ensure_face_detection(&mut self) -> bool {
        if !self.settings.face_attribute_enabled {
            return false;
        }
        let backend = &self.backend;
        let env = self.env.as_ref();
        let settings = &self.settings;
        let interval = self.options.face_detect_interval as f32;
        let supported = backend.max_face_count();
        let max_faces = self
            .options
            .max_faces
            .map_or(supported, |n| n.min(supported)) as f32;
        self.face_detect
            .get_or_create(
                "create_face_detector",
                || backend.create_face_detector(&settings.face_detect_model_path),
                |handle| {
                    license("face_check_license", handle.as_mut(), env, &settings.license_path);
                    check(
                        "face_set_interval",
                        handle.set_param(FaceParam::DetectInterval, interval),
                    );
                    check(
                        "face_set_max_count",
                        handle.set_param(FaceParam::MaxFaceCount, max_faces),
                    );
                },
            )
            .is_some()
    }

    /// Create the face attribute detector when face attributes are enabled.
    pub fn ensure_face_attributes(&mut self) -> bool {
        if !self.settings.face_attribute_enabled {
            return false;
        }
        let backend = &self.backend;
        let env = self.env.as_ref();
        let settings = &self.settings;
        self.face_attributes
            .get_or_create(
                "create_face_attributes",
                || backend.create_face_attributes(&settings.face_attribute_model_path),
                |handle| {
                    license(
                        "face_attribute_check_license",
                        handle.as_mut(),
                        env,
                        &settings.license_path,
                    );
                },
            )
            .is_some()
    }

    /// Create the hand detector and load its secondary models.
    pub fn ensure_hand_detection(&mut self) -> bool {
        if !self.settings.hand_detect_enabled {
            return false;
        }
        let backend = &self.backend;
        let env = self.env.as_ref();
        let settings = &self.settings;
        self.hand_detect
            .get_or_create(
                "create_hand_detector",
                || backend.create_hand_detector(&settings.hand_detect_model_path),
                |handle| {
                    license("hand_check_license", handle.as_mut(), env, &settings.license_path);
                    for (model, path) in [
                        (HandModel::Box, &settings.hand_box_model_path),
                        (HandModel::Gesture, &settings.hand_gesture_model_path),
                        (HandModel::KeyPoint, &settings.hand_kp_model_path),
                    ] {
                        if !path.is_empty() {
                            check("hand_set_model", handle.set_model(model, path));
                        }
                    }
                },
            )
            .is_some()
    }

    pub fn ensure_light_detection(&mut self) -> bool {
        if !self.settings.light_detect_enabled {
            return false;
        }
        let backend = &self.backend;
        let env = self.env.as_ref();
        let settings = &self.settings;
        self.light_detect
            .get_or_create(
                "create_light_detector",
                || backend.create_light_detector(&settings.light_detect_model_path),
                |handle| {
                    license("light_check_license", handle.as_mut(), env, &settings.license_path);
                },
            )
            .is_some()
    }

    /// Push composer nodes if they changed since the last push.
    pub fn apply_composer_nodes_if_dirty(&mut self) {
        if !self.settings.composer.is_dirty() {
            return;
        }
        let Slot::Ready(effect) = &mut self.effect else {
            return;
        };
        let nodes = self.settings.composer.nodes();
        let paths: Vec<&str> = nodes.iter().map(|n| n.path.as_str()).collect();
        if check("composer_set_nodes", effect.set_nodes(&paths)) {
            debug!(count = paths.len(), "composer nodes pushed");
        }
        for node in nodes {
            if !check(
                "composer_update_node",
                effect.update_node(&node.path, &node.key, node.intensity),
            ) {
                debug!(path = %node.path, key = %node.key, "composer node update skipped");
            }
        }
        self.settings.composer.mark_clean();
    }

    /// Load or clear the face sticker when the configured resource changed.
    pub fn apply_sticker_if_changed(&mut self) {
        let wanted = (self.settings.face_sticker_enabled
            && !self.settings.face_sticker_item_path.is_empty())
        .then(|| self.settings.face_sticker_item_path.clone());
        if wanted == self.applied_sticker {
            return;
        }
        let Slot::Ready(effect) = &mut self.effect else {
            return;
        };
        if check("effect_set_sticker", effect.set_sticker(wanted.as_deref())) {
            self.applied_sticker = wanted;
        }
    }

    /// Run the effect chain over `rgba` in place.
    ///
    /// Dimensions, then the algorithm pass, then rendering. Nothing happens unless the AI
    /// effect is enabled and the core handle exists. Returns `true` when the chain was handed
    /// the buffer, even if one of its calls reported an error.
    pub fn process_buffer(
        &mut self,
        rgba: &mut [u8],
        layout: RgbaLayout,
        timestamp_ms: u64,
    ) -> bool {
        if !self.settings.ai_effect_enabled || !self.ensure_core_engine() {
            return false;
        }
        self.apply_composer_nodes_if_dirty();
        self.apply_sticker_if_changed();
        let Slot::Ready(effect) = &mut self.effect else {
            return false;
        };
        check(
            "effect_set_dimensions",
            effect.set_dimensions(layout.width, layout.height),
        );
        check(
            "effect_algorithm_buffer",
            effect.algorithm_buffer(rgba, layout, timestamp_ms),
        );
        check(
            "effect_process_buffer",
            effect.process_buffer(rgba, layout, timestamp_ms),
        );
        true
    }

    /// Detect faces and, when any were found, their attributes.
    pub fn detect_faces(&mut self, rgba: &[u8], layout: RgbaLayout) -> Option<FaceDetection> {
        if !self.ensure_face_detection() {
            return None;
        }
        self.ensure_face_attributes();
        let Slot::Ready(detector) = &mut self.face_detect else {
            return None;
        };
        let info = match detector.detect(rgba, layout) {
            Ok(info) => info,
            Err(err) => {
                warn!(op = "face_detect", code = err.0, "effects engine call failed");
                return None;
            }
        };
        let mut detection = FaceDetection {
            info,
            attributes: Vec::new(),
        };
        if detection.info.faces.is_empty() {
            return Some(detection);
        }
        if let Slot::Ready(attributes) = &mut self.face_attributes {
            match attributes.detect_batch(rgba, layout, &detection.info.faces) {
                Ok(found) => detection.attributes = found,
                Err(err) => warn!(
                    op = "face_attribute_detect",
                    code = err.0,
                    "effects engine call failed"
                ),
            }
        }
        Some(detection)
    }

    pub fn detect_hands(&mut self, rgba: &[u8], layout: RgbaLayout) -> Option<HandInfo> {
        if !self.ensure_hand_detection() {
            return None;
        }
        let Slot::Ready(detector) = &mut self.hand_detect else {
            return None;
        };
        detector
            .detect(rgba, layout)
            .inspect_err(|err| warn!(op = "hand_detect", code = err.0, "effects engine call failed"))
            .ok()
    }

    pub fn detect_light(&mut self, rgba: &[u8], layout: RgbaLayout) -> Option<LightInfo> {
        if !self.ensure_light_detection() {
            return None;
        }
        let Slot::Ready(detector) = &mut self.light_detect else {
            return None;
        };
        detector
            .detect(rgba, layout)
            .inspect_err(|err| warn!(op = "light_detect", code = err.0, "effects engine call failed"))
            .ok()
    }

    /// Run every enabled detector over `rgba`.
    pub fn detect_all(&mut self, rgba: &[u8], layout: RgbaLayout) -> DetectionReport {
        DetectionReport {
            face: self.detect_faces(rgba, layout),
            hand: self.detect_hands(rgba, layout),
            light: self.detect_light(rgba, layout),
        }
    }

    /// Drop every handle, forget the configuration and reset all flags.
    pub fn release(&mut self) {
        let dropped = [
            self.effect.clear(),
            self.face_detect.clear(),
            self.face_attributes.clear(),
            self.hand_detect.clear(),
            self.light_detect.clear(),
        ]
        .into_iter()
        .filter(|had| *had)
        .count();
        self.settings = EffectSettings::default();
        self.applied_sticker = None;
        debug!(handles = dropped, "effects engine released");
    }
}
