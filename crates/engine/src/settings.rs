//! Configuration documents and the settings they drive.
//!
//! A document is a flat JSON object whose keys carry a `plugin.<vendor>.` prefix. Known keys are
//! applied one at a time in a fixed order and the first malformed one stops the walk; keys applied
//! before it stay applied.

use serde::Serialize;
use serde_json::{Map, Value};

/// Vendor segment used when none is configured.
pub const DEFAULT_VENDOR: &str = "bytedance";

/// Errors raised while applying a configuration document.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Not JSON, or not a JSON object.
    #[error("configuration is not a JSON object: {0}")]
    Parse(String),
    /// A recognized key carries a value of the wrong type.
    #[error("configuration key `{key}` must be {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}

impl ConfigError {
    /// Numeric code reported to the host.
    pub fn code(&self) -> i32 {
        match self {
            ConfigError::Parse(_) => -100,
            ConfigError::TypeMismatch { .. } => -101,
        }
    }
}

/// One composer node: a resource path plus the key/intensity to push for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposerNode {
    pub path: String,
    pub key: String,
    pub intensity: f32,
}

/// Ordered composer nodes plus a flag telling whether the engine has seen them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ComposerNodeSet {
    nodes: Vec<ComposerNode>,
    #[serde(skip)]
    dirty: bool,
}

impl ComposerNodeSet {
    pub fn nodes(&self) -> &[ComposerNode] {
        &self.nodes
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Replace the list and mark it for the next push.
    pub fn replace(&mut self, nodes: Vec<ComposerNode>) {
        self.nodes = nodes;
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Everything a configuration document can set.
///
/// Serializes to the unprefixed key names of the document format.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectSettings {
    pub license_path: String,
    pub model_dir: String,
    pub ai_effect_enabled: bool,
    #[serde(rename = "ai.composer.nodes")]
    pub composer: ComposerNodeSet,
    pub face_attribute_enabled: bool,
    pub face_detect_model_path: String,
    pub face_attribute_model_path: String,
    pub hand_detect_enabled: bool,
    pub hand_detect_model_path: String,
    pub hand_box_model_path: String,
    pub hand_gesture_model_path: String,
    #[serde(rename = "handKPModelPath")]
    pub hand_kp_model_path: String,
    pub light_detect_enabled: bool,
    pub light_detect_model_path: String,
    pub face_sticker_enabled: bool,
    #[serde(rename = "faceStickerItemResourcePath")]
    pub face_sticker_item_path: String,
}

impl EffectSettings {
    /// True when any per-frame work is configured.
    pub fn any_feature_enabled(&self) -> bool {
        self.ai_effect_enabled
            || self.face_attribute_enabled
            || self.hand_detect_enabled
            || self.light_detect_enabled
    }

    /// True when a detector whose results are reported to the host is enabled.
    pub fn any_detection_enabled(&self) -> bool {
        self.face_attribute_enabled || self.hand_detect_enabled || self.light_detect_enabled
    }

    /// Apply a document.
    ///
    /// # Example
    /// ```rust
    /// use vfx_engine::settings::EffectSettings;
    ///
    /// let mut settings = EffectSettings::default();
    /// let err = settings
    ///     .apply_document(r#"{"plugin.x.licensePath": "/lic", "plugin.x.aiEffectEnabled": 1}"#, "x")
    ///     .unwrap_err();
    /// assert_eq!(err.code(), -101);
    /// assert_eq!(settings.license_path, "/lic");
    /// ```
    pub fn apply_document(&mut self, document: &str, vendor: &str) -> Result<(), ConfigError> {
        let value: Value =
            serde_json::from_str(document).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(ConfigError::Parse("top-level value is not an object".into()));
        };
        self.apply_map(&map, vendor)
    }

    /// Apply an already-parsed document.
    pub fn apply_map(&mut self, map: &Map<String, Value>, vendor: &str) -> Result<(), ConfigError> {
        let doc = Document {
            map,
            prefix: format!("plugin.{vendor}."),
        };
        doc.string("licensePath", &mut self.license_path)?;
        doc.string("modelDir", &mut self.model_dir)?;
        doc.boolean("aiEffectEnabled", &mut self.ai_effect_enabled)?;
        if let Some(nodes) = doc.composer_nodes("ai.composer.nodes")? {
            self.composer.replace(nodes);
        }
        doc.boolean("faceAttributeEnabled", &mut self.face_attribute_enabled)?;
        doc.string("faceDetectModelPath", &mut self.face_detect_model_path)?;
        doc.string("faceAttributeModelPath", &mut self.face_attribute_model_path)?;
        doc.boolean("handDetectEnabled", &mut self.hand_detect_enabled)?;
        doc.string("handDetectModelPath", &mut self.hand_detect_model_path)?;
        doc.string("handBoxModelPath", &mut self.hand_box_model_path)?;
        doc.string("handGestureModelPath", &mut self.hand_gesture_model_path)?;
        doc.string("handKPModelPath", &mut self.hand_kp_model_path)?;
        doc.boolean("lightDetectEnabled", &mut self.light_detect_enabled)?;
        doc.string("lightDetectModelPath", &mut self.light_detect_model_path)?;
        doc.boolean("faceStickerEnabled", &mut self.face_sticker_enabled)?;
        doc.string("faceStickerItemResourcePath", &mut self.face_sticker_item_path)?;
        Ok(())
    }

    /// Current settings as a document that [`apply_document`](Self::apply_document) accepts.
    pub fn to_document(&self, vendor: &str) -> Value {
        let Ok(Value::Object(fields)) = serde_json::to_value(self) else {
            return Value::Object(Map::new());
        };
        fields
            .into_iter()
            .map(|(key, value)| (format!("plugin.{vendor}.{key}"), value))
            .collect::<Map<_, _>>()
            .into()
    }
}

struct Document<'a> {
    map: &'a Map<String, Value>,
    prefix: String,
}

impl Document<'_> {
    fn get(&self, name: &str) -> Option<(String, &Value)> {
        let key = format!("{}{name}", self.prefix);
        let value = self.map.get(&key)?;
        Some((key, value))
    }

    fn string(&self, name: &str, slot: &mut String) -> Result<(), ConfigError> {
        if let Some((key, value)) = self.get(name) {
            *slot = value
                .as_str()
                .ok_or_else(|| mismatch(&key, "a string"))?
                .to_owned();
        }
        Ok(())
    }

    fn boolean(&self, name: &str, slot: &mut bool) -> Result<(), ConfigError> {
        if let Some((key, value)) = self.get(name) {
            *slot = value.as_bool().ok_or_else(|| mismatch(&key, "a bool"))?;
        }
        Ok(())
    }

    fn composer_nodes(&self, name: &str) -> Result<Option<Vec<ComposerNode>>, ConfigError> {
        let Some((key, value)) = self.get(name) else {
            return Ok(None);
        };
        let items = value.as_array().ok_or_else(|| mismatch(&key, "an array"))?;
        let mut nodes = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let node = item
                .as_object()
                .ok_or_else(|| mismatch(&key, "an array of objects"))?;
            let (Some(path), Some(node_key), Some(intensity)) =
                (node.get("path"), node.get("key"), node.get("intensity"))
            else {
                tracing::warn!(idx, "composer node missing path/key/intensity, skipped");
                continue;
            };
            nodes.push(ComposerNode {
                path: path
                    .as_str()
                    .ok_or_else(|| mismatch(&key, "nodes with a string path"))?
                    .to_owned(),
                key: node_key
                    .as_str()
                    .ok_or_else(|| mismatch(&key, "nodes with a string key"))?
                    .to_owned(),
                intensity: intensity
                    .as_f64()
                    .ok_or_else(|| mismatch(&key, "nodes with a numeric intensity"))?
                    as f32,
            });
        }
        Ok(Some(nodes))
    }
}

fn mismatch(key: &str, expected: &'static str) -> ConfigError {
    tracing::warn!(key, expected, "configuration type mismatch");
    ConfigError::TypeMismatch {
        key: key.to_owned(),
        expected,
    }
}
