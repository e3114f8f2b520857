//! In-memory engine and graphics doubles that record every call.
//!
//! The fake effect inverts the RGB channels so callers can see that frames went through it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    backend::{
        EffectHandle, EffectsBackend, EngineCode, EngineResult, FaceAttributeHandle,
        FaceAttributes, FaceBox, FaceDetectHandle, FaceInfo, FaceParam, Hand, HandDetectHandle,
        HandInfo, HandModel, LicenseRequest, LightDetectHandle, LightInfo, Licensed, Rect,
        RgbaLayout,
    },
    graphics::{GraphicsError, GraphicsProvider, OffscreenContext},
};

/// Which engine handle a counter refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Effect,
    FaceDetect,
    FaceAttributes,
    HandDetect,
    LightDetect,
}

impl HandleKind {
    fn idx(self) -> usize {
        self as usize
    }
}

#[derive(Default)]
struct Record {
    create_attempts: [usize; 5],
    created: [usize; 5],
    dropped: [usize; 5],
    fail_create: [Option<i32>; 5],
    licensed: usize,
    node_pushes: Vec<Vec<String>>,
    node_updates: usize,
    stickers: Vec<Option<String>>,
    face_params: Vec<(FaceParam, f32)>,
    hand_models: Vec<HandModel>,
    processed: usize,
    attribute_batches: usize,
    face_count: usize,
    process_delay: Duration,
    process_error: Option<i32>,
}

/// Shared view of everything a [`FakeBackend`] recorded.
#[derive(Clone, Default)]
pub struct FakeStats(Arc<Mutex<Record>>);

impl FakeStats {
    pub fn create_attempts(&self, kind: HandleKind) -> usize {
        self.0.lock().create_attempts[kind.idx()]
    }

    pub fn created(&self, kind: HandleKind) -> usize {
        self.0.lock().created[kind.idx()]
    }

    pub fn dropped(&self, kind: HandleKind) -> usize {
        self.0.lock().dropped[kind.idx()]
    }

    /// License checks across all handle kinds.
    pub fn licensed(&self) -> usize {
        self.0.lock().licensed
    }

    pub fn node_pushes(&self) -> Vec<Vec<String>> {
        self.0.lock().node_pushes.clone()
    }

    pub fn node_updates(&self) -> usize {
        self.0.lock().node_updates
    }

    pub fn stickers(&self) -> Vec<Option<String>> {
        self.0.lock().stickers.clone()
    }

    pub fn face_params(&self) -> Vec<(FaceParam, f32)> {
        self.0.lock().face_params.clone()
    }

    pub fn hand_models(&self) -> Vec<HandModel> {
        self.0.lock().hand_models.clone()
    }

    /// Successful `process_buffer` calls.
    pub fn processed(&self) -> usize {
        self.0.lock().processed
    }

    pub fn attribute_batches(&self) -> usize {
        self.0.lock().attribute_batches
    }
}

/// Engine double whose handles write into a shared [`FakeStats`].
///
/// # Example
/// ```rust
/// # #[cfg(feature = "test-support")]
/// # {
/// use vfx_engine::backend::EffectsBackend;
/// use vfx_engine::testing::{FakeBackend, HandleKind};
///
/// let backend = FakeBackend::default();
/// backend.fail_create(HandleKind::Effect, -1);
/// assert!(backend.create_effect().is_err());
/// assert_eq!(backend.stats().create_attempts(HandleKind::Effect), 1);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct FakeBackend {
    stats: FakeStats,
}

impl FakeBackend {
    pub fn stats(&self) -> FakeStats {
        self.stats.clone()
    }

    /// The same backend behind the trait object sessions take.
    pub fn shared(&self) -> Arc<dyn EffectsBackend> {
        Arc::new(self.clone())
    }

    pub fn fail_create(&self, kind: HandleKind, code: i32) {
        self.stats.0.lock().fail_create[kind.idx()] = Some(code);
    }

    pub fn allow_create(&self, kind: HandleKind) {
        self.stats.0.lock().fail_create[kind.idx()] = None;
    }

    /// Make `process_buffer` sleep before touching pixels.
    pub fn set_process_delay(&self, delay: Duration) {
        self.stats.0.lock().process_delay = delay;
    }

    /// Make `process_buffer` fail with `code` without touching pixels.
    pub fn fail_process(&self, code: i32) {
        self.stats.0.lock().process_error = Some(code);
    }

    /// Number of faces the face detector reports.
    pub fn set_face_count(&self, count: usize) {
        self.stats.0.lock().face_count = count;
    }

    fn create<H>(
        &self,
        kind: HandleKind,
        build: impl FnOnce(FakeHandle) -> H,
    ) -> EngineResult<Box<H>> {
        let mut record = self.stats.0.lock();
        record.create_attempts[kind.idx()] += 1;
        if let Some(code) = record.fail_create[kind.idx()] {
            return Err(EngineCode(code));
        }
        record.created[kind.idx()] += 1;
        drop(record);
        Ok(Box::new(build(FakeHandle {
            stats: self.stats.clone(),
            kind,
        })))
    }
}

impl EffectsBackend for FakeBackend {
    fn create_effect(&self) -> EngineResult<Box<dyn EffectHandle>> {
        Ok(self.create(HandleKind::Effect, FakeEffect)?)
    }

    fn create_face_detector(&self, _model_path: &str) -> EngineResult<Box<dyn FaceDetectHandle>> {
        Ok(self.create(HandleKind::FaceDetect, FakeFaceDetector)?)
    }

    fn create_face_attributes(
        &self,
        _model_path: &str,
    ) -> EngineResult<Box<dyn FaceAttributeHandle>> {
        Ok(self.create(HandleKind::FaceAttributes, FakeFaceAttributes)?)
    }

    fn create_hand_detector(&self, _model_path: &str) -> EngineResult<Box<dyn HandDetectHandle>> {
        Ok(self.create(HandleKind::HandDetect, FakeHandDetector)?)
    }

    fn create_light_detector(
        &self,
        _model_path: &str,
    ) -> EngineResult<Box<dyn LightDetectHandle>> {
        Ok(self.create(HandleKind::LightDetect, FakeLightDetector)?)
    }
}

struct FakeHandle {
    stats: FakeStats,
    kind: HandleKind,
}

impl FakeHandle {
    fn record(&self) -> parking_lot::MutexGuard<'_, Record> {
        self.stats.0.lock()
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.record().dropped[self.kind.idx()] += 1;
    }
}

macro_rules! licensed {
    ($($ty:ident),+) => {$(
        struct $ty(FakeHandle);

        impl Licensed for $ty {
            fn check_license(&mut self, _request: &LicenseRequest<'_>) -> EngineResult {
                self.0.record().licensed += 1;
                Ok(())
            }
        }
    )+};
}

licensed!(
    FakeEffect,
    FakeFaceDetector,
    FakeFaceAttributes,
    FakeHandDetector,
    FakeLightDetector
);

impl EffectHandle for FakeEffect {
    fn init(&mut self, _model_dir: &str) -> EngineResult {
        Ok(())
    }

    fn set_composer_mode(&mut self, _mode: i32, _order_type: i32) -> EngineResult {
        Ok(())
    }

    fn set_nodes(&mut self, paths: &[&str]) -> EngineResult {
        let pushed = paths.iter().map(|p| (*p).to_owned()).collect();
        self.0.record().node_pushes.push(pushed);
        Ok(())
    }

    fn update_node(&mut self, _path: &str, _key: &str, _intensity: f32) -> EngineResult {
        self.0.record().node_updates += 1;
        Ok(())
    }

    fn set_sticker(&mut self, path: Option<&str>) -> EngineResult {
        self.0.record().stickers.push(path.map(str::to_owned));
        Ok(())
    }

    fn set_dimensions(&mut self, _width: u32, _height: u32) -> EngineResult {
        Ok(())
    }

    fn algorithm_buffer(
        &mut self,
        _rgba: &[u8],
        _layout: RgbaLayout,
        _timestamp_ms: u64,
    ) -> EngineResult {
        Ok(())
    }

    fn process_buffer(
        &mut self,
        rgba: &mut [u8],
        layout: RgbaLayout,
        _timestamp_ms: u64,
    ) -> EngineResult {
        let (delay, error) = {
            let record = self.0.record();
            (record.process_delay, record.process_error)
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if let Some(code) = error {
            return Err(EngineCode(code));
        }
        let row_bytes = layout.width as usize * 4;
        for row in rgba.chunks_mut(layout.stride).take(layout.height as usize) {
            for px in row[..row_bytes].chunks_exact_mut(4) {
                px[0] = 255 - px[0];
                px[1] = 255 - px[1];
                px[2] = 255 - px[2];
            }
        }
        self.0.record().processed += 1;
        Ok(())
    }
}

impl FaceDetectHandle for FakeFaceDetector {
    fn set_param(&mut self, param: FaceParam, value: f32) -> EngineResult {
        self.0.record().face_params.push((param, value));
        Ok(())
    }

    fn detect(&mut self, _rgba: &[u8], layout: RgbaLayout) -> EngineResult<FaceInfo> {
        let count = self.0.record().face_count;
        let rect = Rect {
            left: 0,
            top: 0,
            right: layout.width as i32,
            bottom: layout.height as i32,
        };
        Ok(FaceInfo {
            faces: (0..count)
                .map(|id| FaceBox {
                    id: id as i32,
                    rect,
                    score: 0.9,
                    ..Default::default()
                })
                .collect(),
        })
    }
}

impl FaceAttributeHandle for FakeFaceAttributes {
    fn detect_batch(
        &mut self,
        _rgba: &[u8],
        _layout: RgbaLayout,
        faces: &[FaceBox],
    ) -> EngineResult<Vec<FaceAttributes>> {
        self.0.record().attribute_batches += 1;
        Ok(faces
            .iter()
            .map(|_| FaceAttributes {
                age: 30.0,
                happy_score: 0.5,
                ..Default::default()
            })
            .collect())
    }
}

impl HandDetectHandle for FakeHandDetector {
    fn set_model(&mut self, model: HandModel, _path: &str) -> EngineResult {
        self.0.record().hand_models.push(model);
        Ok(())
    }

    fn detect(&mut self, _rgba: &[u8], _layout: RgbaLayout) -> EngineResult<HandInfo> {
        Ok(HandInfo {
            hands: vec![Hand {
                id: 1,
                score: 0.8,
                ..Default::default()
            }],
        })
    }
}

impl LightDetectHandle for FakeLightDetector {
    fn detect(&mut self, _rgba: &[u8], _layout: RgbaLayout) -> EngineResult<LightInfo> {
        Ok(LightInfo {
            class: 2,
            prob: 0.7,
        })
    }
}

/// Graphics double counting created, bound and released contexts.
#[derive(Clone, Default)]
pub struct FakeGraphics {
    created: Arc<AtomicUsize>,
    bound: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl FakeGraphics {
    pub fn shared(&self) -> Arc<dyn GraphicsProvider> {
        Arc::new(self.clone())
    }

    /// Make context creation fail until called again with `false`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn bound(&self) -> usize {
        self.bound.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct FakeContext(FakeGraphics);

impl OffscreenContext for FakeContext {
    fn make_current(&mut self) -> Result<(), GraphicsError> {
        self.0.bound.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_current(&mut self) {
        self.0.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl GraphicsProvider for FakeGraphics {
    fn create_offscreen(
        &self,
        _width: u32,
        _height: u32,
    ) -> Result<Box<dyn OffscreenContext>, GraphicsError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GraphicsError::Create("no display".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext(self.clone())))
    }
}
