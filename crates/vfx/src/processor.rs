//! Per-filter engine state and the frame round trip.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use tracing::{debug, warn};
use vfx_codec::{rgba_to_yuv420, yuv420_to_rgba};
use vfx_core::prelude::{FrameBufferCache, Metrics, VideoFrame};
use vfx_engine::{
    ConfigError, GraphicsError,
    prelude::{
        DetectionReport, EffectsBackend, EffectsEngineSession, ExecutionEnvironment,
        GraphicsContextManager, GraphicsProvider, RgbaLayout, SessionOptions,
    },
};

use crate::metrics::{PipelineMetrics, Stage};

struct ProcessorState {
    session: EffectsEngineSession,
    cache: FrameBufferCache,
    graphics: GraphicsContextManager,
}

/// Everything one filter needs to run frames through the engine.
///
/// All engine, buffer and graphics state sits behind a single mutex, so frames, configuration
/// and lifecycle calls from different threads never interleave.
pub struct FrameProcessor {
    state: Mutex<ProcessorState>,
    enabled: AtomicBool,
    retired: AtomicBool,
    metrics: PipelineMetrics,
}

impl FrameProcessor {
    pub fn new(
        backend: Arc<dyn EffectsBackend>,
        env: Arc<dyn ExecutionEnvironment>,
        graphics: Arc<dyn GraphicsProvider>,
        options: SessionOptions,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            state: Mutex::new(ProcessorState {
                session: EffectsEngineSession::with_options(backend, env, options),
                cache: FrameBufferCache::new(),
                graphics: GraphicsContextManager::new(graphics),
            }),
            enabled: AtomicBool::new(true),
            retired: AtomicBool::new(false),
            metrics,
        }
    }

    /// Create the offscreen context on the calling thread and re-arm failed engine handles.
    pub fn init_graphics(&self) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        state.session.rearm();
        state.graphics.init()
    }

    pub fn release_graphics(&self) {
        self.state.lock().graphics.release();
    }

    pub fn graphics_ready(&self) -> bool {
        self.state.lock().graphics.is_initialized()
    }

    pub fn apply_configuration(&self, document: &str) -> Result<(), ConfigError> {
        self.state.lock().session.apply_configuration(document)
    }

    /// Current settings as a configuration document.
    pub fn snapshot(&self) -> serde_json::Value {
        self.state.lock().session.snapshot_document()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Mark the processor as no longer owned by a live filter.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn cache_metrics(&self) -> Arc<Metrics> {
        self.state.lock().cache.metrics()
    }

    /// Drop engine handles, scratch buffers, configuration and the graphics context.
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.session.release();
        state.cache.release();
        state.graphics.release();
        debug!("frame processor released");
    }

    /// Run the convert → detect → effect → convert-back round trip on `frame` in place.
    ///
    /// Returns the detection results when any detector produced some. The frame is only rewritten
    /// when the AI effect ran over it. Engine failures are logged and leave the frame as the engine
    /// left it; conversion failures leave it untouched.
    pub fn process_frame(&self, frame: &mut VideoFrame) -> Option<DetectionReport> {
        let mut guard = self.state.lock();
        let ProcessorState {
            session,
            cache,
            graphics,
        } = &mut *guard;

        if !session.settings().any_feature_enabled() {
            return None;
        }
        let geometry = frame.geometry()?;
        if let Err(err) = graphics.ensure_current() {
            warn!(%err, "graphics context unavailable; frame left untouched");
            return None;
        }

        let (width, height) = (geometry.width, geometry.height);
        let scratch = cache.prepare(geometry);
        let converted = self.metrics.time(Stage::Convert, || -> Result<(), String> {
            frame
                .read_planes_packed(&mut scratch.yuv)
                .map_err(|err| err.to_string())?;
            yuv420_to_rgba(&scratch.yuv, &mut scratch.rgba, width, height)
                .map_err(|err| err.to_string())
        });
        if let Err(err) = converted {
            warn!(width, height, %err, "yuv to rgba conversion failed");
            return None;
        }

        let layout = RgbaLayout::from(geometry);
        let rgba = &mut scratch.rgba[..layout.len()];
        let (report, rendered) = self.metrics.time(Stage::Engine, || {
            let report = if session.settings().any_detection_enabled() {
                session.detect_all(rgba, layout)
            } else {
                DetectionReport::default()
            };
            let rendered = session.settings().ai_effect_enabled
                && session.process_buffer(rgba, layout, wall_clock_millis());
            (report, rendered)
        });

        // Detection alone never rewrites the frame.
        if rendered {
            self.metrics.note_rendered();
            let written = rgba_to_yuv420(&scratch.rgba, &mut scratch.yuv, width, height)
                .map_err(|err| err.to_string())
                .and_then(|()| {
                    frame
                        .write_planes_packed(&scratch.yuv)
                        .map_err(|err| err.to_string())
                });
            if let Err(err) = written {
                warn!(width, height, %err, "rgba to yuv conversion failed");
            }
        }

        (!report.is_empty()).then_some(report)
    }
}

fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfx_core::prelude::FrameGeometry;
    use vfx_engine::prelude::DetachedEnvironment;
    use vfx_engine::testing::{FakeBackend, FakeGraphics, HandleKind};

    fn processor(backend: &FakeBackend, graphics: &FakeGraphics) -> FrameProcessor {
        FrameProcessor::new(
            backend.shared(),
            Arc::new(DetachedEnvironment),
            graphics.shared(),
            SessionOptions::default(),
            PipelineMetrics::default(),
        )
    }

    fn gray_frame(width: u32, height: u32, luma: u8) -> VideoFrame {
        let mut frame = VideoFrame::i420(width, height, 0).unwrap();
        let mut planes = frame.planes_mut();
        planes[0].data().fill(luma);
        planes[1].data().fill(128);
        planes[2].data().fill(128);
        drop(planes);
        frame
    }

    #[test]
    fn untouched_without_features_or_context() {
        let backend = FakeBackend::default();
        let graphics = FakeGraphics::default();
        let p = processor(&backend, &graphics);
        let mut frame = gray_frame(4, 4, 60);
        let before = frame.clone();

        assert!(p.process_frame(&mut frame).is_none());
        assert_eq!(frame, before);

        p.apply_configuration(r#"{"plugin.bytedance.aiEffectEnabled": true}"#)
            .unwrap();
        assert!(p.process_frame(&mut frame).is_none());
        assert_eq!(frame, before, "no graphics context yet");
        assert_eq!(backend.stats().processed(), 0);
    }

    #[test]
    fn effect_round_trip_changes_pixels() {
        let backend = FakeBackend::default();
        let graphics = FakeGraphics::default();
        let p = processor(&backend, &graphics);
        p.init_graphics().unwrap();
        p.apply_configuration(r#"{"plugin.bytedance.aiEffectEnabled": true}"#)
            .unwrap();

        let mut frame = gray_frame(4, 4, 60);
        assert!(p.process_frame(&mut frame).is_none());
        assert_eq!(backend.stats().processed(), 1);
        // Inverted gray comes back as its complement.
        let y = frame.planes()[0].data()[0];
        assert!((y as i32 - 195).abs() <= 2, "luma {y}");
        assert_eq!(p.cache_metrics().allocations(), 1);
        assert_eq!(p.metrics().rendered_frames(), 1);

        p.process_frame(&mut frame);
        assert_eq!(p.cache_metrics().hits(), 1);
    }

    #[test]
    fn detection_report_is_returned() {
        let backend = FakeBackend::default();
        backend.set_face_count(1);
        let graphics = FakeGraphics::default();
        let p = processor(&backend, &graphics);
        p.init_graphics().unwrap();
        p.apply_configuration(r#"{"plugin.bytedance.faceAttributeEnabled": true}"#)
            .unwrap();

        let mut frame = gray_frame(4, 4, 60);
        let report = p.process_frame(&mut frame).unwrap();
        assert_eq!(report.face.unwrap().info.faces.len(), 1);
        assert_eq!(backend.stats().processed(), 0);
    }

    #[test]
    fn padded_gradient_inverts_visible_pixels_only() {
        let backend = FakeBackend::default();
        let graphics = FakeGraphics::default();
        let p = processor(&backend, &graphics);
        p.init_graphics().unwrap();
        p.apply_configuration(r#"{"plugin.bytedance.aiEffectEnabled": true}"#)
            .unwrap();

        let geometry = FrameGeometry::new(6, 4, 8, 5, 4);
        let mut frame = VideoFrame::i420_with_geometry(geometry, 0).unwrap();
        let visible = [(6, 4, 70, 10, 6), (3, 2, 110, 5, 3), (3, 2, 120, 4, 5)];
        for (plane, &(w, h, base, dx, dy)) in frame.planes_mut().iter_mut().zip(&visible) {
            let stride = plane.stride();
            plane.data().fill(0xEE);
            for row in 0..h {
                for x in 0..w {
                    plane.data()[row * stride + x] = (base + x * dx + row * dy) as u8;
                }
            }
        }
        let before = frame.clone();

        p.process_frame(&mut frame);
        assert_eq!(backend.stats().processed(), 1);
        let (old, new) = (before.planes(), frame.planes());
        for (i, &(w, h, ..)) in visible.iter().enumerate() {
            let stride = new[i].stride();
            // Luma of an inverted pixel is 255 - y, chroma is 256 - c.
            let complement = if i == 0 { 255 } else { 256 };
            for (row, line) in new[i].data().chunks(stride).enumerate().take(h) {
                for (x, &got) in line.iter().enumerate() {
                    let was = old[i].data()[row * stride + x];
                    if x < w {
                        let want = complement - was as i32;
                        assert!((got as i32 - want).abs() <= 4, "plane {i} ({x},{row}): {got}");
                    } else {
                        assert_eq!(got, 0xEE, "padding in plane {i} row {row}");
                    }
                }
            }
        }
    }

    #[test]
    fn frame_kept_when_effect_never_ran() {
        let backend = FakeBackend::default();
        backend.fail_create(HandleKind::Effect, -7);
        let graphics = FakeGraphics::default();
        let p = processor(&backend, &graphics);
        p.init_graphics().unwrap();
        p.apply_configuration(r#"{"plugin.bytedance.aiEffectEnabled": true}"#)
            .unwrap();

        let mut frame = gray_frame(6, 4, 73);
        frame.planes_mut()[1].data()[2] = 90;
        let before = frame.clone();
        assert!(p.process_frame(&mut frame).is_none());
        assert_eq!(frame, before);
        assert_eq!(backend.stats().processed(), 0);
        assert_eq!(p.metrics().rendered_frames(), 0);
        assert_eq!(p.metrics().stage(Stage::Engine).frames, 1);
    }

    #[test]
    fn release_drops_handles_once() {
        let backend = FakeBackend::default();
        let graphics = FakeGraphics::default();
        let p = processor(&backend, &graphics);
        p.init_graphics().unwrap();
        p.apply_configuration(r#"{"plugin.bytedance.aiEffectEnabled": true}"#)
            .unwrap();
        p.process_frame(&mut gray_frame(2, 2, 10));
        p.release();
        p.release();
        assert_eq!(backend.stats().dropped(HandleKind::Effect), 1);
        assert_eq!(graphics.released(), 1);
        assert!(!p.graphics_ready());
        let snapshot = p.snapshot();
        assert_eq!(snapshot["plugin.bytedance.aiEffectEnabled"], false);
        assert_eq!(snapshot["plugin.bytedance.licensePath"], "");
    }
}
