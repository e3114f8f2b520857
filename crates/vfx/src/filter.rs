//! Host-facing video filter wrapping one [`FrameProcessor`].

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use vfx_core::prelude::{VideoFrame, VideoPixelFormat};
use vfx_engine::{ConfigError, prelude::DetectionReport};

use crate::{
    dispatch::AsyncDispatchWorker,
    error::{ErrorCode, FilterError},
    host::{ExtensionVideoFilter, FrameDeliveryControl, PendResult, ProcessMode, ProcessResult},
    metrics::{PipelineMetrics, Stage},
    processor::FrameProcessor,
    tunables::VfxConfig,
};

/// Property key carrying a configuration document.
pub const PROPERTY_PARAMETERS: &str = "parameters";
/// Property key carrying a JSON bool.
pub const PROPERTY_ENABLED: &str = "enabled";
/// Event key detection results are posted under.
pub const EVENT_DATA: &str = "data";

#[derive(Default)]
struct FilterState {
    control: Option<Arc<dyn FrameDeliveryControl>>,
    started: bool,
}

/// Adapts the host's filter contract onto a [`FrameProcessor`] owned by the provider.
///
/// The processing mode is fixed at construction. In [`ProcessMode::Async`] frames are run and
/// delivered in submission order on a dedicated worker thread.
pub struct FrameFilterAdapter {
    processor: Weak<FrameProcessor>,
    mode: ProcessMode,
    isolated: bool,
    state: Mutex<FilterState>,
    worker: Mutex<AsyncDispatchWorker>,
    metrics: PipelineMetrics,
}

impl FrameFilterAdapter {
    pub(crate) fn new(processor: &Arc<FrameProcessor>, config: &VfxConfig) -> Self {
        Self {
            processor: Arc::downgrade(processor),
            mode: config.process_mode,
            isolated: config.isolated,
            state: Mutex::new(FilterState::default()),
            worker: Mutex::new(AsyncDispatchWorker::new(config.worker_name.clone())),
            metrics: processor.metrics().clone(),
        }
    }

    fn processor(&self) -> Result<Arc<FrameProcessor>, FilterError> {
        self.processor.upgrade().ok_or(FilterError::SessionAbsent)
    }

    /// Whether `start` succeeded and `stop` has not been called since.
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Whether the async dispatch worker thread is alive.
    pub fn is_worker_running(&self) -> bool {
        self.worker.lock().is_running()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Apply a configuration document to this filter's session.
    pub fn apply_configuration(&self, document: &str) -> Result<(), FilterError> {
        Ok(self.processor()?.apply_configuration(document)?)
    }

    fn set_parameters_property(&self, value: &[u8]) -> i32 {
        let document = match std::str::from_utf8(value) {
            Ok(document) => document,
            Err(err) => return ConfigError::Parse(err.to_string()).code(),
        };
        match self.apply_configuration(document) {
            Ok(()) => ErrorCode::Ok.code(),
            Err(err) => err.code(),
        }
    }

    fn set_enabled_property(&self, value: &[u8]) -> i32 {
        match serde_json::from_slice::<serde_json::Value>(value) {
            Ok(serde_json::Value::Bool(enabled)) => {
                self.set_enabled(enabled);
                ErrorCode::Ok.code()
            }
            Ok(_) => ConfigError::TypeMismatch {
                key: PROPERTY_ENABLED.to_owned(),
                expected: "a bool",
            }
            .code(),
            Err(err) => ConfigError::Parse(err.to_string()).code(),
        }
    }
}

fn post_report(
    control: &dyn FrameDeliveryControl,
    report: &DetectionReport,
    metrics: &PipelineMetrics,
) {
    match serde_json::to_string(report) {
        Ok(json) => {
            control.post_event(EVENT_DATA, &json);
            metrics.note_report();
        }
        Err(err) => warn!(%err, "failed to encode detection report"),
    }
}

fn write_property(buf: &mut [u8], bytes: &[u8]) -> i32 {
    if buf.len() < bytes.len() {
        warn!(
            need = bytes.len(),
            got = buf.len(),
            "property buffer too small"
        );
        return -ErrorCode::ErrParameter.code();
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    bytes.len() as i32
}

impl ExtensionVideoFilter for FrameFilterAdapter {
    fn process_mode(&self) -> (ProcessMode, bool) {
        (self.mode, self.isolated)
    }

    fn start(&self, control: Arc<dyn FrameDeliveryControl>) -> Result<(), FilterError> {
        let processor = self.processor()?;
        let mut state = self.state.lock();
        match self.mode {
            ProcessMode::Sync => processor.init_graphics()?,
            ProcessMode::Async => {
                let mut worker = self.worker.lock();
                worker.start()?;
                let target = processor.clone();
                let ready = worker
                    .run_blocking(move || target.init_graphics())
                    .map_err(FilterError::from)
                    .and_then(|init| init.map_err(FilterError::from));
                if let Err(err) = ready {
                    worker.stop();
                    warn!(%err, "video filter start failed; dispatch worker stopped");
                    return Err(err);
                }
            }
        }
        state.control = Some(control);
        state.started = true;
        info!(mode = ?self.mode, "video filter started");
        Ok(())
    }

    fn stop(&self) -> Result<(), FilterError> {
        let mut state = self.state.lock();
        if !state.started {
            return Ok(());
        }
        state.started = false;
        state.control = None;
        let mut result = Ok(());
        match self.mode {
            ProcessMode::Sync => {
                if let Some(processor) = self.processor.upgrade() {
                    processor.release_graphics();
                }
            }
            ProcessMode::Async => {
                let mut worker = self.worker.lock();
                if let Some(processor) = self.processor.upgrade() {
                    // Runs after every frame queued before this call.
                    result = worker
                        .run_blocking(move || processor.release_graphics())
                        .map_err(FilterError::from);
                }
                worker.stop();
            }
        }
        info!(mode = ?self.mode, "video filter stopped");
        result
    }

    fn adapt_video_frame(&self, frame: &mut VideoFrame) -> ProcessResult {
        if self.mode != ProcessMode::Sync || frame.format() != VideoPixelFormat::I420 {
            return ProcessResult::Bypass;
        }
        let control = {
            let state = self.state.lock();
            if !state.started {
                return ProcessResult::Bypass;
            }
            state.control.clone()
        };
        let Some(processor) = self.processor.upgrade() else {
            return ProcessResult::Bypass;
        };
        if !processor.is_enabled() || !processor.graphics_ready() {
            return ProcessResult::Bypass;
        }
        if let (Some(report), Some(control)) = (processor.process_frame(frame), control) {
            post_report(control.as_ref(), &report, &self.metrics);
        }
        ProcessResult::Success
    }

    fn pend_video_frame(&self, frame: Option<VideoFrame>) -> PendResult {
        let Some(frame) = frame else {
            return PendResult::Bypass(None);
        };
        if self.mode != ProcessMode::Async || frame.format() != VideoPixelFormat::I420 {
            return PendResult::Bypass(Some(frame));
        }
        let state = self.state.lock();
        let (true, Some(control)) = (state.started, state.control.clone()) else {
            return PendResult::Bypass(Some(frame));
        };
        let Some(processor) = self.processor.upgrade() else {
            return PendResult::Bypass(Some(frame));
        };
        if !processor.is_enabled() {
            return PendResult::Bypass(Some(frame));
        }
        let worker = self.worker.lock();
        if !worker.is_running() {
            return PendResult::Bypass(Some(frame));
        }
        let metrics = self.metrics.clone();
        let submitted = worker.submit(move || {
            let mut frame = frame;
            if let Some(report) = processor.process_frame(&mut frame) {
                post_report(control.as_ref(), &report, &metrics);
            }
            metrics.time(Stage::Deliver, || control.deliver_video_frame(frame));
        });
        match submitted {
            Ok(()) => PendResult::Success,
            Err(err) => {
                warn!(%err, "frame dropped: dispatch worker rejected it");
                PendResult::Bypass(None)
            }
        }
    }

    fn set_property(&self, key: &str, value: &[u8]) -> i32 {
        match key {
            PROPERTY_PARAMETERS => self.set_parameters_property(value),
            PROPERTY_ENABLED => self.set_enabled_property(value),
            _ => {
                debug!(key, "ignoring unknown filter property");
                ErrorCode::Ok.code()
            }
        }
    }

    fn get_property(&self, key: &str, buf: &mut [u8]) -> i32 {
        let Ok(processor) = self.processor() else {
            return FilterError::SessionAbsent.code();
        };
        match key {
            PROPERTY_PARAMETERS => write_property(buf, processor.snapshot().to_string().as_bytes()),
            PROPERTY_ENABLED => {
                let value = if processor.is_enabled() { "true" } else { "false" };
                write_property(buf, value.as_bytes())
            }
            _ => 0,
        }
    }

    fn set_enabled(&self, enabled: bool) {
        if let Some(processor) = self.processor.upgrade() {
            processor.set_enabled(enabled);
        }
    }

    fn is_enabled(&self) -> bool {
        self.processor
            .upgrade()
            .is_some_and(|processor| processor.is_enabled())
    }
}

impl Drop for FrameFilterAdapter {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(%err, "video filter stop failed during drop");
        }
        if let Some(processor) = self.processor.upgrade() {
            processor.release();
            processor.retire();
        }
    }
}
