use super::{AfMode, AwbMode, ControlId, ControlSet, ControlValue};
use crate::device::{Camera, CaptureRequest};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// `{min, max, default}` of a numeric control
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlRange {
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

/// What the camera lets callers tune
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Capabilities {
    /// Microseconds
    pub exposure_time: Option<ControlRange>,
    pub analogue_gain: Option<ControlRange>,
    pub lens_position: Option<ControlRange>,
    pub af_modes: Vec<String>,
    pub awb_modes: Vec<String>,
}

#[derive(Debug, Default)]
struct ControlState {
    /// Last values written to a request
    current: ControlSet,
    /// Accumulated deltas, rewritten onto every request they are applied to
    pending: ControlSet,
}

/// Merges control deltas and writes them onto outgoing capture requests
pub struct ControlPipeline {
    camera: Arc<dyn Camera>,
    state: Mutex<ControlState>,
}

impl ControlPipeline {
    pub fn new(camera: Arc<dyn Camera>) -> Self {
        Self {
            camera,
            state: Mutex::new(ControlState::default()),
        }
    }

    /// Merge `controls` into the pending set and write every pending value onto
    /// `request`, promoting what was written into the current set.
    pub fn apply_controls(&self, controls: &ControlSet, request: &mut CaptureRequest) {
        let mut guard = self.state.lock();
        let ControlState { current, pending } = &mut *guard;

        pending.merge(controls);

        let cookie = request.cookie();
        let list = request.controls_mut();

        if let Some(mode) = pending.exposure_mode {
            list.set(ControlId::AeExposureMode, ControlValue::I32(mode));
            current.exposure_mode = Some(mode);
        }

        if let Some(time) = pending.exposure_time {
            list.set(ControlId::ExposureTime, ControlValue::I32(time));
            current.exposure_time = Some(time);
        }

        if let Some(gain) = pending.analogue_gain {
            list.set(ControlId::AnalogueGain, ControlValue::F32(gain));
            current.analogue_gain = Some(gain);
        }

        if let Some(mode) = pending.af_mode {
            list.set(ControlId::AfMode, ControlValue::I32(mode));
            current.af_mode = Some(mode);
        }

        // One-shot: written once, never promoted
        if let Some(trigger) = pending.af_trigger.take() {
            list.set(ControlId::AfTrigger, ControlValue::I32(trigger));
            trace!("AfTrigger {} written to request {}", trigger, cookie);
        }

        if let Some(position) = pending.lens_position {
            list.set(ControlId::LensPosition, ControlValue::F32(position));
            current.lens_position = Some(position);
        }

        if let Some(mode) = pending.awb_mode {
            list.set(ControlId::AwbMode, ControlValue::I32(mode));
            current.awb_mode = Some(mode);
        }

        if let Some(gains) = &pending.colour_gains {
            if gains.len() >= 2 {
                list.set(ControlId::ColourGains, ControlValue::F32Pair([gains[0], gains[1]]));
                current.colour_gains = Some(gains.clone());
            } else {
                debug!("Ignoring colour gains with {} entries", gains.len());
            }
        }

        if let Some(brightness) = pending.brightness {
            list.set(ControlId::Brightness, ControlValue::F32(brightness));
            current.brightness = Some(brightness);
        }

        if let Some(contrast) = pending.contrast {
            list.set(ControlId::Contrast, ControlValue::F32(contrast));
            current.contrast = Some(contrast);
        }

        if let Some(saturation) = pending.saturation {
            list.set(ControlId::Saturation, ControlValue::F32(saturation));
            current.saturation = Some(saturation);
        }

        if let Some(sharpness) = pending.sharpness {
            list.set(ControlId::Sharpness, ControlValue::F32(sharpness));
            current.sharpness = Some(sharpness);
        }

        if let Some(fps) = pending.target_fps {
            match frame_duration_us(fps) {
                Some(duration) => {
                    list.set(
                        ControlId::FrameDurationLimits,
                        ControlValue::I64Pair([duration, duration]),
                    );
                    current.target_fps = Some(fps);
                }
                None => warn!("Ignoring non-positive target fps {}", fps),
            }
        }

        // Encoder-only, never written to the request
        if let Some(quality) = pending.jpeg_quality {
            current.jpeg_quality = Some(quality);
        }
    }

    /// Snapshot of the last applied values
    pub fn current_controls(&self) -> ControlSet {
        self.state.lock().current.clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        let range = |id: ControlId| {
            let info = self.camera.control_info(id)?;
            Some(ControlRange {
                min: info.min.as_f64()?,
                max: info.max.as_f64()?,
                default: info.default.as_f64()?,
            })
        };

        Capabilities {
            exposure_time: range(ControlId::ExposureTime),
            analogue_gain: range(ControlId::AnalogueGain),
            lens_position: range(ControlId::LensPosition),
            af_modes: AfMode::ALL.iter().map(|m| m.name().to_string()).collect(),
            awb_modes: AwbMode::ALL.iter().map(|m| m.name().to_string()).collect(),
        }
    }
}

/// Fixed-rate frame duration bound in microseconds
pub(crate) fn frame_duration_us(fps: i32) -> Option<i64> {
    if fps <= 0 {
        return None;
    }
    Some(1_000_000 / fps as i64)
}
