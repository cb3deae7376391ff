mod pipeline;

pub use pipeline::{Capabilities, ControlPipeline, ControlRange};

use crate::error::{CampipeError, Result};
use serde::{Deserialize, Serialize};

/// Sparse set of tunable values. Absent fields mean "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSet {
    /// See [`ExposureMode`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_mode: Option<i32>,
    /// Microseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_time: Option<i32>,
    /// Sensor gain multiplier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analogue_gain: Option<f32>,

    /// See [`AfMode`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub af_mode: Option<i32>,
    /// One-shot, see [`AfTrigger`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub af_trigger: Option<i32>,
    /// 0.0 is infinity, larger values focus closer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens_position: Option<f32>,

    /// See [`AwbMode`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awb_mode: Option<i32>,
    /// `[red, blue]`; anything shorter is ignored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colour_gains: Option<Vec<f32>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contrast: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharpness: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_fps: Option<i32>,
    /// 1-100, consumed by the JPEG encoder only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpeg_quality: Option<i32>,
}

fn assign_if_set<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
    if let Some(value) = source {
        *target = Some(value.clone());
    }
}

impl ControlSet {
    /// Overwrite every field that is present in `other`
    pub fn merge(&mut self, other: &ControlSet) {
        assign_if_set(&mut self.exposure_mode, &other.exposure_mode);
        assign_if_set(&mut self.exposure_time, &other.exposure_time);
        assign_if_set(&mut self.analogue_gain, &other.analogue_gain);
        assign_if_set(&mut self.af_mode, &other.af_mode);
        assign_if_set(&mut self.af_trigger, &other.af_trigger);
        assign_if_set(&mut self.lens_position, &other.lens_position);
        assign_if_set(&mut self.awb_mode, &other.awb_mode);
        assign_if_set(&mut self.colour_gains, &other.colour_gains);
        assign_if_set(&mut self.brightness, &other.brightness);
        assign_if_set(&mut self.contrast, &other.contrast);
        assign_if_set(&mut self.saturation, &other.saturation);
        assign_if_set(&mut self.sharpness, &other.sharpness);
        assign_if_set(&mut self.target_fps, &other.target_fps);
        assign_if_set(&mut self.jpeg_quality, &other.jpeg_quality);
    }

    pub fn is_empty(&self) -> bool {
        *self == ControlSet::default()
    }

    /// Reject values the pipeline cannot act on
    pub fn validate(&self) -> Result<()> {
        if let Some(quality) = self.jpeg_quality {
            if !(1..=100).contains(&quality) {
                return Err(CampipeError::invalid_control(
                    "jpeg_quality",
                    format!("{} is outside 1..=100", quality),
                ));
            }
        }

        if let Some(fps) = self.target_fps {
            if fps <= 0 {
                return Err(CampipeError::invalid_control(
                    "target_fps",
                    format!("{} must be greater than 0", fps),
                ));
            }
        }

        if let Some(time) = self.exposure_time {
            if time < 0 {
                return Err(CampipeError::invalid_control(
                    "exposure_time",
                    format!("{} must not be negative", time),
                ));
            }
        }

        Ok(())
    }
}

/// Device controls a request can carry. JPEG quality is deliberately absent:
/// it never reaches the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlId {
    AeExposureMode,
    ExposureTime,
    AnalogueGain,
    AfMode,
    AfTrigger,
    LensPosition,
    AwbMode,
    ColourGains,
    Brightness,
    Contrast,
    Saturation,
    Sharpness,
    FrameDurationLimits,
}

impl ControlId {
    pub fn name(&self) -> &'static str {
        match self {
            ControlId::AeExposureMode => "AeExposureMode",
            ControlId::ExposureTime => "ExposureTime",
            ControlId::AnalogueGain => "AnalogueGain",
            ControlId::AfMode => "AfMode",
            ControlId::AfTrigger => "AfTrigger",
            ControlId::LensPosition => "LensPosition",
            ControlId::AwbMode => "AwbMode",
            ControlId::ColourGains => "ColourGains",
            ControlId::Brightness => "Brightness",
            ControlId::Contrast => "Contrast",
            ControlId::Saturation => "Saturation",
            ControlId::Sharpness => "Sharpness",
            ControlId::FrameDurationLimits => "FrameDurationLimits",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlValue {
    I32(i32),
    F32(f32),
    F32Pair([f32; 2]),
    I64Pair([i64; 2]),
}

impl ControlValue {
    /// Scalar value widened to f64; pairs have no scalar form
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ControlValue::I32(v) => Some(*v as f64),
            ControlValue::F32(v) => Some(*v as f64),
            ControlValue::F32Pair(_) | ControlValue::I64Pair(_) => None,
        }
    }
}

/// Device-advertised limits of a control
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlInfo {
    pub min: ControlValue,
    pub max: ControlValue,
    pub default: ControlValue,
}

/// Controls attached to a request, in the order they were written
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlList {
    entries: Vec<(ControlId, ControlValue)>,
}

impl ControlList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a control, replacing an earlier value for the same id
    pub fn set(&mut self, id: ControlId, value: ControlValue) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((id, value)),
        }
    }

    pub fn get(&self, id: ControlId) -> Option<ControlValue> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, value)| *value)
    }

    pub fn contains(&self, id: ControlId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ControlId, ControlValue)> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Auto-exposure mode values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureMode {
    Normal = 0,
    Short = 1,
    Long = 2,
    Custom = 3,
}

impl ExposureMode {
    pub const ALL: [ExposureMode; 4] = [
        ExposureMode::Normal,
        ExposureMode::Short,
        ExposureMode::Long,
        ExposureMode::Custom,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ExposureMode::Normal => "normal",
            ExposureMode::Short => "short",
            ExposureMode::Long => "long",
            ExposureMode::Custom => "custom",
        }
    }
}

/// Autofocus mode values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfMode {
    Manual = 0,
    Auto = 1,
    Continuous = 2,
}

impl AfMode {
    pub const ALL: [AfMode; 3] = [AfMode::Manual, AfMode::Auto, AfMode::Continuous];

    pub fn name(&self) -> &'static str {
        match self {
            AfMode::Manual => "manual",
            AfMode::Auto => "auto",
            AfMode::Continuous => "continuous",
        }
    }
}

/// Autofocus trigger values; applied once per request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfTrigger {
    Start = 0,
    Cancel = 1,
}

/// White-balance mode values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwbMode {
    Auto = 0,
    Incandescent = 1,
    Tungsten = 2,
    Fluorescent = 3,
    Indoor = 4,
    Daylight = 5,
    Cloudy = 6,
    Custom = 7,
}

impl AwbMode {
    pub const ALL: [AwbMode; 8] = [
        AwbMode::Auto,
        AwbMode::Incandescent,
        AwbMode::Tungsten,
        AwbMode::Fluorescent,
        AwbMode::Indoor,
        AwbMode::Daylight,
        AwbMode::Cloudy,
        AwbMode::Custom,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AwbMode::Auto => "auto",
            AwbMode::Incandescent => "incandescent",
            AwbMode::Tungsten => "tungsten",
            AwbMode::Fluorescent => "fluorescent",
            AwbMode::Indoor => "indoor",
            AwbMode::Daylight => "daylight",
            AwbMode::Cloudy => "cloudy",
            AwbMode::Custom => "custom",
        }
    }
}
