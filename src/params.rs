use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A `[min, max]` pair as written by a two-handle slider.
///
/// Always normalized so that `min <= max`, both on construction and when
/// deserialized from a two-element array.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Range {
    min: f64,
    max: f64,
}

impl Range {
    pub fn new(a: f64, b: f64) -> Self {
        if a <= b {
            Self { min: a, max: b }
        } else {
            Self { min: b, max: a }
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }

    /// Uniform sample within the range. A fixed range always yields its bound.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        if self.is_fixed() {
            self.min
        } else {
            rng.random_range(self.min..=self.max)
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    fn clamped_to(&self, lo: f64, hi: f64) -> Self {
        Self::new(self.min.clamp(lo, hi), self.max.clamp(lo, hi))
    }
}

impl From<[f64; 2]> for Range {
    fn from([a, b]: [f64; 2]) -> Self {
        Self::new(a, b)
    }
}

impl From<Range> for [f64; 2] {
    fn from(range: Range) -> Self {
        [range.min, range.max]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BpmMode {
    /// Tempo only changes on transitions or user input.
    #[default]
    Discrete,
    /// Tempo random-walks within the bpm range while in free play.
    Continuous,
}

/// User-editable parameters. Written by the input layer, read by the
/// controller once per tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Parameters {
    pub bpm: Range,
    pub pattern_duration: Range,
    pub transition_duration: Range,
    pub twist: bool,
    pub twist_range: Range,
    pub twist_phase: f64,
    pub twist_ecc: f64,
    pub bpm_mode: BpmMode,
    pub acceleration: Range,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            bpm: Range::new(20.0, 60.0),
            pattern_duration: Range::new(5.0, 10.0),
            transition_duration: Range::new(5.0, 10.0),
            twist: false,
            twist_range: Range::new(0.0, 1.0),
            twist_phase: 0.0,
            twist_ecc: 0.0,
            bpm_mode: BpmMode::Discrete,
            acceleration: Range::new(1.0, 5.0),
        }
    }
}

pub const MIN_BPM: f64 = 1.0;
pub const MAX_BPM: f64 = 500.0;

impl Parameters {
    /// Clamp every value into the range the device can actually honor.
    pub fn sanitized(&self) -> Self {
        let mut params = self.clone();
        let bpm = params.bpm.clamped_to(MIN_BPM, MAX_BPM);
        // whole-number bounds so every bpm range holds at least one tempo
        params.bpm = Range::new(bpm.min.round(), bpm.max.round());
        params.pattern_duration = params.pattern_duration.clamped_to(0.0, f64::MAX);
        params.transition_duration = params.transition_duration.clamped_to(0.0, f64::MAX);
        params.twist_range = params.twist_range.clamped_to(0.0, 1.0);
        params.twist_ecc = params.twist_ecc.clamp(0.0, 1.0);
        params.acceleration = params.acceleration.clamped_to(0.0, MAX_BPM);
        params
    }

    /// Update a single parameter by its kebab-case key, e.g.
    /// `set("bpm", json!([30, 90]))`.
    pub fn set(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        let mut map = match serde_json::to_value(&*self)? {
            serde_json::Value::Object(map) => map,
            _ => anyhow::bail!("Parameters did not serialize to an object"),
        };
        if !map.contains_key(key) {
            anyhow::bail!("Unknown parameter: {}", key);
        }
        map.insert(key.to_string(), value);
        let updated: Parameters = serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| anyhow::anyhow!("Invalid value for parameter {}: {}", key, e))?;
        *self = updated.sanitized();
        Ok(())
    }
}

/// State of the tempo slider.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BpmSliderState {
    /// The user is currently dragging the slider.
    pub active: bool,
    /// One-shot: the user committed a new value since the last tick.
    pub updated: bool,
    pub value: f64,
}

impl Default for BpmSliderState {
    fn default() -> Self {
        Self {
            active: false,
            updated: false,
            value: 60.0,
        }
    }
}
