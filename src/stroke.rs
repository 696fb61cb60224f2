use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Device axes, using the TCode machine names. The friendly names used by
/// the output range panel are accepted as aliases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Axis {
    #[serde(alias = "stroke")]
    L0,
    #[serde(alias = "forward")]
    L1,
    #[serde(alias = "left")]
    L2,
    #[serde(alias = "twist")]
    R0,
    #[serde(alias = "roll")]
    R1,
    #[serde(alias = "pitch")]
    R2,
}

impl Axis {
    pub const ALL: [Axis; 6] = [Axis::L0, Axis::L1, Axis::L2, Axis::R0, Axis::R1, Axis::R2];

    pub fn alias(&self) -> &'static str {
        match self {
            Axis::L0 => "stroke",
            Axis::L1 => "forward",
            Axis::L2 => "left",
            Axis::R0 => "twist",
            Axis::R1 => "roll",
            Axis::R2 => "pitch",
        }
    }

    pub fn parse(name: &str) -> Option<Axis> {
        Axis::ALL
            .into_iter()
            .find(|axis| axis.alias() == name || format!("{:?}", axis) == name)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Named motion curve used to evaluate an axis over one stroke cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MotionCurve {
    #[default]
    Tempest,
    Parabolic,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum NoiseRepr {
    Uniform(f64),
    Split { from: f64, to: f64 },
}

/// Per-cycle randomization of the `from` and `to` ends of an axis range.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "NoiseRepr")]
pub struct Noise {
    pub from: f64,
    pub to: f64,
}

impl From<NoiseRepr> for Noise {
    fn from(repr: NoiseRepr) -> Self {
        match repr {
            NoiseRepr::Uniform(v) => Noise { from: v, to: v },
            NoiseRepr::Split { from, to } => Noise { from, to },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisParams {
    pub from: f64,
    pub to: f64,
    #[serde(default)]
    pub phase: f64,
    #[serde(default)]
    pub ecc: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise: Option<Noise>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion: Option<MotionCurve>,
}

impl AxisParams {
    pub fn new(from: f64, to: f64, phase: f64, ecc: f64) -> Self {
        Self {
            from,
            to,
            phase,
            ecc,
            noise: None,
            motion: None,
        }
    }

    /// A twist axis parked at center does nothing.
    pub fn is_degenerate_twist(&self) -> bool {
        self.from == 0.5 && self.to == 0.5
    }

    fn validate(&self, axis: Axis) -> Result<()> {
        for (label, value) in [("from", self.from), ("to", self.to)] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("Axis {} `{}` must be within [0, 1], got {}", axis, label, value);
            }
        }
        if let Some(noise) = self.noise {
            if !(0.0..=1.0).contains(&noise.from) || !(0.0..=1.0).contains(&noise.to) {
                anyhow::bail!("Axis {} noise must be within [0, 1]", axis);
            }
        }
        Ok(())
    }
}

/// Axis name to motion parameters for one parametric pattern.
pub type StrokeConfig = BTreeMap<Axis, AxisParams>;

pub fn validate_stroke(config: &StrokeConfig) -> Result<()> {
    if config.is_empty() {
        anyhow::bail!("Stroke defines no axes");
    }
    for (axis, params) in config {
        params.validate(*axis)?;
    }
    Ok(())
}

/// A stroke as requested by the input layer: either a library name or a
/// configuration that has already been resolved upstream.
#[derive(Clone, Debug, PartialEq)]
pub enum StrokeRef {
    Named(String),
    Resolved(StrokeConfig),
}

impl StrokeRef {
    pub fn name(&self) -> &str {
        match self {
            StrokeRef::Named(name) => name,
            StrokeRef::Resolved(_) => "Custom",
        }
    }
}

impl From<&str> for StrokeRef {
    fn from(name: &str) -> Self {
        StrokeRef::Named(name.to_string())
    }
}

impl From<StrokeConfig> for StrokeRef {
    fn from(config: StrokeConfig) -> Self {
        StrokeRef::Resolved(config)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptSource {
    pub script: String,
}

/// A stored library entry, serialized as `{ "type": ..., "data": ... }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum StoredBehavior {
    Parametric(StrokeConfig),
    Script(ScriptSource),
}

impl StoredBehavior {
    pub fn validate(&self) -> Result<()> {
        match self {
            StoredBehavior::Parametric(config) => validate_stroke(config),
            StoredBehavior::Script(source) => {
                if source.script.trim().is_empty() {
                    anyhow::bail!("Script has no source");
                }
                Ok(())
            }
        }
    }
}

pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        anyhow::bail!("Invalid behavior name {:?}: use lowercase letters, digits and '-'", name);
    }
    Ok(())
}

/// All patterns available to the controller, built-in and custom.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BehaviorLibrary {
    entries: BTreeMap<String, StoredBehavior>,
}

impl BehaviorLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut library = Self::new();
        for (name, axes) in BUILTIN_STROKES {
            let config = axes
                .iter()
                .map(|&(axis, from, to, phase, ecc)| (axis, AxisParams::new(from, to, phase, ecc)))
                .collect();
            library
                .entries
                .insert(name.to_string(), StoredBehavior::Parametric(config));
        }
        library
    }

    pub fn get(&self, name: &str) -> Option<&StoredBehavior> {
        self.entries.get(name)
    }

    pub fn insert(&mut self, name: &str, behavior: StoredBehavior) -> Result<()> {
        validate_name(name)?;
        behavior.validate()?;
        self.entries.insert(name.to_string(), behavior);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<StoredBehavior> {
        self.entries.remove(name)
    }

    /// Entries in `other` replace same-named entries here.
    pub fn merge(&mut self, other: BehaviorLibrary) {
        self.entries.extend(other.entries);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse and validate a stored library document.
    pub fn from_json(json: &str) -> Result<Self> {
        let library: BehaviorLibrary = serde_json::from_str(json)?;
        for (name, behavior) in &library.entries {
            validate_name(name)?;
            behavior
                .validate()
                .map_err(|e| anyhow::anyhow!("Invalid behavior {}: {}", name, e))?;
        }
        Ok(library)
    }
}

type BuiltinAxis = (Axis, f64, f64, f64, f64);

const BUILTIN_STROKES: &[(&str, &[BuiltinAxis])] = &[
    ("down-forward", &[(Axis::L0, 1.0, 0.0, 0.0, 0.0), (Axis::L1, 0.5, 0.7, 0.0, 0.0)]),
    ("grind-circular", &[
        (Axis::L0, 0.0, 0.1, 0.0, 0.0),
        (Axis::R1, 0.3, 0.7, 1.0, 0.0),
        (Axis::R2, 0.3, 0.7, 0.0, 0.0),
    ]),
    ("left-right-tease", &[(Axis::L0, 0.7, 1.0, 0.0, 0.0), (Axis::L2, 0.3, 0.7, 1.0, 0.0)]),
    ("orbit-grinder", &[
        (Axis::L0, 0.0, 0.3, 0.0, 0.3),
        (Axis::L1, 0.3, 0.7, 1.0, 0.0),
        (Axis::R1, 0.1, 0.9, 1.0, 0.0),
        (Axis::R2, 0.9, 0.1, 0.0, 0.0),
    ]),
    ("swirl-tease", &[
        (Axis::L0, 0.5, 1.0, 0.0, 0.0),
        (Axis::R1, 0.2, 0.8, 1.0, 0.0),
        (Axis::R2, 0.2, 0.8, 0.0, 0.0),
    ]),
    ("tease-up", &[(Axis::L0, 0.5, 1.0, 0.0, 0.3), (Axis::R2, 0.4, 0.6, 0.0, 0.0)]),
    ("vortex-tease", &[
        (Axis::L0, 0.6, 1.0, 0.0, 0.0),
        (Axis::R0, 0.0, 1.0, 1.0, 0.0),
        (Axis::R1, 0.3, 0.7, 1.0, 0.0),
    ]),
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_library_is_valid() {
        let library = BehaviorLibrary::builtin();
        assert!(!library.is_empty());
        for name in library.names() {
            validate_name(name).unwrap();
            library.get(name).unwrap().validate().unwrap();
        }
    }

    #[test]
    fn axis_aliases_deserialize() {
        let config: StrokeConfig = serde_json::from_value(json!({
            "stroke": { "from": 0.0, "to": 1.0 },
            "R0": { "from": 0.2, "to": 0.8, "phase": 1.0 }
        }))
        .unwrap();
        assert_eq!(config[&Axis::L0].to, 1.0);
        assert_eq!(config[&Axis::R0].phase, 1.0);
        assert_eq!(config[&Axis::L0].ecc, 0.0);
    }

    #[test]
    fn noise_accepts_number_or_pair() {
        let a: AxisParams = serde_json::from_value(json!({ "from": 0, "to": 1, "noise": 0.2 })).unwrap();
        assert_eq!(a.noise, Some(Noise { from: 0.2, to: 0.2 }));

        let b: AxisParams =
            serde_json::from_value(json!({ "from": 0, "to": 1, "noise": { "from": 0.1, "to": 0.3 } })).unwrap();
        assert_eq!(b.noise, Some(Noise { from: 0.1, to: 0.3 }));
    }

    #[test]
    fn stored_behavior_is_tagged() {
        let script = StoredBehavior::Script(ScriptSource { script: "sleep 1".into() });
        let value = serde_json::to_value(&script).unwrap();
        assert_eq!(value, json!({ "type": "script", "data": { "script": "sleep 1" } }));
    }

    #[test]
    fn validation_rejects_bad_patterns() {
        assert!(validate_stroke(&StrokeConfig::new()).is_err());

        let mut config = StrokeConfig::new();
        config.insert(Axis::L0, AxisParams::new(0.0, 1.5, 0.0, 0.0));
        assert!(validate_stroke(&config).is_err());

        let mut noisy = AxisParams::new(0.0, 1.0, 0.0, 0.0);
        noisy.noise = Some(Noise { from: 2.0, to: 0.0 });
        config.insert(Axis::L0, noisy);
        assert!(validate_stroke(&config).is_err());

        assert!(StoredBehavior::Script(ScriptSource { script: "  ".into() }).validate().is_err());
    }

    #[test]
    fn names_must_be_kebab_case() {
        assert!(validate_name("orbit-grinder-2").is_ok());
        assert!(validate_name("Orbit").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("with space").is_err());
    }

    #[test]
    fn from_json_validates_entries() {
        let ok = r#"{ "my-stroke": { "type": "parametric", "data": { "L0": { "from": 0, "to": 1 } } } }"#;
        let library = BehaviorLibrary::from_json(ok).unwrap();
        assert_eq!(library.len(), 1);

        let bad = r#"{ "my-stroke": { "type": "parametric", "data": {} } }"#;
        assert!(BehaviorLibrary::from_json(bad).is_err());
    }

    #[test]
    fn merge_overrides_builtin() {
        let mut library = BehaviorLibrary::builtin();
        let mut custom = BehaviorLibrary::new();
        custom
            .insert("tease-up", StoredBehavior::Script(ScriptSource { script: "sleep 1".into() }))
            .unwrap();
        library.merge(custom);
        assert!(matches!(library.get("tease-up"), Some(StoredBehavior::Script(_))));
    }

    #[test]
    fn axis_parse_accepts_both_names() {
        assert_eq!(Axis::parse("twist"), Some(Axis::R0));
        assert_eq!(Axis::parse("R0"), Some(Axis::R0));
        assert_eq!(Axis::parse("yaw"), None);
    }
}
