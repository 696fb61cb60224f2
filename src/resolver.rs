use anyhow::Result;

use crate::params::Parameters;
use crate::stroke::{Axis, AxisParams, BehaviorLibrary, ScriptSource, StoredBehavior, StrokeConfig, StrokeRef};

/// What a stroke reference turned into.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolved {
    Parametric(StrokeConfig),
    Script { name: String, source: ScriptSource },
}

/// Derives the effective configuration of a stroke from the library and
/// the current twist parameters.
pub struct StrokeConfigResolver<'a> {
    library: &'a BehaviorLibrary,
    params: &'a Parameters,
}

impl<'a> StrokeConfigResolver<'a> {
    pub fn new(library: &'a BehaviorLibrary, params: &'a Parameters) -> Self {
        Self { library, params }
    }

    pub fn resolve(&self, stroke: &StrokeRef) -> Result<Resolved> {
        match stroke {
            // Already resolved upstream, never overlay twice.
            StrokeRef::Resolved(config) => Ok(Resolved::Parametric(config.clone())),
            StrokeRef::Named(name) => match self.library.get(name) {
                Some(StoredBehavior::Parametric(config)) => {
                    let mut config = config.clone();
                    self.overlay_twist(&mut config);
                    Ok(Resolved::Parametric(config))
                }
                Some(StoredBehavior::Script(source)) => Ok(Resolved::Script {
                    name: name.clone(),
                    source: source.clone(),
                }),
                None => anyhow::bail!("Unknown stroke: {}", name),
            },
        }
    }

    /// Adds the global twist axis in place, unless twist is off or the
    /// pattern already authors a meaningful twist.
    pub fn overlay_twist(&self, config: &mut StrokeConfig) {
        if !self.params.twist {
            return;
        }
        let authored = config
            .get(&Axis::R0)
            .is_some_and(|twist| !twist.is_degenerate_twist());
        if authored {
            return;
        }
        config.insert(
            Axis::R0,
            AxisParams::new(
                self.params.twist_range.min(),
                self.params.twist_range.max(),
                self.params.twist_phase,
                self.params.twist_ecc,
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Range;

    fn twist_params() -> Parameters {
        Parameters {
            twist: true,
            twist_range: Range::new(0.2, 0.8),
            twist_phase: 1.5,
            twist_ecc: 0.3,
            ..Parameters::default()
        }
    }

    fn parametric(resolved: Resolved) -> StrokeConfig {
        match resolved {
            Resolved::Parametric(config) => config,
            other => panic!("expected parametric, got {:?}", other),
        }
    }

    #[test]
    fn twist_disabled_returns_stored_config() {
        let library = BehaviorLibrary::builtin();
        let params = Parameters::default();
        let resolver = StrokeConfigResolver::new(&library, &params);
        let config = parametric(resolver.resolve(&"tease-up".into()).unwrap());
        assert_eq!(Some(&StoredBehavior::Parametric(config)), library.get("tease-up"));
    }

    #[test]
    fn twist_overlay_added_when_missing() {
        let library = BehaviorLibrary::builtin();
        let params = twist_params();
        let resolver = StrokeConfigResolver::new(&library, &params);
        let config = parametric(resolver.resolve(&"tease-up".into()).unwrap());
        let twist = config[&Axis::R0];
        assert_eq!((twist.from, twist.to, twist.phase, twist.ecc), (0.2, 0.8, 1.5, 0.3));
    }

    #[test]
    fn authored_twist_is_kept() {
        let library = BehaviorLibrary::builtin();
        let params = twist_params();
        let resolver = StrokeConfigResolver::new(&library, &params);
        let config = parametric(resolver.resolve(&"vortex-tease".into()).unwrap());
        assert_eq!(config[&Axis::R0].from, 0.0);
        assert_eq!(config[&Axis::R0].to, 1.0);
    }

    #[test]
    fn degenerate_twist_is_replaced() {
        let mut library = BehaviorLibrary::new();
        let mut config = StrokeConfig::new();
        config.insert(Axis::L0, AxisParams::new(0.0, 1.0, 0.0, 0.0));
        config.insert(Axis::R0, AxisParams::new(0.5, 0.5, 0.0, 0.0));
        library.insert("parked", StoredBehavior::Parametric(config)).unwrap();

        let params = twist_params();
        let resolver = StrokeConfigResolver::new(&library, &params);
        let resolved = parametric(resolver.resolve(&"parked".into()).unwrap());
        assert_eq!(resolved[&Axis::R0].from, 0.2);
    }

    #[test]
    fn resolving_twice_is_idempotent() {
        let library = BehaviorLibrary::builtin();
        let params = twist_params();
        let resolver = StrokeConfigResolver::new(&library, &params);
        let once = parametric(resolver.resolve(&"orbit-grinder".into()).unwrap());
        let twice = parametric(resolver.resolve(&StrokeRef::Resolved(once.clone())).unwrap());
        assert_eq!(once, twice);

        let mut again = once.clone();
        resolver.overlay_twist(&mut again);
        assert_eq!(once, again);
    }

    #[test]
    fn scripts_and_unknown_names() {
        let mut library = BehaviorLibrary::new();
        library
            .insert("wave", StoredBehavior::Script(ScriptSource { script: "sleep 1".into() }))
            .unwrap();
        let params = Parameters::default();
        let resolver = StrokeConfigResolver::new(&library, &params);
        assert!(matches!(resolver.resolve(&"wave".into()).unwrap(), Resolved::Script { .. }));
        assert!(resolver.resolve(&"nope".into()).is_err());
    }
}
