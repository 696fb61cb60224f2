use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;

use crate::params::{BpmSliderState, Parameters, MAX_BPM, MIN_BPM};
use crate::stroke::StrokeRef;

/// Intents posted by the input layer, applied in order at the next tick.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    ManualStroke(StrokeRef),
    FreePlay,
    Stop,
}

/// Everything the input layer writes and the controller reads at tick
/// boundaries.
#[derive(Clone, Debug, Default)]
pub struct InputState {
    pub params: Parameters,
    /// Bumped on every parameter change so persistence can tell when to save.
    pub params_version: u64,
    pub slider: BpmSliderState,
    pub enabled_strokes: Vec<String>,
    pub requests: Vec<Request>,
}

pub type SharedInput = Arc<Mutex<InputState>>;

/// A panic while holding the lock leaves plain data behind, still usable.
pub fn lock(input: &SharedInput) -> MutexGuard<'_, InputState> {
    input.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheap cloneable writer side of the controller's input.
#[derive(Clone, Default)]
pub struct ControllerHandle {
    input: SharedInput,
}

impl ControllerHandle {
    pub fn new(input: SharedInput) -> Self {
        Self { input }
    }

    pub fn request_manual_stroke(&self, stroke: impl Into<StrokeRef>) {
        lock(&self.input).requests.push(Request::ManualStroke(stroke.into()));
    }

    pub fn enable_free_play(&self) {
        lock(&self.input).requests.push(Request::FreePlay);
    }

    pub fn stop(&self) {
        lock(&self.input).requests.push(Request::Stop);
    }

    pub fn parameters(&self) -> Parameters {
        lock(&self.input).params.clone()
    }

    pub fn params_version(&self) -> u64 {
        lock(&self.input).params_version
    }

    pub fn set_parameters(&self, params: Parameters) {
        self.update_parameters(|p| *p = params);
    }

    pub fn update_parameters<F: FnOnce(&mut Parameters)>(&self, f: F) {
        let mut input = lock(&self.input);
        f(&mut input.params);
        input.params = input.params.sanitized();
        input.params_version += 1;
    }

    /// Set one parameter by its key, e.g. `("bpm", [40, 80])`.
    pub fn set_parameter(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let mut input = lock(&self.input);
        let mut params = input.params.clone();
        params.set(key, value)?;
        input.params = params.sanitized();
        input.params_version += 1;
        Ok(())
    }

    /// The user released the tempo control at `bpm`.
    pub fn set_bpm(&self, bpm: f64) {
        let mut input = lock(&self.input);
        input.slider.value = bpm.clamp(MIN_BPM, MAX_BPM);
        input.slider.updated = true;
    }

    pub fn set_dragging(&self, active: bool) {
        lock(&self.input).slider.active = active;
    }

    pub fn slider(&self) -> BpmSliderState {
        lock(&self.input).slider
    }

    pub fn set_enabled_strokes(&self, names: Vec<String>) {
        lock(&self.input).enabled_strokes = names;
    }

    pub fn enabled_strokes(&self) -> Vec<String> {
        lock(&self.input).enabled_strokes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Range;

    #[test]
    fn requests_queue_in_order() {
        let handle = ControllerHandle::default();
        handle.enable_free_play();
        handle.request_manual_stroke("tease-up");
        handle.stop();
        let input = lock(&handle.input);
        assert_eq!(
            input.requests,
            vec![
                Request::FreePlay,
                Request::ManualStroke(StrokeRef::Named("tease-up".into())),
                Request::Stop
            ]
        );
    }

    #[test]
    fn parameter_updates_are_sanitized_and_versioned() {
        let handle = ControllerHandle::default();
        handle.set_parameter("bpm", serde_json::json!([900, 0])).unwrap();
        assert_eq!(handle.parameters().bpm, Range::new(MIN_BPM, MAX_BPM));
        assert_eq!(handle.params_version(), 1);

        assert!(handle.set_parameter("volume", serde_json::json!(3)).is_err());
        assert_eq!(handle.params_version(), 1);
    }

    #[test]
    fn slider_commit_sets_one_shot_flag() {
        let handle = ControllerHandle::default();
        handle.set_bpm(1000.0);
        let slider = handle.slider();
        assert!(slider.updated);
        assert_eq!(slider.value, MAX_BPM);
    }

    #[test]
    fn poisoned_lock_still_usable() {
        let handle = ControllerHandle::default();
        let input = handle.input.clone();
        let _ = std::thread::spawn(move || {
            let _guard = input.lock().unwrap();
            panic!("poison");
        })
        .join();
        handle.set_dragging(true);
        assert!(handle.slider().active);
    }
}
