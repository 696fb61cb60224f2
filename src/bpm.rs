use rand::Rng;

use crate::behavior::TickContext;
use crate::events::ControllerEvent;
use crate::params::{BpmMode, Parameters, Range};

/// Length of one continuous-mode interpolation window, in seconds.
pub const CONTINUOUS_WINDOW: f64 = 1.0;

/// Random whole-number tempo within `range`.
///
/// When no whole number fits (e.g. `[20.2, 20.8]`, which sanitized
/// parameters never produce) the nearest whole number to `min` is used.
pub fn generate_next_bpm<R: Rng>(range: Range, rng: &mut R) -> f64 {
    let lo = range.min().ceil();
    let hi = range.max().floor();
    if lo > hi {
        return range.min().round();
    }
    rng.random_range(lo as i64..=hi as i64) as f64
}

/// One random-walk step from `current`, kept inside the bpm range.
pub fn generate_next_continuous_bpm<R: Rng>(current: f64, params: &Parameters, rng: &mut R) -> f64 {
    let step = params.acceleration.sample(rng);
    let sign = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
    params.bpm.clamp(current + sign * step)
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Window {
    start_bpm: f64,
    end_bpm: f64,
    start_time: f64,
    end_time: f64,
}

impl Window {
    fn open(start_bpm: f64, end_bpm: f64, now: f64) -> Self {
        Self {
            start_bpm,
            end_bpm,
            start_time: now,
            end_time: now + CONTINUOUS_WINDOW,
        }
    }

    fn interpolate(&self, now: f64) -> f64 {
        let fraction = ((now - self.start_time) / (self.end_time - self.start_time)).clamp(0.0, 1.0);
        self.start_bpm + (self.end_bpm - self.start_bpm) * fraction
    }
}

/// Instantaneous tempo for the active pattern.
#[derive(Clone, Debug, PartialEq)]
pub struct BpmProvider {
    value: f64,
    window: Option<Window>,
}

impl BpmProvider {
    pub fn new(bpm: f64) -> Self {
        Self {
            value: bpm,
            window: None,
        }
    }

    /// Last value handed out, without re-evaluating.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn query(&mut self, ctx: &mut TickContext) -> f64 {
        let user_override = !ctx.free_play || ctx.slider.active || *ctx.bpm_update_pending;
        if user_override {
            self.value = ctx.slider.value;
            *ctx.bpm_update_pending = false;
            // Continuous mode restarts from the slider once the user lets go.
            self.window = None;
            return self.value;
        }

        match ctx.params.bpm_mode {
            BpmMode::Discrete => {
                self.window = None;
                self.value
            }
            BpmMode::Continuous => self.walk(ctx),
        }
    }

    fn walk(&mut self, ctx: &mut TickContext) -> f64 {
        let now = ctx.now;
        let Some(window) = self.window else {
            let end_bpm = generate_next_continuous_bpm(self.value, ctx.params, &mut *ctx.rng);
            self.window = Some(Window::open(self.value, end_bpm, now));
            return self.value;
        };

        if now >= window.end_time {
            self.value = window.end_bpm;
            ctx.events.emit(ControllerEvent::UpdateBpm(self.value));
            let end_bpm = generate_next_continuous_bpm(self.value, ctx.params, &mut *ctx.rng);
            self.window = Some(Window::open(self.value, end_bpm, now));
        } else {
            self.value = window.interpolate(now);
        }
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DeviceCapabilities;
    use crate::motion::Pose;
    use crate::params::BpmSliderState;
    use crate::script::ScriptGlobals;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Fixture {
        params: Parameters,
        slider: BpmSliderState,
        pending: bool,
        caps: DeviceCapabilities,
        pose: Pose,
        rng: StdRng,
        events: Vec<ControllerEvent>,
        globals: ScriptGlobals,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                params: Parameters {
                    bpm_mode: BpmMode::Continuous,
                    bpm: Range::new(20.0, 120.0),
                    ..Parameters::default()
                },
                slider: BpmSliderState::default(),
                pending: false,
                caps: DeviceCapabilities::default(),
                pose: Pose::new(),
                rng: StdRng::seed_from_u64(3),
                events: Vec::new(),
                globals: ScriptGlobals::default(),
            }
        }

        fn query(&mut self, provider: &mut BpmProvider, now: f64, free_play: bool) -> f64 {
            let mut ctx = TickContext {
                params: &self.params,
                slider: &self.slider,
                bpm_update_pending: &mut self.pending,
                free_play,
                now,
                caps: &self.caps,
                last_pose: &self.pose,
                rng: &mut self.rng,
                events: &mut self.events,
                globals: &mut self.globals,
            };
            provider.query(&mut ctx)
        }
    }

    fn windowed(start_bpm: f64, end_bpm: f64, start_time: f64) -> BpmProvider {
        BpmProvider {
            value: start_bpm,
            window: Some(Window::open(start_bpm, end_bpm, start_time)),
        }
    }

    #[test]
    fn next_bpm_is_whole_and_in_range() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let bpm = generate_next_bpm(Range::new(20.0, 60.0), &mut rng);
            assert_eq!(bpm, bpm.floor());
            assert!((20.0..=60.0).contains(&bpm));
        }
        assert_eq!(generate_next_bpm(Range::new(45.0, 45.0), &mut rng), 45.0);
    }

    #[test]
    fn next_bpm_is_whole_when_no_whole_number_fits() {
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(generate_next_bpm(Range::new(20.2, 20.8), &mut rng), 20.0);
        assert_eq!(generate_next_bpm(Range::new(20.6, 20.8), &mut rng), 21.0);
    }

    #[test]
    fn continuous_step_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(5);
        let params = Parameters {
            bpm: Range::new(30.0, 40.0),
            acceleration: Range::new(5.0, 10.0),
            ..Parameters::default()
        };
        let mut bpm = 35.0;
        for _ in 0..100 {
            let next = generate_next_continuous_bpm(bpm, &params, &mut rng);
            assert!((30.0..=40.0).contains(&next));
            bpm = next;
        }
    }

    #[test]
    fn continuous_interpolates_inside_window() {
        let mut fixture = Fixture::new();
        let mut provider = windowed(60.0, 90.0, 0.0);
        assert_eq!(fixture.query(&mut provider, 0.5, true), 75.0);
        assert!(fixture.events.is_empty());
    }

    #[test]
    fn continuous_commits_past_window_end() {
        let mut fixture = Fixture::new();
        let mut provider = windowed(60.0, 90.0, 0.0);
        assert_eq!(fixture.query(&mut provider, 1.2, true), 90.0);
        assert_eq!(fixture.events, vec![ControllerEvent::UpdateBpm(90.0)]);

        let window = provider.window.unwrap();
        assert_eq!(window.start_bpm, 90.0);
        assert_eq!(window.start_time, 1.2);
        assert_eq!(window.end_time, 1.2 + CONTINUOUS_WINDOW);
    }

    #[test]
    fn dragging_freezes_walk_and_resumes_from_slider() {
        let mut fixture = Fixture::new();
        let mut provider = windowed(60.0, 90.0, 0.0);

        fixture.slider.active = true;
        fixture.slider.value = 100.0;
        assert_eq!(fixture.query(&mut provider, 0.5, true), 100.0);
        assert_eq!(fixture.query(&mut provider, 3.0, true), 100.0);
        assert!(provider.window.is_none());
        assert!(fixture.events.is_empty());

        fixture.slider.active = false;
        assert_eq!(fixture.query(&mut provider, 4.0, true), 100.0);
        let window = provider.window.unwrap();
        assert_eq!(window.start_bpm, 100.0);
        assert_eq!(window.start_time, 4.0);
    }

    #[test]
    fn discrete_holds_value_in_free_play() {
        let mut fixture = Fixture::new();
        fixture.params.bpm_mode = BpmMode::Discrete;
        fixture.slider.value = 100.0;
        let mut provider = BpmProvider::new(42.0);
        assert_eq!(fixture.query(&mut provider, 10.0, true), 42.0);
    }

    #[test]
    fn manual_mode_follows_slider() {
        let mut fixture = Fixture::new();
        fixture.params.bpm_mode = BpmMode::Discrete;
        fixture.slider.value = 77.0;
        let mut provider = BpmProvider::new(42.0);
        assert_eq!(fixture.query(&mut provider, 0.0, false), 77.0);
    }

    #[test]
    fn pending_update_consumed_once() {
        let mut fixture = Fixture::new();
        fixture.params.bpm_mode = BpmMode::Discrete;
        fixture.slider.value = 88.0;
        fixture.pending = true;
        let mut provider = BpmProvider::new(42.0);
        assert_eq!(fixture.query(&mut provider, 0.0, true), 88.0);
        assert!(!fixture.pending);

        fixture.slider.value = 10.0;
        assert_eq!(fixture.query(&mut provider, 0.0, true), 88.0);
    }
}
