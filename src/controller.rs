//! The top-level scheduler.
//!
//! Once per control tick the engine calls [`MotionBehaviorController::tick`],
//! which takes a snapshot of the input layer, decides what the device should
//! be doing and hands back a lazy [`Tick`] iterator of motion commands. The
//! iterator runs the current behavior until it suspends, so one tick is one
//! logical unit of motion: a stroke cycle, a whole transition, or one script
//! step.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::behavior::{Behavior, TickContext};
use crate::bpm::{generate_next_bpm, BpmProvider};
use crate::context::{self, ControllerHandle, Request, SharedInput};
use crate::engine::{Clock, DeviceCapabilities};
use crate::events::{ControllerEvent, EventSink};
use crate::motion::{BlendSource, MotionCommand, ParametricStroke, Pose, Step, TransitionBlend};
use crate::params::{BpmSliderState, Parameters};
use crate::resolver::{Resolved, StrokeConfigResolver};
use crate::script::{ScriptCompiler, ScriptGlobals, ScriptRunner, StepScriptCompiler};
use crate::stroke::{BehaviorLibrary, StrokeRef};
use crate::timer::DurationTimer;

/// Pause handed to the engine when there is nothing to do.
pub const IDLE_SLEEP: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    TransitioningManual,
    TransitioningFreePlay,
    Stroking,
}

/// Free play may move on when the timer allows it (never for scripts), or
/// when the running script says it is done.
pub fn ready_for_next_stroke(timer_ready: bool, is_script: bool, script_ready: bool) -> bool {
    (timer_ready && !is_script) || (is_script && script_ready)
}

/// Per-session state handed to behaviors while they advance.
struct Session {
    params: Parameters,
    slider: BpmSliderState,
    enabled_strokes: Vec<String>,
    bpm_update_pending: bool,
    /// Whether listeners were last told the tempo control is live.
    bpm_enabled: bool,
    free_play: bool,
    last_pose: Pose,
    rng: StdRng,
    events: Box<dyn EventSink>,
    globals: ScriptGlobals,
}

impl Session {
    fn context<'a>(&'a mut self, now: f64, caps: &'a DeviceCapabilities) -> TickContext<'a> {
        TickContext {
            params: &self.params,
            slider: &self.slider,
            bpm_update_pending: &mut self.bpm_update_pending,
            free_play: self.free_play,
            now,
            caps,
            last_pose: &self.last_pose,
            rng: &mut self.rng,
            events: self.events.as_mut(),
            globals: &mut self.globals,
        }
    }
}

pub struct MotionBehaviorController {
    input: SharedInput,
    library: BehaviorLibrary,
    compiler: Box<dyn ScriptCompiler>,
    clock: Box<dyn Clock>,
    session: Session,
    manual_request: Option<StrokeRef>,
    current: Option<Behavior>,
    timer: Option<DurationTimer>,
}

impl MotionBehaviorController {
    pub fn new(library: BehaviorLibrary, clock: Box<dyn Clock>, events: Box<dyn EventSink>) -> Self {
        Self {
            input: SharedInput::default(),
            library,
            compiler: Box::new(StepScriptCompiler),
            clock,
            session: Session {
                params: Parameters::default(),
                slider: BpmSliderState::default(),
                enabled_strokes: Vec::new(),
                bpm_update_pending: false,
                bpm_enabled: true,
                free_play: false,
                last_pose: Pose::new(),
                rng: StdRng::from_os_rng(),
                events,
                globals: ScriptGlobals::default(),
            },
            manual_request: None,
            current: None,
            timer: None,
        }
    }

    /// Fix the random source, for reproducible sessions.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.session.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_compiler(mut self, compiler: Box<dyn ScriptCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Writer side of the input snapshot, for use from other threads.
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle::new(self.input.clone())
    }

    pub fn current(&self) -> Option<&Behavior> {
        self.current.as_ref()
    }

    pub fn free_play_enabled(&self) -> bool {
        self.session.free_play
    }

    pub fn has_manual_request(&self) -> bool {
        self.manual_request.is_some()
    }

    pub fn timer(&self) -> Option<&DurationTimer> {
        self.timer.as_ref()
    }

    pub fn globals(&self) -> &ScriptGlobals {
        &self.session.globals
    }

    /// Last commanded position per axis.
    pub fn last_pose(&self) -> &Pose {
        &self.session.last_pose
    }

    pub fn request_manual_stroke(&mut self, stroke: impl Into<StrokeRef>) {
        let stroke = stroke.into();
        log::debug!("Manual request: {}", stroke.name());
        self.manual_request = Some(stroke);
    }

    pub fn enable_free_play(&mut self) {
        self.session.free_play = true;
        if let Some(Behavior::Script(runner)) = self.current.as_mut() {
            runner.set_complete(true);
        }
        log::info!("Free play enabled");
    }

    /// Re-arm the pattern timer. Only meaningful in free play.
    pub fn reset_timer(&mut self) {
        if !self.session.free_play {
            return;
        }
        let now = self.clock.now();
        let timer = DurationTimer::new(self.session.params.pattern_duration, now, &mut self.session.rng);
        log::debug!("Next pattern in {:.1}s", timer.duration());
        self.timer = Some(timer);
    }

    /// End the session. The device keeps its last commanded pose.
    pub fn stop(&mut self) {
        self.current = None;
        self.manual_request = None;
        self.timer = None;
        self.session.free_play = false;
        self.session.globals.clear();
        self.session.events.emit(ControllerEvent::SessionStopped);
        log::info!("Session stopped");
    }

    /// What the next tick would do, without doing it.
    pub fn state(&self) -> ControllerState {
        if self.manual_request.is_some() {
            ControllerState::TransitioningManual
        } else if self.session.free_play && self.is_ready(self.clock.now()) {
            ControllerState::TransitioningFreePlay
        } else if !self.session.free_play && self.current.as_ref().is_some_and(Behavior::script_complete) {
            ControllerState::Idle
        } else if self.current.is_some() {
            ControllerState::Stroking
        } else {
            ControllerState::Idle
        }
    }

    /// Run the state machine once and return the motion for this tick.
    pub fn tick<'a>(&'a mut self, caps: &'a DeviceCapabilities) -> Tick<'a> {
        self.sync_input();
        self.settle_transition();

        let now = self.clock.now();
        let state = if let Some(request) = self.manual_request.take() {
            // manual always wins and cancels free play
            self.timer = None;
            self.session.free_play = false;
            self.create_transition(request, caps);
            ControllerState::TransitioningManual
        } else if self.session.free_play && self.is_ready(now) {
            match self.pick_free_play_stroke() {
                Some(name) => {
                    self.create_transition(StrokeRef::Named(name), caps);
                    ControllerState::TransitioningFreePlay
                }
                None => {
                    log::warn!("No enabled strokes to play");
                    self.stop();
                    ControllerState::Idle
                }
            }
        } else if !self.session.free_play && self.current.as_ref().is_some_and(Behavior::script_complete) {
            self.stop();
            ControllerState::Idle
        } else if self.current.is_some() {
            ControllerState::Stroking
        } else {
            ControllerState::Idle
        };
        log::debug!("Tick at {:.3}: {:?}", now, state);

        Tick {
            controller: self,
            caps,
            state,
            emitted: false,
            done: false,
        }
    }

    fn sync_input(&mut self) {
        let (params, slider, enabled_strokes, requests) = {
            let mut input = context::lock(&self.input);
            let slider = input.slider;
            input.slider.updated = false;
            (
                input.params.clone(),
                slider,
                input.enabled_strokes.clone(),
                std::mem::take(&mut input.requests),
            )
        };
        self.session.params = params.sanitized();
        self.session.slider = slider;
        if slider.updated {
            self.session.bpm_update_pending = true;
        }
        self.session.enabled_strokes = enabled_strokes;

        for request in requests {
            match request {
                Request::ManualStroke(stroke) => self.request_manual_stroke(stroke),
                Request::FreePlay => self.enable_free_play(),
                Request::Stop => self.stop(),
            }
        }
    }

    fn is_ready(&self, now: f64) -> bool {
        let timer_ready = self.timer.as_ref().map_or(true, |timer| timer.is_expired(now))
            && !self.session.enabled_strokes.is_empty()
            && !self.session.slider.active;
        let is_script = self.current.as_ref().is_some_and(Behavior::is_script);
        let script_ready = self.current.as_ref().is_some_and(Behavior::script_complete);
        ready_for_next_stroke(timer_ready, is_script, script_ready)
    }

    fn pick_free_play_stroke(&mut self) -> Option<String> {
        let pool = &self.session.enabled_strokes;
        if pool.is_empty() {
            return None;
        }
        let index = self.session.rng.random_range(0..pool.len());
        Some(pool[index].clone())
    }

    fn create_transition(&mut self, target: StrokeRef, caps: &DeviceCapabilities) {
        let resolver = StrokeConfigResolver::new(&self.library, &self.session.params);
        let resolved = match resolver.resolve(&target) {
            Ok(resolved) => resolved,
            Err(e) => {
                log::warn!("Ignoring transition to {}: {:#}", target.name(), e);
                return;
            }
        };

        match resolved {
            Resolved::Script { name, source } => {
                log::info!("Starting script {}", name);
                let compiled = self.compiler.compile(&name, &source);
                let runner = ScriptRunner::start(&name, compiled, self.session.events.as_mut());
                let failed = runner.failed();
                self.current = Some(Behavior::Script(runner));
                self.session.events.emit(ControllerEvent::UpdateCurrentBehavior { name });
                self.session.bpm_enabled = false;
                self.session.events.emit(ControllerEvent::ToggleBpmEnabled(false));
                self.reset_timer();
                if failed {
                    self.end_session_after_failure();
                }
            }
            Resolved::Parametric(config) => {
                if !self.session.bpm_enabled {
                    self.session.bpm_enabled = true;
                    self.session.events.emit(ControllerEvent::ToggleBpmEnabled(true));
                }
                let now = self.clock.now();
                let mut provider = BpmProvider::new(generate_next_bpm(self.session.params.bpm, &mut self.session.rng));
                let target_bpm = provider.query(&mut self.session.context(now, caps));
                let stroke = ParametricStroke::new(config, provider);

                let blend = match self.current.take() {
                    None => TransitionBlend::start(stroke, target),
                    Some(previous) => {
                        let duration = self.session.params.transition_duration.sample(&mut self.session.rng);
                        let source = match previous {
                            Behavior::Stroke(running) => BlendSource::Stroke(running),
                            Behavior::Script(_) | Behavior::Transition(_) => {
                                BlendSource::Pose(self.session.last_pose.clone())
                            }
                        };
                        TransitionBlend::blend(source, stroke, target, duration)
                    }
                };

                log::info!(
                    "Transition to {} over {:.1}s at {:.0} bpm",
                    blend.origin().name(),
                    blend.duration(),
                    target_bpm
                );
                self.session.events.emit(ControllerEvent::TransitionStart {
                    duration: blend.duration(),
                    target_bpm,
                });
                self.current = Some(Behavior::Transition(blend));
            }
        }
    }

    /// Swap a finished blend for the pattern it was heading to.
    fn settle_transition(&mut self) {
        if !matches!(&self.current, Some(Behavior::Transition(blend)) if blend.is_complete()) {
            return;
        }
        let Some(Behavior::Transition(blend)) = self.current.take() else {
            return;
        };
        let (stroke, origin) = blend.into_target();
        let bpm = stroke.bpm();
        log::info!("Now playing {} at {:.0} bpm", origin.name(), bpm);
        self.current = Some(Behavior::Stroke(stroke));
        self.session.events.emit(ControllerEvent::TransitionEnd { stroke: origin, bpm });
        self.reset_timer();
    }

    /// A failed script leaves the device where it is; the next tick stops
    /// the session.
    fn end_session_after_failure(&mut self) {
        self.session.free_play = false;
        self.timer = None;
    }
}

/// Lazy motion for one tick. Dropping it early is fine: the current
/// behavior resumes where it left off on the next tick.
pub struct Tick<'a> {
    controller: &'a mut MotionBehaviorController,
    caps: &'a DeviceCapabilities,
    state: ControllerState,
    emitted: bool,
    done: bool,
}

impl Tick<'_> {
    /// State the controller entered at the start of this tick.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    fn idle(&mut self) -> Option<MotionCommand> {
        self.done = true;
        if self.emitted {
            return None;
        }
        self.emitted = true;
        Some(MotionCommand::Sleep { seconds: IDLE_SLEEP })
    }
}

impl Iterator for Tick<'_> {
    type Item = MotionCommand;

    fn next(&mut self) -> Option<MotionCommand> {
        if self.done {
            return None;
        }
        let controller = &mut *self.controller;
        let now = controller.clock.now();
        let Some(current) = controller.current.as_mut() else {
            return self.idle();
        };

        let step = current.advance(&mut controller.session.context(now, self.caps));
        match step {
            Step::Command(command) => {
                if let MotionCommand::Move { pose, .. } = &command {
                    controller.session.last_pose.extend(pose.iter().map(|(axis, value)| (*axis, *value)));
                }
                self.emitted = true;
                Some(command)
            }
            Step::Suspend => self.idle(),
            Step::Finished => {
                let blend_done = matches!(current, Behavior::Transition(_));
                let script_failed = matches!(current, Behavior::Script(runner) if runner.failed());
                if blend_done {
                    controller.settle_transition();
                } else if script_failed {
                    controller.end_session_after_failure();
                }
                self.idle()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ManualClock;
    use crate::params::Range;

    #[test]
    fn readiness_truth_table() {
        // (timer_ready, is_script, script_ready) -> ready
        let table = [
            (false, false, false, false),
            (false, false, true, false),
            (false, true, false, false),
            (false, true, true, true),
            (true, false, false, true),
            (true, false, true, true),
            (true, true, false, false),
            (true, true, true, true),
        ];
        for (timer_ready, is_script, script_ready, expected) in table {
            assert_eq!(
                ready_for_next_stroke(timer_ready, is_script, script_ready),
                expected,
                "timer_ready={} is_script={} script_ready={}",
                timer_ready,
                is_script,
                script_ready
            );
        }
    }

    fn controller() -> (MotionBehaviorController, ManualClock, crossbeam_channel::Receiver<ControllerEvent>) {
        let clock = ManualClock::new(0.0);
        let (tx, rx) = crossbeam_channel::unbounded();
        let controller =
            MotionBehaviorController::new(BehaviorLibrary::builtin(), Box::new(clock.clone()), Box::new(tx)).with_seed(7);
        (controller, clock, rx)
    }

    #[test]
    fn idle_tick_sleeps_once() {
        let (mut controller, _clock, _rx) = controller();
        let caps = DeviceCapabilities::stroke_only();
        let mut tick = controller.tick(&caps);
        assert_eq!(tick.state(), ControllerState::Idle);
        assert_eq!(tick.next(), Some(MotionCommand::Sleep { seconds: IDLE_SLEEP }));
        assert_eq!(tick.next(), None);
    }

    #[test]
    fn reset_timer_needs_free_play() {
        let (mut controller, _clock, _rx) = controller();
        controller.reset_timer();
        assert!(controller.timer().is_none());

        controller.handle().update_parameters(|p| p.pattern_duration = Range::new(3.0, 3.0));
        controller.tick(&DeviceCapabilities::stroke_only());
        controller.enable_free_play();
        controller.reset_timer();
        assert_eq!(controller.timer().map(DurationTimer::duration), Some(3.0));
    }

    #[test]
    fn unknown_stroke_is_dropped() {
        let (mut controller, _clock, rx) = controller();
        let caps = DeviceCapabilities::stroke_only();
        controller.request_manual_stroke("no-such-stroke");
        let commands: Vec<_> = controller.tick(&caps).collect();
        assert_eq!(commands, vec![MotionCommand::Sleep { seconds: IDLE_SLEEP }]);
        assert!(controller.current().is_none());
        assert!(rx.try_iter().next().is_none());
    }

    #[test]
    fn first_manual_stroke_starts_with_start_move() {
        let (mut controller, _clock, rx) = controller();
        let caps = DeviceCapabilities::default();
        controller.request_manual_stroke("tease-up");
        let commands: Vec<_> = controller.tick(&caps).collect();
        assert_eq!(commands.len(), 1);
        match &commands[0] {
            MotionCommand::Move { pose, duration, .. } => {
                assert_eq!(*duration, crate::motion::START_MOVE_DURATION);
                assert_eq!(pose.len(), caps.axes.len());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(controller.current(), Some(Behavior::Stroke(_))));

        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(events[0], ControllerEvent::TransitionStart { duration, .. } if duration == 1.0));
        assert!(matches!(&events[1], ControllerEvent::TransitionEnd { stroke, .. } if stroke.name() == "tease-up"));
    }

    #[test]
    fn stop_clears_everything() {
        let (mut controller, _clock, rx) = controller();
        let caps = DeviceCapabilities::stroke_only();
        controller.enable_free_play();
        controller.request_manual_stroke("tease-up");
        controller.tick(&caps).for_each(drop);
        controller.stop();
        assert!(controller.current().is_none());
        assert!(!controller.free_play_enabled());
        assert!(controller.timer().is_none());
        assert_eq!(rx.try_iter().last(), Some(ControllerEvent::SessionStopped));
        assert_eq!(controller.state(), ControllerState::Idle);
    }
}
