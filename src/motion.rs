use std::collections::BTreeMap;
use std::f64::consts::PI;

use rand::Rng;

use crate::behavior::TickContext;
use crate::bpm::BpmProvider;
use crate::engine::DeviceCapabilities;
use crate::params::MIN_BPM;
use crate::stroke::{Axis, AxisParams, MotionCurve, StrokeConfig, StrokeRef};

/// Moves emitted per stroke cycle.
pub const STEPS_PER_CYCLE: usize = 8;
/// Length of the move to a new pattern's start pose when nothing was running.
pub const START_MOVE_DURATION: f64 = 1.0;

/// Target position per axis, in [0, 1].
pub type Pose = BTreeMap<Axis, f64>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ramp {
    Linear,
    EaseInOut,
}

/// One unit of work for the execution engine.
#[derive(Clone, Debug, PartialEq)]
pub enum MotionCommand {
    Move { pose: Pose, duration: f64, ramp: Ramp },
    Sleep { seconds: f64 },
}

impl MotionCommand {
    pub fn duration(&self) -> f64 {
        match self {
            MotionCommand::Move { duration, .. } => *duration,
            MotionCommand::Sleep { seconds } => *seconds,
        }
    }
}

/// Result of advancing a behavior by one step.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Hand this to the engine, then call again.
    Command(MotionCommand),
    /// The current unit of motion is exhausted; resume on the next tick.
    Suspend,
    /// The behavior has nothing more to do.
    Finished,
}

// ===== Curves =====
// Map a point in the stroke cycle to a position between `from` and `to`.

fn smootherstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

pub fn evaluate_curve(curve: MotionCurve, from: f64, to: f64, phase: f64, ecc: f64, cycles: f64) -> f64 {
    match curve {
        MotionCurve::Tempest => {
            // phase is in quarter cycles
            let angle = 2.0 * PI * cycles + phase * PI / 2.0;
            let mid = (from + to) / 2.0;
            let half = (to - from) / 2.0;
            mid - half * f64::cos(angle + ecc * f64::sin(angle))
        }
        MotionCurve::Parabolic => {
            let x = (cycles + phase / 4.0).rem_euclid(1.0);
            let u = 1.0 - (2.0 * x - 1.0).powi(2);
            from + (to - from) * u
        }
        MotionCurve::Linear => {
            let x = (cycles + phase / 4.0).rem_euclid(1.0);
            let u = 1.0 - (2.0 * x - 1.0).abs();
            from + (to - from) * u
        }
    }
}

fn evaluate_axis(params: &AxisParams, (from, to): (f64, f64), cycles: f64) -> f64 {
    let curve = params.motion.unwrap_or_default();
    evaluate_curve(curve, from, to, params.phase, params.ecc, cycles).clamp(0.0, 1.0)
}

// ===== Parametric stroke =====

/// A named pattern running at the tempo its provider reports.
pub struct ParametricStroke {
    config: StrokeConfig,
    provider: BpmProvider,
    /// Position in stroke cycles.
    position: f64,
    steps_taken: usize,
    /// Per-axis range for the current cycle, after noise.
    ranges: BTreeMap<Axis, (f64, f64)>,
}

impl ParametricStroke {
    pub fn new(config: StrokeConfig, provider: BpmProvider) -> Self {
        let ranges = config.iter().map(|(axis, p)| (*axis, (p.from, p.to))).collect();
        Self {
            config,
            provider,
            position: 0.0,
            steps_taken: 0,
            ranges,
        }
    }

    pub fn bpm(&self) -> f64 {
        self.provider.value()
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Pose of the driven axes the device has, at `cycles`.
    pub fn pose_at(&self, cycles: f64, caps: &DeviceCapabilities) -> Pose {
        self.config
            .iter()
            .filter(|(axis, _)| caps.has(**axis))
            .map(|(axis, params)| {
                let range = self.ranges.get(axis).copied().unwrap_or((params.from, params.to));
                (*axis, evaluate_axis(params, range, cycles))
            })
            .collect()
    }

    /// Where every device axis should be before the pattern starts. Axes the
    /// pattern leaves alone go to their defaults.
    pub fn start_pose(&self, caps: &DeviceCapabilities) -> Pose {
        let driven = self.pose_at(self.position, caps);
        caps.axes
            .iter()
            .map(|info| (info.axis, driven.get(&info.axis).copied().unwrap_or(info.default_position)))
            .collect()
    }

    fn roll_noise<R: Rng>(&mut self, rng: &mut R) {
        for (axis, params) in &self.config {
            let range = match params.noise {
                Some(noise) => {
                    let span = params.to - params.from;
                    let from = params.from + span * noise.from * rng.random_range(0.0..1.0);
                    let to = params.to - span * noise.to * rng.random_range(0.0..1.0);
                    (from, to)
                }
                None => (params.from, params.to),
            };
            self.ranges.insert(*axis, range);
        }
    }

    /// One cycle per unit: `STEPS_PER_CYCLE` moves, then suspend.
    pub fn advance(&mut self, ctx: &mut TickContext) -> Step {
        if self.steps_taken == STEPS_PER_CYCLE {
            self.steps_taken = 0;
            return Step::Suspend;
        }
        if self.steps_taken == 0 {
            self.roll_noise(&mut *ctx.rng);
        }

        let bpm = self.provider.query(ctx).max(MIN_BPM);
        let duration = 60.0 / bpm / STEPS_PER_CYCLE as f64;
        self.steps_taken += 1;
        self.position += 1.0 / STEPS_PER_CYCLE as f64;

        Step::Command(MotionCommand::Move {
            pose: self.pose_at(self.position, ctx.caps),
            duration,
            ramp: Ramp::Linear,
        })
    }
}

// ===== Transition =====

/// What a transition blends away from.
pub enum BlendSource {
    /// A running pattern, sampled at the blend's own phase.
    Stroke(ParametricStroke),
    /// A held pose, e.g. where a script left the device.
    Pose(Pose),
}

/// Time-bounded morph into `target`. Without a source it is a single eased
/// move to the target's start pose.
pub struct TransitionBlend {
    source: Option<BlendSource>,
    target: ParametricStroke,
    origin: StrokeRef,
    duration: f64,
    elapsed: f64,
    start_bpm: f64,
    cycles: f64,
}

impl TransitionBlend {
    pub fn blend(source: BlendSource, target: ParametricStroke, origin: StrokeRef, duration: f64) -> Self {
        let (start_bpm, cycles) = match &source {
            BlendSource::Stroke(stroke) => (stroke.bpm(), stroke.position()),
            BlendSource::Pose(_) => (target.bpm(), 0.0),
        };
        Self {
            source: Some(source),
            target,
            origin,
            duration: duration.max(0.0),
            elapsed: 0.0,
            start_bpm,
            cycles,
        }
    }

    pub fn start(target: ParametricStroke, origin: StrokeRef) -> Self {
        let start_bpm = target.bpm();
        Self {
            source: None,
            target,
            origin,
            duration: START_MOVE_DURATION,
            elapsed: 0.0,
            start_bpm,
            cycles: 0.0,
        }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn origin(&self) -> &StrokeRef {
        &self.origin
    }

    pub fn is_complete(&self) -> bool {
        self.duration - self.elapsed <= 1e-9
    }

    /// The target pattern, continuing from the phase the blend reached.
    pub fn into_target(self) -> (ParametricStroke, StrokeRef) {
        let mut target = self.target;
        target.position = self.cycles;
        target.steps_taken = 0;
        (target, self.origin)
    }

    pub fn advance(&mut self, ctx: &mut TickContext) -> Step {
        if self.is_complete() {
            return Step::Finished;
        }

        let Some(source) = &self.source else {
            self.elapsed = self.duration;
            return Step::Command(MotionCommand::Move {
                pose: self.target.start_pose(ctx.caps),
                duration: self.duration,
                ramp: Ramp::EaseInOut,
            });
        };

        let target_bpm = self.target.provider.query(ctx);
        let progress = self.elapsed / self.duration;
        let bpm = (self.start_bpm + (target_bpm - self.start_bpm) * progress).max(MIN_BPM);
        let dt = (60.0 / bpm / STEPS_PER_CYCLE as f64).min(self.duration - self.elapsed);
        self.elapsed += dt;
        self.cycles += dt * bpm / 60.0;

        let alpha = smootherstep(self.elapsed / self.duration);
        let from_pose = match source {
            BlendSource::Stroke(stroke) => stroke.pose_at(self.cycles, ctx.caps),
            BlendSource::Pose(pose) => pose.clone(),
        };
        let to_pose = self.target.pose_at(self.cycles, ctx.caps);

        let mut pose = Pose::new();
        for info in &ctx.caps.axes {
            let from = from_pose.get(&info.axis).or(ctx.last_pose.get(&info.axis)).copied();
            let to = to_pose.get(&info.axis).copied();
            let value = match (from, to) {
                (Some(a), Some(b)) => a + (b - a) * alpha,
                (Some(a), None) => a + (info.default_position - a) * alpha,
                (None, Some(b)) => info.default_position + (b - info.default_position) * alpha,
                (None, None) => continue,
            };
            pose.insert(info.axis, value);
        }

        Step::Command(MotionCommand::Move {
            pose,
            duration: dt,
            ramp: Ramp::Linear,
        })
    }
}
