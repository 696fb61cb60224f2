use rand::rngs::StdRng;

use crate::engine::DeviceCapabilities;
use crate::events::EventSink;
use crate::motion::{ParametricStroke, Pose, Step, TransitionBlend};
use crate::params::{BpmSliderState, Parameters};
use crate::script::{ScriptGlobals, ScriptRunner};

/// Everything a behavior may look at or touch while advancing. Built by the
/// controller from the snapshot taken at the start of the tick.
pub struct TickContext<'a> {
    pub params: &'a Parameters,
    pub slider: &'a BpmSliderState,
    /// One-shot tempo update not yet applied by a bpm provider.
    pub bpm_update_pending: &'a mut bool,
    pub free_play: bool,
    pub now: f64,
    pub caps: &'a DeviceCapabilities,
    pub last_pose: &'a Pose,
    pub rng: &'a mut StdRng,
    pub events: &'a mut dyn EventSink,
    pub globals: &'a mut ScriptGlobals,
}

/// The thing currently driving the device.
pub enum Behavior {
    Stroke(ParametricStroke),
    Script(ScriptRunner),
    Transition(TransitionBlend),
}

impl Behavior {
    pub fn advance(&mut self, ctx: &mut TickContext) -> Step {
        match self {
            Behavior::Stroke(stroke) => stroke.advance(ctx),
            Behavior::Script(runner) => runner.advance(ctx),
            Behavior::Transition(blend) => blend.advance(ctx),
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self, Behavior::Script(_))
    }

    pub fn script_complete(&self) -> bool {
        match self {
            Behavior::Script(runner) => runner.complete(),
            _ => false,
        }
    }
}
