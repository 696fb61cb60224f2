//! Motion behavior controller for stroker devices.
//!
//! Picks what the device should be doing once per control tick (a manual
//! stroke, a random free-play stroke, a user script or nothing) and yields the
//! motion commands that get it there, blending smoothly between patterns.

pub mod behavior;
pub mod bpm;
pub mod command;
pub mod context;
pub mod controller;
pub mod engine;
pub mod events;
pub mod motion;
pub mod params;
pub mod resolver;
pub mod script;
pub mod storage;
pub mod stroke;
pub mod timer;

pub use behavior::Behavior;
pub use context::ControllerHandle;
pub use controller::{ControllerState, MotionBehaviorController, Tick};
pub use engine::{Clock, DeviceCapabilities, MotionEngine};
pub use events::{ControllerEvent, EventSink};
pub use motion::MotionCommand;
pub use params::{BpmSliderState, Parameters, Range};
pub use stroke::{BehaviorLibrary, StrokeRef};
