use crossbeam_channel::Sender;

use crate::stroke::StrokeRef;

/// Lifecycle notifications for the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub enum ControllerEvent {
    /// A blend or start move toward a new pattern began.
    TransitionStart { duration: f64, target_bpm: f64 },
    /// The transition finished. `stroke` is the pattern as the user picked it.
    TransitionEnd { stroke: StrokeRef, bpm: f64 },
    UpdateCurrentBehavior { name: String },
    ToggleBpmEnabled(bool),
    UpdateBpm(f64),
    ScriptError { name: String, error: String },
    SessionStopped,
}

/// Receiver of controller events. Fire and forget.
pub trait EventSink {
    fn emit(&mut self, event: ControllerEvent);
}

impl EventSink for Sender<ControllerEvent> {
    fn emit(&mut self, event: ControllerEvent) {
        if let Err(e) = self.send(event) {
            log::debug!("Event listener gone, dropping {:?}", e.into_inner());
        }
    }
}

impl EventSink for Vec<ControllerEvent> {
    fn emit(&mut self, event: ControllerEvent) {
        self.push(event);
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F: FnMut(ControllerEvent)> EventSink for FnSink<F> {
    fn emit(&mut self, event: ControllerEvent) {
        (self.0)(event)
    }
}
