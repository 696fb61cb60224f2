use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time;

use anyhow::Result;

use crate::motion::{MotionCommand, Pose};
use crate::stroke::Axis;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisInfo {
    pub axis: Axis,
    /// Position the axis rests at when a pattern does not drive it.
    pub default_position: f64,
}

/// Axes the connected device can drive.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceCapabilities {
    pub axes: Vec<AxisInfo>,
}

impl DeviceCapabilities {
    pub fn new(axes: Vec<AxisInfo>) -> Self {
        Self { axes }
    }

    /// Single linear axis, as on an OSSM.
    pub fn stroke_only() -> Self {
        Self::new(vec![AxisInfo {
            axis: Axis::L0,
            default_position: 0.5,
        }])
    }

    pub fn has(&self, axis: Axis) -> bool {
        self.axes.iter().any(|info| info.axis == axis)
    }
}

impl Default for DeviceCapabilities {
    /// Six-axis OSR layout, everything centered.
    fn default() -> Self {
        Self::new(
            Axis::ALL
                .into_iter()
                .map(|axis| AxisInfo {
                    axis,
                    default_position: 0.5,
                })
                .collect(),
        )
    }
}

/// The motion execution engine: turns commands into axis movement.
pub trait MotionEngine {
    fn capabilities(&self) -> DeviceCapabilities;
    fn execute(&mut self, command: &MotionCommand) -> Result<()>;
}

/// Stand-in engine that tracks where each axis would be. In realtime mode it
/// also waits out every command, like a real device would.
pub struct SimulatedEngine {
    caps: DeviceCapabilities,
    position: Pose,
    elapsed: f64,
    realtime: bool,
}

impl SimulatedEngine {
    pub fn new(caps: DeviceCapabilities, realtime: bool) -> Self {
        let position = caps.axes.iter().map(|info| (info.axis, info.default_position)).collect();
        Self {
            caps,
            position,
            elapsed: 0.0,
            realtime,
        }
    }

    pub fn position(&self) -> &Pose {
        &self.position
    }

    /// Motion time executed so far, in seconds.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }
}

impl MotionEngine for SimulatedEngine {
    fn capabilities(&self) -> DeviceCapabilities {
        self.caps.clone()
    }

    fn execute(&mut self, command: &MotionCommand) -> Result<()> {
        let seconds = command.duration().max(0.0);
        let wait = time::Duration::try_from_secs_f64(seconds)
            .map_err(|e| anyhow::anyhow!("Invalid duration {}: {}", seconds, e))?;
        if let MotionCommand::Move { pose, duration, .. } = command {
            for (axis, value) in pose {
                if !self.caps.has(*axis) {
                    anyhow::bail!("Device has no {} axis", axis);
                }
                if !(0.0..=1.0).contains(value) {
                    anyhow::bail!("Position {} for {} is outside [0, 1]", value, axis);
                }
            }
            self.position.extend(pose.iter().map(|(axis, value)| (*axis, *value)));
            log::trace!("Move over {:.3}s: {:?}", duration, pose);
        }
        self.elapsed += seconds;
        if self.realtime {
            std::thread::sleep(wait);
        }
        Ok(())
    }
}

/// Seconds since an arbitrary origin.
pub trait Clock {
    fn now(&self) -> f64;
}

pub struct SystemClock {
    t0: time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            t0: time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.t0.elapsed().as_secs_f64()
    }
}

/// Clock advanced by hand. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(start.to_bits())),
        }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
