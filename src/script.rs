//! User scripts scheduled like native strokes.
//!
//! A [`Script`] performs one unit of work per call to [`Script::step`]. The
//! [`ScriptRunner`] wraps it with the same suspend/resume contract as a
//! parametric stroke and turns any error or panic into a `script-error`
//! event.
//!
//! The built-in [`StepScriptCompiler`] understands a small line language:
//!
//! ```text
//! # comments start with '#'
//! set depth 0.8              # session global, visible to later scripts
//! move stroke=depth R1=0.3 over 0.5
//! sleep 0.25
//! loop                       # start over; without it the script completes
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};

use anyhow::Result;

use crate::behavior::TickContext;
use crate::engine::DeviceCapabilities;
use crate::events::{ControllerEvent, EventSink};
use crate::motion::{MotionCommand, Pose, Ramp, Step};
use crate::stroke::{Axis, ScriptSource};

const DEFAULT_MOVE_DURATION: f64 = 1.0;
/// Longest single move or sleep a script may ask for, in seconds.
pub const MAX_STEP_DURATION: f64 = 3600.0;

/// Values shared between script invocations within one session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScriptGlobals {
    vars: BTreeMap<String, f64>,
}

impl ScriptGlobals {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.vars.get(name).copied()
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.vars.insert(name.to_string(), value);
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }
}

/// What a script can see while it runs.
pub struct ScriptEnv<'a> {
    pub caps: &'a DeviceCapabilities,
    pub last_pose: &'a Pose,
    pub globals: &'a mut ScriptGlobals,
}

pub enum ScriptStep {
    /// Commands for this unit of work; the script resumes on a later tick.
    Yield(Vec<MotionCommand>),
    Complete,
}

pub trait Script {
    fn step(&mut self, env: &mut ScriptEnv) -> Result<ScriptStep>;
}

/// Turns stored script source into something runnable.
pub trait ScriptCompiler {
    fn compile(&self, name: &str, source: &ScriptSource) -> Result<Box<dyn Script>>;
}

pub struct ScriptRunner {
    name: String,
    script: Option<Box<dyn Script>>,
    complete: bool,
    failed: bool,
    pending: VecDeque<MotionCommand>,
    stepped: bool,
}

impl ScriptRunner {
    pub fn new(name: &str, script: Box<dyn Script>) -> Self {
        Self {
            name: name.to_string(),
            script: Some(script),
            complete: false,
            failed: false,
            pending: VecDeque::new(),
            stepped: false,
        }
    }

    /// Wrap a compile result. A compile error counts as a script failure.
    pub fn start(name: &str, compiled: Result<Box<dyn Script>>, events: &mut dyn EventSink) -> Self {
        match compiled {
            Ok(script) => Self::new(name, script),
            Err(e) => {
                let mut runner = Self {
                    name: name.to_string(),
                    script: None,
                    complete: false,
                    failed: false,
                    pending: VecDeque::new(),
                    stepped: false,
                };
                runner.fail(e.to_string(), events);
                runner
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn complete(&self) -> bool {
        self.complete
    }

    pub fn set_complete(&mut self, complete: bool) {
        self.complete = complete;
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    fn fail(&mut self, error: String, events: &mut dyn EventSink) {
        self.complete = true;
        self.pending.clear();
        if self.failed {
            return;
        }
        self.failed = true;
        log::error!("Script {} failed: {}", self.name, error);
        events.emit(ControllerEvent::ScriptError {
            name: self.name.clone(),
            error,
        });
    }

    pub fn advance(&mut self, ctx: &mut TickContext) -> Step {
        if let Some(command) = self.pending.pop_front() {
            return Step::Command(command);
        }
        if self.stepped {
            self.stepped = false;
            return if self.complete { Step::Finished } else { Step::Suspend };
        }
        if self.complete {
            return Step::Finished;
        }
        let Some(script) = self.script.as_mut() else {
            self.complete = true;
            return Step::Finished;
        };

        let mut env = ScriptEnv {
            caps: ctx.caps,
            last_pose: ctx.last_pose,
            globals: &mut *ctx.globals,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| script.step(&mut env)));
        match result {
            Ok(Ok(ScriptStep::Yield(commands))) => {
                self.pending.extend(commands);
                self.stepped = true;
                self.advance(ctx)
            }
            Ok(Ok(ScriptStep::Complete)) => {
                log::info!("Script {} complete", self.name);
                self.complete = true;
                Step::Finished
            }
            Ok(Err(e)) => {
                self.fail(format!("{:#}", e), &mut *ctx.events);
                Step::Finished
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "script panicked".to_string());
                self.fail(message, &mut *ctx.events);
                Step::Finished
            }
        }
    }
}

// ===== Step scripts =====

#[derive(Clone, Debug, PartialEq)]
enum Value {
    Number(f64),
    Var(String),
}

impl Value {
    fn parse(token: &str) -> Result<Value> {
        match token.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(Value::Number(n)),
            Ok(_) => anyhow::bail!("Not a finite number: {}", token),
            Err(_) => Ok(Value::Var(token.to_string())),
        }
    }

    fn eval(&self, globals: &ScriptGlobals) -> Result<f64> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Var(name) => globals
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown variable: {}", name)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Instruction {
    Move { targets: Vec<(Axis, Value)>, duration: Value },
    Sleep(Value),
    Set(String, Value),
    Loop,
}

fn parse_line(line: &str) -> Result<Option<Instruction>> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(None);
    }
    let parts = line.split_whitespace().collect::<Vec<&str>>();
    let instruction = match parts[0] {
        "move" => {
            let mut targets = Vec::new();
            let mut duration = Value::Number(DEFAULT_MOVE_DURATION);
            let mut args = parts[1..].iter();
            while let Some(arg) = args.next() {
                if *arg == "over" {
                    let seconds = args.next().ok_or_else(|| anyhow::anyhow!("`over` needs a duration"))?;
                    duration = Value::parse(seconds)?;
                    continue;
                }
                let (axis, value) = arg
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("Expected <axis>=<value>, got {}", arg))?;
                let axis = Axis::parse(axis).ok_or_else(|| anyhow::anyhow!("Unknown axis: {}", axis))?;
                targets.push((axis, Value::parse(value)?));
            }
            if targets.is_empty() {
                anyhow::bail!("`move` needs at least one axis");
            }
            Instruction::Move { targets, duration }
        }
        "sleep" => match parts.get(1) {
            Some(seconds) if parts.len() == 2 => Instruction::Sleep(Value::parse(seconds)?),
            _ => anyhow::bail!("Usage: sleep <seconds>"),
        },
        "set" => match (parts.get(1), parts.get(2)) {
            (Some(name), Some(value)) if parts.len() == 3 => {
                if name.parse::<f64>().is_ok() {
                    anyhow::bail!("Invalid variable name: {}", name);
                }
                Instruction::Set(name.to_string(), Value::parse(value)?)
            }
            _ => anyhow::bail!("Usage: set <name> <value>"),
        },
        "loop" if parts.len() == 1 => Instruction::Loop,
        other => anyhow::bail!("Unknown instruction: {}", other),
    };
    Ok(Some(instruction))
}

fn step_duration(value: &Value, globals: &ScriptGlobals) -> Result<f64> {
    let seconds = value.eval(globals)?;
    if !seconds.is_finite() || seconds > MAX_STEP_DURATION {
        anyhow::bail!("Duration {} is outside [0, {}]", seconds, MAX_STEP_DURATION);
    }
    Ok(seconds.max(0.0))
}

pub struct StepScript {
    instructions: Vec<Instruction>,
    pc: usize,
}

impl StepScript {
    pub fn parse(source: &str) -> Result<Self> {
        let mut instructions = Vec::new();
        for (index, line) in source.lines().enumerate() {
            let parsed = parse_line(line).map_err(|e| anyhow::anyhow!("line {}: {}", index + 1, e))?;
            instructions.extend(parsed);
        }
        if instructions.is_empty() {
            anyhow::bail!("Script has no instructions");
        }
        Ok(Self { instructions, pc: 0 })
    }
}

impl Script for StepScript {
    fn step(&mut self, env: &mut ScriptEnv) -> Result<ScriptStep> {
        let mut looped = false;
        loop {
            let Some(instruction) = self.instructions.get(self.pc) else {
                return Ok(ScriptStep::Complete);
            };
            self.pc += 1;
            match instruction {
                Instruction::Set(name, value) => {
                    let value = value.eval(env.globals)?;
                    env.globals.set(name, value);
                }
                Instruction::Loop => {
                    if looped {
                        anyhow::bail!("Loop without any motion");
                    }
                    looped = true;
                    self.pc = 0;
                }
                Instruction::Sleep(seconds) => {
                    let seconds = step_duration(seconds, env.globals)?;
                    return Ok(ScriptStep::Yield(vec![MotionCommand::Sleep { seconds }]));
                }
                Instruction::Move { targets, duration } => {
                    let mut pose = Pose::new();
                    for (axis, value) in targets {
                        if !env.caps.has(*axis) {
                            anyhow::bail!("Device has no {} axis", axis);
                        }
                        let value = value.eval(env.globals)?;
                        if !(0.0..=1.0).contains(&value) {
                            anyhow::bail!("Position {} for {} is outside [0, 1]", value, axis);
                        }
                        pose.insert(*axis, value);
                    }
                    let duration = step_duration(duration, env.globals)?;
                    return Ok(ScriptStep::Yield(vec![MotionCommand::Move {
                        pose,
                        duration,
                        ramp: Ramp::EaseInOut,
                    }]));
                }
            }
        }
    }
}

/// Compiles the built-in step language.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepScriptCompiler;

impl ScriptCompiler for StepScriptCompiler {
    fn compile(&self, name: &str, source: &ScriptSource) -> Result<Box<dyn Script>> {
        let script = StepScript::parse(&source.script)
            .map_err(|e| anyhow::anyhow!("Failed to compile script {}: {}", name, e))?;
        Ok(Box::new(script))
    }
}
