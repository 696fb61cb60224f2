use std::sync::Arc;
use std::time;

use crossbeam_channel::Receiver;

use ossm_stroker::command::handle_stdin_command;
use ossm_stroker::context::ControllerHandle;
use ossm_stroker::controller::MotionBehaviorController;
use ossm_stroker::engine::{DeviceCapabilities, MotionEngine, SimulatedEngine, SystemClock};
use ossm_stroker::events::ControllerEvent;
use ossm_stroker::params::Parameters;
use ossm_stroker::storage::{self, FileStorage};

/// Directory for saved parameters and custom behaviors.
const DATA_DIR_ENV: &str = "OSSM_STROKER_DATA";
const DEFAULT_DATA_DIR: &str = "ossm-stroker-data";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("ossm-stroker starting, type `help` for commands");

    if let Err(e) = run_app() {
        log::error!("App error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_app() -> anyhow::Result<()> {
    let data_dir = std::env::var(DATA_DIR_ENV).unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());
    let storage = Arc::new(FileStorage::new(&data_dir));
    let library = storage::load_or_builtin(&*storage);

    let params = match storage.get_parameters() {
        Ok(params) => {
            log::info!("Loaded parameters from {}", data_dir);
            params
        }
        Err(_) => {
            log::info!("No parameters found in {}, using default", data_dir);
            let params = Parameters::default();
            storage.set_parameters(&params)?;
            params
        }
    };

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || log_events(events_rx));

    let pool: Vec<String> = library.names().map(str::to_string).collect();
    let mut controller = MotionBehaviorController::new(library, Box::new(SystemClock::new()), Box::new(events_tx));
    let handle = controller.handle();
    handle.set_parameters(params);
    handle.set_enabled_strokes(pool);

    // setup stdin command handler
    {
        let handle = handle.clone();
        let storage = storage.clone();
        std::thread::spawn(move || handle_stdin_command(handle, &storage));
    }

    let mut engine = SimulatedEngine::new(DeviceCapabilities::default(), true);
    run_controller(&mut controller, &mut engine, &handle, &storage)
}

fn run_controller(
    controller: &mut MotionBehaviorController,
    engine: &mut dyn MotionEngine,
    handle: &ControllerHandle,
    storage: &FileStorage,
) -> ! {
    let mut last_params_check = time::Instant::now();
    let mut last_saved_params_version = handle.params_version();
    let mut update_counter = 0;
    let mut last_update_counter_reset = time::Instant::now();

    loop {
        if last_params_check.elapsed() > time::Duration::from_millis(200) {
            last_params_check = time::Instant::now();
            let current_version = handle.params_version();
            if current_version != last_saved_params_version {
                log::info!("Parameters updated, saving");
                if let Err(e) = storage.set_parameters(&handle.parameters()) {
                    log::error!("Failed to save parameters: {:#}", e);
                } else {
                    last_saved_params_version = current_version;
                }
            }
        }

        let caps = engine.capabilities();
        for command in controller.tick(&caps) {
            if let Err(e) = engine.execute(&command) {
                log::error!("Failed to execute {:?}: {:#}", command, e);
            }
        }

        update_counter += 1;
        if last_update_counter_reset.elapsed() > time::Duration::from_secs(60) {
            log::info!("Controller ticks per second: {}", update_counter as f64 / 60.0);
            last_update_counter_reset = time::Instant::now();
            update_counter = 0;
        }
    }
}

fn log_events(events: Receiver<ControllerEvent>) {
    for event in events {
        match event {
            ControllerEvent::TransitionStart { duration, target_bpm } => {
                log::info!("Transition started: {:.1}s toward {:.0} bpm", duration, target_bpm)
            }
            ControllerEvent::TransitionEnd { stroke, bpm } => {
                log::info!("Transition ended: {} at {:.0} bpm", stroke.name(), bpm)
            }
            ControllerEvent::UpdateCurrentBehavior { name } => log::info!("Current behavior: {}", name),
            ControllerEvent::ToggleBpmEnabled(enabled) => log::info!("BPM control enabled: {}", enabled),
            ControllerEvent::UpdateBpm(bpm) => log::debug!("BPM: {:.1}", bpm),
            ControllerEvent::ScriptError { name, error } => log::error!("Script {} failed: {}", name, error),
            ControllerEvent::SessionStopped => log::info!("Session stopped"),
        }
    }
}
