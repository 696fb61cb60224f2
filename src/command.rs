use std::io::{self, BufRead};

use anyhow::Result;

use crate::context::ControllerHandle;
use crate::storage::FileStorage;

/// Read commands from stdin until it closes.
pub fn handle_stdin_command(handle: ControllerHandle, storage: &FileStorage) {
    let stdin = io::stdin();
    loop {
        let mut cmdline = String::new();
        match stdin.lock().read_line(&mut cmdline) {
            Ok(0) => {
                log::info!("stdin closed, no more commands");
                return;
            }
            Ok(_) => {}
            Err(e) => match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    continue;
                }
                _ => {
                    log::info!("handle_stdin_command: read from stdin failed: {e}");
                    continue;
                }
            },
        }

        let cmdline = cmdline.trim();
        if cmdline.is_empty() {
            continue;
        }
        log::info!("Command: {}", cmdline);
        if let Err(e) = execute(cmdline, &handle, storage) {
            log::error!("{:#}", e);
        }
    }
}

/// Parse and apply one command line.
pub fn execute(cmdline: &str, handle: &ControllerHandle, storage: &FileStorage) -> Result<()> {
    let parts = cmdline.trim().splitn(2, ' ').collect::<Vec<&str>>();
    let command = parts[0];
    let args = if parts.len() > 1 { parts[1].trim() } else { "" };

    match command {
        "stroke" => {
            if args.is_empty() {
                anyhow::bail!("Usage: stroke <name>");
            }
            handle.request_manual_stroke(args);
            log::info!("Requested stroke {}", args);
        }
        "free_play" => {
            handle.enable_free_play();
        }
        "stop" => {
            handle.stop();
        }
        "bpm" => match args.parse::<f64>() {
            Ok(bpm) => {
                handle.set_bpm(bpm);
                log::info!("BPM set to {}", handle.slider().value);
            }
            Err(_) => anyhow::bail!("Invalid BPM value: {}", args),
        },
        "drag" => match args {
            "start" => handle.set_dragging(true),
            "end" => handle.set_dragging(false),
            _ => anyhow::bail!("Usage: drag start|end"),
        },
        "set" => {
            let (key, value) = args
                .split_once(' ')
                .ok_or_else(|| anyhow::anyhow!("Usage: set <key> <json>"))?;
            let value: serde_json::Value = serde_json::from_str(value.trim())
                .map_err(|e| anyhow::anyhow!("Invalid JSON for {}: {}", key, e))?;
            handle.set_parameter(key, value)?;
            log::info!("Parameter {} updated", key);
        }
        "params" => {
            let json = serde_json::to_string_pretty(&handle.parameters())?;
            println!("{}", json);
        }
        "enable" => {
            let names = args.split_whitespace().map(str::to_string).collect::<Vec<String>>();
            log::info!("Free play pool: {:?}", names);
            handle.set_enabled_strokes(names);
        }
        "save" => {
            storage.set_parameters(&handle.parameters())?;
            log::info!("Parameters saved");
        }
        "help" => {
            log::info!("Available commands:");
            log::info!("  help                 - Show this help message");
            log::info!("  stroke <name>        - Switch to a stroke or script");
            log::info!("  free_play            - Pick strokes from the enabled pool automatically");
            log::info!("  stop                 - Stop the session");
            log::info!("  bpm <bpm>            - Set tempo (1 to 500)");
            log::info!("  drag start|end       - Simulate holding the tempo slider");
            log::info!("  set <key> <json>     - Set a parameter, e.g. set bpm [30, 90]");
            log::info!("  params               - Print parameters in JSON format");
            log::info!("  enable <names..>     - Set the strokes free play chooses from");
            log::info!("  save                 - Persist parameters");
        }
        _ => anyhow::bail!("Unknown command: {}", command),
    }
    Ok(())
}
