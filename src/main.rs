//! HUE 9000 panel
//!
//! Headless driver for the panel core: plays the startup sequence against an
//! in-memory panel and accepts stepping and shutdown commands on stdin.

mod config;
mod dials;
mod events;
mod flicker;
mod logging;
mod panel;
mod phases;
mod shutdown;
mod startup;
mod state;
mod terminal;
mod timeline;

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use config::Config;
use dials::DialAnimator;
use events::EventBus;
use panel::{HeadlessPanel, LoggingAudio, Panel, StoreLensEnergizer};
use phases::{startup_phases, PhaseRunner, SequenceExecutor, Services};
use shutdown::ShutdownController;
use startup::{SequencerHandle, SequencerStatus, StartupSequencer};
use state::{AppStateStore, AppStatus, Theme};
use terminal::TerminalLog;

fn main() -> Result<()> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let force_step = args.iter().any(|a| a == "--step" || a == "-s");
    let config_arg = args
        .iter()
        .position(|a| a == "--config" || a == "-c")
        .map(|i| args.get(i + 1).map(PathBuf::from).context("--config requires a path"))
        .transpose()?;

    // Load configuration first; it carries the log settings
    let config = match &config_arg {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let _log_guard = logging::init_logging(&config.logging)?;
    info!("HUE 9000 panel starting...");
    if let Ok(dir) = logging::get_log_dir() {
        info!("Logging to {:?}", dir);
    }
    info!("Configuration loaded from {:?}", config.config_path()?);

    let step_through = force_step || config.startup.step_through_mode;
    let options = config.play_options();
    let settings = config.panel_settings();

    let runtime = Arc::new(tokio::runtime::Runtime::new()?);

    // Panel core
    let bus = EventBus::new();
    let store = Arc::new(AppStateStore::new(bus.clone()));
    let panel: Arc<dyn Panel> = Arc::new(HeadlessPanel::standard());
    let terminal = TerminalLog::new();
    let _terminal_subscription = terminal.attach(&bus);
    store.set_theme(config.panel.initial_theme);

    let dials = Arc::new(DialAnimator::new(store.clone(), options));
    let services = Services::new(store.clone(), panel.clone())
        .with_audio(Arc::new(LoggingAudio))
        .with_lens(Arc::new(StoreLensEnergizer::new(
            store.clone(),
            panel.clone(),
            settings.lens_power,
        )))
        .with_dials(dials.clone())
        .with_settings(settings);
    let executor = Arc::new(SequenceExecutor::new(
        PhaseRunner::new(options),
        services,
        startup_phases(),
    ));

    let shutdown = config.shutdown.enabled.then(|| {
        let controller = ShutdownController::new(store.clone(), panel.clone(), Some(dials), options);
        let subscription = controller.attach();
        (controller, subscription)
    });

    let (sequencer, handle) = StartupSequencer::new(executor, store.clone());

    // Log sequencer status updates
    let status_stream = BroadcastStream::new(handle.subscribe());
    runtime.spawn(log_status(status_stream));

    // Spawn the sequencer on the tokio runtime
    let sequencer_runtime = runtime.clone();
    let sequencer_thread = std::thread::spawn(move || {
        sequencer_runtime.block_on(async move {
            if let Err(e) = sequencer.run().await {
                error!("Startup sequencer error: {}", e);
            }
        });
    });

    // Set up Ctrl+C handler that sends shutdown command
    let ctrl_c_handle = handle.clone();
    let ctrl_c_runtime = runtime.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        let handle = ctrl_c_handle.clone();
        ctrl_c_runtime.spawn(async move {
            let _ = handle.shutdown().await;
        });
    })?;

    if config.startup.auto_start {
        runtime.block_on(handle.start(step_through))?;
    } else {
        info!("Auto start disabled; press Enter to start");
    }

    // Read commands on a detached thread; the process exits once the sequencer stops
    let input_handle = handle.clone();
    let input_runtime = runtime.clone();
    let input_store = store.clone();
    let shutdown_controller = shutdown.as_ref().map(|(controller, _)| controller.clone());
    std::thread::spawn(move || {
        read_commands(
            input_handle,
            input_runtime,
            input_store,
            shutdown_controller,
            step_through,
        )
    });

    let _ = sequencer_thread.join();

    if store.app_status() == AppStatus::Error {
        warn!("Startup sequence ended in error");
    }
    info!(
        "Terminal printed {} line(s); shutdown complete",
        terminal.lines().len()
    );
    Ok(())
}

async fn log_status(mut stream: BroadcastStream<SequencerStatus>) {
    while let Some(status) = stream.next().await {
        match status {
            Ok(SequencerStatus::Paused { completed, .. }) => {
                info!("{} complete; press Enter for the next phase", completed)
            }
            Ok(SequencerStatus::Ready) => info!("Startup complete; 's' advances resistive shutdown"),
            Ok(SequencerStatus::Failed { phase, error }) => error!("{} failed: {}", phase, error),
            Ok(status) => info!("Sequencer status: {:?}", status),
            Err(e) => warn!("Status stream lagged: {}", e),
        }
    }
}

fn read_commands(
    handle: SequencerHandle,
    runtime: Arc<tokio::runtime::Runtime>,
    store: Arc<AppStateStore>,
    shutdown: Option<Arc<ShutdownController>>,
    step_through: bool,
) {
    // Shutdown flashes and dial moves spawn onto the current runtime
    let _runtime_guard = runtime.enter();

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let (command, argument) = line
            .trim()
            .split_once(' ')
            .map_or((line.trim(), ""), |(c, a)| (c, a.trim()));
        let result = match command {
            "" | "n" | "next" => {
                if handle.current_phase_info().phase == state::STARTUP_PHASE_PRE_START {
                    runtime.block_on(handle.start(step_through))
                } else {
                    runtime.block_on(handle.play_next_phase())
                }
            }
            "r" | "reset" => runtime.block_on(handle.reset_sequence()),
            "s" | "shutdown" => {
                match &shutdown {
                    Some(controller) => {
                        let stage = controller.advance();
                        info!("Resistive shutdown stage is now {}", stage);
                    }
                    None => info!("Resistive shutdown is disabled"),
                }
                Ok(())
            }
            "i" | "info" => {
                let info = handle.current_phase_info();
                info!("{} ({}): {}", info.current_phase_name, info.status, info.description);
                info!(
                    "Status {}, theme {}, phase number {}, shutdown stage {}, dial B {:?}, main power off {}",
                    store.app_status(),
                    store.theme(),
                    store.current_startup_phase_number(),
                    store.resistive_shutdown_stage(),
                    store.dial_b_interaction_state(),
                    if store.is_main_power_off_button_disabled() { "disabled" } else { "enabled" },
                );
                Ok(())
            }
            "t" | "theme" => {
                match argument.parse::<Theme>() {
                    Ok(theme) => store.set_theme(theme),
                    Err(e) => warn!("{}", e),
                }
                Ok(())
            }
            "q" | "quit" => {
                let _ = runtime.block_on(handle.shutdown());
                break;
            }
            other => {
                warn!("Unknown command '{}'", other);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("Command failed: {}", e);
            break;
        }
    }
}

fn print_help() {
    println!("HUE 9000 - Headless panel core");
    println!();
    println!("USAGE:");
    println!("    hue9000 [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help            Print this help message");
    println!("    -s, --step            Pause after every startup phase");
    println!("    -c, --config <PATH>   Use the config file at PATH");
    println!();
    println!("COMMANDS (stdin):");
    println!("    <Enter>, next         Start the sequence or play the next phase");
    println!("    r, reset              Reset the startup sequence");
    println!("    s, shutdown           Advance the resistive shutdown stage");
    println!("    i, info               Print the current phase and panel status");
    println!("    t, theme <NAME>       Switch to the dim, dark or light theme");
    println!("    q, quit               Quit");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG              Set log level (e.g., debug, info, warn)");
    println!("    HUE9000_LOG_PATH      Override the log directory");
}
