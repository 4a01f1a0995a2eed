//! Zonekeeper Daemon
//!
//! Main daemon process for the Zonekeeper window-placement engine.
//!
//! Responsibilities:
//! - Load and validate configuration
//! - Start the window system backend and the placement engine
//! - Handle IPC commands from the CLI
//! - Report engine notifications in the log
//!
//! The daemon runs on Windows only. Elsewhere it exits after loading the
//! configuration.

#![cfg_attr(not(windows), allow(dead_code, unused_imports))]

mod config;

use anyhow::{Context, Result};
use config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zonekeeper_core::{Candidate, Profile, Rect, Region};
use zonekeeper_engine::{
    capture_topology, spawn_engine, EngineError, EngineHandle, EngineStatus, EngineTiming,
    FocusOutcome, PlacementOutcome, UiEvent,
};
use zonekeeper_ipc::{
    decode_line, encode_line, IpcCommand, IpcRect, IpcResponse, ProfileInfo, RegionInfo,
    MAX_IPC_MESSAGE_SIZE,
};
use zonekeeper_platform::WindowSystem;

/// Events that the daemon event loop processes.
enum DaemonEvent {
    /// An IPC command from a CLI client.
    IpcCommand {
        cmd: IpcCommand,
        responder: oneshot::Sender<IpcResponse>,
    },
    /// A notification from the engine.
    Ui(UiEvent),
    /// Shutdown signal.
    Shutdown,
}

/// IPC read timeout - clients must send within this period.
const IPC_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Sent when even an error response cannot be serialized.
const SERIALIZATION_FAILURE: &str =
    "{\"status\":\"error\",\"message\":\"Internal serialization error\"}\n";

fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO, // default fallback for invalid values
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(parse_log_level(level)).into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(windows)]
fn create_backend() -> Result<Arc<dyn WindowSystem>> {
    let ws = zonekeeper_platform::win32::Win32WindowSystem::new()
        .context("Failed to start the Win32 window system")?;
    Ok(Arc::new(ws))
}

// ============================================================================
// Engine <-> IPC translation
// ============================================================================

fn ipc_rect(rect: Rect) -> IpcRect {
    IpcRect {
        x: rect.x,
        y: rect.y,
        width: rect.width,
        height: rect.height,
    }
}

fn profile_info(profile: &Profile) -> ProfileInfo {
    ProfileInfo {
        id: profile.id,
        name: profile.name.clone(),
        is_active: profile.is_active,
        topology: profile.display_topology.fingerprint(),
        region_count: profile.regions.len(),
    }
}

fn region_info(region: &Region) -> RegionInfo {
    RegionInfo {
        id: region.id,
        name: region.name.clone(),
        display_id: region.display_id,
        frame: ipc_rect(region.frame),
        padding: region.padding,
        assigned_apps: region.assigned_apps.clone(),
        shortcut: region.keyboard_shortcut.map(|s| s.to_string()),
        is_focus_region: region.is_focus_region,
    }
}

fn placement_response(outcome: PlacementOutcome) -> IpcResponse {
    match outcome {
        PlacementOutcome::Skipped(kind) => {
            debug!("Placement skipped for {:?} window", kind);
            IpcResponse::Placement {
                applied: false,
                frame: None,
            }
        }
        PlacementOutcome::Applied { actual, .. } => IpcResponse::Placement {
            applied: true,
            frame: actual.map(ipc_rect),
        },
    }
}

fn focus_response(outcome: FocusOutcome) -> IpcResponse {
    match outcome {
        FocusOutcome::Focused { window_id, frame } => IpcResponse::Focus {
            window_id,
            pinned: true,
            frame: Some(ipc_rect(frame)),
        },
        FocusOutcome::Unfocused { window_id } => IpcResponse::Focus {
            window_id,
            pinned: false,
            frame: None,
        },
    }
}

fn status_response(status: EngineStatus) -> IpcResponse {
    IpcResponse::Status {
        active_profile: status.active_profile.map(|(_, name)| name),
        profile_count: status.profile_count,
        topology: status.topology_fingerprint,
        observed_processes: status.observed_processes,
        positioned_windows: status.positioned_windows,
        focused_window: status.focused_window,
        switcher_region: status.switcher_region,
        registered_shortcuts: status.registered_shortcuts,
        window_control: status.permissions.window_control,
        key_interception: status.permissions.key_interception,
    }
}

/// Execute one IPC command against the engine.
async fn handle_command(engine: &EngineHandle, cmd: IpcCommand) -> IpcResponse {
    let result: Result<IpcResponse, EngineError> = match cmd {
        IpcCommand::GetActiveProfile => engine.active_profile().await.map(|p| IpcResponse::Profile {
            profile: p.as_ref().map(profile_info),
        }),
        IpcCommand::GetActiveRegions => engine.active_regions().await.map(|regions| IpcResponse::Regions {
            regions: regions.iter().map(region_info).collect(),
        }),
        IpcCommand::ListProfiles => engine.profiles().await.map(|profiles| IpcResponse::Profiles {
            profiles: profiles.iter().map(profile_info).collect(),
        }),
        IpcCommand::SetActiveProfile { id } => engine.set_active_profile(id).await.map(|p| IpcResponse::Profile {
            profile: Some(profile_info(&p)),
        }),
        IpcCommand::AutoSelectProfile => engine.auto_select_profile().await.map(|p| IpcResponse::Profile {
            profile: p.as_ref().map(profile_info),
        }),
        IpcCommand::EnforceRegion { region_id, app_id } => engine
            .enforce_region(region_id, app_id)
            .await
            .map(placement_response),
        IpcCommand::EnforceAllRegions => engine
            .enforce_all_regions(None)
            .await
            .map(|count| IpcResponse::Enforced { count }),
        IpcCommand::UpdateKeyboardShortcuts => engine
            .update_keyboard_shortcuts()
            .await
            .map(|count| IpcResponse::Shortcuts { count }),
        IpcCommand::CycleFocus { region_id, commit } => engine
            .cycle_focus(region_id, commit)
            .await
            .map(|()| IpcResponse::Ok),
        IpcCommand::FocusWindow { region_id } => engine.focus_window(region_id).await.map(focus_response),
        IpcCommand::UnfocusWindow => engine
            .unfocus_window()
            .await
            .map(|restored| IpcResponse::Unfocused { restored }),
        IpcCommand::Status => engine.status().await.map(status_response),
        IpcCommand::Reload => return reload_config(engine).await,
        // The client handler signals shutdown once the reply is written.
        IpcCommand::Stop => Ok(IpcResponse::Ok),
    };

    result.unwrap_or_else(|e| IpcResponse::error(e.to_string()))
}

/// Re-read the configuration file and hand it to the engine.
async fn reload_config(engine: &EngineHandle) -> IpcResponse {
    match Config::load() {
        Ok(config) => apply_config(engine, config).await,
        Err(e) => {
            warn!("Config reload failed: {:#}", e);
            IpcResponse::error(format!("{:#}", e))
        }
    }
}

async fn apply_config(engine: &EngineHandle, mut config: Config) -> IpcResponse {
    for w in config.validate() {
        warn!("Config: {} - {}", w.field, w.message);
    }
    match engine
        .reload(config.profiles, config.settings.engine_settings())
        .await
    {
        Ok(active) => {
            info!(
                "Configuration reloaded, active profile: {}",
                active.as_ref().map_or("none", |p| p.name.as_str())
            );
            IpcResponse::Profile {
                profile: active.as_ref().map(profile_info),
            }
        }
        Err(e) => IpcResponse::error(e.to_string()),
    }
}

/// One-line rendering of the switcher, selection in brackets.
fn switcher_line(candidates: &[Candidate], selected_index: usize) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == selected_index {
                format!("[{}]", c.display_name)
            } else {
                c.display_name.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_ui_event(event: &UiEvent) {
    match event {
        UiEvent::ProfileActivated { id, name } => info!("Profile '{}' ({}) is active", name, id),
        UiEvent::SwitcherShown {
            region_id,
            candidates,
            selected_index,
        } => info!(
            "Switcher for region {}: {}",
            region_id,
            switcher_line(candidates, *selected_index)
        ),
        UiEvent::SwitcherHidden => debug!("Switcher hidden"),
        UiEvent::FocusPinned { window_id, frame } => {
            info!("Window {} pinned at {:?}", window_id, frame)
        }
        UiEvent::FocusReleased { window_id, restored } => {
            if *restored {
                info!("Window {} restored", window_id);
            } else {
                info!("Window {} released without restoring", window_id);
            }
        }
        UiEvent::PermissionUnavailable(capability) => warn!(
            "Permission for {} is unavailable; grant it and restart the daemon",
            capability
        ),
    }
}

// ============================================================================
// IPC server
// ============================================================================

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &IpcResponse) -> Result<()> {
    let line = encode_line(response).unwrap_or_else(|e| {
        warn!("Failed to serialize IPC response: {}", e);
        SERIALIZATION_FAILURE.to_string()
    });
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Handle a single client connection.
async fn handle_client<S>(stream: S, event_tx: mpsc::Sender<DaemonEvent>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let limited_reader = reader.take(MAX_IPC_MESSAGE_SIZE as u64);
    let mut reader = BufReader::new(limited_reader);
    let mut line = String::new();

    // Read command (single line of JSON) with timeout and size bound
    let read_result = tokio::time::timeout(IPC_READ_TIMEOUT, reader.read_line(&mut line)).await;
    let bytes_read = match read_result {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            // Timeout: client did not send in time, silently close
            return Ok(());
        }
    };
    if bytes_read == 0 {
        return Ok(()); // Client disconnected
    }

    let cmd: IpcCommand = match decode_line(&line) {
        Ok(cmd) => cmd,
        Err(e) => {
            write_response(&mut writer, &IpcResponse::error(format!("Invalid command: {}", e))).await?;
            return Ok(());
        }
    };
    debug!("Received command: {:?}", cmd);

    let is_stop = matches!(cmd, IpcCommand::Stop);
    let (resp_tx, resp_rx) = oneshot::channel();

    if event_tx
        .send(DaemonEvent::IpcCommand {
            cmd,
            responder: resp_tx,
        })
        .await
        .is_err()
    {
        write_response(&mut writer, &IpcResponse::error("Daemon is shutting down")).await?;
        return Ok(());
    }

    let response = match resp_rx.await {
        Ok(resp) => resp,
        Err(_) => IpcResponse::error("Failed to get response from daemon"),
    };
    write_response(&mut writer, &response).await?;

    if is_stop {
        let _ = event_tx.send(DaemonEvent::Shutdown).await;
    }

    Ok(())
}

/// Run the IPC server, accepting connections and dispatching commands.
#[cfg(windows)]
async fn run_ipc_server(event_tx: mpsc::Sender<DaemonEvent>) {
    use tokio::net::windows::named_pipe::{PipeMode, ServerOptions};
    use zonekeeper_ipc::PIPE_NAME;

    let mut is_first_instance = true;

    loop {
        let server = match ServerOptions::new()
            .first_pipe_instance(is_first_instance)
            .pipe_mode(PipeMode::Byte)
            .create(PIPE_NAME)
        {
            Ok(s) => {
                is_first_instance = false;
                s
            }
            Err(e) => {
                error!("Failed to create named pipe server: {}", e);
                if is_first_instance {
                    error!("Is another zonekeeper daemon already running?");
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        debug!("Waiting for client connection on {}", PIPE_NAME);

        if let Err(e) = server.connect().await {
            error!("Failed to accept client connection: {}", e);
            continue;
        }

        debug!("Client connected");

        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(server, event_tx).await {
                warn!("Client handler error: {}", e);
            }
        });
    }
}

/// Check if another daemon instance is already running by probing the named pipe.
#[cfg(windows)]
async fn check_already_running() -> bool {
    tokio::net::windows::named_pipe::ClientOptions::new()
        .open(zonekeeper_ipc::PIPE_NAME)
        .is_ok()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (needed for log level)
    let mut config = Config::load().unwrap_or_else(|e| {
        // Can't use tracing yet, fall back to eprintln
        eprintln!("Failed to load configuration: {:#}. Using defaults.", e);
        Config::default()
    });

    init_logging(&config.settings.log_level)?;

    let config_warnings = config.validate();
    for w in &config_warnings {
        warn!("Config: {} - {}", w.field, w.message);
    }

    info!("Zonekeeper daemon starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    run(config).await
}

#[cfg(not(windows))]
async fn run(_config: Config) -> Result<()> {
    anyhow::bail!("The zonekeeper daemon needs the Win32 window system")
}

#[cfg(windows)]
async fn run(config: Config) -> Result<()> {
    if check_already_running().await {
        error!(
            "Another zonekeeper daemon is already running ({} is active)",
            zonekeeper_ipc::PIPE_NAME
        );
        return Ok(());
    }

    info!(
        "Configuration loaded: {} profile(s), auto_switch_profiles={}, reposition_on_launch={}, log_level={}",
        config.profiles.len(),
        config.settings.auto_switch_profiles,
        config.settings.reposition_on_launch,
        config.settings.log_level
    );

    let ws = create_backend()?;

    match capture_topology(ws.as_ref()) {
        Ok(topology) => {
            info!("Detected {} display(s): {}", topology.displays.len(), topology.fingerprint());
            for d in &topology.displays {
                info!(
                    "  Display {}: {}x{} at {},{}{}",
                    d.id,
                    d.width,
                    d.height,
                    d.position.x,
                    d.position.y,
                    if d.is_built_in { " [BUILT-IN]" } else { "" }
                );
            }
        }
        Err(e) => warn!("Failed to detect displays: {}", e),
    }

    let (engine, mut ui_rx, engine_task) = spawn_engine(
        ws.clone(),
        config.profiles.clone(),
        config.settings.engine_settings(),
        EngineTiming::default(),
    );

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(100);

    // Forward engine notifications into the daemon loop
    {
        let ui_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = ui_rx.recv().await {
                if ui_tx.send(DaemonEvent::Ui(event)).await.is_err() {
                    break; // Channel closed, daemon shutting down
                }
            }
        });
    }

    let ipc_tx = event_tx.clone();
    tokio::spawn(async move {
        run_ipc_server(ipc_tx).await;
    });

    info!("IPC server listening on {}", zonekeeper_ipc::PIPE_NAME);

    // Install Ctrl+C handler so terminal kill triggers graceful shutdown
    {
        let shutdown_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Ctrl+C received, initiating shutdown...");
                let _ = shutdown_tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    info!("Ready. Use zonekeeper-cli to send commands.");

    while let Some(event) = event_rx.recv().await {
        match event {
            DaemonEvent::IpcCommand { cmd, responder } => {
                let response = handle_command(&engine, cmd).await;
                if responder.send(response).is_err() {
                    debug!("Client disconnected before receiving IPC response");
                }
            }
            DaemonEvent::Ui(ui_event) => log_ui_event(&ui_event),
            DaemonEvent::Shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    if let Err(e) = engine.shutdown().await {
        warn!("Engine already stopped: {}", e);
    }
    if let Err(e) = engine_task.await {
        warn!("Engine task ended abnormally: {}", e);
    }

    info!("Zonekeeper daemon shutting down.");
    Ok(())
}
