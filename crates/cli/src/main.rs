//! Zonekeeper CLI
//!
//! Command-line interface for controlling the Zonekeeper daemon.
//!
//! Each invocation sends one command over the daemon's named pipe and
//! prints the reply.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use zonekeeper_ipc::{
    decode_line, encode_line, IpcCommand, IpcRect, IpcResponse, ProfileInfo, RegionInfo,
    MAX_IPC_MESSAGE_SIZE,
};

/// How long to wait for the daemon's reply.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "zonekeeper-cli")]
#[command(author, version, about = "Control the Zonekeeper window-placement daemon")]
struct Cli {
    /// Print the raw JSON response
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Profile commands
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// List the regions of the active profile
    Regions,
    /// Move windows into their regions
    Enforce {
        #[command(subcommand)]
        target: EnforceTarget,
    },
    /// Rebuild the global shortcut table
    UpdateShortcuts,
    /// Step the app switcher of a region
    Cycle {
        /// Region id
        region: u64,
        /// Activate the selection immediately
        #[arg(short, long)]
        commit: bool,
    },
    /// Pin the foreground window into a focus region, or release it
    Focus {
        /// Region id (default: the active profile's focus region)
        #[arg(short, long)]
        region: Option<u64>,
    },
    /// Restore the pinned window
    Unfocus,
    /// Show engine status
    Status,
    /// Reload configuration
    Reload,
    /// Stop the daemon
    Stop,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Show the active profile
    Active,
    /// List all profiles
    List,
    /// Activate a profile by id
    Set {
        /// Profile id
        id: u64,
    },
    /// Activate the profile matching the connected displays
    Auto,
}

#[derive(Subcommand)]
enum EnforceTarget {
    /// Move one application's window into a region
    Region {
        /// Region id
        region: u64,
        /// Application id (executable name, e.g. code.exe)
        app: String,
    },
    /// Place every running assigned application
    All,
}

fn to_ipc_command(command: Commands) -> IpcCommand {
    match command {
        Commands::Profile { action } => match action {
            ProfileAction::Active => IpcCommand::GetActiveProfile,
            ProfileAction::List => IpcCommand::ListProfiles,
            ProfileAction::Set { id } => IpcCommand::SetActiveProfile { id },
            ProfileAction::Auto => IpcCommand::AutoSelectProfile,
        },
        Commands::Regions => IpcCommand::GetActiveRegions,
        Commands::Enforce { target } => match target {
            EnforceTarget::Region { region, app } => IpcCommand::EnforceRegion {
                region_id: region,
                app_id: app,
            },
            EnforceTarget::All => IpcCommand::EnforceAllRegions,
        },
        Commands::UpdateShortcuts => IpcCommand::UpdateKeyboardShortcuts,
        Commands::Cycle { region, commit } => IpcCommand::CycleFocus {
            region_id: region,
            commit,
        },
        Commands::Focus { region } => IpcCommand::FocusWindow { region_id: region },
        Commands::Unfocus => IpcCommand::UnfocusWindow,
        Commands::Status => IpcCommand::Status,
        Commands::Reload => IpcCommand::Reload,
        Commands::Stop => IpcCommand::Stop,
    }
}

fn format_rect(rect: &IpcRect) -> String {
    format!("{}x{} at {},{}", rect.width, rect.height, rect.x, rect.y)
}

fn format_profile(profile: &ProfileInfo) -> String {
    format!(
        "{}{} {} ({}, {} region{})",
        if profile.is_active { "* " } else { "  " },
        profile.id,
        profile.name,
        profile.topology,
        profile.region_count,
        if profile.region_count == 1 { "" } else { "s" }
    )
}

fn format_region(region: &RegionInfo) -> String {
    let mut line = format!(
        "{} {} on display {}: {}",
        region.id,
        region.name,
        region.display_id,
        format_rect(&region.frame)
    );
    if region.padding > 0 {
        line.push_str(&format!(" padding {}", region.padding));
    }
    if region.is_focus_region {
        line.push_str(" [focus]");
    }
    if let Some(shortcut) = &region.shortcut {
        line.push_str(&format!(" [{}]", shortcut));
    }
    if !region.assigned_apps.is_empty() {
        line.push_str(&format!("\n    apps: {}", region.assigned_apps.join(", ")));
    }
    line
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Human-readable rendering of a response.
fn format_response(response: &IpcResponse) -> String {
    match response {
        IpcResponse::Ok => "OK".to_string(),
        IpcResponse::Error { message } => format!("Error: {}", message),
        IpcResponse::Profile { profile: None } => "No active profile".to_string(),
        IpcResponse::Profile { profile: Some(p) } => format_profile(p).trim_start().to_string(),
        IpcResponse::Profiles { profiles } if profiles.is_empty() => "No profiles configured".to_string(),
        IpcResponse::Profiles { profiles } => profiles.iter().map(format_profile).collect::<Vec<_>>().join("\n"),
        IpcResponse::Regions { regions } if regions.is_empty() => "No regions".to_string(),
        IpcResponse::Regions { regions } => regions.iter().map(format_region).collect::<Vec<_>>().join("\n"),
        IpcResponse::Placement { applied: false, .. } => "Skipped: window is not placeable".to_string(),
        IpcResponse::Placement { frame: Some(f), .. } => format!("Placed: {}", format_rect(f)),
        IpcResponse::Placement { frame: None, .. } => "Placed".to_string(),
        IpcResponse::Enforced { count } => format!("Placed {} window(s)", count),
        IpcResponse::Shortcuts { count } => format!("Registered {} shortcut(s)", count),
        IpcResponse::Focus {
            window_id,
            pinned: true,
            frame,
        } => match frame {
            Some(f) => format!("Pinned window {}: {}", window_id, format_rect(f)),
            None => format!("Pinned window {}", window_id),
        },
        IpcResponse::Focus { window_id, .. } => format!("Released window {}", window_id),
        IpcResponse::Unfocused { restored: true } => "Window restored".to_string(),
        IpcResponse::Unfocused { restored: false } => "No window was pinned".to_string(),
        IpcResponse::Status {
            active_profile,
            profile_count,
            topology,
            observed_processes,
            positioned_windows,
            focused_window,
            switcher_region,
            registered_shortcuts,
            window_control,
            key_interception,
        } => {
            let mut lines = vec![
                format!(
                    "Active profile:   {}",
                    active_profile.as_deref().unwrap_or("none")
                ),
                format!("Profiles:         {}", profile_count),
                format!("Displays:         {}", topology.as_deref().unwrap_or("unknown")),
                format!("Watched apps:     {}", observed_processes),
                format!("Placed windows:   {}", positioned_windows),
                format!("Shortcuts:        {}", registered_shortcuts),
                format!("Window control:   {}", yes_no(*window_control)),
                format!("Key interception: {}", yes_no(*key_interception)),
            ];
            if let Some(id) = focused_window {
                lines.push(format!("Pinned window:    {}", id));
            }
            if let Some(id) = switcher_region {
                lines.push(format!("Switcher open:    region {}", id));
            }
            lines.join("\n")
        }
    }
}

/// Write one command and read one response line.
#[cfg_attr(not(windows), allow(dead_code))]
async fn exchange<S>(stream: S, command: &IpcCommand) -> Result<IpcResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let request = encode_line(command)?;
    writer.write_all(request.as_bytes()).await?;
    writer.flush().await?;

    let mut reader = BufReader::new(reader.take(MAX_IPC_MESSAGE_SIZE as u64));
    let mut line = String::new();
    let read = tokio::time::timeout(RESPONSE_TIMEOUT, reader.read_line(&mut line))
        .await
        .context("Timed out waiting for the daemon")??;
    if read == 0 {
        bail!("Daemon closed the connection without replying");
    }
    Ok(decode_line(&line)?)
}

#[cfg(windows)]
async fn send_command(command: &IpcCommand) -> Result<IpcResponse> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let pipe = ClientOptions::new()
        .open(zonekeeper_ipc::PIPE_NAME)
        .context("Cannot reach the zonekeeper daemon. Is it running?")?;
    exchange(pipe, command).await
}

#[cfg(not(windows))]
async fn send_command(_command: &IpcCommand) -> Result<IpcResponse> {
    bail!("The zonekeeper daemon only runs on Windows")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = to_ipc_command(cli.command);

    let response = send_command(&command).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", format_response(&response));
    }

    if matches!(response, IpcResponse::Error { .. }) {
        std::process::exit(1);
    }
    Ok(())
}
