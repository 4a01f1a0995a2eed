//! Zonekeeper IPC Protocol
//!
//! Shared types for daemon-CLI communication. Each connection carries one
//! command and one response, each a single line of JSON, carried over a
//! Windows named pipe.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named pipe path for IPC communication.
pub const PIPE_NAME: &str = r"\\.\pipe\zonekeeper";

/// Upper bound on a single message, newline included.
pub const MAX_IPC_MESSAGE_SIZE: usize = 64 * 1024;

/// Commands that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Query the active profile.
    GetActiveProfile,
    /// Query the regions of the active profile.
    GetActiveRegions,
    /// List every configured profile.
    ListProfiles,
    /// Activate a profile by id.
    SetActiveProfile { id: u64 },
    /// Activate whichever profile matches the connected displays.
    AutoSelectProfile,

    /// Move an application's front window into a region.
    EnforceRegion { region_id: u64, app_id: String },
    /// Place every running assigned application.
    EnforceAllRegions,
    /// Rebuild the global shortcut table.
    UpdateKeyboardShortcuts,

    /// Step the switcher of a region.
    CycleFocus {
        region_id: u64,
        /// Activate the selection immediately.
        #[serde(default)]
        commit: bool,
    },
    /// Pin the foreground window; toggles when it is already pinned.
    FocusWindow {
        /// Defaults to the active profile's focus region.
        #[serde(default)]
        region_id: Option<u64>,
    },
    /// Restore the pinned window.
    UnfocusWindow,

    /// Query engine status.
    Status,
    /// Reload configuration from file.
    Reload,
    /// Stop the daemon.
    Stop,
}

/// Rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Summary of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub id: u64,
    pub name: String,
    pub is_active: bool,
    /// Fingerprint of the display topology the profile applies to.
    pub topology: String,
    pub region_count: usize,
}

/// One region of the active profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub id: u64,
    pub name: String,
    pub display_id: u32,
    pub frame: IpcRect,
    pub padding: i32,
    pub assigned_apps: Vec<String>,
    pub shortcut: Option<String>,
    pub is_focus_region: bool,
}

/// Responses from the daemon to the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Command executed successfully.
    Ok,
    /// Command failed with an error.
    Error {
        /// Error message describing what went wrong.
        message: String,
    },
    /// A single profile, or none when nothing is active.
    Profile { profile: Option<ProfileInfo> },
    Profiles { profiles: Vec<ProfileInfo> },
    Regions { regions: Vec<RegionInfo> },
    /// Result of placing one window.
    Placement {
        /// `false` when the window kind is never placed.
        applied: bool,
        /// Frame read back after the write, if readable.
        frame: Option<IpcRect>,
    },
    /// Number of windows placed.
    Enforced { count: usize },
    /// Number of shortcuts registered.
    Shortcuts { count: usize },
    /// Result of a focus request.
    Focus {
        window_id: u64,
        /// `false` when the request released an existing pin.
        pinned: bool,
        frame: Option<IpcRect>,
    },
    /// Result of an unfocus request.
    Unfocused { restored: bool },
    /// Engine status snapshot.
    Status {
        active_profile: Option<String>,
        profile_count: usize,
        topology: Option<String>,
        observed_processes: usize,
        positioned_windows: usize,
        focused_window: Option<u64>,
        switcher_region: Option<u64>,
        registered_shortcuts: usize,
        window_control: bool,
        key_interception: bool,
    },
}

impl IpcResponse {
    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Errors from framing a message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Message exceeds the IPC size limit")]
    TooLarge,

    #[error("Empty message")]
    Empty,

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize a message as one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    if line.len() > MAX_IPC_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge);
    }
    Ok(line)
}

/// Parse one line read from the transport.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    if line.len() > MAX_IPC_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge);
    }
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_str(line)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization() {
        let cmd = IpcCommand::SetActiveProfile { id: 3 };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"type":"set_active_profile","id":3}"#);

        let cmd2: IpcCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, cmd2);
    }

    #[test]
    fn test_optional_fields_default() {
        let cmd: IpcCommand = serde_json::from_str(r#"{"type":"cycle_focus","region_id":4}"#).unwrap();
        assert_eq!(
            cmd,
            IpcCommand::CycleFocus {
                region_id: 4,
                commit: false
            }
        );

        let cmd: IpcCommand = serde_json::from_str(r#"{"type":"focus_window"}"#).unwrap();
        assert_eq!(cmd, IpcCommand::FocusWindow { region_id: None });
    }

    #[test]
    fn test_response_serialization() {
        let resp = IpcResponse::Enforced { count: 2 };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"status":"enforced","count":2}"#);

        let resp2: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(resp, resp2);
    }

    #[test]
    fn test_status_response_fields() {
        let resp = IpcResponse::Status {
            active_profile: Some("Desk".to_string()),
            profile_count: 2,
            topology: Some("builtin:1920x1080|external:2560x1440".to_string()),
            observed_processes: 3,
            positioned_windows: 4,
            focused_window: None,
            switcher_region: None,
            registered_shortcuts: 5,
            window_control: true,
            key_interception: false,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"status\":\"status\""));
        assert!(json.contains("\"key_interception\":false"));
        assert_eq!(serde_json::from_str::<IpcResponse>(&json).unwrap(), resp);
    }

    #[test]
    fn test_error_response() {
        let resp = IpcResponse::error("Something went wrong");
        if let IpcResponse::Error { message } = resp {
            assert_eq!(message, "Something went wrong");
        } else {
            panic!("Expected Error response");
        }
    }

    #[test]
    fn test_line_framing() {
        let line = encode_line(&IpcCommand::Status).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed: IpcCommand = decode_line(&line).unwrap();
        assert_eq!(parsed, IpcCommand::Status);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(decode_line::<IpcCommand>("  \n"), Err(ProtocolError::Empty)));
        assert!(matches!(
            decode_line::<IpcCommand>("not valid json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_line::<IpcCommand>(r#"{"type":"unknown_command"}"#),
            Err(ProtocolError::Json(_))
        ));
        let huge = "x".repeat(MAX_IPC_MESSAGE_SIZE + 1);
        assert!(matches!(decode_line::<IpcCommand>(&huge), Err(ProtocolError::TooLarge)));
    }

    #[test]
    fn test_encode_rejects_oversized_message() {
        let resp = IpcResponse::error("y".repeat(MAX_IPC_MESSAGE_SIZE));
        assert!(matches!(encode_line(&resp), Err(ProtocolError::TooLarge)));
    }

    #[test]
    fn test_pipe_name_format() {
        assert!(PIPE_NAME.starts_with(r"\\.\pipe\"));
        assert_eq!(PIPE_NAME, r"\\.\pipe\zonekeeper");
    }
}
