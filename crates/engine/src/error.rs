use thiserror::Error;
use zonekeeper_core::{AppId, CoreError, RegionId};
use zonekeeper_platform::PlatformError;

/// Errors returned by the engine's command surface.
///
/// Event handlers never return these; they log and carry on.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("No profile is active")]
    NoActiveProfile,

    #[error("Region {0} not found in the active profile")]
    RegionNotFound(RegionId),

    #[error("No focus region in the active profile")]
    NoFocusRegion,

    #[error("No application is in the foreground")]
    NoForegroundApp,

    #[error("Application {0} is not assigned to a region")]
    Unassigned(AppId),

    #[error("Application {0} has no window")]
    NoWindow(AppId),

    #[error("Engine is not running")]
    Stopped,
}
