//! Error types for the clip session manager

use thiserror::Error;

use crate::SessionId;

/// Device setup stage that failed while building a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    CreatePlayer,
    Realize,
    PrefetchInterface,
    PlayInterface,
    RegisterCallbacks,
    VolumeInterface,
    SetLoop,
    InitialVolume,
}

impl std::fmt::Display for SetupStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CreatePlayer => "create player",
            Self::Realize => "realize player",
            Self::PrefetchInterface => "prefetch interface",
            Self::PlayInterface => "play interface",
            Self::RegisterCallbacks => "register callbacks",
            Self::VolumeInterface => "volume interface",
            Self::SetLoop => "set loop",
            Self::InitialVolume => "initial volume",
        };
        f.write_str(name)
    }
}

/// Core error type
#[derive(Error, Debug)]
pub enum ClipError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Session {0} is stopped")]
    Stopped(SessionId),

    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    #[error("No asset source bound")]
    AssetUnbound,

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Device setup failed at {step}: {reason}")]
    DeviceSetup { step: SetupStep, reason: String },

    #[error("Device error: {0}")]
    Device(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Registry is shut down")]
    ShutDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClipError {
    /// Unknown or already reaped handle
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias
pub type ClipResult<T> = Result<T, ClipError>;
