//! The session-level error taxonomy.

use thiserror::Error;

/// Result type alias using the session error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for scrcpy session operations.
///
/// Transport and launcher failures propagate as session state transitions;
/// video decode failures also transition the session to `Error`. Audio
/// decode failures are logged and swallowed by the caller (audio is
/// best-effort) and never constructed as this type for that path.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured port is already bound by another process.
    #[error("port {0} is already in use")]
    PortInUse(u16),

    /// The device-management layer (`AdbService`) reports the device is
    /// missing or offline.
    #[error("device not ready: {0}")]
    DeviceNotReady(String),

    /// Port forwarding/reverse mapping could not be established.
    #[error("port forwarding failed: {0}")]
    PortForwardingFailed(String),

    /// The agent failed to launch or complete its initial handshake.
    #[error("agent start failed: {0}")]
    AgentStartFailed(String),

    /// The agent reports a codec/encoder failure consistent with another
    /// scrcpy instance already owning the device.
    #[error("device already occupied by another capture session")]
    DeviceOccupied,

    /// Waiting for the video connection exceeded its bound.
    #[error("timed out waiting for the video connection")]
    ConnectionTimeout,

    /// A connection attempt was cancelled by `disconnect()`.
    #[error("connection cancelled")]
    ConnectionCancelled,

    /// A socket read/write failed after the connection was established.
    #[error("transport receive error: {0}")]
    ReceiveError(String),

    /// The agent process exited with an unexpected, non-zero, non-SIGTERM
    /// code.
    #[error("agent process terminated abnormally (exit code {0})")]
    ProcessTerminated(i32),

    /// The video decoder failed to initialize or decode a frame.
    #[error("video decode failed: {0}")]
    DecodeFailed(String),

    /// The `port` field of a `SessionConfig` was out of range or otherwise
    /// invalid, surfaced before any socket is touched.
    #[error("invalid port: {0}")]
    InvalidPort(u16),

    /// I/O error not otherwise classified (file, process spawn, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation — a bug in the pipeline, not a
    /// recoverable runtime condition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn device_not_ready(msg: impl std::fmt::Display) -> Self {
        Self::DeviceNotReady(msg.to_string())
    }

    pub fn port_forwarding_failed(msg: impl std::fmt::Display) -> Self {
        Self::PortForwardingFailed(msg.to_string())
    }

    pub fn agent_start_failed(msg: impl std::fmt::Display) -> Self {
        Self::AgentStartFailed(msg.to_string())
    }

    pub fn receive_error(msg: impl std::fmt::Display) -> Self {
        Self::ReceiveError(msg.to_string())
    }

    pub fn decode_failed(msg: impl std::fmt::Display) -> Self {
        Self::DecodeFailed(msg.to_string())
    }

    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }

    /// True for the two agent exit codes treated as a normal teardown
    /// rather than a failure: a clean exit, or death by the SIGTERM we
    /// ourselves sent during `stop_capture`/`disconnect`.
    pub fn is_normal_exit_code(code: i32) -> bool {
        code == 0 || code == 15
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_exit_codes() {
        assert!(Error::is_normal_exit_code(0));
        assert!(Error::is_normal_exit_code(15));
        assert!(!Error::is_normal_exit_code(1));
        assert!(!Error::is_normal_exit_code(-1));
    }
}
