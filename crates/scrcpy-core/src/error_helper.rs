//! Turns raw OS errors and agent stderr text into the structured
//! `scrcpy_common::Error` variants the rest of the crate reports on.

use scrcpy_common::error::Error;

/// macOS `EADDRINUSE`. Linux differs (98); this console only targets macOS.
const EADDRINUSE: i32 = 48;

pub fn classify_os_error(port: u16, err: &std::io::Error) -> Error {
    match err.raw_os_error() {
        Some(EADDRINUSE) => Error::PortInUse(port),
        _ => Error::Io(std::io::Error::new(err.kind(), err.to_string())),
    }
}

/// Looks for agent stderr patterns that mean something more specific than
/// "the process exited non-zero".
pub fn classify_agent_message(stderr: &str) -> Option<Error> {
    let lower = stderr.to_lowercase();
    if lower.contains("codec") && lower.contains("fail") {
        return Some(Error::DeviceOccupied);
    }
    if lower.contains("device") && (lower.contains("not found") || lower.contains("offline")) {
        return Some(Error::device_not_ready(stderr.trim().to_string()));
    }
    if lower.contains("permission denied") {
        return Some(Error::agent_start_failed(stderr.trim().to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eaddrinuse_maps_to_port_in_use() {
        let err = std::io::Error::from_raw_os_error(EADDRINUSE);
        assert!(matches!(classify_os_error(27183, &err), Error::PortInUse(27183)));
    }

    #[test]
    fn other_os_errors_pass_through_as_io() {
        let err = std::io::Error::from_raw_os_error(13);
        assert!(matches!(classify_os_error(1, &err), Error::Io(_)));
    }

    #[test]
    fn codec_failure_text_maps_to_device_occupied() {
        let msg = "Error: Codec configuration fail: no available decoder";
        assert!(matches!(classify_agent_message(msg), Some(Error::DeviceOccupied)));
    }

    #[test]
    fn unrelated_text_is_unclassified() {
        assert!(classify_agent_message("starting server...").is_none());
    }
}
