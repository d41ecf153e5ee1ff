//! File push over the scp sink protocol.
//!
//! The remote end runs `scp -t <path>`; we feed it a single `C` record
//! (mode, length, basename), the raw bytes and a terminating NUL on stdin.

use tracing::{debug, info};

use super::shell_quote;
use crate::{
    core::error::{InstallError, InstallResult},
    transport::Session,
};

const SINK_MODE: &str = "0644";

pub fn sink_command(remote_path: &str) -> String {
    format!("scp -t {}", shell_quote(remote_path))
}

pub fn sink_payload(bytes: &[u8], basename: &str) -> Vec<u8> {
    let header = format!("C{} {} {}\n", SINK_MODE, bytes.len(), basename);
    let mut payload = Vec::with_capacity(header.len() + bytes.len() + 1);
    payload.extend_from_slice(header.as_bytes());
    payload.extend_from_slice(bytes);
    payload.push(0);
    payload
}

/// The sink acknowledges with NUL bytes; `\x01` (warning) or `\x02` (fatal)
/// is followed by a message line.
fn sink_error(stdout: &[u8]) -> Option<String> {
    let start = stdout.iter().position(|b| *b == 1 || *b == 2)?;
    let message = &stdout[start + 1..];
    let end = message
        .iter()
        .position(|b| *b == b'\n')
        .unwrap_or(message.len());
    Some(String::from_utf8_lossy(&message[..end]).trim().to_string())
}

/// Pushes `bytes` to `remote_path`. All-or-nothing from the caller's view;
/// the destination is not inspected or rolled back on failure.
pub async fn push(
    session: &mut dyn Session,
    bytes: &[u8],
    remote_path: &str,
) -> InstallResult<()> {
    let failed = |reason: String| InstallError::Transfer {
        path: remote_path.to_string(),
        reason,
    };

    let basename = remote_path
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| failed("destination has no file name".to_string()))?;

    let command = sink_command(remote_path);
    info!(path = %remote_path, size = bytes.len(), "transferring file");
    debug!(%command, "running sink command");

    let output = session
        .run_with_input(&command, &sink_payload(bytes, basename))
        .await
        .map_err(|e| failed(e.to_string()))?;

    if let Some(message) = sink_error(&output.stdout) {
        return Err(failed(message));
    }
    if !output.success() {
        return Err(failed(format!(
            "scp exited with status {}: {}",
            output.exit_status,
            output.stderr_str().trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_has_header_bytes_and_terminator() {
        let payload = sink_payload(b"hello", "config");
        assert_eq!(payload, b"C0644 5 config\nhello\0".to_vec());
    }

    #[test]
    fn empty_file_still_gets_header_and_terminator() {
        assert_eq!(sink_payload(b"", "empty"), b"C0644 0 empty\n\0".to_vec());
    }

    #[test]
    fn sink_error_reads_message_after_status_byte() {
        let stdout = b"\0\x01scp: /opt/x/config: No such file or directory\n";
        assert_eq!(
            sink_error(stdout).as_deref(),
            Some("scp: /opt/x/config: No such file or directory")
        );
        assert_eq!(sink_error(b"\0\0\0"), None);
    }

    #[test]
    fn sink_command_quotes_destination() {
        assert_eq!(
            sink_command("/tmp/status updater.deb"),
            "scp -t '/tmp/status updater.deb'"
        );
        assert_eq!(sink_command("/etc/init.d/status-updater"), "scp -t /etc/init.d/status-updater");
    }
}
