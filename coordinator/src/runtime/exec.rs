//! Output handling for commands executed in other containers.

use tracing::warn;

use super::RuntimeError;

const STDOUT: u8 = 1;
const STDERR: u8 = 2;
const FRAME_HEADER_LEN: usize = 8;

/// Collected output of a finished exec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecOutput {
    /// Judges success by exit code alone.
    ///
    /// A non-zero exit fails even with empty stderr. Stderr output on a zero
    /// exit is only logged.
    pub fn ensure_success(self, container: &str) -> Result<Self, RuntimeError> {
        if self.exit_code != 0 {
            return Err(RuntimeError::ExecFailed {
                container: container.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            });
        }
        if !self.stderr.trim().is_empty() {
            warn!(%container, stderr = %self.stderr.trim(), "Command succeeded with output on stderr");
        }
        Ok(self)
    }
}

/// Splits the runtime's multiplexed attach stream into stdout and stderr.
///
/// Each frame is `[stream, 0, 0, 0, len as u32 big endian]` followed by `len`
/// payload bytes. Stdin frames are dropped and a truncated trailing frame
/// keeps whatever payload arrived.
#[must_use]
pub fn demux_stream(raw: &[u8]) -> (String, String) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut rest = raw;

    while let Some((header, tail)) = rest.split_first_chunk::<FRAME_HEADER_LEN>() {
        let [stream, _, _, _, l0, l1, l2, l3] = *header;
        let len = usize::try_from(u32::from_be_bytes([l0, l1, l2, l3])).unwrap_or(usize::MAX);
        let (payload, remaining) = tail.split_at(len.min(tail.len()));
        match stream {
            STDOUT => stdout.extend_from_slice(payload),
            STDERR => stderr.extend_from_slice(payload),
            _ => {}
        }
        rest = remaining;
    }

    (
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    )
}
