use crate::ToolchainError;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::process::Command;
use tracing::debug;

/// Run `program` with `args` and return its stdout. Non-zero exit becomes
/// [`ToolchainError::CommandFailed`] carrying trimmed stderr.
pub fn run_capture<I, S>(program: &str, args: I) -> Result<Vec<u8>, ToolchainError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    debug!("running: {cmd:?}");

    let output = cmd.output().map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            ToolchainError::ToolUnavailable(program.to_owned())
        } else {
            ToolchainError::Io(e)
        }
    })?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(ToolchainError::CommandFailed {
            tool: program.to_owned(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}
