//! Child process plumbing shared by the tmux and atuin adapters.

use std::ffi::OsStr;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Run `program args…`, optionally feeding `stdin`, and collect its output.
///
/// The child is killed if the returned future is dropped, so a timeout
/// around this call does not leave processes behind.
pub(crate) async fn run<I, S>(program: &OsStr, args: I, stdin: Option<&str>) -> std::io::Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }
    }

    child.wait_with_output().await
}

/// Stderr of a failed command, trimmed, or its exit status when silent.
pub(crate) fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr.to_string()
    }
}
