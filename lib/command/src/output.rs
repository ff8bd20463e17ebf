use std::{
  io,
  os::unix::process::ExitStatusExt,
  process::{ExitStatus, Output},
};

/// Captured result of a finished child process.
///
/// `pid` is `None` for commands that failed to spawn at all (lex error,
/// missing binary, bad working directory); the supervisor only has a pid to
/// hand to `killtree` once the child is actually running.
#[derive(Debug, Clone)]
pub struct CommandOutput {
  pub pid: Option<u32>,
  pub status: ExitStatus,
  pub stdout: String,
  pub stderr: String,
}

impl CommandOutput {
  pub fn from(output: io::Result<Output>, pid: Option<u32>) -> Self {
    match output {
      Ok(output) => Self {
        pid,
        status: output.status,
        stdout: String::from_utf8(output.stdout)
          .unwrap_or_else(|_| "failed to decode stdout".to_string()),
        stderr: String::from_utf8(output.stderr)
          .unwrap_or_else(|_| "failed to decode stderr".to_string()),
      },
      Err(e) => CommandOutput::from_err(e, pid),
    }
  }

  pub fn from_err(e: io::Error, pid: Option<u32>) -> Self {
    Self {
      pid,
      status: ExitStatus::from_raw(1),
      stdout: "".to_string(),
      stderr: format!("{e:#?}"),
    }
  }

  pub fn success(&self) -> bool {
    self.status.success()
  }
}
