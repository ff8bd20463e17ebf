use std::{
  path::{Path, PathBuf},
  process::Stdio,
  sync::OnceLock,
};

mod output;

pub use output::*;
use tokio::process::{Child, Command};

/// Commands are run directly, and cannot include '&&' or other shell syntax.
pub async fn run_standard_command(
  command: &str,
  path: impl Into<Option<&Path>>,
) -> CommandOutput {
  let lexed = match shlex::split(command) {
    Some(lexed) if !lexed.is_empty() => lexed,
    _ => {
      return CommandOutput::from_err(
        std::io::Error::other("command lexed into empty args"),
        None,
      )
    }
  };

  let mut cmd = Command::new(&lexed[0]);

  cmd
    .args(&lexed[1..])
    .kill_on_drop(true)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

  if let Some(path) = path.into() {
    match path.canonicalize() {
      Ok(path) => {
        cmd.current_dir(path);
      }
      Err(e) => return CommandOutput::from_err(e, None),
    }
  }

  CommandOutput::from(cmd.output().await, None)
}

fn shell() -> &'static str {
  static DEFAULT_SHELL: OnceLock<String> = OnceLock::new();
  DEFAULT_SHELL.get_or_init(|| {
    if PathBuf::from("/bin/bash").exists()
      || PathBuf::from("/usr/bin/bash").exists()
    {
      String::from("bash")
    } else {
      String::from("sh")
    }
  })
}

/// Commands are wrapped in 'sh -c' (or bash, if present), and can include
/// '&&' and other shell syntax.
pub async fn run_shell_command(
  command: &str,
  path: impl Into<Option<&Path>>,
) -> CommandOutput {
  let mut cmd = Command::new(shell());

  cmd
    .args(["-c", command])
    .kill_on_drop(true)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

  if let Some(path) = path.into() {
    match path.canonicalize() {
      Ok(path) => {
        cmd.current_dir(path);
      }
      Err(e) => return CommandOutput::from_err(e, None),
    }
  }

  CommandOutput::from(cmd.output().await, None)
}

/// Spawns `argv[0]` with the remaining elements as arguments, with piped
/// stdout/stderr, and returns the still-running [`Child`] so the caller can
/// read its pid, stream its output, and await its exit independently.
///
/// Used by the provision supervisor, which needs the live pid to hand to
/// `killtree` on shutdown and needs to keep streaming output into a log
/// buffer while the child runs; `run_standard_command` and `run_shell_command`
/// above are for short-lived one-shot commands (git clone, health checks)
/// where only the fully-captured output matters.
pub fn spawn_piped(
  argv: &[String],
  path: &Path,
  envs: impl IntoIterator<Item = (String, String)>,
) -> std::io::Result<Child> {
  let Some((program, args)) = argv.split_first() else {
    return Err(std::io::Error::other("command argv is empty"));
  };

  Command::new(program)
    .args(args)
    .current_dir(path)
    .envs(envs)
    .kill_on_drop(true)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .spawn()
}
