//! Runs one provision's command sequence, captures its stdout/stderr, and
//! tracks whether its current step is still alive.

use std::{
  path::PathBuf,
  sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
  },
};

use kerfuffle_client::entities::{Provision, ProcessState};
use tokio::io::{AsyncBufReadExt, BufReader};

/// A running (or finished) command sequence for one provision target.
/// Created immediately before spawning the sequence's first step; mutated
/// only by the task driving [`execute_provision`].
pub struct Process {
  pub directory: PathBuf,
  env: Vec<(String, String)>,
  pid: AtomicU32,
  alive: std::sync::atomic::AtomicBool,
  current_argv: Mutex<Vec<String>>,
  log: Arc<Mutex<String>>,
  err: Arc<Mutex<String>>,
  errors: Mutex<Vec<String>>,
  exit_description: Mutex<Option<String>>,
}

impl Process {
  pub fn new(directory: PathBuf, env: Vec<(String, String)>) -> Arc<Self> {
    Arc::new(Self {
      directory,
      env,
      pid: AtomicU32::new(0),
      alive: std::sync::atomic::AtomicBool::new(false),
      current_argv: Mutex::new(Vec::new()),
      log: Arc::new(Mutex::new(String::new())),
      err: Arc::new(Mutex::new(String::new())),
      errors: Mutex::new(Vec::new()),
      exit_description: Mutex::new(None),
    })
  }

  pub fn status(&self) -> ProcessState {
    if self.alive.load(Ordering::SeqCst) {
      ProcessState::running(&self.current_argv.lock().unwrap())
    } else {
      ProcessState::exited(
        self
          .exit_description
          .lock()
          .unwrap()
          .clone()
          .unwrap_or_default(),
      )
    }
  }

  pub fn log_output(&self) -> String {
    self.log.lock().unwrap().clone()
  }

  pub fn err_output(&self) -> String {
    self.err.lock().unwrap().clone()
  }

  pub fn errors(&self) -> Vec<String> {
    self.errors.lock().unwrap().clone()
  }

  /// Invokes the process-tree killer (C1) on the live pid, then waits for
  /// the OS process to be reaped. A no-op if the process never started or
  /// has already exited.
  pub async fn kill(&self) -> anyhow::Result<()> {
    let pid = self.pid.load(Ordering::SeqCst);
    if pid == 0 {
      return Ok(());
    }
    let result = tokio::task::spawn_blocking(move || killtree::kill_tree(pid)).await?;
    self.alive.store(false, Ordering::SeqCst);
    *self.exit_description.lock().unwrap() = Some("killed".to_string());
    result
  }
}

fn spawn_stream_reader<R>(reader: R, buffer: Arc<Mutex<String>>) -> tokio::task::JoinHandle<()>
where
  R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
  tokio::spawn(async move {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
      let mut guard = buffer.lock().unwrap();
      guard.push_str(&line);
      guard.push('\n');
    }
  })
}

/// Runs every argv in `provision.run`, in order, synchronously. Stops and
/// returns `false` at the first step that fails to spawn or exits non-zero;
/// returns `true` once every step has exited successfully.
pub async fn execute_provision(process: Arc<Process>, provision: &Provision) -> bool {
  let total = provision.run.len();
  for (index, argv) in provision.run.iter().enumerate() {
    tracing::info!(
      base_dir = %process.directory.display(),
      id = %provision.id,
      step = index + 1,
      total,
      argv = ?argv,
      "launching provision step"
    );

    *process.current_argv.lock().unwrap() = argv.clone();

    let mut child =
      match command::spawn_piped(argv, &process.directory, process.env.iter().cloned()) {
        Ok(child) => child,
        Err(e) => {
          let msg = format!("failed to spawn '{}': {e}", argv.join(" "));
          process.errors.lock().unwrap().push(msg.clone());
          process.alive.store(false, Ordering::SeqCst);
          *process.exit_description.lock().unwrap() = Some(msg);
          return false;
        }
      };

    if let Some(pid) = child.id() {
      process.pid.store(pid, Ordering::SeqCst);
    }
    process.alive.store(true, Ordering::SeqCst);

    let stdout_task = child.stdout.take().map(|s| spawn_stream_reader(s, process.log.clone()));
    let stderr_task = child.stderr.take().map(|s| spawn_stream_reader(s, process.err.clone()));

    let status = child.wait().await;

    if let Some(t) = stdout_task {
      let _ = t.await;
    }
    if let Some(t) = stderr_task {
      let _ = t.await;
    }

    match status {
      Ok(status) if status.success() => {
        tracing::info!(id = %provision.id, step = index + 1, total, "finished provision step");
      }
      Ok(status) => {
        let msg = format!("'{}' exited with {status}", argv.join(" "));
        process.errors.lock().unwrap().push(msg.clone());
        process.alive.store(false, Ordering::SeqCst);
        *process.exit_description.lock().unwrap() = Some(msg);
        return false;
      }
      Err(e) => {
        let msg = format!("failed waiting for '{}': {e}", argv.join(" "));
        process.errors.lock().unwrap().push(msg.clone());
        process.alive.store(false, Ordering::SeqCst);
        *process.exit_description.lock().unwrap() = Some(msg);
        return false;
      }
    }
  }

  process.alive.store(false, Ordering::SeqCst);
  *process.exit_description.lock().unwrap() = Some("exit status: 0".to_string());
  true
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn successful_sequence_reports_exited_state() {
    let process = Process::new(std::env::temp_dir(), Vec::new());
    let provision = Provision {
      id: "web".to_string(),
      run: vec![vec!["true".to_string()]],
      ..Default::default()
    };
    assert!(execute_provision(process.clone(), &provision).await);
    assert!(!process.status().alive);
    assert!(process.errors().is_empty());
  }

  #[tokio::test]
  async fn failing_step_stops_the_sequence() {
    let process = Process::new(std::env::temp_dir(), Vec::new());
    let provision = Provision {
      id: "web".to_string(),
      run: vec![vec!["false".to_string()], vec!["true".to_string()]],
      ..Default::default()
    };
    assert!(!execute_provision(process.clone(), &provision).await);
    assert_eq!(process.errors().len(), 1);
  }

  #[tokio::test]
  async fn stdout_is_captured_into_log_buffer() {
    let process = Process::new(std::env::temp_dir(), Vec::new());
    let provision = Provision {
      id: "web".to_string(),
      run: vec![vec!["echo".to_string(), "hi".to_string()]],
      ..Default::default()
    };
    assert!(execute_provision(process.clone(), &provision).await);
    assert_eq!(process.log_output(), "hi\n");
  }
}
