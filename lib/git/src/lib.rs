//! Thin wrappers around the `git` binary: cloning a repository for a fresh
//! install, and reading back the commit currently checked out so it can be
//! surfaced on the application's status log.

use std::path::Path;

use anyhow::anyhow;
use command::run_standard_command;

/// The commit a working tree is currently sitting on.
#[derive(Debug, Clone)]
pub struct LatestCommit {
  pub hash: String,
  pub message: String,
}

/// Clones `repository` into `dest`, checking out `branch` when given.
/// `dest`'s parent must already exist; `git clone` creates `dest` itself.
pub async fn clone_repo(
  repository: &str,
  branch: Option<&str>,
  dest: &Path,
) -> anyhow::Result<()> {
  let command = match branch {
    Some(branch) => {
      format!("git clone --branch {branch} --single-branch {repository} {}", dest.display())
    }
    None => format!("git clone {repository} {}", dest.display()),
  };
  let output = run_standard_command(&command, None).await;
  if output.success() {
    Ok(())
  } else {
    Err(anyhow!(
      "failed to clone {repository}: {}",
      output.stderr.trim()
    ))
  }
}

/// Reads the short hash and subject line of `HEAD` in the repo at `repo_dir`.
pub async fn get_commit_hash_info(
  repo_dir: &Path,
) -> anyhow::Result<LatestCommit> {
  let hash =
    run_standard_command("git rev-parse --short HEAD", repo_dir).await;
  let hash = if hash.status.success() {
    hash.stdout.trim().to_string()
  } else {
    return Err(anyhow!("failed to get short hash: {}", hash.stderr.trim()));
  };

  let message =
    run_standard_command("git log -1 --pretty=%B", repo_dir).await;
  let message = if message.status.success() {
    message.stdout.trim().to_string()
  } else {
    return Err(anyhow!(
      "failed to get commit message: {}",
      message.stderr.trim()
    ));
  };

  Ok(LatestCommit { hash, message })
}

/// Gets the remote url for `origin`, with a trailing `.git` stripped.
pub async fn get_remote_url(path: &Path) -> anyhow::Result<String> {
  let output = run_standard_command("git remote show origin", path).await;
  if output.success() {
    Ok(
      output
        .stdout
        .trim()
        .strip_suffix(".git")
        .map(str::to_string)
        .unwrap_or(output.stdout),
    )
  } else {
    Err(anyhow!(
      "failed to get remote url: stdout: {} stderr: {}",
      output.stdout,
      output.stderr
    ))
  }
}
