//! [`GitOperator`] backed by the system `git` binary.

use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{GitError, GitOperator, GitResult, PushStatus};
use crate::config::RepositoryTarget;
use crate::credentials::KeyFile;
use crate::domain::{BaseRef, BranchSpec};
use crate::workspace::Workspace;

/// Cap on git stderr carried into errors and logs.
const MAX_OUTPUT: usize = 2048;

/// Captured result of one git invocation.
#[derive(Debug)]
struct GitOutput {
    success: bool,
    status: String,
    stdout: String,
    stderr: String,
}

impl GitOutput {
    fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exited with {}", self.status)
        } else {
            format!("exited with {}: {}", self.status, truncate_output(stderr))
        }
    }
}

/// Shells out to `git`. Child processes are killed if the invocation future
/// is dropped (e.g. on timeout).
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the configured binary runs at all.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[instrument(level = "debug", skip(self, cwd, args, key))]
    async fn run<I, S>(
        &self,
        command: &str,
        cwd: &Path,
        args: I,
        key: Option<&KeyFile>,
    ) -> GitResult<GitOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(cwd).args(args);

        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.env("LC_ALL", "C");
        if let Some(key) = key {
            cmd.env("GIT_SSH_COMMAND", key.ssh_command());
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = cmd.output().await.map_err(|source| GitError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let result = GitOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!(success = result.success, "git finished");
        Ok(result)
    }

    fn command_failed(command: &str, output: &GitOutput) -> GitError {
        GitError::CommandFailed {
            command: command.to_string(),
            reason: output.failure_reason(),
        }
    }
}

#[async_trait]
impl GitOperator for GitCli {
    async fn clone_repo(
        &self,
        target: &RepositoryTarget,
        key: &KeyFile,
        base: &BaseRef,
        into: &Workspace,
    ) -> GitResult<()> {
        let mut args: Vec<OsString> = vec![
            "clone".into(),
            "--depth".into(),
            "1".into(),
            "--no-tags".into(),
        ];
        if let BaseRef::Named(branch) = base {
            args.push("--branch".into());
            args.push(branch.into());
        }
        args.push("--".into());
        args.push(target.url().into());
        args.push(into.repo_dir().into_os_string());

        let output = self
            .run("clone", into.path(), args, Some(key))
            .await
            .map_err(|e| GitError::CloneFailed {
                reason: e.to_string(),
            })?;
        if !output.success {
            return Err(GitError::CloneFailed {
                reason: output.failure_reason(),
            });
        }
        Ok(())
    }

    async fn default_branch(&self, workspace: &Workspace) -> GitResult<String> {
        let repo = workspace.repo_dir();
        let output = self
            .run(
                "symbolic-ref",
                &repo,
                ["symbolic-ref", "--short", "refs/remotes/origin/HEAD"],
                None,
            )
            .await?;
        if output.success {
            let short = output.stdout.trim();
            let branch = short.strip_prefix("origin/").unwrap_or(short);
            if !branch.is_empty() {
                return Ok(branch.to_string());
            }
        }

        // origin/HEAD is missing when the remote HEAD was unborn at clone
        // time; the checked-out branch is the next best answer.
        let output = self
            .run(
                "rev-parse",
                &repo,
                ["rev-parse", "--abbrev-ref", "HEAD"],
                None,
            )
            .await?;
        let branch = output.stdout.trim();
        if !output.success || branch.is_empty() || branch == "HEAD" {
            return Err(Self::command_failed("rev-parse", &output));
        }
        Ok(branch.to_string())
    }

    async fn branch_exists(
        &self,
        workspace: &Workspace,
        key: &KeyFile,
        spec: &BranchSpec,
    ) -> GitResult<bool> {
        let remote_ref = spec.remote_ref();
        let output = self
            .run(
                "ls-remote",
                &workspace.repo_dir(),
                ["ls-remote", "--heads", "origin", remote_ref.as_str()],
                Some(key),
            )
            .await?;
        if !output.success {
            return Err(Self::command_failed("ls-remote", &output));
        }
        Ok(ls_remote_contains(&output.stdout, &remote_ref))
    }

    async fn create_branch(
        &self,
        workspace: &Workspace,
        spec: &BranchSpec,
        base: &str,
    ) -> GitResult<()> {
        let start_point = format!("refs/remotes/origin/{base}");
        let output = self
            .run(
                "branch",
                &workspace.repo_dir(),
                [
                    "branch",
                    "--no-track",
                    spec.name.as_str(),
                    start_point.as_str(),
                ],
                None,
            )
            .await?;
        if !output.success {
            return Err(Self::command_failed("branch", &output));
        }
        Ok(())
    }

    async fn push(
        &self,
        workspace: &Workspace,
        key: &KeyFile,
        spec: &BranchSpec,
    ) -> GitResult<PushStatus> {
        let remote_ref = spec.remote_ref();
        let refspec = format!("{remote_ref}:{remote_ref}");
        let output = self
            .run(
                "push",
                &workspace.repo_dir(),
                ["push", "--porcelain", "origin", refspec.as_str()],
                Some(key),
            )
            .await?;

        match parse_push_porcelain(&output.stdout, &remote_ref) {
            Some(PorcelainStatus::Created) => Ok(PushStatus::Created),
            Some(PorcelainStatus::UpToDate) => Ok(PushStatus::UpToDate),
            Some(PorcelainStatus::Rejected(reason)) => Err(GitError::PushRejected { reason }),
            None if !output.success => Err(Self::command_failed("push", &output)),
            None => Err(GitError::CommandFailed {
                command: "push".to_string(),
                reason: format!("no status reported for {remote_ref}"),
            }),
        }
    }
}

/// Per-ref result from `git push --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PorcelainStatus {
    Created,
    UpToDate,
    Rejected(String),
}

/// Find the status line for `remote_ref` in `git push --porcelain` output.
///
/// Lines look like `<flag>\t<src>:<dst>\t<summary>`. Flags: `*` new ref,
/// ` ` fast-forward, `+` forced, `=` up to date, `!` rejected.
pub fn parse_push_porcelain(stdout: &str, remote_ref: &str) -> Option<PorcelainStatus> {
    for line in stdout.lines() {
        let mut fields = line.splitn(3, '\t');
        let (Some(flag), Some(refs), summary) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let Some((_, dst)) = refs.split_once(':') else {
            continue;
        };
        if dst != remote_ref {
            continue;
        }
        let summary = summary.unwrap_or_default().trim().to_string();
        return match flag {
            "*" | " " | "+" => Some(PorcelainStatus::Created),
            "=" => Some(PorcelainStatus::UpToDate),
            "!" => Some(PorcelainStatus::Rejected(summary)),
            _ => None,
        };
    }
    None
}

fn ls_remote_contains(stdout: &str, remote_ref: &str) -> bool {
    stdout
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .any(|(_, name)| name.trim() == remote_ref)
}

fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT {
        return s.to_string();
    }
    let mut end = MAX_OUTPUT;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…[truncated]", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    const REF: &str = "refs/heads/rds-tools-1-2-0";

    #[test]
    fn test_porcelain_new_branch() {
        let out = "To git@github.com:org/repo.git\n*\trefs/heads/rds-tools-1-2-0:refs/heads/rds-tools-1-2-0\t[new branch]\nDone\n";
        assert_eq!(parse_push_porcelain(out, REF), Some(PorcelainStatus::Created));
    }

    #[test]
    fn test_porcelain_up_to_date() {
        let out = "To /tmp/remote.git\n=\trefs/heads/rds-tools-1-2-0:refs/heads/rds-tools-1-2-0\t[up to date]\nDone\n";
        assert_eq!(parse_push_porcelain(out, REF), Some(PorcelainStatus::UpToDate));
    }

    #[test]
    fn test_porcelain_rejected() {
        let out = "To /tmp/remote.git\n!\trefs/heads/rds-tools-1-2-0:refs/heads/rds-tools-1-2-0\t[rejected] (fetch first)\nDone\n";
        assert_eq!(
            parse_push_porcelain(out, REF),
            Some(PorcelainStatus::Rejected("[rejected] (fetch first)".to_string()))
        );
    }

    #[test]
    fn test_porcelain_ignores_other_refs() {
        let out = "*\trefs/heads/other:refs/heads/other\t[new branch]\n";
        assert_eq!(parse_push_porcelain(out, REF), None);
        assert_eq!(parse_push_porcelain("", REF), None);
    }

    #[test]
    fn test_ls_remote_exact_match() {
        let out = "abc123\trefs/heads/rds-tools-1-2-0\n";
        assert!(ls_remote_contains(out, REF));
        let out = "abc123\trefs/heads/x/rds-tools-1-2-0\n";
        assert!(!ls_remote_contains(out, REF));
        assert!(!ls_remote_contains("", REF));
    }

    #[test]
    fn test_truncate_output() {
        let long = "é".repeat(MAX_OUTPUT);
        let truncated = truncate_output(&long);
        assert!(truncated.ends_with("…[truncated]"));
        assert!(truncated.len() <= MAX_OUTPUT + "…[truncated]".len());
        assert_eq!(truncate_output("short"), "short");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let git = GitCli::new("definitely-not-a-git-binary");
        assert!(!git.is_available().await);
    }
}
