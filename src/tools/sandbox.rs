//! Isolated execution of model-generated chart scripts.
//!
//! Each run gets a fresh temporary directory that is deleted before
//! [`SandboxRunner::run`] returns. The script runs as a child process with:
//! - the directory as working directory, `HOME` and matplotlib cache
//! - a cleared environment (only `PATH` is carried over)
//! - `ulimit` caps on CPU time, address space and written file size
//! - a wall-clock timeout; the child is killed when it expires
//! - no network when `isolate_network` is set (`unshare -rn`)
//! - a Landlock ruleset when `restrict_filesystem` is set: the scratch
//!   directory is the only writable path, and reads are limited to it and
//!   the configured `read_paths`
//!
//! The only output read back is [`ARTIFACT_FILE_NAME`] in that directory.

use crate::types::{AppError, Result};
use crate::utils::toml_config::SandboxConfig;
use async_trait::async_trait;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// File the generated script is told to write, relative to its working directory
pub const ARTIFACT_FILE_NAME: &str = "visual.png";

const SCRIPT_FILE_NAME: &str = "chart.py";
const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
/// Bytes of stderr kept in error messages
const STDERR_TAIL: usize = 2048;

/// A PNG produced by a sandboxed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `data:image/png;base64,<payload>`
    pub fn data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Runs untrusted code and returns the image it produced
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, code: &str) -> Result<Artifact>;
}

pub struct SandboxRunner {
    config: SandboxConfig,
}

impl SandboxRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// `ulimit` prologue; a limit of 0 is left unset
    fn limits_prologue(&self) -> String {
        let mut limits = Vec::new();
        if self.config.cpu_limit_secs > 0 {
            limits.push(format!("ulimit -t {}", self.config.cpu_limit_secs));
        }
        if self.config.memory_limit_mb > 0 {
            // KiB
            limits.push(format!("ulimit -v {}", self.config.memory_limit_mb * 1024));
        }
        if self.config.file_size_limit_mb > 0 {
            // 512-byte blocks under POSIX sh
            limits.push(format!("ulimit -f {}", self.config.file_size_limit_mb * 2048));
        }
        limits.push("exec \"$@\"".to_string());
        limits.join(" && ")
    }

    fn command(&self, dir: &Path) -> Result<Command> {
        let mut cmd = Command::new("sh");
        // Interpreter and script travel as positional args, never through the shell string
        cmd.arg("-c").arg(self.limits_prologue()).arg("sh");
        if self.config.isolate_network {
            cmd.arg("unshare").arg("-rn");
        }
        cmd.arg(&self.config.interpreter).arg(SCRIPT_FILE_NAME);

        let path = std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string());
        cmd.current_dir(dir)
            .env_clear()
            .env("PATH", path)
            .env("HOME", dir)
            .env("MPLCONFIGDIR", dir)
            .env("MPLBACKEND", "Agg")
            .env("TMPDIR", dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.config.restrict_filesystem {
            confine(&mut cmd, dir, &self.config.read_paths, self.config.isolate_network)?;
        }
        Ok(cmd)
    }

    async fn run_in(&self, dir: &Path, code: &str) -> Result<Artifact> {
        tokio::fs::write(dir.join(SCRIPT_FILE_NAME), code)
            .await
            .map_err(|e| AppError::Sandbox(format!("Failed to write script: {}", e)))?;

        let child = self
            .command(dir)?
            .spawn()
            .map_err(|e| AppError::Sandbox(format!("Failed to start interpreter: {}", e)))?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => {
                result.map_err(|e| AppError::Sandbox(format!("Failed to wait for script: {}", e)))?
            }
            // Dropping the future drops the child, which kills it
            Err(_) => {
                return Err(AppError::Sandbox(format!(
                    "Script exceeded {}s time limit",
                    self.config.timeout_secs
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let tail = stderr.get(start..).unwrap_or(&stderr);
            return Err(AppError::Sandbox(format!(
                "Script exited with {}: {}",
                output.status,
                tail.trim()
            )));
        }

        let artifact_path = dir.join(ARTIFACT_FILE_NAME);
        let metadata = tokio::fs::metadata(&artifact_path).await.map_err(|_| {
            AppError::Sandbox(format!("Script did not produce {}", ARTIFACT_FILE_NAME))
        })?;
        if !metadata.is_file() {
            return Err(AppError::Sandbox(format!(
                "{} is not a regular file",
                ARTIFACT_FILE_NAME
            )));
        }
        if metadata.len() > self.config.max_artifact_bytes {
            return Err(AppError::Sandbox(format!(
                "Artifact is {} bytes, limit is {}",
                metadata.len(),
                self.config.max_artifact_bytes
            )));
        }

        let bytes = tokio::fs::read(&artifact_path)
            .await
            .map_err(|e| AppError::Sandbox(format!("Failed to read artifact: {}", e)))?;
        Ok(Artifact::new(bytes))
    }
}

// ============================================================================
// Filesystem confinement
// ============================================================================

#[cfg(target_os = "linux")]
fn confine(
    cmd: &mut Command,
    scratch: &Path,
    read_paths: &[PathBuf],
    proc_writable: bool,
) -> Result<()> {
    use landlock::{
        Access, AccessFs, PathBeneath, PathFd, Ruleset, RulesetAttr, RulesetCreatedAttr,
        RulesetStatus, ABI,
    };

    const LANDLOCK_ABI: ABI = ABI::V2;

    let rule_error = |e: landlock::RulesetError| {
        AppError::Sandbox(format!("Failed to build filesystem ruleset: {}", e))
    };
    let open_error = |path: &Path, e: landlock::PathFdError| {
        AppError::Sandbox(format!("Failed to open {}: {}", path.display(), e))
    };

    let mut ruleset = Ruleset::default()
        .handle_access(AccessFs::from_all(LANDLOCK_ABI))
        .map_err(rule_error)?
        .create()
        .map_err(rule_error)?;

    for path in read_paths.iter().filter(|p| p.exists()) {
        let mut access = AccessFs::from_read(LANDLOCK_ABI);
        // unshare -r writes the child's uid/gid maps
        if proc_writable && path == Path::new("/proc") {
            access = access | AccessFs::WriteFile;
        }
        let fd = PathFd::new(path).map_err(|e| open_error(path, e))?;
        ruleset = ruleset
            .add_rule(PathBeneath::new(fd, access))
            .map_err(rule_error)?;
    }

    let fd = PathFd::new(scratch).map_err(|e| open_error(scratch, e))?;
    ruleset = ruleset
        .add_rule(PathBeneath::new(fd, AccessFs::from_all(LANDLOCK_ABI)))
        .map_err(rule_error)?;

    let slot = std::sync::Mutex::new(Some(ruleset));
    // SAFETY: runs in the forked child before exec and only issues the
    // prctl and landlock_restrict_self syscalls on the prepared ruleset fd.
    unsafe {
        cmd.pre_exec(move || {
            let ruleset = slot
                .lock()
                .ok()
                .and_then(|mut ruleset| ruleset.take())
                .ok_or_else(|| std::io::Error::other("filesystem ruleset already applied"))?;
            let status = ruleset
                .restrict_self()
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            if status.ruleset == RulesetStatus::NotEnforced {
                return Err(std::io::Error::other("Landlock is not available on this kernel"));
            }
            Ok(())
        });
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn confine(
    _cmd: &mut Command,
    _scratch: &Path,
    _read_paths: &[PathBuf],
    _proc_writable: bool,
) -> Result<()> {
    Err(AppError::Sandbox(
        "Filesystem restriction needs Linux Landlock; set sandbox.restrict_filesystem = false"
            .to_string(),
    ))
}

#[async_trait]
impl CodeRunner for SandboxRunner {
    async fn run(&self, code: &str) -> Result<Artifact> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ragdesk-sandbox-");
        let dir = match &self.config.work_dir {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        }
        .map_err(|e| AppError::Sandbox(format!("Failed to create sandbox directory: {}", e)))?;

        tracing::info!(dir = %dir.path().display(), "running chart script");
        let result = self.run_in(dir.path(), code).await;

        if let Err(e) = dir.close() {
            tracing::warn!(error = %e, "failed to remove sandbox directory");
        }

        match &result {
            Ok(artifact) => tracing::debug!(bytes = artifact.bytes().len(), "chart rendered"),
            Err(e) => tracing::warn!(error = %e, "chart script failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url() {
        let artifact = Artifact::new(vec![0x89, b'P', b'N', b'G']);
        assert_eq!(artifact.data_url(), "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn test_limits_prologue_skips_zero_limits() {
        let runner = SandboxRunner::new(SandboxConfig {
            cpu_limit_secs: 5,
            memory_limit_mb: 0,
            file_size_limit_mb: 1,
            ..SandboxConfig::default()
        });
        assert_eq!(
            runner.limits_prologue(),
            "ulimit -t 5 && ulimit -f 2048 && exec \"$@\""
        );
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        /// Runs scripts with `sh` so the tests need no Python
        fn shell_runner(work_dir: &Path) -> SandboxRunner {
            SandboxRunner::new(SandboxConfig {
                interpreter: "sh".to_string(),
                timeout_secs: 2,
                memory_limit_mb: 0,
                isolate_network: false,
                restrict_filesystem: false,
                work_dir: Some(work_dir.to_path_buf()),
                ..SandboxConfig::default()
            })
        }

        fn entries(dir: &Path) -> usize {
            std::fs::read_dir(dir).unwrap().count()
        }

        #[tokio::test]
        async fn test_artifact_is_returned_and_directory_removed() {
            let base = tempfile::tempdir().unwrap();
            let runner = shell_runner(base.path());

            let artifact = runner.run("printf 'PNG' > visual.png").await.unwrap();
            assert_eq!(artifact.bytes(), b"PNG");
            assert_eq!(entries(base.path()), 0);
        }

        #[tokio::test]
        async fn test_environment_is_cleared() {
            let base = tempfile::tempdir().unwrap();
            let runner = shell_runner(base.path());

            let artifact = runner
                .run("[ -z \"$CARGO_PKG_NAME\" ] && printf \"$MPLBACKEND\" > visual.png")
                .await
                .unwrap();
            assert_eq!(artifact.bytes(), b"Agg");
        }

        #[tokio::test]
        async fn test_missing_artifact() {
            let base = tempfile::tempdir().unwrap();
            let err = shell_runner(base.path()).run("true").await.unwrap_err();
            assert!(matches!(err, AppError::Sandbox(_)));
            assert_eq!(entries(base.path()), 0);
        }

        #[tokio::test]
        async fn test_failing_script_reports_stderr() {
            let base = tempfile::tempdir().unwrap();
            let err = shell_runner(base.path())
                .run("echo boom >&2; exit 3")
                .await
                .unwrap_err();
            assert!(err.to_string().contains("boom"));
        }

        #[tokio::test]
        async fn test_timeout_kills_script() {
            let base = tempfile::tempdir().unwrap();
            let runner = SandboxRunner::new(SandboxConfig {
                timeout_secs: 1,
                ..shell_runner(base.path()).config
            });

            let started = std::time::Instant::now();
            let err = runner.run("sleep 10").await.unwrap_err();
            assert!(err.to_string().contains("time limit"));
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[tokio::test]
        async fn test_oversized_artifact_rejected() {
            let base = tempfile::tempdir().unwrap();
            let runner = SandboxRunner::new(SandboxConfig {
                max_artifact_bytes: 2,
                ..shell_runner(base.path()).config
            });

            let err = runner.run("printf 'PNG' > visual.png").await.unwrap_err();
            assert!(err.to_string().contains("limit"));
        }

        #[cfg(target_os = "linux")]
        fn confined_runner(work_dir: &Path) -> SandboxRunner {
            SandboxRunner::new(SandboxConfig {
                restrict_filesystem: true,
                ..shell_runner(work_dir).config
            })
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_writes_outside_scratch_dir_are_blocked() {
            let base = tempfile::tempdir().unwrap();
            let outside = tempfile::tempdir().unwrap();
            let escaped = outside.path().join("escaped.txt");

            let script = format!(
                "printf leaked > '{}'; printf PNG > visual.png",
                escaped.display()
            );
            let result = confined_runner(base.path()).run(&script).await;

            assert!(!escaped.exists());
            // Without Landlock the script never starts
            match result {
                Ok(artifact) => assert_eq!(artifact.bytes(), b"PNG"),
                Err(e) => assert!(matches!(e, AppError::Sandbox(_))),
            }
            assert_eq!(entries(base.path()), 0);
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_reads_outside_scratch_dir_are_blocked() {
            let base = tempfile::tempdir().unwrap();
            let outside = tempfile::tempdir().unwrap();
            let secret = outside.path().join(".env");
            std::fs::write(&secret, "OPENAI_API_KEY=sk-local").unwrap();

            let script = format!(
                "cat '{}' > visual.png || printf denied > visual.png",
                secret.display()
            );
            match confined_runner(base.path()).run(&script).await {
                Ok(artifact) => assert_eq!(artifact.bytes(), b"denied"),
                Err(e) => assert!(matches!(e, AppError::Sandbox(_))),
            }
        }
    }
}
