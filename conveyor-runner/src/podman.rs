//! Podman container management
//!
//! Handles container lifecycle for job execution:
//! - Checking podman availability
//! - Starting one long-lived container per command job
//! - Running shell commands in it, streaming their output into job logs
//! - Running one-shot containers (source checkouts)
//! - Removing the container when the job ends, even when it is aborted

use anyhow::{Context as _, Result};
use conveyor_core::domain::log::LogLevel;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::Context;

/// Working directory of every job container
pub const WORKSPACE_DIR: &str = "/workspace";

/// Checks if podman is installed and available
pub fn check_podman_available() -> Result<()> {
    let output = std::process::Command::new("podman")
        .arg("--version")
        .output()
        .context("Failed to execute 'podman --version'. Is podman installed?")?;

    if !output.status.success() {
        anyhow::bail!("Podman is not working correctly");
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Podman is available: {}", version.trim());

    Ok(())
}

/// A host directory bind-mounted into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_write(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            read_only: true,
            ..Self::read_write(source, target)
        }
    }

    fn volume_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.source.display(), self.target);
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

/// Everything needed to start a job container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub privileged: bool,
    pub mounts: Vec<Mount>,
    pub env: Vec<(String, String)>,
}

impl ContainerSpec {
    pub fn new(job_id: Uuid, image: impl Into<String>) -> Self {
        Self {
            name: container_name(job_id),
            image: image.into(),
            privileged: false,
            mounts: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Arguments of the `podman run` that starts the container
    ///
    /// The entrypoint is replaced by a shell that sleeps, so images with
    /// custom entrypoints still accept `exec`.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--entrypoint".to_string(),
            "/bin/sh".to_string(),
        ];

        if self.privileged {
            args.push("--privileged".to_string());
        }

        for mount in &self.mounts {
            args.push("-v".to_string());
            args.push(mount.volume_arg());
        }

        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.extend([
            "-w".to_string(),
            WORKSPACE_DIR.to_string(),
            self.image.clone(),
            "-c".to_string(),
            "sleep infinity".to_string(),
        ]);
        args
    }
}

/// A running job container
///
/// The container is force-removed on drop, which also covers jobs aborted
/// by a timeout.
pub struct Container {
    name: String,
}

impl Container {
    /// Starts a container and waits until it is running
    pub async fn start(spec: &ContainerSpec) -> Result<Self> {
        info!("Creating container {} from image {}", spec.name, spec.image);

        let output = Command::new("podman")
            .args(spec.run_args())
            .stdin(Stdio::null())
            .output()
            .await
            .context("Failed to execute podman run command")?;

        // From here on the container may exist and must be removed
        let container = Self {
            name: spec.name.clone(),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            anyhow::bail!(
                "Failed to start container from image {}: exit_code={}, stderr='{}'",
                spec.image,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        debug!("Container {} started with ID {}", spec.name, stdout.trim());
        Ok(container)
    }

    /// Runs a shell command in the workspace of the container
    ///
    /// Output lines go to the job log as they arrive. Returns the exit code.
    pub async fn exec_shell(&self, command: &str, ctx: &Context) -> Result<i32> {
        debug!("Executing in container {}: {}", self.name, command);

        let child = Command::new("podman")
            .args(["exec", "-w", WORKSPACE_DIR, &self.name, "sh", "-c", command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to execute podman exec command")?;

        let status = stream_output(child, ctx).await?;
        Ok(exit_code(status))
    }

    /// Removes the container, stopping it if needed
    pub fn remove(&self) {
        let result = std::process::Command::new("podman")
            .args(["rm", "-f", "-t", "0", &self.name])
            .stdout(Stdio::null())
            .output();

        match result {
            Ok(output) if output.status.success() => {
                debug!("Container {} removed", self.name);
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!("Failed to remove container {}: {}", self.name, stderr.trim());
            }
            Err(e) => {
                warn!("Failed to remove container {}: {}", self.name, e);
            }
        }
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Runs a throwaway container to completion, streaming its output
///
/// `args` follow the image name, so they go to the image's entrypoint.
pub async fn run_once(
    image: &str,
    mounts: &[Mount],
    args: &[String],
    ctx: &Context,
) -> Result<i32> {
    let mut command = Command::new("podman");
    command.args(["run", "--rm"]);

    for mount in mounts {
        command.arg("-v").arg(mount.volume_arg());
    }

    let child = command
        .arg(image)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("Failed to execute podman run command")?;

    let status = stream_output(child, ctx).await?;
    Ok(exit_code(status))
}

/// Name of the container of a job
pub fn container_name(job_id: Uuid) -> String {
    format!("conveyor-{}", job_id)
}

/// Forwards stdout and stderr line by line until the process exits
async fn stream_output(mut child: Child, ctx: &Context) -> Result<ExitStatus> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (status, _, _) = tokio::join!(
        child.wait(),
        forward_lines(stdout, ctx, LogLevel::Info),
        forward_lines(stderr, ctx, LogLevel::Warning),
    );

    status.context("Failed to wait for podman")
}

async fn forward_lines<R>(reader: Option<R>, ctx: &Context, level: LogLevel)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };

    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => ctx.log(level, line),
            Ok(None) => break,
            Err(e) => {
                ctx.log_warning(format!("Output stream error: {}", e));
                break;
            }
        }
    }
}

/// Exit code of a finished process; killed processes report 128 + signal
/// where the platform knows it, 1 otherwise
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
