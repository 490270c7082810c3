//! The pluggable workflow boundary.
//!
//! The orchestrator hands an accepted tag's workspace to a
//! [`WorkflowRunner`] and only cares whether it succeeded. What the runner
//! does - compile, containerize, publish - is its own business.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{BuildConfig, WorkflowKind};

/// Errors from a workflow invocation.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The workflow's tool is not installed or not executable.
    #[error("workflow tool unavailable: {0}")]
    ToolUnavailable(String),

    /// The workspace has no runnable workflow.
    #[error("no workflow found in workspace: {0}")]
    NoWorkflow(String),

    /// The workflow ran and failed.
    #[error("workflow failed: {0}")]
    Failed(String),
}

/// Pluggable build/deploy step invoked per accepted tag.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    /// Run the workflow against a checked-out workspace.
    async fn run(&self, workspace: &Path, tag: &str, commit: &str) -> Result<(), WorkflowError>;

    /// Short name for log lines.
    fn name(&self) -> &str;
}

/// Build a runner from configuration.
#[must_use]
pub fn runner_for(config: &BuildConfig) -> Box<dyn WorkflowRunner> {
    match config.workflow {
        WorkflowKind::Auto => Box::new(AutoWorkflow::new(config.docker_image.clone())),
        WorkflowKind::Script => Box::new(ScriptWorkflow),
        WorkflowKind::Make => Box::new(MakeWorkflow),
        WorkflowKind::Docker => Box::new(DockerWorkflow::new(
            config.docker_image.clone().unwrap_or_else(|| "tagwatch-build".to_string()),
        )),
    }
}

async fn run_command(
    program: &str,
    args: &[&str],
    cwd: &Path,
) -> Result<(), WorkflowError> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| WorkflowError::ToolUnavailable(format!("{program}: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(WorkflowError::Failed(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }
}

async fn tool_available(program: &str) -> bool {
    tokio::process::Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Runs the workspace's `workflows/build.sh`.
pub struct ScriptWorkflow;

/// Relative path of the build script a workspace may carry.
pub const BUILD_SCRIPT: &str = "workflows/build.sh";

#[async_trait]
impl WorkflowRunner for ScriptWorkflow {
    async fn run(&self, workspace: &Path, tag: &str, commit: &str) -> Result<(), WorkflowError> {
        let script = workspace.join(BUILD_SCRIPT);
        if !script.exists() {
            return Err(WorkflowError::NoWorkflow(format!("{BUILD_SCRIPT} not present")));
        }

        tracing::info!(tag, script = %script.display(), "Running build script");
        let output = tokio::process::Command::new("sh")
            .arg(&script)
            .env("TAGWATCH_TAG", tag)
            .env("TAGWATCH_COMMIT", commit)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| WorkflowError::ToolUnavailable(format!("sh: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(WorkflowError::Failed(format!(
                "build script exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }

    fn name(&self) -> &str {
        "script"
    }
}

/// Runs `make` against the workspace Makefile.
pub struct MakeWorkflow;

#[async_trait]
impl WorkflowRunner for MakeWorkflow {
    async fn run(&self, workspace: &Path, tag: &str, _commit: &str) -> Result<(), WorkflowError> {
        if !tool_available("make").await {
            return Err(WorkflowError::ToolUnavailable("make is not installed".to_string()));
        }
        if !workspace.join("Makefile").exists() && !workspace.join("makefile").exists() {
            return Err(WorkflowError::NoWorkflow("no Makefile in workspace".to_string()));
        }

        tracing::info!(tag, "Running make");
        run_command("make", &[], workspace).await
    }

    fn name(&self) -> &str {
        "make"
    }
}

/// Runs `docker build` in the workspace, tagging the image with the tag name.
pub struct DockerWorkflow {
    image: String,
}

impl DockerWorkflow {
    /// Create a docker workflow producing `image:tag` images.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self { image: image.into() }
    }
}

#[async_trait]
impl WorkflowRunner for DockerWorkflow {
    async fn run(&self, workspace: &Path, tag: &str, _commit: &str) -> Result<(), WorkflowError> {
        if !tool_available("docker").await {
            return Err(WorkflowError::ToolUnavailable("docker is not installed".to_string()));
        }
        if !workspace.join("Dockerfile").exists() {
            return Err(WorkflowError::NoWorkflow("no Dockerfile in workspace".to_string()));
        }

        let image_tag = format!("{}:{}", self.image, tag);
        tracing::info!(tag, image = %image_tag, "Running docker build");
        run_command("docker", &["build", "-t", &image_tag, "."], workspace).await
    }

    fn name(&self) -> &str {
        "docker"
    }
}

/// Probes the workspace and picks a runner: build script, then Makefile,
/// then Dockerfile.
pub struct AutoWorkflow {
    docker_image: Option<String>,
}

impl AutoWorkflow {
    /// Create an auto-detecting workflow.
    #[must_use]
    pub fn new(docker_image: Option<String>) -> Self {
        Self { docker_image }
    }

    fn detect(&self, workspace: &Path) -> Option<Box<dyn WorkflowRunner>> {
        if workspace.join(BUILD_SCRIPT).exists() {
            return Some(Box::new(ScriptWorkflow));
        }
        if workspace.join("Makefile").exists() || workspace.join("makefile").exists() {
            return Some(Box::new(MakeWorkflow));
        }
        if workspace.join("Dockerfile").exists() {
            let image =
                self.docker_image.clone().unwrap_or_else(|| "tagwatch-build".to_string());
            return Some(Box::new(DockerWorkflow::new(image)));
        }
        None
    }
}

#[async_trait]
impl WorkflowRunner for AutoWorkflow {
    async fn run(&self, workspace: &Path, tag: &str, commit: &str) -> Result<(), WorkflowError> {
        match self.detect(workspace) {
            Some(runner) => {
                tracing::debug!(tag, runner = runner.name(), "Workflow auto-detected");
                runner.run(workspace, tag, commit).await
            }
            None => Err(WorkflowError::NoWorkflow(
                "no build script, Makefile, or Dockerfile in workspace".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "auto"
    }
}
