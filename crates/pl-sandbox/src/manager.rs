//! Sandbox lifecycle manager.
//!
//! State (absent / stopped / running / unresponsive) is derived from fresh
//! probes on every operation; nothing is trusted across calls. Repair is
//! bounded: one forced recreate after a failed responsiveness check, then a
//! fatal error.

use std::sync::Arc;

use pl_sandbox_core::{Error, Result, SandboxBackend, SandboxStatus};

/// Drives one sandbox backend through its lifecycle.
pub struct SandboxManager {
    backend: Arc<dyn SandboxBackend>,
}

impl SandboxManager {
    pub fn new(backend: Arc<dyn SandboxBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn SandboxBackend> {
        &self.backend
    }

    /// Fresh probe snapshot.
    pub async fn status(&self) -> SandboxStatus {
        SandboxStatus {
            kind: self.backend.kind(),
            name: self.backend.name().to_string(),
            file_access: self.backend.file_access(),
            runtime_available: self.backend.runtime_available().await,
            image_ready: self.backend.image_ready().await,
            exists: self.backend.instance_exists().await,
            running: self.backend.is_responsive().await,
        }
    }

    /// Bring the sandbox to a confirmed-responsive state, building the
    /// image/installation and creating the instance as needed. Never
    /// returns `Ok` while the responsiveness probe answers false; performs
    /// at most one forced recreate before giving up.
    pub async fn ensure_ready(&self) -> Result<()> {
        if !self.backend.runtime_available().await {
            return Err(Error::tool_unavailable(
                self.backend.kind().to_string(),
                self.runtime_guidance(),
            ));
        }

        if !self.backend.image_ready().await {
            self.backend.build_image().await?;
        }

        if self.backend.is_responsive().await {
            return Ok(());
        }

        self.bring_up().await?;
        if self.backend.is_responsive().await {
            return Ok(());
        }

        println!(
            "Sandbox '{}' started but is unresponsive, recreating...",
            self.backend.name()
        );
        self.recreate().await?;
        if self.backend.is_responsive().await {
            return Ok(());
        }

        Err(Error::unresponsive(
            self.backend.name(),
            "The sandbox failed its responsiveness check twice. \
             Try 'pl env rebuild' to reconstruct it from scratch.",
        ))
    }

    /// Create (or adopt) the instance and start it. An existing instance
    /// whose recorded owner mapping no longer matches the current process is
    /// destroyed and recreated; silently reusing it would cause file-write
    /// failures later.
    async fn bring_up(&self) -> Result<()> {
        if self.backend.instance_exists().await {
            if self.backend.owner_matches().await {
                tracing::debug!(name = self.backend.name(), "reusing existing instance");
            } else {
                println!(
                    "Sandbox '{}' exists with a stale owner mapping, recreating...",
                    self.backend.name()
                );
                self.backend.remove_instance().await?;
                self.backend.create_instance().await?;
            }
        } else {
            self.backend.create_instance().await?;
        }
        self.backend.start_instance().await
    }

    /// Forced remove-and-recreate, the single self-heal step.
    pub async fn recreate(&self) -> Result<()> {
        if self.backend.instance_exists().await {
            self.backend.remove_instance().await?;
        }
        self.backend.create_instance().await?;
        self.backend.start_instance().await
    }

    /// Tear everything down and reconstruct from the environment
    /// definition.
    pub async fn rebuild(&self) -> Result<()> {
        println!("Rebuild requested - removing the existing sandbox...");
        if self.backend.instance_exists().await {
            self.backend.remove_instance().await?;
        }
        if self.backend.image_ready().await {
            if let Err(e) = self.backend.destroy_image().await {
                // A stale image does not block the rebuild; the fresh build
                // replaces the tag.
                tracing::warn!(error = %e, "failed to remove the old image, continuing");
            }
        }
        self.ensure_ready().await
    }

    /// Remove the instance and the image/installation.
    pub async fn teardown(&self) -> Result<()> {
        if self.backend.instance_exists().await {
            self.backend.remove_instance().await?;
        }
        if self.backend.image_ready().await {
            self.backend.destroy_image().await?;
        }
        Ok(())
    }

    /// Interpreter path inside the sandbox, when it can be determined.
    pub async fn python_path(&self) -> Option<String> {
        let out = self.backend.exec_captured("which python").await.ok()?;
        if !out.success() {
            return None;
        }
        let path = out.stdout_trimmed().to_string();
        (!path.is_empty()).then_some(path)
    }

    /// First lines of the installed-package listing, for status display.
    pub async fn packages_sample(&self, limit: usize) -> Vec<String> {
        match self.backend.exec_captured("pip list").await {
            Ok(out) if out.success() => out
                .stdout
                .lines()
                .take(limit)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn runtime_guidance(&self) -> String {
        match self.backend.kind() {
            pl_sandbox_core::BackendKind::Docker => {
                "Install Docker and make sure the daemon is running, \
                 or run with --no-docker to use the host Python."
                    .to_string()
            }
            pl_sandbox_core::BackendKind::Micromamba => {
                "Run 'pl env setup --backend mamba' to install micromamba locally.".to_string()
            }
        }
    }
}
