//! Per-agent sandboxes.
//!
//! Each agent gets an isolated directory under a common base; the
//! instruction file is injected at the sandbox root before every spawn.
//! Sandbox paths never overlap between agents, and relative paths are
//! confined to the sandbox.

use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::domain::errors::{OrchestrationError, OrchestrationResult};

/// Name of the per-agent instruction file.
pub const INSTRUCTION_FILE: &str = "CLAUDE.md";

/// Sandbox directory manager.
pub struct Workspace {
    base_dir: PathBuf,
}

impl Workspace {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn sandbox_path(&self, agent_id: &str) -> PathBuf {
        self.base_dir.join(agent_id)
    }

    /// Create (or re-create, when `clean`) the agent's sandbox directory.
    pub async fn create_sandbox(&self, agent_id: &str, clean: bool) -> OrchestrationResult<PathBuf> {
        let path = self.sandbox_path(agent_id);
        if clean && path.exists() {
            tokio::fs::remove_dir_all(&path).await.map_err(|e| {
                OrchestrationError::workspace(Some(agent_id), Some(path.clone()), e.to_string())
            })?;
        }
        tokio::fs::create_dir_all(&path).await.map_err(|e| {
            OrchestrationError::workspace(Some(agent_id), Some(path.clone()), e.to_string())
        })?;
        debug!(agent_id, path = %path.display(), "sandbox ready");
        Ok(path)
    }

    /// Write the instruction file at the sandbox root.
    pub async fn inject_claude_md(&self, agent_id: &str, content: &str) -> OrchestrationResult<()> {
        self.write_file(agent_id, INSTRUCTION_FILE, content).await
    }

    /// Write a file inside the sandbox. `relative` must stay inside it.
    pub async fn write_file(
        &self,
        agent_id: &str,
        relative: &str,
        content: &str,
    ) -> OrchestrationResult<()> {
        let path = self.resolve(agent_id, relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                OrchestrationError::workspace(Some(agent_id), Some(path.clone()), e.to_string())
            })?;
        }
        tokio::fs::write(&path, content).await.map_err(|e| {
            OrchestrationError::workspace(Some(agent_id), Some(path.clone()), e.to_string())
        })
    }

    pub async fn read_file(&self, agent_id: &str, relative: &str) -> OrchestrationResult<String> {
        let path = self.resolve(agent_id, relative)?;
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            OrchestrationError::workspace(Some(agent_id), Some(path.clone()), e.to_string())
        })
    }

    /// Copy files from outside into the sandbox, preserving relative paths
    /// under `src_root`.
    pub async fn copy_files_to_sandbox(
        &self,
        agent_id: &str,
        src_root: &Path,
        files: &[PathBuf],
    ) -> OrchestrationResult<()> {
        for file in files {
            let relative = file.strip_prefix(src_root).unwrap_or(file.as_path());
            let dest = self.resolve(agent_id, &relative.to_string_lossy())?;
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    OrchestrationError::workspace(Some(agent_id), Some(dest.clone()), e.to_string())
                })?;
            }
            tokio::fs::copy(file, &dest).await.map_err(|e| {
                OrchestrationError::workspace(Some(agent_id), Some(dest.clone()), e.to_string())
            })?;
        }
        Ok(())
    }

    pub async fn cleanup_sandbox(&self, agent_id: &str) -> OrchestrationResult<()> {
        let path = self.sandbox_path(agent_id);
        if path.exists() {
            tokio::fs::remove_dir_all(&path).await.map_err(|e| {
                OrchestrationError::workspace(Some(agent_id), Some(path.clone()), e.to_string())
            })?;
            info!(agent_id, "sandbox removed");
        }
        Ok(())
    }

    pub async fn cleanup_all(&self) -> OrchestrationResult<()> {
        if self.base_dir.exists() {
            tokio::fs::remove_dir_all(&self.base_dir).await.map_err(|e| {
                OrchestrationError::workspace(None, Some(self.base_dir.clone()), e.to_string())
            })?;
        }
        Ok(())
    }

    /// Join a relative path onto the sandbox root, rejecting traversal.
    fn resolve(&self, agent_id: &str, relative: &str) -> OrchestrationResult<PathBuf> {
        let rel = Path::new(relative);
        let escapes = rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir));
        if escapes {
            return Err(OrchestrationError::workspace(
                Some(agent_id),
                Some(rel.to_path_buf()),
                "path escapes the sandbox",
            ));
        }
        Ok(self.sandbox_path(agent_id).join(rel))
    }
}
