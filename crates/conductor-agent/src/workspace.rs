//! Execution-scoped workspace directories.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use conductor_core::error::{ConductorError, Result};

pub const INPUTS_DIR: &str = "inputs";
pub const OUTPUTS_DIR: &str = "outputs";

/// Join `rel` onto `base`, refusing absolute paths and `..` escapes.
///
/// The check is lexical, so it also works for files that do not exist yet.
pub fn safe_join(base: &Path, rel: &str) -> Result<PathBuf> {
    let mut depth = 0usize;
    let mut joined = base.to_path_buf();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => {
                joined.pop();
                depth -= 1;
            }
            _ => {
                return Err(ConductorError::Workspace(format!(
                    "Path '{rel}' is outside '{}'",
                    base.display()
                )));
            }
        }
    }
    if depth == 0 {
        return Err(ConductorError::Workspace(format!("Empty path: '{rel}'")));
    }
    Ok(joined)
}

/// The directory one execution reads inputs from and writes artifacts to.
///
/// Layout: `<root>/<execution_id>/{inputs,outputs}`.
#[derive(Debug, Clone)]
pub struct Workspace {
    execution_id: String,
    path: PathBuf,
}

impl Workspace {
    pub async fn create(root: &Path, execution_id: &str) -> Result<Self> {
        let path = safe_join(root, execution_id)?;
        if path.parent() != Some(root) {
            return Err(ConductorError::Workspace(format!(
                "invalid execution id: {execution_id}"
            )));
        }
        tokio::fs::create_dir_all(path.join(INPUTS_DIR)).await?;
        tokio::fs::create_dir_all(path.join(OUTPUTS_DIR)).await?;
        debug!(execution_id, path = %path.display(), "Created workspace");
        Ok(Self {
            execution_id: execution_id.to_string(),
            path,
        })
    }

    /// Wrap a directory that was created earlier, without touching it.
    pub fn existing(execution_id: &str, path: PathBuf) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            path,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.path.join(INPUTS_DIR)
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.path.join(OUTPUTS_DIR)
    }

    /// Resolve a workspace-relative path.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf> {
        safe_join(&self.path, rel)
    }

    /// Copy `src` to `inputs/<name>`, creating parent directories.
    pub async fn copy_input(&self, src: &Path, name: &str) -> Result<PathBuf> {
        let dest = safe_join(&self.inputs_dir(), name)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(src, &dest).await?;
        Ok(dest)
    }

    /// Write `outputs/<rel>`.
    pub async fn write_output(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let dest = safe_join(&self.outputs_dir(), rel)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, contents).await?;
        Ok(dest)
    }

    /// Every file in the workspace, relative to its root, sorted.
    pub async fn list_files(&self) -> Result<Vec<String>> {
        list_relative(&self.path).await
    }

    /// Files under one subdirectory, relative to that subdirectory.
    pub async fn list_dir(&self, rel: &str) -> Result<Vec<String>> {
        let dir = self.resolve(rel)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        list_relative(&dir).await
    }

    /// Delete the whole directory. A directory that is already gone is fine.
    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn list_relative(base: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![base.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if let Ok(rel) = path.strip_prefix(base) {
                let parts: Vec<_> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push(parts.join("/"));
            }
        }
    }
    files.sort();
    Ok(files)
}
