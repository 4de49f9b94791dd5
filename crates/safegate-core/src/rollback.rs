//! File-level checkpoints and rollback.
//!
//! Layout: `<workspace>/.checkpoints/<checkpoint_id>/` mirrors the relative
//! paths of the backed-up files and holds a `manifest.json` listing them.
//!
//! Backup is best-effort: missing files, symlinks, non-files and paths that
//! resolve outside the workspace are left out of the manifest without error.
//! Gateway state (`.checkpoints`, `.safegate` and any registered protected
//! path such as the audit log) is never backed up or restored.
//! Restore re-validates every manifest entry, so a tampered manifest cannot
//! write outside the workspace, and it never writes through a symlink.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::STATE_DIR_NAME;
use crate::obs::{emit_checkpoint_created, emit_rollback_finished};
use crate::sandbox::{anchor, resolve_lenient};

pub const CHECKPOINT_DIR_NAME: &str = ".checkpoints";
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

const CHECKPOINT_ID_FORMAT: &str = "%Y%m%dT%H%M%S%6fZ";

/// Errors from checkpoint I/O.
#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Result type for rollback operations.
pub type RollbackResult<T> = std::result::Result<T, RollbackError>;

/// One backed-up file, as a workspace-relative POSIX path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
}

/// Sidecar listing the files a checkpoint holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub files: Vec<ManifestEntry>,
}

/// Outcome of a rollback request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub success: bool,
    pub checkpoint_id: String,
    pub restored_files: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RollbackReport {
    fn not_found(checkpoint_id: &str) -> Self {
        Self {
            success: false,
            checkpoint_id: checkpoint_id.to_string(),
            restored_files: 0,
            reason: Some(format!("Checkpoint not found: {checkpoint_id}")),
        }
    }
}

/// Creates and restores workspace-local checkpoints.
#[derive(Debug, Clone)]
pub struct RollbackManager {
    workspace_dir: PathBuf,
    checkpoint_root: PathBuf,
    protected: Vec<PathBuf>,
}

impl RollbackManager {
    /// Create a manager for `workspace_dir`. The workspace must exist; the
    /// checkpoint root is created if needed.
    pub fn new(workspace_dir: impl AsRef<Path>) -> RollbackResult<Self> {
        let workspace_dir = workspace_dir.as_ref().canonicalize()?;
        let checkpoint_root = workspace_dir.join(CHECKPOINT_DIR_NAME);
        fs::create_dir_all(&checkpoint_root)?;
        Ok(Self {
            workspace_dir,
            checkpoint_root,
            protected: Vec::new(),
        })
    }

    /// Exclude `path` from every checkpoint and restore. Relative paths are
    /// taken from the workspace root.
    pub fn with_protected_path(mut self, path: impl AsRef<Path>) -> Self {
        let anchored = anchor(path.as_ref(), &self.workspace_dir);
        let resolved = resolve_lenient(&anchored).unwrap_or(anchored);
        self.protected.push(resolved);
        self
    }

    pub fn protected_paths(&self) -> &[PathBuf] {
        &self.protected
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    pub fn checkpoint_root(&self) -> &Path {
        &self.checkpoint_root
    }

    /// Back up the given files and return the new checkpoint id.
    ///
    /// Relative paths are taken from the workspace root.
    pub fn create_checkpoint(&self, paths: &[PathBuf]) -> RollbackResult<String> {
        let (checkpoint_id, checkpoint_dir) = self.allocate_checkpoint_dir()?;

        let mut seen = BTreeSet::new();
        let mut manifest = CheckpointManifest::default();
        for path in paths {
            let Some((source, rel)) = self.backup_source(path) else {
                debug!(path = %path.display(), "skipping non-backable checkpoint candidate");
                continue;
            };
            if !seen.insert(rel.clone()) {
                continue;
            }
            let target = checkpoint_dir.join(&rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&source, &target)?;
            manifest.files.push(ManifestEntry { path: rel });
        }

        write_manifest(&checkpoint_dir, &manifest)?;
        emit_checkpoint_created(&checkpoint_id, manifest.files.len());
        Ok(checkpoint_id)
    }

    /// Restore every file listed in the checkpoint's manifest.
    ///
    /// A missing checkpoint is reported as `success = false`, not an error.
    pub fn rollback(&self, checkpoint_id: &str) -> RollbackResult<RollbackReport> {
        let Some(checkpoint_dir) = self.checkpoint_dir(checkpoint_id) else {
            return Ok(RollbackReport::not_found(checkpoint_id));
        };
        let manifest_path = checkpoint_dir.join(MANIFEST_FILE_NAME);
        if !manifest_path.is_file() {
            return Ok(RollbackReport::not_found(checkpoint_id));
        }
        let manifest: CheckpointManifest = serde_json::from_slice(&fs::read(&manifest_path)?)?;

        let mut restored = 0;
        for entry in &manifest.files {
            let Some(rel) = safe_relative(&entry.path) else {
                warn!(path = %entry.path, "manifest entry is not a plain relative path");
                continue;
            };
            let dest = self.workspace_dir.join(&rel);
            if self.is_protected(&rel, &dest) {
                warn!(path = %entry.path, "manifest entry names gateway state");
                continue;
            }
            if !self.parent_inside_workspace(&dest) {
                warn!(path = %entry.path, "manifest entry resolves outside workspace");
                continue;
            }
            let source = checkpoint_dir.join(&rel);
            if !is_plain_file(&source) {
                continue;
            }

            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            if fs::symlink_metadata(&dest).is_ok_and(|m| m.file_type().is_symlink()) {
                fs::remove_file(&dest)?;
            }
            fs::write(&dest, fs::read(&source)?)?;
            restored += 1;
        }

        emit_rollback_finished(checkpoint_id, restored);
        Ok(RollbackReport {
            success: true,
            checkpoint_id: checkpoint_id.to_string(),
            restored_files: restored,
            reason: None,
        })
    }

    /// Ids of every checkpoint with a manifest, oldest first.
    pub fn list_checkpoints(&self) -> RollbackResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.checkpoint_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if !entry.path().join(MANIFEST_FILE_NAME).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Read a checkpoint's manifest, or `None` if it does not exist.
    pub fn load_manifest(&self, checkpoint_id: &str) -> RollbackResult<Option<CheckpointManifest>> {
        let Some(dir) = self.checkpoint_dir(checkpoint_id) else {
            return Ok(None);
        };
        match fs::read(dir.join(MANIFEST_FILE_NAME)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn checkpoint_dir(&self, checkpoint_id: &str) -> Option<PathBuf> {
        let mut components = Path::new(checkpoint_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(self.checkpoint_root.join(checkpoint_id)),
            _ => None,
        }
    }

    fn allocate_checkpoint_dir(&self) -> RollbackResult<(String, PathBuf)> {
        fs::create_dir_all(&self.checkpoint_root)?;
        let base = Utc::now().format(CHECKPOINT_ID_FORMAT).to_string();
        let mut suffix = 0u32;
        loop {
            let id = if suffix == 0 {
                base.clone()
            } else {
                format!("{base}-{suffix}")
            };
            let dir = self.checkpoint_root.join(&id);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((id, dir)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Resolve a candidate to `(absolute source, relative posix path)` if it
    /// is an existing regular file inside the workspace and not a symlink.
    fn backup_source(&self, path: &Path) -> Option<(PathBuf, String)> {
        let candidate = anchor(path, &self.workspace_dir);
        if !is_plain_file(&candidate) {
            return None;
        }
        let resolved = candidate.canonicalize().ok()?;
        let rel = resolved.strip_prefix(&self.workspace_dir).ok()?;
        if self.is_protected(rel, &resolved) {
            return None;
        }
        to_posix(rel).map(|posix| (resolved.clone(), posix))
    }

    /// `rel` is workspace-relative, `abs` the same file as an absolute path.
    fn is_protected(&self, rel: &Path, abs: &Path) -> bool {
        if rel.starts_with(CHECKPOINT_DIR_NAME) || rel.starts_with(STATE_DIR_NAME) {
            return true;
        }
        if self.protected.iter().any(|p| p == abs) {
            return true;
        }
        resolve_lenient(abs).is_ok_and(|r| self.protected.contains(&r))
    }

    fn parent_inside_workspace(&self, dest: &Path) -> bool {
        let Some(parent) = dest.parent() else {
            return false;
        };
        resolve_lenient(parent).is_ok_and(|p| p.starts_with(&self.workspace_dir))
    }
}

fn is_plain_file(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_file())
}

fn to_posix(rel: &Path) -> Option<String> {
    let parts = rel
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Accept only non-empty paths made of plain components.
fn safe_relative(raw: &str) -> Option<PathBuf> {
    let path = Path::new(raw);
    if raw.is_empty() || path.is_absolute() {
        return None;
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() || out.starts_with(CHECKPOINT_DIR_NAME) {
        return None;
    }
    Some(out)
}

fn write_manifest(checkpoint_dir: &Path, manifest: &CheckpointManifest) -> RollbackResult<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    let mut tmp = NamedTempFile::new_in(checkpoint_dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.persist(checkpoint_dir.join(MANIFEST_FILE_NAME))
        .map_err(|e| e.error)?;
    Ok(())
}
