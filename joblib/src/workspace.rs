//! Scoped temporary directories for one request's inputs and outputs.
//!
//! A [`Workspace`] is the sole owner of its directory tree. The tree is removed exactly once,
//! either by [`Workspace::close`] or when the workspace is dropped, so early returns, `?`,
//! panics and abandoned futures all release it.

use crate::error::{Error, Result};
use flate2::{write::GzEncoder, Compression};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};

/// Where workspaces are created.
#[derive(Clone, Debug)]
pub struct WorkspaceConfig {
    /// Parent directory; the system temp directory when unset.
    pub root: Option<PathBuf>,
    pub prefix: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            prefix: "analysis-job-".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    root: PathBuf,
}

impl Workspace {
    /// Creates a fresh, uniquely named, empty directory.
    pub fn open(config: &WorkspaceConfig) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&config.prefix);
        let created = match &config.root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        let dir = created.map_err(|source| Error::Workspace {
            root: config.root.clone().unwrap_or_else(std::env::temp_dir),
            source,
        })?;
        let root = dir.path().to_path_buf();
        debug!(workspace = %root.display(), "workspace opened");
        Ok(Self {
            dir: Some(dir),
            root,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Writes `content` to a new file named after the sanitized `name` and returns its path.
    ///
    /// Never overwrites an existing file.
    pub async fn stage<R>(&self, name: &str, content: R) -> Result<PathBuf>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.root.join(sanitize_filename(name)?);
        write_new(path, content).await
    }

    pub async fn stage_bytes(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        self.stage(name, content).await
    }

    /// Like [`Workspace::stage`], but inside the subdirectory `dir`, which is created on demand.
    pub async fn stage_in<R>(
        &self,
        dir: impl AsRef<Path>,
        name: &str,
        content: R,
    ) -> Result<PathBuf>
    where
        R: AsyncRead + Unpin,
    {
        let name = sanitize_filename(name)?;
        let dir = self.create_dir(dir).await?;
        write_new(dir.join(name), content).await
    }

    /// Absolute path for a file the job is expected to produce. The file need not exist.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let relative = relative.as_ref();
        let mut has_name = false;
        for component in relative.components() {
            match component {
                Component::Normal(_) => has_name = true,
                Component::CurDir => {}
                _ => return Err(Error::OutsideWorkspace(relative.to_path_buf())),
            }
        }
        if !has_name {
            return Err(Error::OutsideWorkspace(relative.to_path_buf()));
        }
        Ok(self.root.join(relative))
    }

    /// Resolves and creates a subdirectory, for tools that write into an output directory.
    pub async fn create_dir(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }

    /// The only regular file directly inside `dir`.
    pub async fn single_output(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = self.contain(dir.as_ref())?;
        let mut entries = tokio::fs::read_dir(self.root.join(&dir)).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        match files.len() {
            1 => Ok(files.remove(0)),
            found => Err(Error::OutputCardinality { found }),
        }
    }

    /// Bundles `paths` into a gzip compressed tar archive inside the workspace.
    ///
    /// Entries are named relative to the workspace root and written in the given order.
    pub async fn package(&self, paths: &[PathBuf], archive_name: &str) -> Result<PathBuf> {
        if paths.is_empty() {
            return Err(Error::InvalidName(archive_name.to_string()));
        }
        let archive = self.root.join(sanitize_filename(archive_name)?);
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let relative = self.contain(path)?;
            let absolute = self.root.join(&relative);
            if absolute == archive {
                return Err(Error::InvalidName(archive_name.to_string()));
            }
            entries.push((absolute, relative));
        }

        let target = archive.clone();
        let written = tokio::task::spawn_blocking(move || write_tar_gz(&target, &entries))
            .await
            .map_err(|join| io::Error::new(io::ErrorKind::Other, join))
            .and_then(|result| result);
        match written {
            Ok(()) => {
                debug!(archive = %archive.display(), files = paths.len(), "packaged outputs");
                Ok(archive)
            }
            Err(source) => Err(Error::Package { archive, source }),
        }
    }

    /// Recursively deletes the workspace. Failures are logged, never returned.
    pub fn close(mut self) {
        self.release();
    }

    /// Path of `path` relative to the root; `path` may be absolute under the root or relative.
    fn contain(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            let relative = path
                .strip_prefix(&self.root)
                .map_err(|_| Error::OutsideWorkspace(path.to_path_buf()))?;
            if relative.as_os_str().is_empty() {
                return Ok(PathBuf::from("."));
            }
            self.resolve(relative)?;
            Ok(relative.to_path_buf())
        } else {
            self.resolve(path)?;
            Ok(path.to_path_buf())
        }
    }

    fn release(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => debug!(workspace = %self.root.display(), "workspace removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(workspace = %self.root.display(), "workspace already gone")
            }
            Err(err) => warn!(
                workspace = %self.root.display(),
                %err,
                "failed to remove workspace"
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}

/// Neutralizes separators so the name cannot leave the workspace or address a sibling directory.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match sanitized.as_str() {
        "" | "." | ".." => Err(Error::InvalidName(name.to_string())),
        _ => Ok(sanitized),
    }
}

async fn write_new<R>(path: PathBuf, mut content: R) -> Result<PathBuf>
where
    R: AsyncRead + Unpin,
{
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await?;
    let written = tokio::io::copy(&mut content, &mut file).await?;
    file.flush().await?;
    debug!(path = %path.display(), bytes = written, "staged input");
    Ok(path)
}

fn write_tar_gz(archive: &Path, entries: &[(PathBuf, PathBuf)]) -> io::Result<()> {
    let file = fs::File::create(archive)?;
    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (absolute, relative) in entries {
        tar.append_path_with_name(absolute, relative)?;
    }
    tar.into_inner()?.finish()?.sync_all()
}
