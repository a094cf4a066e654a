use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

/// Writes artifact files into the project tree.
///
/// Every write goes to a temp file in the destination directory and is then
/// renamed over the target, so a reader sees the old file or the new one and
/// never a partial write.
#[derive(Debug, Clone)]
pub struct Materializer {
    root: PathBuf,
}

impl Materializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `content` at `relative` under the root, replacing any previous
    /// file. Returns the absolute path.
    pub fn write(&self, relative: &Path, content: &str) -> io::Result<PathBuf> {
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path escapes project tree: {}", relative.display()),
            ));
        }

        let path = self.root.join(relative);
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }

    pub fn read(&self, relative: &Path) -> io::Result<String> {
        fs::read_to_string(self.root.join(relative))
    }
}
