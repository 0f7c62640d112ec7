//! EXR export of training frames.
//!
//! Layout: `<root>/<session>/{sample}_{index:04}_{In|Out}.exr`.

use std::path::{Path, PathBuf};

use crate::util::{Error, FloatImage, Result};

/// Which half of a training pair a frame is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// Single-pass noisy render
    Input,
    /// Converged render
    Output,
}

impl ExportKind {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Input => "In",
            Self::Output => "Out",
        }
    }
}

/// Writes training frames below a session directory.
#[derive(Debug, Clone)]
pub struct ExrExporter {
    root: PathBuf,
    session: String,
}

impl ExrExporter {
    pub fn new(root: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self { root: root.into(), session: session.into() }
    }

    /// Default training root in the user's local data dir.
    pub fn default_root() -> PathBuf {
        dirs::data_local_dir()
            .map(|p| p.join("rt2d").join("training"))
            .unwrap_or_else(|| PathBuf::from("training"))
    }

    pub fn session_dir(&self) -> PathBuf {
        self.root.join(&self.session)
    }

    pub fn file_name(sample: &str, index: usize, kind: ExportKind) -> String {
        format!("{sample}_{index:04}_{}.exr", kind.suffix())
    }

    pub fn path_for(&self, sample: &str, index: usize, kind: ExportKind) -> PathBuf {
        self.session_dir().join(Self::file_name(sample, index, kind))
    }

    /// Write `image`, creating the session directory if needed.
    pub fn export(&self, image: &FloatImage, sample: &str, index: usize, kind: ExportKind) -> Result<PathBuf> {
        let dir = self.session_dir();
        ensure_dir(&dir)?;
        let path = dir.join(Self::file_name(sample, index, kind));
        image.save_exr(&path)?;
        tracing::debug!(path = %path.display(), "exported training frame");
        Ok(path)
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        tracing::error!("cannot create {}: {e}", dir.display());
        Error::ExportDir(dir.to_path_buf())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming() {
        assert_eq!(ExrExporter::file_name("Test", 7, ExportKind::Input), "Test_0007_In.exr");
        assert_eq!(ExrExporter::file_name("Test", 12345, ExportKind::Output), "Test_12345_Out.exr");
        let exporter = ExrExporter::new("/tmp/root", "BasicTraining");
        assert_eq!(
            exporter.path_for("A", 1, ExportKind::Output),
            PathBuf::from("/tmp/root/BasicTraining/A_0001_Out.exr")
        );
    }

    #[test]
    fn test_export_creates_session_dir() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ExrExporter::new(dir.path(), "session");
        let mut image = FloatImage::new(3, 2);
        image.set(2, 1, [1.5, 0.25, 8.0, 1.0]);
        let path = exporter.export(&image, "Test", 0, ExportKind::Input).unwrap();
        assert!(path.ends_with("session/Test_0000_In.exr"));
        let back = FloatImage::load(&path).unwrap();
        assert_eq!(back, image);
    }
}
