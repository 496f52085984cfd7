//! Where the local copy of each piece lives

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::piece::PieceCid;

/// Maps pieces to local artifact paths
pub trait ArtifactSource: Send + Sync {
    /// Path expected to hold `piece`
    fn locate(&self, piece: &PieceCid) -> PathBuf;
}

/// Directory of `<piece>.car` files
#[derive(Clone, Debug)]
pub struct CarDirectory {
    dir: PathBuf,
}

impl CarDirectory {
    /// Artifacts under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory searched
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Default for CarDirectory {
    fn default() -> Self {
        Self::new(".")
    }
}

impl ArtifactSource for CarDirectory {
    fn locate(&self, piece: &PieceCid) -> PathBuf {
        self.dir.join(format!("{piece}.car"))
    }
}

/// Infer the declared piece from an artifact named `<piece>.car`
pub fn piece_from_path(path: &Path) -> Result<PieceCid> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            Error::InvalidInput(format!("cannot infer a piece from {}", path.display()))
        })?;
    PieceCid::parse(stem).map_err(|e| {
        Error::InvalidInput(format!(
            "cannot infer a piece from {}: {e}",
            path.display()
        ))
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::PieceHasher;

    fn piece() -> PieceCid {
        let mut hasher = PieceHasher::new();
        hasher.update(b"artifact");
        hasher.link()
    }

    #[test]
    fn car_directory_names_files_after_pieces() {
        let piece = piece();
        let source = CarDirectory::new("/data/cars");
        assert_eq!(
            source.locate(&piece),
            PathBuf::from(format!("/data/cars/{piece}.car"))
        );
        assert_eq!(CarDirectory::default().dir(), Path::new("."));
    }

    #[test]
    fn piece_is_inferred_from_file_stem() {
        let piece = piece();
        let path = PathBuf::from(format!("/tmp/{piece}.car"));
        assert_eq!(piece_from_path(&path).unwrap(), piece);
    }

    #[test]
    fn unrelated_file_name_is_invalid_input() {
        let err = piece_from_path(Path::new("/tmp/download.car")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{err}");
    }
}
