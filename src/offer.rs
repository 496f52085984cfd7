//! Offer manifests: an aggregate and the ordered pieces it is built from

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::piece::PieceCid;

/// Aggregate identifier plus its pieces in layout order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Declared aggregate
    pub aggregate: PieceCid,
    /// Pieces in the order they were aggregated
    pub pieces: Vec<PieceCid>,
}

impl Offer {
    /// Read an offer from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("offer {}", path.display())),
            _ => Error::Io(e),
        })?;
        Self::from_json(&text)
    }

    /// Parse an offer from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let offer: Offer = serde_json::from_str(text)
            .map_err(|e| Error::InvalidInput(format!("malformed offer: {e}")))?;
        if offer.pieces.is_empty() {
            return Err(Error::InvalidInput("offer lists no pieces".to_string()));
        }
        Ok(offer)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::PieceHasher;

    fn piece(byte: u8) -> PieceCid {
        let mut hasher = PieceHasher::new();
        hasher.update(&[byte; 200]);
        hasher.link()
    }

    #[test]
    fn parses_and_ignores_unknown_fields() {
        let json = format!(
            r#"{{"aggregate":"{}","pieces":["{}","{}"],"tags":{{"deal":1}}}}"#,
            piece(0),
            piece(1),
            piece(2)
        );
        let offer = Offer::from_json(&json).unwrap();
        assert_eq!(offer.aggregate, piece(0));
        assert_eq!(offer.pieces, vec![piece(1), piece(2)]);
    }

    #[test]
    fn empty_piece_list_is_invalid() {
        let json = format!(r#"{{"aggregate":"{}","pieces":[]}}"#, piece(0));
        assert!(matches!(
            Offer::from_json(&json).unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[test]
    fn bad_piece_string_is_invalid() {
        let json = format!(r#"{{"aggregate":"{}","pieces":["nope"]}}"#, piece(0));
        assert!(matches!(
            Offer::from_json(&json).unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Offer::from_path(dir.path().join("offer.json")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "{err}");
    }
}
