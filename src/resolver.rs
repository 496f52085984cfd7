//! Piece location lookups
//!
//! The lookup service answers `GET <endpoint>/<piece>` with a redirect whose
//! `Location` names the CAR file holding the piece. The first path segment of
//! that location is the CAR's CID, and its sha2-256 multihash is the checksum
//! a downloader verifies against.

use async_trait::async_trait;
use cid::Cid;
use reqwest::header::LOCATION;
use reqwest::redirect;
use url::Url;

use crate::config::{ResolverConfig, RetryConfig};
use crate::error::{Error, ResolveError, Result};
use crate::piece::PieceCid;
use crate::retry::with_retry;
use crate::types::ResolvedLocation;

/// Multihash code of sha2-256
const SHA2_256: u64 = 0x12;

/// Anything that can turn a piece into a download location
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Resolve one piece
    async fn resolve(&self, piece: &PieceCid) -> Result<ResolvedLocation>;
}

/// Resolver backed by a redirect-based HTTP lookup service
#[derive(Clone, Debug)]
pub struct LocationResolver {
    client: reqwest::Client,
    endpoint: Url,
    expected_status: u16,
    retry: RetryConfig,
}

impl LocationResolver {
    /// Build a resolver; redirects are never followed so the `Location` can be read
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Other(format!("failed to create HTTP client: {e}")))?;

        let mut endpoint = config.endpoint.clone();
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self {
            client,
            endpoint,
            expected_status: config.expected_status,
            retry: config.retry.clone(),
        })
    }

    /// Lookup service base URL, always ending in `/`
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// URL queried for `piece`
    pub fn lookup_url(&self, piece: &PieceCid) -> Result<Url> {
        self.endpoint
            .join(&piece.to_string())
            .map_err(|e| Error::InvalidInput(format!("cannot build lookup URL for {piece}: {e}")))
    }

    async fn resolve_once(
        &self,
        lookup: &Url,
        piece: &PieceCid,
    ) -> std::result::Result<ResolvedLocation, ResolveError> {
        let response = self.client.get(lookup.clone()).send().await?;

        let status = response.status().as_u16();
        if status != self.expected_status {
            return Err(ResolveError::UnexpectedStatus {
                status,
                expected: self.expected_status,
            });
        }

        let header = response
            .headers()
            .get(LOCATION)
            .ok_or(ResolveError::MissingLocation)?;
        let location = header.to_str().map_err(|e| ResolveError::MalformedLocation {
            location: String::from_utf8_lossy(header.as_bytes()).into_owned(),
            reason: e.to_string(),
        })?;
        let malformed = |reason: String| ResolveError::MalformedLocation {
            location: location.to_string(),
            reason,
        };

        let target = lookup.join(location).map_err(|e| malformed(e.to_string()))?;
        let segment = target
            .path()
            .split('/')
            .nth(1)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed("no content CID in path".to_string()))?;
        let content_id =
            Cid::try_from(segment).map_err(|e| malformed(format!("{segment:?}: {e}")))?;

        let hash = content_id.hash();
        if hash.code() != SHA2_256 {
            return Err(malformed(format!(
                "content CID uses multihash {:#x}, expected sha2-256",
                hash.code()
            )));
        }
        let checksum: [u8; 32] = hash
            .digest()
            .try_into()
            .map_err(|_| malformed("sha2-256 digest is not 32 bytes".to_string()))?;

        tracing::debug!(%piece, content_id = %content_id, url = %target, "resolved piece location");

        Ok(ResolvedLocation {
            piece: *piece,
            content_id: content_id.to_string(),
            url: target.to_string(),
            lookup_url: lookup.to_string(),
            checksum,
        })
    }
}

#[async_trait]
impl Resolve for LocationResolver {
    async fn resolve(&self, piece: &PieceCid) -> Result<ResolvedLocation> {
        let lookup = self.lookup_url(piece)?;
        let lookup_ref = &lookup;
        let mut attempts = 0u32;

        let outcome = with_retry(&self.retry, || {
            attempts += 1;
            self.resolve_once(lookup_ref, piece)
        })
        .await;

        outcome.map_err(|source| Error::Resolution {
            piece: piece.to_string(),
            attempts,
            source,
        })
    }
}
