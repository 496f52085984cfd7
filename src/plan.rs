//! Download plans: aria2 input files built from resolved piece locations
//!
//! Lookups run concurrently up to the configured limit. Each lookup owns the
//! slot of its input position, so the plan lists pieces in input order no
//! matter which lookup finishes first.

use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;

use crate::config::{PlanConfig, PlanUrl};
use crate::error::{Error, Result};
use crate::piece::PieceCid;
use crate::resolver::Resolve;
use crate::types::{Event, PlanEntry, ResolvedLocation};

/// A rendered-ready download plan
#[derive(Debug)]
pub struct Plan {
    /// Comment line naming the aggregate, when planning an offer
    pub header: Option<String>,
    /// One block per resolved piece, in input order
    pub entries: Vec<PlanEntry>,
    /// Pieces whose lookup failed
    pub failures: Vec<PlanFailure>,
}

/// A piece left out of a plan
#[derive(Debug)]
pub struct PlanFailure {
    /// Position in the input list
    pub index: usize,
    /// Piece that failed
    pub piece: PieceCid,
    /// Why
    pub error: Error,
}

impl Plan {
    /// True when every piece made it into the plan
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// aria2 input file text
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(header) = &self.header {
            out.push_str(header);
            out.push('\n');
        }
        let blocks: Vec<String> = self.entries.iter().map(PlanEntry::render).collect();
        out.push_str(&blocks.join("\n\n"));
        if !blocks.is_empty() {
            out.push('\n');
        }
        out
    }
}

/// Builds download plans from piece lists
#[derive(Clone, Debug)]
pub struct PlanBuilder {
    concurrency: usize,
    url_source: PlanUrl,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl PlanBuilder {
    /// Builder using the configured concurrency and URL source
    pub fn new(config: &PlanConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            url_source: config.url_source,
            event_tx: None,
        }
    }

    /// Emit [`Event::PieceResolved`] on `tx` as lookups finish
    pub fn with_events(mut self, tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Resolve every piece, returning outcomes in input order
    pub async fn resolve_all<R>(
        &self,
        pieces: &[PieceCid],
        resolver: &R,
    ) -> Vec<Result<ResolvedLocation>>
    where
        R: Resolve + ?Sized,
    {
        let mut slots: Vec<Option<Result<ResolvedLocation>>> =
            std::iter::repeat_with(|| None).take(pieces.len()).collect();

        let mut completions = stream::iter(pieces.iter().enumerate())
            .map(|(index, piece)| async move { (index, resolver.resolve(piece).await) })
            .buffer_unordered(self.concurrency);

        while let Some((index, outcome)) = completions.next().await {
            let piece = pieces[index];
            match &outcome {
                Ok(_) => tracing::debug!(%piece, index, "piece resolved"),
                Err(e) => tracing::warn!(%piece, index, error = %e, "piece lookup failed"),
            }
            if let Some(tx) = &self.event_tx {
                tx.send(Event::PieceResolved {
                    piece,
                    index,
                    ok: outcome.is_ok(),
                })
                .ok();
            }
            slots[index] = Some(outcome);
        }

        slots
            .into_iter()
            .zip(pieces)
            .map(|(slot, piece)| {
                slot.unwrap_or_else(|| Err(Error::Other(format!("lookup for {piece} never completed"))))
            })
            .collect()
    }

    /// Build a plan for `pieces`, headed by `aggregate` when given
    pub async fn build<R>(
        &self,
        aggregate: Option<&PieceCid>,
        pieces: &[PieceCid],
        resolver: &R,
    ) -> Result<Plan>
    where
        R: Resolve + ?Sized,
    {
        if pieces.is_empty() {
            return Err(Error::EmptyInput);
        }

        let outcomes = self.resolve_all(pieces, resolver).await;
        let mut entries = Vec::with_capacity(pieces.len());
        let mut failures = Vec::new();

        for (index, (piece, outcome)) in pieces.iter().zip(outcomes).enumerate() {
            match outcome {
                Ok(location) => entries.push(self.entry(&location)),
                Err(error) => failures.push(PlanFailure {
                    index,
                    piece: *piece,
                    error,
                }),
            }
        }

        tracing::info!(
            planned = entries.len(),
            failed = failures.len(),
            "download plan built"
        );

        Ok(Plan {
            header: aggregate.map(|a| format!("# aria2 input for aggregate {a}")),
            entries,
            failures,
        })
    }

    fn entry(&self, location: &ResolvedLocation) -> PlanEntry {
        let url = match self.url_source {
            PlanUrl::Lookup => location.lookup_url.clone(),
            PlanUrl::Resolved => location.url.clone(),
        };
        PlanEntry {
            url,
            checksum: location.checksum_hex(),
            out: format!("{}.car", location.piece),
        }
    }
}
