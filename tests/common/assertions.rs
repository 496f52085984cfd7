//! Custom assertions for reports, plans and events

use piece_dl::{Event, FailureReason, OfferReport, Plan, PieceCid};
use tokio::sync::broadcast;

/// Assert that exactly the pieces at `indices` failed, each with a mismatch
pub fn assert_mismatches_at(report: &OfferReport, indices: &[usize]) {
    let failed: Vec<usize> = report
        .results
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.ok)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(failed, indices, "unexpected failing pieces");

    for index in indices {
        let result = &report.results[*index];
        assert_eq!(result.error, Some(FailureReason::Mismatch), "piece {index}");
        assert!(result.actual.is_some(), "mismatch without actual piece");
        assert_ne!(result.actual, Some(result.target));
    }
}

/// Assert that report results follow `pieces` in order
pub fn assert_results_in_order(report: &OfferReport, pieces: &[PieceCid]) {
    let targets: Vec<PieceCid> = report.results.iter().map(|r| r.target).collect();
    assert_eq!(targets, pieces);
}

/// Assert that plan entries name `pieces` in order
pub fn assert_plan_outputs(plan: &Plan, pieces: &[PieceCid]) {
    let outs: Vec<&str> = plan.entries.iter().map(|e| e.out.as_str()).collect();
    let expected: Vec<String> = pieces.iter().map(|p| format!("{p}.car")).collect();
    assert_eq!(outs, expected);
}

/// Drain every event already sent on `events`
pub fn drain_events(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}
