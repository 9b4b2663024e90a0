//! Detector contract (spec §4.3 "Registry and pipeline" / "Detectors").

/// A single detected sensitive span inside a larger string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub start: usize,
    pub end: usize,
    pub value: String,
    /// Wire-format category bucket for this match's envelope, e.g. `"SSN"`,
    /// `"VISA"`, `"IP"` (spec §6.3).
    pub bucket: &'static str,
}

/// One detector in the guardrail pipeline. `category`/`priority` drive
/// pipeline ordering (ascending priority) the way the registry in spec §4.3
/// describes; `detect` returns non-overlapping matches in `text`.
pub trait Detector: Send + Sync {
    fn id(&self) -> &'static str;
    fn category(&self) -> &'static str;
    fn priority(&self) -> i32;
    fn detect(&self, text: &str) -> Vec<Match>;
}

/// Drop matches that overlap an earlier (lower-index, or equal-index
/// longer) match, keeping detector output non-overlapping before
/// substitution runs.
pub fn dedupe_overlaps(mut matches: Vec<Match>) -> Vec<Match> {
    matches.sort_by_key(|m| (m.start, std::cmp::Reverse(m.end)));
    let mut out: Vec<Match> = Vec::with_capacity(matches.len());
    for m in matches {
        if out.last().map(|last: &Match| m.start < last.end).unwrap_or(false) {
            continue;
        }
        out.push(m);
    }
    out
}
