//! Byte-level comparison of two buffers
//!
//! Produces a descriptive summary of where two buffers differ and what the
//! difference looks like (truncated tail, inserted or deleted bytes, or plain
//! corruption). Nothing here repairs data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tunables for the diff scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Differing offsets at most this far past the current pattern extend it
    pub gap_tolerance: u64,
    /// Maximum number of patterns reported
    pub max_patterns: usize,
    /// Tail of the original in which a shorter candidate counts as truncated
    pub truncation_window: u64,
    /// Bytes of each side kept per pattern for diagnostics
    pub max_sample_bytes: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            gap_tolerance: 10,
            max_patterns: 10,
            truncation_window: 100,
            max_sample_bytes: 32,
        }
    }
}

/// Classification of a run of differing bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Truncation,
    Corruption,
    Insertion,
    Deletion,
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatternType::Truncation => "truncation",
            PatternType::Corruption => "corruption",
            PatternType::Insertion => "insertion",
            PatternType::Deletion => "deletion",
        };
        f.write_str(name)
    }
}

/// One coalesced run of differences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferencePattern {
    pub offset: u64,
    /// Span from `offset` to the last differing byte in the run.
    ///
    /// Matching bytes inside the gap tolerance count toward the span, so
    /// this is not the number of differing bytes in the pattern. Use
    /// [`DiffResult::differing_bytes`] for counts.
    pub length: u64,
    pub pattern_type: PatternType,
    /// Leading differing bytes of the original (0 where absent)
    pub original_sample: Vec<u8>,
    /// Leading differing bytes of the candidate (0 where absent)
    pub candidate_sample: Vec<u8>,
}

/// Summary of a full diff scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub total_bytes: u64,
    pub differing_bytes: u64,
    /// Percentage of `total_bytes` that differ, 0.0 for two empty buffers
    pub differing_pct: f64,
    pub patterns: Vec<DifferencePattern>,
    pub first_diff_offset: Option<u64>,
    pub last_diff_offset: Option<u64>,
}

impl DiffResult {
    pub fn is_identical(&self) -> bool {
        self.differing_bytes == 0
    }
}

/// Binary diff analyzer
#[derive(Debug, Clone, Default)]
pub struct BinaryDiffAnalyzer {
    config: DiffConfig,
}

impl BinaryDiffAnalyzer {
    pub fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Compare `candidate` against `original`
    pub fn diff(&self, original: &[u8], candidate: &[u8]) -> DiffResult {
        let orig_len = original.len() as u64;
        let cand_len = candidate.len() as u64;
        let total_bytes = orig_len.max(cand_len);
        let truncation_start = orig_len.saturating_sub(self.config.truncation_window);

        let mut differing_bytes = 0u64;
        let mut first_diff = None;
        let mut last_diff = None;
        let mut patterns: Vec<DifferencePattern> = Vec::new();
        let mut current: Option<DifferencePattern> = None;

        for i in 0..total_bytes {
            let orig = original.get(i as usize).copied();
            let cand = candidate.get(i as usize).copied();
            if orig == cand {
                continue;
            }

            differing_bytes += 1;
            first_diff.get_or_insert(i);
            last_diff = Some(i);

            let extends = current
                .as_ref()
                .map(|p| i <= p.offset + p.length + self.config.gap_tolerance)
                .unwrap_or(false);

            if extends {
                if let Some(pattern) = current.as_mut() {
                    pattern.length = i - pattern.offset + 1;
                    self.push_sample(pattern, orig, cand);
                }
                continue;
            }

            if let Some(done) = current.take() {
                patterns.push(done);
            }

            let pattern_type = match (orig, cand) {
                (None, _) => PatternType::Insertion,
                (_, None) => PatternType::Deletion,
                _ if i >= truncation_start && cand_len < orig_len => PatternType::Truncation,
                _ => PatternType::Corruption,
            };

            let mut pattern = DifferencePattern {
                offset: i,
                length: 1,
                pattern_type,
                original_sample: Vec::new(),
                candidate_sample: Vec::new(),
            };
            self.push_sample(&mut pattern, orig, cand);
            current = Some(pattern);
        }

        if let Some(done) = current {
            patterns.push(done);
        }
        patterns.truncate(self.config.max_patterns);

        let differing_pct = if total_bytes == 0 {
            0.0
        } else {
            differing_bytes as f64 / total_bytes as f64 * 100.0
        };

        DiffResult {
            total_bytes,
            differing_bytes,
            differing_pct,
            patterns,
            first_diff_offset: first_diff,
            last_diff_offset: last_diff,
        }
    }

    fn push_sample(&self, pattern: &mut DifferencePattern, orig: Option<u8>, cand: Option<u8>) {
        if pattern.original_sample.len() < self.config.max_sample_bytes {
            pattern.original_sample.push(orig.unwrap_or(0));
            pattern.candidate_sample.push(cand.unwrap_or(0));
        }
    }

    /// Diff on the blocking pool; large buffers are CPU-bound to scan
    pub async fn diff_offloaded(
        &self,
        original: bytes::Bytes,
        candidate: bytes::Bytes,
    ) -> crate::error::Result<DiffResult> {
        let analyzer = self.clone();
        tokio::task::spawn_blocking(move || analyzer.diff(&original, &candidate))
            .await
            .map_err(|e| crate::error::Error::Internal(format!("diff task failed: {}", e)))
    }
}

/// Diff with default tunables
pub fn diff(original: &[u8], candidate: &[u8]) -> DiffResult {
    BinaryDiffAnalyzer::default().diff(original, candidate)
}
