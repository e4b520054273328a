//! Reduce raw port measurements to one comparable score and a ranked shortlist.

use crate::PortProbeResult;
use serde::Serialize;

/// Number of candidates handed to config generation.
pub const SHORTLIST_LEN: usize = 10;

/// Linear weighting of latency, loss and jitter against fixed reference ceilings.
///
/// These are tunable policy constants, not derived quantities. `DEFAULT` favours
/// latency (60%), then loss (30%), then jitter (10%).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub latency: f64,
    pub loss: f64,
    pub jitter: f64,
    pub latency_ceiling_ms: f64,
    pub loss_ceiling_pct: f64,
    pub jitter_ceiling_ms: f64,
}

impl ScoreWeights {
    pub const DEFAULT: ScoreWeights = ScoreWeights {
        latency: 0.6,
        loss: 0.3,
        jitter: 0.1,
        latency_ceiling_ms: 1000.0,
        loss_ceiling_pct: 100.0,
        jitter_ceiling_ms: 10.0,
    };

    /// Never negative.
    pub fn score(&self, latency_ms: f64, loss_pct: f64, jitter_ms: f64) -> f64 {
        let s = (self.latency_ceiling_ms - latency_ms) * self.latency
            + (self.loss_ceiling_pct - loss_pct) * self.loss
            + (self.jitter_ceiling_ms - jitter_ms) * self.jitter;
        if s.is_nan() { 0.0 } else { s.max(0.0) }
    }
}

impl Default for ScoreWeights {
    fn default() -> Self { Self::DEFAULT }
}

/// A probe result with its score attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPort {
    #[serde(flatten)]
    pub probe: PortProbeResult,
    pub score: f64,
}

/// Score every result, order best first (latency breaks ties) and keep `limit`.
pub fn rank_with(weights: &ScoreWeights, results: Vec<PortProbeResult>, limit: usize) -> Vec<ScoredPort> {
    let mut scored: Vec<ScoredPort> = results
        .into_iter()
        .map(|probe| {
            let score = weights.score(probe.latency_ms, probe.loss_pct, probe.jitter_ms);
            ScoredPort { probe, score }
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.probe.latency_ms.total_cmp(&b.probe.latency_ms))
            .then_with(|| order_key(a).cmp(&order_key(b)))
    });
    scored.truncate(limit);
    scored
}

pub fn rank(results: Vec<PortProbeResult>, limit: usize) -> Vec<ScoredPort> {
    rank_with(&ScoreWeights::DEFAULT, results, limit)
}

/// The top [`SHORTLIST_LEN`] pairs under the default weights.
pub fn shortlist(results: Vec<PortProbeResult>) -> Vec<ScoredPort> {
    rank(results, SHORTLIST_LEN)
}

// keeps equal-score, equal-latency output stable across runs
fn order_key(s: &ScoredPort) -> (crate::Endpoint, u16) {
    (s.probe.endpoint, s.probe.port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Endpoint, JitterSource};

    fn probe(ip: &str, port: u16, latency_ms: f64, loss_pct: f64, jitter_ms: f64) -> PortProbeResult {
        PortProbeResult {
            endpoint: ip.parse::<Endpoint>().unwrap(),
            port,
            latency_ms,
            loss_pct,
            jitter_ms,
            jitter: JitterSource::Synthetic,
        }
    }

    #[test]
    fn weighted_sum_matches_reference_case() {
        let s = ScoreWeights::DEFAULT.score(50.0, 0.0, 1.0);
        assert!((s - 600.9).abs() < 1e-9, "{}", s);
    }

    #[test]
    fn score_is_clamped_at_zero() {
        let w = ScoreWeights::DEFAULT;
        for latency in [0.0, 999.0, 1000.0, 1500.0, 5_000.0, 1e9] {
            for loss in [0.0, 50.0, 100.0] {
                for jitter in [0.1, 2.0, 50.0] {
                    assert!(w.score(latency, loss, jitter) >= 0.0);
                }
            }
        }
        assert_eq!(w.score(10_000.0, 100.0, 10.0), 0.0);
        assert_eq!(w.score(f64::NAN, 0.0, 0.0), 0.0);
    }

    #[test]
    fn ranking_is_descending_with_latency_tiebreak() {
        let results = vec![
            probe("10.0.0.1", 500, 120.0, 0.0, 1.0),
            probe("10.0.0.2", 500, 40.0, 0.0, 1.0),
            probe("10.0.0.3", 500, 80.0, 0.0, 1.0),
            probe("10.0.0.4", 500, 79.0, 2.0, 1.0),
        ];
        let ranked = rank(results, 10);
        assert_eq!(ranked.len(), 4);
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                assert!(pair[0].probe.latency_ms <= pair[1].probe.latency_ms);
            }
        }
        assert_eq!(ranked[0].probe.endpoint.to_string(), "10.0.0.2");
    }

    #[test]
    fn exact_ties_resolve_by_latency() {
        // l=100,loss=0 and l=90,loss=20 both score 571 with zero jitter
        let ranked = rank(
            vec![probe("10.0.0.1", 1, 100.0, 0.0, 0.0), probe("10.0.0.2", 1, 90.0, 20.0, 0.0)],
            10,
        );
        assert!((ranked[0].score - ranked[1].score).abs() < 1e-9);
        assert_eq!(ranked[0].probe.latency_ms, 90.0);
    }

    #[test]
    fn shortlist_truncates_to_ten() {
        let results = (0..25).map(|i| probe("10.0.0.1", 1000 + i, i as f64, 0.0, 1.0)).collect();
        let top = shortlist(results);
        assert_eq!(top.len(), SHORTLIST_LEN);
        assert_eq!(top[0].probe.port, 1000);
        assert_eq!(top[9].probe.port, 1009);
    }

    #[test]
    fn empty_in_empty_out() {
        assert!(shortlist(Vec::new()).is_empty());
    }
}
