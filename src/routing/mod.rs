//! Weighted backend selection (pure logic).
//!
//! This module is intentionally **pure**: it performs no network calls and
//! holds no shared state. The orchestrator snapshots cost, observed latency
//! and availability for the eligible set and asks for a deterministic
//! ranking; everything stateful (circuits, health, exclusions) stays with
//! the caller.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;

/// Routing weights. Expected to sum to 1; [`normalized`](Self::normalized)
/// rescales arbitrary positive weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouterWeights {
    pub cost: f64,
    pub latency: f64,
    pub availability: f64,
}

impl Default for RouterWeights {
    fn default() -> Self {
        Self {
            cost: 0.4,
            latency: 0.3,
            availability: 0.3,
        }
    }
}

impl RouterWeights {
    pub fn new(cost: f64, latency: f64, availability: f64) -> Self {
        Self {
            cost,
            latency,
            availability,
        }
    }

    pub fn sum(&self) -> f64 {
        self.cost + self.latency + self.availability
    }

    pub fn is_normalized(&self) -> bool {
        (self.sum() - 1.0).abs() < 1e-6
    }

    /// Rescale so the weights sum to 1. Returns `None` when the sum is not
    /// positive, which no scoring can repair.
    pub fn normalized(&self) -> Option<Self> {
        let sum = self.sum();
        if sum <= 0.0 || !sum.is_finite() {
            return None;
        }
        Some(Self {
            cost: self.cost / sum,
            latency: self.latency / sum,
            availability: self.availability / sum,
        })
    }
}

/// Point-in-time view of one eligible backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub name: String,
    /// Combined per-token cost from the descriptor.
    pub cost_per_token: f64,
    /// Observed average latency, or a probe measurement as fallback.
    pub avg_latency: Duration,
    /// 1.0 healthy, 0.0 known-unhealthy.
    pub availability: f64,
}

/// A ranked candidate with its computed score, best first in [`rank`] output.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub candidate: Candidate,
    pub score: f64,
}

/// Normalized inverse contribution: the best (lowest) value in the set
/// scores 1.0, everything else proportionally less.
fn inverse_share(min: f64, value: f64) -> f64 {
    if value <= 0.0 {
        1.0
    } else if min <= 0.0 {
        0.0
    } else {
        min / value
    }
}

fn score(candidate: &Candidate, min_cost: f64, min_latency_ms: f64, weights: &RouterWeights) -> f64 {
    let cost_term = inverse_share(min_cost, candidate.cost_per_token);
    let latency_term = inverse_share(min_latency_ms, candidate.avg_latency.as_millis() as f64);
    weights.cost * cost_term
        + weights.latency * latency_term
        + weights.availability * candidate.availability
}

/// Score and order the eligible set, best first.
///
/// Ties break by lower observed latency, then lexical name, so identical
/// inputs always produce identical orderings.
pub fn rank(candidates: &[Candidate], weights: &RouterWeights) -> Vec<Ranked> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let min_cost = candidates
        .iter()
        .map(|c| c.cost_per_token)
        .filter(|c| *c > 0.0)
        .fold(f64::INFINITY, f64::min);
    let min_cost = if min_cost.is_finite() { min_cost } else { 0.0 };

    let min_latency_ms = candidates
        .iter()
        .map(|c| c.avg_latency.as_millis() as f64)
        .filter(|l| *l > 0.0)
        .fold(f64::INFINITY, f64::min);
    let min_latency_ms = if min_latency_ms.is_finite() {
        min_latency_ms
    } else {
        0.0
    };

    let mut ranked: Vec<Ranked> = candidates
        .iter()
        .map(|c| Ranked {
            score: score(c, min_cost, min_latency_ms, weights),
            candidate: c.clone(),
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.candidate.avg_latency.cmp(&b.candidate.avg_latency))
            .then_with(|| a.candidate.name.cmp(&b.candidate.name))
    });
    ranked
}

/// The single best candidate, if any.
pub fn select(candidates: &[Candidate], weights: &RouterWeights) -> Option<Candidate> {
    rank(candidates, weights).into_iter().next().map(|r| r.candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, cost: f64, latency_ms: u64, availability: f64) -> Candidate {
        Candidate {
            name: name.to_string(),
            cost_per_token: cost,
            avg_latency: Duration::from_millis(latency_ms),
            availability,
        }
    }

    #[test]
    fn test_cheaper_backend_wins_on_cost_weight() {
        let weights = RouterWeights::new(1.0, 0.0, 0.0);
        let set = vec![
            candidate("expensive", 0.0004, 100, 1.0),
            candidate("cheap", 0.0001, 100, 1.0),
        ];
        assert_eq!(select(&set, &weights).unwrap().name, "cheap");
    }

    #[test]
    fn test_faster_backend_wins_on_latency_weight() {
        let weights = RouterWeights::new(0.0, 1.0, 0.0);
        let set = vec![
            candidate("slow", 0.0001, 800, 1.0),
            candidate("fast", 0.0004, 50, 1.0),
        ];
        assert_eq!(select(&set, &weights).unwrap().name, "fast");
    }

    #[test]
    fn test_unavailable_backend_loses() {
        let weights = RouterWeights::default();
        let set = vec![
            candidate("down", 0.0001, 100, 0.0),
            candidate("up", 0.0002, 100, 1.0),
        ];
        assert_eq!(select(&set, &weights).unwrap().name, "up");
    }

    #[test]
    fn test_tie_breaks_by_latency_then_name() {
        let weights = RouterWeights::default();
        let tied_latency = vec![
            candidate("bravo", 0.0002, 100, 1.0),
            candidate("alpha", 0.0002, 100, 1.0),
        ];
        assert_eq!(select(&tied_latency, &weights).unwrap().name, "alpha");

        let same_everything = vec![
            candidate("alpha", 0.0002, 100, 1.0),
            candidate("bravo", 0.0002, 100, 1.0),
        ];
        // Same score, same latency: lexical order decides.
        let ranked = rank(&same_everything, &weights);
        assert_eq!(ranked[0].candidate.name, "alpha");
        assert_eq!(ranked[1].candidate.name, "bravo");
    }

    #[test]
    fn test_selection_is_deterministic() {
        let weights = RouterWeights::default();
        let set = vec![
            candidate("alpha", 0.0003, 120, 1.0),
            candidate("bravo", 0.0001, 400, 1.0),
            candidate("gamma", 0.0002, 80, 0.0),
        ];
        let first = select(&set, &weights).unwrap();
        for _ in 0..50 {
            assert_eq!(select(&set, &weights).unwrap(), first);
        }
    }

    #[test]
    fn test_rank_orders_all_candidates() {
        let weights = RouterWeights::new(1.0, 0.0, 0.0);
        let set = vec![
            candidate("mid", 0.0002, 100, 1.0),
            candidate("cheap", 0.0001, 100, 1.0),
            candidate("pricey", 0.0004, 100, 1.0),
        ];
        let names: Vec<String> = rank(&set, &weights)
            .into_iter()
            .map(|r| r.candidate.name)
            .collect();
        assert_eq!(names, vec!["cheap", "mid", "pricey"]);
    }

    #[test]
    fn test_weights_normalization() {
        let weights = RouterWeights::new(2.0, 1.0, 1.0);
        assert!(!weights.is_normalized());
        let normalized = weights.normalized().unwrap();
        assert!(normalized.is_normalized());
        assert!((normalized.cost - 0.5).abs() < 1e-9);

        assert!(RouterWeights::new(0.0, 0.0, 0.0).normalized().is_none());
    }

    #[test]
    fn test_empty_set_selects_nothing() {
        assert!(select(&[], &RouterWeights::default()).is_none());
    }
}
