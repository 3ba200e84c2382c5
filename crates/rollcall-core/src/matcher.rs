//! Distance-based identity matching against the gallery.

use crate::types::{Embedding, Gallery, Identity};
use serde::{Deserialize, Serialize};

/// Default maximum Euclidean distance for a positive match. Lower = stricter.
pub const DEFAULT_TOLERANCE: f32 = 0.4;

/// Result of matching one probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchOutcome {
    Match { identity: Identity, distance: f32 },
    NoMatch,
}

impl MatchOutcome {
    pub fn identity(&self) -> Option<&str> {
        match self {
            MatchOutcome::Match { identity, .. } => Some(identity),
            MatchOutcome::NoMatch => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match { .. })
    }
}

/// Strategy for comparing a probe embedding against the gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchOutcome;

    /// Match every probe independently, preserving probe order.
    fn compare_all(&self, probes: &[Embedding], gallery: &Gallery, tolerance: f32) -> Vec<MatchOutcome> {
        probes
            .iter()
            .map(|probe| self.compare(probe, gallery, tolerance))
            .collect()
    }
}

/// Euclidean distance matcher.
///
/// A candidate is acceptable when `distance <= tolerance`. The acceptable
/// candidate with the strictly smallest distance wins, so on ties the first
/// entry in gallery order is kept.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchOutcome {
        let mut best: Option<(&Identity, f32)> = None;

        for (identity, embedding) in gallery.iter() {
            let distance = probe.distance(embedding);
            if distance > tolerance {
                continue;
            }
            match best {
                Some((_, d)) if distance >= d => {}
                _ => best = Some((identity, distance)),
            }
        }

        match best {
            Some((identity, distance)) => MatchOutcome::Match {
                identity: identity.clone(),
                distance,
            },
            None => MatchOutcome::NoMatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gallery(entries: &[(&str, f32)]) -> Gallery {
        let mut g = Gallery::new();
        for (name, v) in entries {
            g.insert(name.to_string(), Embedding::new(vec![*v]));
        }
        g
    }

    fn probe() -> Embedding {
        Embedding::new(vec![0.0])
    }

    #[test]
    fn test_best_acceptable_match_wins() {
        let g = gallery(&[("far", 0.5), ("near", 0.2), ("mid", 0.35)]);
        let result = EuclideanMatcher.compare(&probe(), &g, 0.4);
        assert_eq!(result.identity(), Some("near"));
        match result {
            MatchOutcome::Match { distance, .. } => assert!((distance - 0.2).abs() < 1e-6),
            MatchOutcome::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn test_distance_equal_to_tolerance_is_accepted() {
        let g = gallery(&[("edge", 0.5)]);
        let result = EuclideanMatcher.compare(&probe(), &g, 0.5);
        assert_eq!(result.identity(), Some("edge"));
    }

    #[test]
    fn test_distance_above_tolerance_is_rejected() {
        let g = gallery(&[("edge", 0.5 + 1e-3)]);
        let result = EuclideanMatcher.compare(&probe(), &g, 0.5);
        assert_eq!(result, MatchOutcome::NoMatch);
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        let result = EuclideanMatcher.compare(&probe(), &Gallery::new(), f32::MAX);
        assert_eq!(result, MatchOutcome::NoMatch);
    }

    #[test]
    fn test_tie_keeps_first_in_gallery_order() {
        let g = gallery(&[("first", 0.25), ("second", -0.25)]);
        let result = EuclideanMatcher.compare(&probe(), &g, 0.4);
        assert_eq!(result.identity(), Some("first"));
    }

    #[test]
    fn test_compare_all_matches_probes_independently() {
        let g = gallery(&[("alice", 0.0), ("bob", 1.0)]);
        let probes = vec![
            Embedding::new(vec![0.95]),
            Embedding::new(vec![5.0]),
            Embedding::new(vec![0.1]),
        ];
        let results = EuclideanMatcher.compare_all(&probes, &g, 0.4);
        let names: Vec<_> = results.iter().map(|r| r.identity()).collect();
        assert_eq!(names, vec![Some("bob"), None, Some("alice")]);
    }
}
