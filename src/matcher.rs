use serde::{Deserialize, Serialize};
use strsim::levenshtein;

/// Nearest-name matcher for unknown table and column references
pub struct NameMatcher {
    /// Largest edit distance still considered a plausible typo
    pub max_distance: usize,
}

impl Default for NameMatcher {
    fn default() -> Self {
        Self { max_distance: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameMatch {
    pub name: String,
    pub distance: usize,
    /// 1 - distance / longer length, in [0, 1]
    pub confidence: f64,
}

impl NameMatcher {
    pub fn new(max_distance: usize) -> Self {
        Self { max_distance }
    }

    /// Names are compared case-insensitively
    pub fn normalize(name: &str) -> String {
        name.trim().to_lowercase()
    }

    pub fn distance(a: &str, b: &str) -> usize {
        levenshtein(&Self::normalize(a), &Self::normalize(b))
    }

    pub fn confidence(a: &str, b: &str, distance: usize) -> f64 {
        let longest = a.chars().count().max(b.chars().count());
        if longest == 0 {
            return 1.0;
        }
        (1.0 - distance as f64 / longest as f64).clamp(0.0, 1.0)
    }

    /// Best candidate within `max_distance`. Candidates must be supplied in
    /// declaration order: the smallest distance wins and ties keep the first.
    pub fn nearest<'a, I>(&self, target: &str, candidates: I) -> Option<NameMatch>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<NameMatch> = None;

        for candidate in candidates {
            let distance = Self::distance(target, candidate);
            if distance > self.max_distance {
                continue;
            }
            let better = best.as_ref().map_or(true, |b| distance < b.distance);
            if better {
                best = Some(NameMatch {
                    name: candidate.to_string(),
                    distance,
                    confidence: Self::confidence(target, candidate, distance),
                });
            }
        }

        best
    }
}
