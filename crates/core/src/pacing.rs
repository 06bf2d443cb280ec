// crates/core/src/pacing.rs
//! Timing policy for a traversal: wait timeouts, randomized pacing between
//! actions and page loads, and the fixed backoff after a failed page.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("jitter range is inverted: min {min:?} > max {max:?}")]
pub struct InvertedRange {
    pub min: Duration,
    pub max: Duration,
}

/// Uniformly random delay in `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JitterMillis", into = "JitterMillis")]
pub struct JitterPolicy {
    min: Duration,
    max: Duration,
}

impl JitterPolicy {
    pub fn new(min: Duration, max: Duration) -> Result<Self, InvertedRange> {
        if min > max {
            return Err(InvertedRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// A policy that always yields `delay`.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn sample(&self) -> Duration {
        self.sample_with(&mut rand::thread_rng())
    }

    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        Duration::from_millis(rng.gen_range(lo..=hi))
    }
}

#[derive(Serialize, Deserialize)]
struct JitterMillis {
    min_ms: u64,
    max_ms: u64,
}

impl TryFrom<JitterMillis> for JitterPolicy {
    type Error = InvertedRange;

    fn try_from(value: JitterMillis) -> Result<Self, Self::Error> {
        Self::new(
            Duration::from_millis(value.min_ms),
            Duration::from_millis(value.max_ms),
        )
    }
}

impl From<JitterPolicy> for JitterMillis {
    fn from(value: JitterPolicy) -> Self {
        Self {
            min_ms: value.min.as_millis() as u64,
            max_ms: value.max.as_millis() as u64,
        }
    }
}

/// Every timing constant the traversal uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    #[serde(with = "duration_ms")]
    pub navigation_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub sign_in_timeout: Duration,
    /// How long the item list may take to become visible.
    #[serde(with = "duration_ms")]
    pub list_timeout: Duration,
    /// How long the action affordance may take to appear on an item page.
    #[serde(with = "duration_ms")]
    pub action_timeout: Duration,
    pub action_pacing: JitterPolicy,
    pub page_pacing: JitterPolicy,
    #[serde(with = "duration_ms")]
    pub page_retry_backoff: Duration,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(60),
            sign_in_timeout: Duration::from_secs(60),
            list_timeout: Duration::from_secs(10),
            action_timeout: Duration::from_secs(60),
            action_pacing: JitterPolicy {
                min: Duration::from_secs(3),
                max: Duration::from_secs(5),
            },
            page_pacing: JitterPolicy {
                min: Duration::from_secs(2),
                max: Duration::from_secs(4),
            },
            page_retry_backoff: Duration::from_secs(5),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn samples_stay_within_range() {
        let policy = JitterPolicy::new(Duration::from_secs(3), Duration::from_secs(5)).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let d = policy.sample_with(&mut rng);
            assert!(d >= Duration::from_secs(3) && d <= Duration::from_secs(5), "{d:?}");
        }
    }

    #[test]
    fn fixed_policy_is_constant() {
        let policy = JitterPolicy::fixed(Duration::from_millis(250));
        assert_eq!(policy.sample(), Duration::from_millis(250));
        assert_eq!(policy.min(), policy.max());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = JitterPolicy::new(Duration::from_secs(5), Duration::from_secs(3)).unwrap_err();
        assert_eq!(err.min, Duration::from_secs(5));
    }

    #[test]
    fn defaults_match_original_pacing() {
        let config = TraversalConfig::default();
        assert_eq!(config.action_pacing.min(), Duration::from_secs(3));
        assert_eq!(config.action_pacing.max(), Duration::from_secs(5));
        assert_eq!(config.page_pacing.max(), Duration::from_secs(4));
        assert_eq!(config.page_retry_backoff, Duration::from_secs(5));
        assert_eq!(config.list_timeout, Duration::from_secs(10));
    }

    #[test]
    fn partial_override_from_yaml() {
        let yaml = "list_timeout: 2500\naction_pacing:\n  min_ms: 100\n  max_ms: 200\n";
        let config: TraversalConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.list_timeout, Duration::from_millis(2500));
        assert_eq!(config.action_pacing.max(), Duration::from_millis(200));
        assert_eq!(config.navigation_timeout, Duration::from_secs(60));
    }

    #[test]
    fn inverted_range_in_yaml_fails() {
        let yaml = "page_pacing:\n  min_ms: 900\n  max_ms: 100\n";
        assert!(serde_yaml::from_str::<TraversalConfig>(yaml).is_err());
    }
}
