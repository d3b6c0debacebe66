use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sentinel_core::ActivityKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// How many hour observations a baseline needs before `typical_hours` is
/// derived from the histogram.
const TYPICAL_HOURS_MIN_OBSERVATIONS: u64 = 100;
/// Top-N hours by count that form the typical-hours set.
const TYPICAL_HOURS_TOP_N: usize = 12;
/// A typical-sequence sample is recorded every N observed events.
const SEQUENCE_SAMPLE_EVERY: u64 = 20;
/// How many typical sequences are retained per user.
const SEQUENCE_KEEP: usize = 5;

/// Per-user behavioral baseline, learned online from observed traffic.
///
/// Created lazily on first observation, updated on every event, never
/// destroyed unless explicitly reset. Rebuilding from observed traffic
/// after a restart is acceptable.
#[derive(Debug, Clone, Default)]
pub struct UserBaseline {
    /// Histogram of local activity hours.
    pub hour_frequency: [u64; 24],
    /// Total hour observations recorded.
    pub observations: u64,
    /// Per-kind event counts, the user's activity mix.
    pub kind_counts: HashMap<ActivityKind, u64>,
    /// Per-kind mean 5-minute activity rate, exponentially smoothed.
    pub avg_rate: HashMap<ActivityKind, f64>,
    /// Hours this user habitually works, derived once the histogram is
    /// dense enough.
    pub typical_hours: Option<Vec<u32>>,
    /// Recently sampled 10-event kind sequences.
    pub typical_sequences: Vec<Vec<ActivityKind>>,
    /// Timestamp of the most recent update.
    pub last_updated: Option<DateTime<Utc>>,
}

impl UserBaseline {
    /// Total events across all kinds.
    pub fn total_events(&self) -> u64 {
        self.kind_counts.values().sum()
    }

    /// Relative frequency of a kind in this user's mix. Falls back to 0.1
    /// for kinds never seen, matching the deviation-score contract.
    pub fn kind_frequency(&self, kind: ActivityKind) -> f64 {
        let total = self.total_events();
        if total == 0 {
            return 0.1;
        }
        let count = self.kind_counts.get(&kind).copied().unwrap_or(0);
        if count == 0 {
            0.1
        } else {
            count as f64 / total as f64
        }
    }

    pub fn peak_hour_frequency(&self) -> u64 {
        self.hour_frequency.iter().copied().max().unwrap_or(0)
    }

    pub fn is_typical_hour(&self, hour: u32) -> bool {
        self.typical_hours
            .as_ref()
            .map(|hours| hours.contains(&hour))
            .unwrap_or(false)
    }

    /// Mean 5-minute rate for a kind; 1.0 until enough traffic is seen.
    pub fn rate_for(&self, kind: ActivityKind) -> f64 {
        self.avg_rate.get(&kind).copied().unwrap_or(1.0)
    }

    /// Whether the trailing kind sequence ends with any recorded typical
    /// sequence. An empty sequence store matches nothing and scores zero
    /// upstream.
    pub fn matches_typical_sequence(&self, trailing: &[ActivityKind]) -> Option<bool> {
        if self.typical_sequences.is_empty() {
            return None;
        }
        Some(self.typical_sequences.iter().any(|seq| {
            trailing.len() >= seq.len() && trailing[trailing.len() - seq.len()..] == seq[..]
        }))
    }

    /// Fold one observed event into the baseline.
    pub fn record(
        &mut self,
        hour: u32,
        kind: ActivityKind,
        recent_rate: f64,
        trailing: &[ActivityKind],
        now: DateTime<Utc>,
    ) {
        let hour = (hour % 24) as usize;
        self.hour_frequency[hour] += 1;
        self.observations += 1;
        *self.kind_counts.entry(kind).or_insert(0) += 1;

        let rate = self.avg_rate.entry(kind).or_insert(1.0);
        *rate = 0.9 * *rate + 0.1 * recent_rate;

        if self.observations > TYPICAL_HOURS_MIN_OBSERVATIONS {
            let mut ranked: Vec<(usize, u64)> = self
                .hour_frequency
                .iter()
                .copied()
                .enumerate()
                .filter(|(_, count)| *count > 0)
                .collect();
            ranked.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
            self.typical_hours = Some(
                ranked
                    .into_iter()
                    .take(TYPICAL_HOURS_TOP_N)
                    .map(|(hour, _)| hour as u32)
                    .collect(),
            );
        }

        if self.observations % SEQUENCE_SAMPLE_EVERY == 0 && trailing.len() >= 3 {
            let sample: Vec<ActivityKind> =
                trailing.iter().copied().rev().take(10).rev().collect();
            self.typical_sequences.push(sample);
            if self.typical_sequences.len() > SEQUENCE_KEEP {
                self.typical_sequences.remove(0);
            }
        }

        self.last_updated = Some(now);
    }
}

/// Concurrent baseline store keyed by user id.
///
/// Mutations are serialized per user behind that user's own lock; there is
/// no lock shared across users, so ingest for different users proceeds in
/// parallel.
#[derive(Default)]
pub struct BaselineMap {
    inner: DashMap<String, Arc<Mutex<UserBaseline>>>,
}

impl BaselineMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Baseline handle for this user, created lazily on first observation.
    pub fn handle(&self, user_id: &str) -> Arc<Mutex<UserBaseline>> {
        self.inner
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Whether a baseline has been observed for this user yet.
    pub fn contains(&self, user_id: &str) -> bool {
        self.inner.contains_key(user_id)
    }

    /// Explicit reset; the only way a baseline is destroyed.
    pub fn reset(&self, user_id: &str) {
        self.inner.remove(user_id);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_created_lazily_and_updated() {
        let map = BaselineMap::new();
        assert!(!map.contains("U001"));

        let handle = map.handle("U001");
        assert!(map.contains("U001"));

        let mut baseline = handle.lock().unwrap();
        baseline.record(23, ActivityKind::Logon, 1.0, &[], Utc::now());
        assert_eq!(baseline.hour_frequency[23], 1);
        assert_eq!(baseline.total_events(), 1);
        assert!(baseline.typical_hours.is_none());
    }

    #[test]
    fn typical_hours_derived_after_enough_observations() {
        let mut baseline = UserBaseline::default();
        for i in 0..120u64 {
            let hour = if i % 10 == 0 { 22 } else { 9 + (i % 8) as u32 };
            baseline.record(hour, ActivityKind::FileAccess, 1.0, &[], Utc::now());
        }
        let typical = baseline.typical_hours.as_ref().expect("typical hours set");
        assert!(typical.len() <= 12);
        assert!(typical.contains(&9));
    }

    #[test]
    fn kind_frequency_defaults_for_unseen_kind() {
        let mut baseline = UserBaseline::default();
        baseline.record(10, ActivityKind::Email, 1.0, &[], Utc::now());
        assert_eq!(baseline.kind_frequency(ActivityKind::Network), 0.1);
        assert!(baseline.kind_frequency(ActivityKind::Email) > 0.9);
    }

    #[test]
    fn sequence_matching_needs_samples() {
        let mut baseline = UserBaseline::default();
        assert_eq!(baseline.matches_typical_sequence(&[ActivityKind::Logon]), None);

        baseline
            .typical_sequences
            .push(vec![ActivityKind::Logon, ActivityKind::Email]);
        assert_eq!(
            baseline.matches_typical_sequence(&[
                ActivityKind::FileAccess,
                ActivityKind::Logon,
                ActivityKind::Email
            ]),
            Some(true)
        );
        assert_eq!(
            baseline.matches_typical_sequence(&[ActivityKind::Network, ActivityKind::Network]),
            Some(false)
        );
    }
}
