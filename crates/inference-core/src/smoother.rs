//! Temporal label smoothing.
//!
//! Per-frame labels flicker. Each [`SmoothingKey`] keeps a short buffer of its
//! most recent raw labels and emits the majority label across it. Keys live in
//! a bounded LRU map so long-running processes do not grow without limit.

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use lru::LruCache;
use moodlens_common::SmoothingConfig;
use moodlens_emotion_model::{Emotion, SmoothingKey};
use parking_lot::Mutex;

/// Shared majority-vote smoother. Safe to call from many threads.
pub struct TemporalSmoother {
    window: usize,
    sessions: Mutex<LruCache<SmoothingKey, VecDeque<Emotion>>>,
}

impl TemporalSmoother {
    /// `window` and `max_sessions` are raised to at least 1.
    pub fn new(window: usize, max_sessions: usize) -> Self {
        let capacity = NonZeroUsize::new(max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            window: window.max(1),
            sessions: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_config(config: &SmoothingConfig) -> Self {
        Self::new(config.window, config.max_sessions)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Append `label` to the key's buffer and return the majority label.
    ///
    /// Append and vote happen under one lock, so concurrent callers on the
    /// same key each see a consistent buffer.
    pub fn observe(&self, key: &SmoothingKey, label: Emotion) -> Emotion {
        let mut sessions = self.sessions.lock();
        if !sessions.contains(key) {
            if let Some((evicted, _)) =
                sessions.push(key.clone(), VecDeque::with_capacity(self.window))
            {
                tracing::debug!(key = %evicted, "Smoothing session evicted");
            }
        }
        let Some(history) = sessions.get_mut(key) else {
            return label;
        };

        history.push_back(label);
        while history.len() > self.window {
            history.pop_front();
        }
        majority(history).unwrap_or(label)
    }

    /// Forget a key's history. Returns whether it was tracked.
    pub fn end_session(&self, key: &SmoothingKey) -> bool {
        self.sessions.lock().pop(key).is_some()
    }

    /// Current buffer for a key, oldest first. Does not touch recency.
    pub fn history(&self, key: &SmoothingKey) -> Option<Vec<Emotion>> {
        self.sessions
            .lock()
            .peek(key)
            .map(|h| h.iter().copied().collect())
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TemporalSmoother {
    fn default() -> Self {
        Self::from_config(&SmoothingConfig::default())
    }
}

/// Most frequent label; ties go to the label that appears first.
fn majority(labels: &VecDeque<Emotion>) -> Option<Emotion> {
    let mut best: Option<(Emotion, usize)> = None;
    for (i, &label) in labels.iter().enumerate() {
        if labels.iter().take(i).any(|&l| l == label) {
            continue;
        }
        let count = labels.iter().filter(|&&l| l == label).count();
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use moodlens_emotion_model::Emotion::*;

    fn key(user: &str) -> SmoothingKey {
        SmoothingKey::new(user, "m1", "a1")
    }

    fn feed(smoother: &TemporalSmoother, k: &SmoothingKey, labels: &[Emotion]) -> Emotion {
        labels
            .iter()
            .fold(Neutral, |_, &l| smoother.observe(k, l))
    }

    #[test]
    fn test_majority_wins() {
        let s = TemporalSmoother::default();
        assert_eq!(feed(&s, &key("u"), &[Happy, Happy, Sad]), Happy);
    }

    #[test]
    fn test_three_way_tie_goes_to_earliest() {
        let s = TemporalSmoother::default();
        assert_eq!(feed(&s, &key("u"), &[Happy, Sad, Frustrated]), Happy);
    }

    #[test]
    fn test_first_observation_passes_through() {
        let s = TemporalSmoother::default();
        assert_eq!(s.observe(&key("u"), Sad), Sad);
    }

    #[test]
    fn test_buffer_is_bounded_to_window() {
        let s = TemporalSmoother::default();
        let k = key("u");
        assert_eq!(feed(&s, &k, &[Happy, Happy, Sad, Sad, Neutral]), Sad);
        assert_eq!(s.history(&k).unwrap(), vec![Sad, Sad, Neutral]);
    }

    #[test]
    fn test_keys_are_independent() {
        let s = TemporalSmoother::default();
        feed(&s, &key("a"), &[Happy, Happy]);
        assert_eq!(s.observe(&key("b"), Sad), Sad);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_lru_eviction() {
        let s = TemporalSmoother::new(3, 2);
        s.observe(&key("a"), Happy);
        s.observe(&key("b"), Sad);
        // Touch "a" so "b" becomes least recently used.
        s.observe(&key("a"), Happy);
        s.observe(&key("c"), Neutral);

        assert_eq!(s.len(), 2);
        assert!(s.history(&key("b")).is_none());
        assert_eq!(s.history(&key("a")).unwrap(), vec![Happy, Happy]);
    }

    #[test]
    fn test_end_session() {
        let s = TemporalSmoother::default();
        let k = key("u");
        feed(&s, &k, &[Happy, Happy]);
        assert!(s.end_session(&k));
        assert!(!s.end_session(&k));
        assert!(s.is_empty());
        // A fresh session starts from scratch.
        assert_eq!(s.observe(&k, Sad), Sad);
    }

    #[test]
    fn test_window_of_one_is_passthrough() {
        let s = TemporalSmoother::new(0, 8);
        assert_eq!(s.window(), 1);
        assert_eq!(feed(&s, &key("u"), &[Happy, Happy, Sad]), Sad);
    }

    fn emotion() -> impl Strategy<Value = Emotion> {
        prop::sample::select(Emotion::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_only_last_window_votes(labels in prop::collection::vec(emotion(), 1..20)) {
            let s = TemporalSmoother::default();
            let k = key("p");
            let out = feed(&s, &k, &labels);
            let tail: VecDeque<Emotion> =
                labels.iter().rev().take(3).rev().copied().collect();
            prop_assert_eq!(Some(out), majority(&tail));
            prop_assert!(s.history(&k).unwrap().len() <= 3);
        }
    }
}
