use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::types::DifficultyLevel;

/// One recorded response, kept for analytics only.
///
/// Non-finite or negative response times are stored as 0 so the event always
/// serializes to valid JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionEvent {
    pub topic: String,
    pub correct: bool,
    pub difficulty: DifficultyLevel,
    pub response_time_seconds: f64,
    pub reward: f64,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl SelectionEvent {
    pub fn now(
        topic: impl Into<String>,
        correct: bool,
        difficulty: DifficultyLevel,
        response_time_seconds: f64,
        reward: f64,
    ) -> Self {
        Self {
            topic: topic.into(),
            correct,
            difficulty,
            response_time_seconds: if response_time_seconds.is_finite() {
                response_time_seconds.max(0.0)
            } else {
                0.0
            },
            reward,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Bounded ring buffer of selection events; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct SelectionHistory {
    events: VecDeque<SelectionEvent>,
    capacity: usize,
}

impl SelectionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn push(&mut self, event: SelectionEvent) {
        if self.capacity == 0 {
            return;
        }
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &SelectionEvent> {
        self.events.iter()
    }

    /// Up to `n` most recent events, newest last.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &SelectionEvent> {
        self.events.iter().skip(self.events.len().saturating_sub(n))
    }

    /// Fraction correct over the last `n` events, `None` when empty.
    pub fn recent_accuracy(&self, n: usize) -> Option<f64> {
        let (total, correct) = self
            .recent(n)
            .fold((0usize, 0usize), |(t, c), e| (t + 1, c + e.correct as usize));
        (total > 0).then(|| correct as f64 / total as f64)
    }

    pub fn mean_response_time(&self) -> Option<f64> {
        if self.events.is_empty() {
            return None;
        }
        let total: f64 = self.events.iter().map(|e| e.response_time_seconds).sum();
        Some(total / self.events.len() as f64)
    }

    pub fn to_vec(&self) -> Vec<SelectionEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Rebuild from persisted events, keeping the newest `capacity`.
    pub fn restore(&mut self, events: Vec<SelectionEvent>) {
        self.events.clear();
        for event in events {
            self.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(topic: &str, correct: bool, rt: f64) -> SelectionEvent {
        SelectionEvent::now(topic, correct, DifficultyLevel::Medium, rt, 0.0)
    }

    #[test]
    fn test_evicts_oldest() {
        let mut history = SelectionHistory::new(3);
        for i in 0..5 {
            history.push(event(&format!("t{}", i), true, 10.0));
        }
        assert_eq!(history.len(), 3);
        let topics: Vec<_> = history.iter().map(|e| e.topic.as_str()).collect();
        assert_eq!(topics, vec!["t2", "t3", "t4"]);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut history = SelectionHistory::new(0);
        history.push(event("a", true, 1.0));
        assert!(history.is_empty());
    }

    #[test]
    fn test_recent_accuracy_window() {
        let mut history = SelectionHistory::new(50);
        for _ in 0..10 {
            history.push(event("a", false, 5.0));
        }
        for _ in 0..4 {
            history.push(event("a", true, 5.0));
        }
        assert_eq!(history.recent_accuracy(4), Some(1.0));
        assert!((history.recent_accuracy(8).unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(SelectionHistory::new(5).recent_accuracy(20), None);
    }

    #[test]
    fn test_invalid_response_time_stored_as_zero() {
        let mut history = SelectionHistory::new(10);
        history.push(event("a", true, 10.0));
        history.push(event("a", true, f64::NAN));
        history.push(event("a", true, -4.0));
        history.push(event("a", true, 30.0));
        assert_eq!(history.mean_response_time(), Some(10.0));

        let json = serde_json::to_value(history.to_vec()).unwrap();
        let back: Vec<SelectionEvent> = serde_json::from_value(json).unwrap();
        assert_eq!(back.len(), 4);
    }
}
