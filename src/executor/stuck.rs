//! Stuck/loop detection
//!
//! Watches recent action signatures for a session and reports "stuck" when
//! the same signature repeats consecutively. State lives per session and is
//! threaded across turns by the legacy executor.

use std::collections::VecDeque;

/// Signatures kept in the sliding window.
const DEFAULT_WINDOW: usize = 10;
/// Identical consecutive signatures that count as stuck.
const DEFAULT_REPEAT_THRESHOLD: usize = 3;

#[derive(Debug, Clone)]
pub struct StuckDetector {
    window: usize,
    repeat_threshold: usize,
    history: VecDeque<String>,
}

impl Default for StuckDetector {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_REPEAT_THRESHOLD)
    }
}

impl StuckDetector {
    pub fn new(window: usize, repeat_threshold: usize) -> Self {
        Self {
            window: window.max(1),
            repeat_threshold: repeat_threshold.max(2),
            history: VecDeque::new(),
        }
    }

    /// Record the signature of a produced action.
    pub fn record(&mut self, signature: impl Into<String>) {
        if self.history.len() >= self.window {
            self.history.pop_front();
        }
        self.history.push_back(signature.into());
    }

    /// True when the most recent `repeat_threshold` signatures are identical.
    pub fn is_stuck(&self) -> bool {
        if self.history.len() < self.repeat_threshold {
            return false;
        }
        let mut recent = self.history.iter().rev().take(self.repeat_threshold);
        let Some(first) = recent.next() else {
            return false;
        };
        recent.all(|sig| sig == first)
    }

    /// Human-readable description of the repeating signature, for the
    /// last-fault message.
    pub fn stuck_detail(&self) -> Option<String> {
        if !self.is_stuck() {
            return None;
        }
        self.history.back().map(|sig| {
            format!(
                "action repeated {} times: {}",
                self.repeat_threshold,
                truncate(sig, 120)
            )
        })
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

fn truncate(s: &str, chars: usize) -> String {
    if s.chars().count() <= chars {
        s.to_string()
    } else {
        s.chars().take(chars).collect::<String>() + "..."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_stuck_below_threshold() {
        let mut detector = StuckDetector::default();
        detector.record("run_command:{\"cmd\":\"ls\"}");
        detector.record("run_command:{\"cmd\":\"ls\"}");
        assert!(!detector.is_stuck());
    }

    #[test]
    fn test_stuck_on_consecutive_repeats() {
        let mut detector = StuckDetector::default();
        for _ in 0..3 {
            detector.record("run_command:{\"cmd\":\"ls\"}");
        }
        assert!(detector.is_stuck());
        assert!(detector.stuck_detail().unwrap().contains("repeated 3 times"));
    }

    #[test]
    fn test_varied_actions_not_stuck() {
        let mut detector = StuckDetector::default();
        detector.record("a");
        detector.record("b");
        detector.record("a");
        detector.record("b");
        assert!(!detector.is_stuck());
    }

    #[test]
    fn test_interleaved_breaks_run() {
        let mut detector = StuckDetector::default();
        detector.record("a");
        detector.record("a");
        detector.record("b");
        detector.record("a");
        assert!(!detector.is_stuck());
    }

    #[test]
    fn test_reset_clears_history() {
        let mut detector = StuckDetector::default();
        for _ in 0..3 {
            detector.record("a");
        }
        assert!(detector.is_stuck());
        detector.reset();
        assert!(!detector.is_stuck());
    }

    #[test]
    fn test_window_caps_history() {
        let mut detector = StuckDetector::new(4, 3);
        for i in 0..20 {
            detector.record(format!("sig{i}"));
        }
        assert!(!detector.is_stuck());
    }
}
