//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Unplanned stop detection and reason capture."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use chrono::{DateTime, Utc};
use flexo_common::StopReasonEntry;
use flexo_msg::StopEvent;
use serde::{Deserialize, Serialize};

use crate::GuardViolation;

/// Stop detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DetectorState {
    Armed,
    AwaitingReason { started_at: DateTime<Utc> },
    /// A reason was given but the line has not moved since.
    Acknowledged,
}

/// What a sample did to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorTransition {
    /// An unplanned stop began; the operator owes a reason.
    Opened { started_at: DateTime<Utc> },
    /// The line moved again before a reason was given.
    Cleared,
}

/// Flags stops that happen with real work left on the order.
///
/// A stop counts only when the line is at zero speed, something has been
/// produced, and more than `gap_threshold` units remain. Stops near the end
/// of a job are treated as the job finishing.
#[derive(Debug, Clone)]
pub struct StopDetector {
    state: DetectorState,
    gap_threshold: u64,
}

impl StopDetector {
    pub fn new(gap_threshold: u64) -> Self {
        Self {
            state: DetectorState::Armed,
            gap_threshold,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn awaiting_since(&self) -> Option<DateTime<Utc>> {
        match self.state {
            DetectorState::AwaitingReason { started_at } => Some(started_at),
            DetectorState::Armed | DetectorState::Acknowledged => None,
        }
    }

    /// Feed one sample. While a stop is open, or its reason has been given
    /// and the line is still standing, zero-speed samples are ignored, so one
    /// stop yields at most one prompt.
    pub fn observe(
        &mut self,
        speed: f64,
        relative_qty: i64,
        target_qty: u64,
        now: DateTime<Utc>,
    ) -> Option<DetectorTransition> {
        match self.state {
            DetectorState::Armed => {
                let remaining = target_qty as i64 - relative_qty;
                if speed == 0.0 && relative_qty > 0 && remaining > self.gap_threshold as i64 {
                    self.state = DetectorState::AwaitingReason { started_at: now };
                    Some(DetectorTransition::Opened { started_at: now })
                } else {
                    None
                }
            }
            DetectorState::AwaitingReason { .. } if speed > 0.0 => {
                self.state = DetectorState::Armed;
                Some(DetectorTransition::Cleared)
            }
            DetectorState::AwaitingReason { .. } => None,
            DetectorState::Acknowledged => {
                if speed > 0.0 {
                    self.state = DetectorState::Armed;
                }
                None
            }
        }
    }

    /// Close the open stop with the operator's reason.
    pub fn supply_reason(
        &mut self,
        reason: ResolvedReason,
        now: DateTime<Utc>,
    ) -> Result<StopEvent, GuardViolation> {
        let DetectorState::AwaitingReason { started_at } = self.state else {
            return Err(GuardViolation::NoPendingStop);
        };
        self.state = DetectorState::Acknowledged;
        let duration_seconds = (now - started_at).num_seconds().max(0) as u64;
        Ok(StopEvent {
            start_time: started_at,
            duration_seconds,
            reason_label: reason.label,
            reason_code: reason.code,
        })
    }

    /// Drop any open stop without recording it.
    pub fn reset(&mut self) {
        self.state = DetectorState::Armed;
    }
}

/// A reason after catalog lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReason {
    pub code: Option<String>,
    pub label: String,
}

/// Operator-facing list of stop reasons.
#[derive(Debug, Clone, Default)]
pub struct StopReasonCatalog {
    entries: Vec<StopReasonEntry>,
}

impl StopReasonCatalog {
    pub fn new(entries: Vec<StopReasonEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[StopReasonEntry] {
        &self.entries
    }

    /// Match a catalog code or label (case-insensitive). Anything else is kept
    /// as a free-text label without a code.
    pub fn resolve(&self, input: &str) -> Result<ResolvedReason, GuardViolation> {
        let input = input.trim();
        if input.is_empty() {
            return Err(GuardViolation::EmptyReason);
        }
        let found = self
            .entries
            .iter()
            .find(|entry| entry.code == input || entry.label.eq_ignore_ascii_case(input));
        Ok(match found {
            Some(entry) => ResolvedReason {
                code: Some(entry.code.clone()),
                label: entry.label.clone(),
            },
            None => ResolvedReason {
                code: None,
                label: input.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn catalog() -> StopReasonCatalog {
        StopReasonCatalog::new(vec![
            StopReasonEntry {
                code: "001".into(),
                label: "Material change".into(),
            },
            StopReasonEntry {
                code: "003".into(),
                label: "Feed Skew".into(),
            },
        ])
    }

    #[test]
    fn small_gap_is_not_a_stop() {
        let mut detector = StopDetector::new(50);
        assert_eq!(detector.observe(0.0, 8, 50, Utc::now()), None);
        assert_eq!(detector.state(), DetectorState::Armed);
    }

    #[test]
    fn nothing_produced_is_not_a_stop() {
        let mut detector = StopDetector::new(50);
        assert_eq!(detector.observe(0.0, 0, 1000, Utc::now()), None);
    }

    #[test]
    fn stop_opens_once_and_records_duration() {
        let mut detector = StopDetector::new(50);
        let start = Utc::now();
        assert_eq!(
            detector.observe(0.0, 8, 100, start),
            Some(DetectorTransition::Opened { started_at: start })
        );
        for secs in 1..30 {
            assert_eq!(
                detector.observe(0.0, 8, 100, start + Duration::seconds(secs)),
                None
            );
        }
        let reason = catalog().resolve("feed skew").unwrap();
        let event = detector
            .supply_reason(reason, start + Duration::seconds(30))
            .unwrap();
        assert_eq!(event.duration_seconds, 30);
        assert_eq!(event.reason_label, "Feed Skew");
        assert_eq!(event.reason_code.as_deref(), Some("003"));
        assert_eq!(detector.state(), DetectorState::Acknowledged);
    }

    #[test]
    fn answered_stop_stays_closed_until_the_line_moves() {
        let mut detector = StopDetector::new(50);
        let start = Utc::now();
        detector.observe(0.0, 10, 1000, start);
        detector
            .supply_reason(catalog().resolve("003").unwrap(), start + Duration::seconds(30))
            .unwrap();
        for millis in [100, 200, 5_000] {
            let at = start + Duration::seconds(30) + Duration::milliseconds(millis);
            assert_eq!(detector.observe(0.0, 10, 1000, at), None);
            assert_eq!(detector.awaiting_since(), None);
        }

        assert_eq!(detector.observe(60.0, 11, 1000, start + Duration::seconds(40)), None);
        assert_eq!(detector.state(), DetectorState::Armed);
        let again = start + Duration::seconds(50);
        assert_eq!(
            detector.observe(0.0, 12, 1000, again),
            Some(DetectorTransition::Opened { started_at: again })
        );
    }

    #[test]
    fn reset_clears_an_answered_stop() {
        let mut detector = StopDetector::new(50);
        let now = Utc::now();
        detector.observe(0.0, 10, 1000, now);
        detector
            .supply_reason(catalog().resolve("001").unwrap(), now)
            .unwrap();
        detector.reset();
        assert_eq!(detector.state(), DetectorState::Armed);
        assert!(matches!(
            detector.observe(0.0, 10, 1000, now),
            Some(DetectorTransition::Opened { .. })
        ));
    }

    #[test]
    fn movement_clears_open_stop_without_event() {
        let mut detector = StopDetector::new(50);
        let now = Utc::now();
        detector.observe(0.0, 8, 100, now);
        assert_eq!(
            detector.observe(40.0, 9, 100, now),
            Some(DetectorTransition::Cleared)
        );
        assert_eq!(
            detector.supply_reason(catalog().resolve("001").unwrap(), now),
            Err(GuardViolation::NoPendingStop)
        );
    }

    #[test]
    fn free_text_reasons_are_kept() {
        let resolved = catalog().resolve("  doctor blade  ").unwrap();
        assert_eq!(resolved.code, None);
        assert_eq!(resolved.label, "doctor blade");
        assert_eq!(catalog().resolve("  "), Err(GuardViolation::EmptyReason));
    }
}
