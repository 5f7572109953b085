//! Time windows derived from the provider's recency cutoff

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowKind {
    /// Last 90 days ending at the cutoff
    Current,
    /// 60 to 30 days before the cutoff
    Prior,
}

/// Inclusive date range sent to the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    pub kind: WindowKind,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl EventWindow {
    /// `start|end` as the provider expects it
    pub fn date_range(&self) -> String {
        format!("{}|{}", self.start, self.end)
    }
}

/// All dates derived from one cutoff anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowAnchors {
    pub cutoff: NaiveDate,
    pub from_30: NaiveDate,
    pub from_90: NaiveDate,
    pub prior_start: NaiveDate,
    pub prior_end: NaiveDate,
}

impl WindowAnchors {
    pub fn from_cutoff(cutoff: NaiveDate) -> Self {
        Self {
            cutoff,
            from_30: cutoff - Duration::days(30),
            from_90: cutoff - Duration::days(90),
            prior_start: cutoff - Duration::days(60),
            prior_end: cutoff - Duration::days(30),
        }
    }

    pub fn current_window(&self) -> EventWindow {
        EventWindow {
            kind: WindowKind::Current,
            start: self.from_90,
            end: self.cutoff,
        }
    }

    pub fn prior_window(&self) -> EventWindow {
        EventWindow {
            kind: WindowKind::Prior,
            start: self.prior_start,
            end: self.prior_end,
        }
    }

    /// Event dates strictly after `cutoff - 30` count toward the 30-day window
    pub fn in_last_30(&self, event_date: NaiveDate) -> bool {
        event_date > self.from_30
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchors_from_cutoff() {
        let cutoff = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        let a = WindowAnchors::from_cutoff(cutoff);
        assert_eq!(a.from_30, NaiveDate::from_ymd_opt(2025, 9, 1).unwrap());
        assert_eq!(a.from_90, NaiveDate::from_ymd_opt(2025, 7, 3).unwrap());
        assert_eq!(a.prior_start, NaiveDate::from_ymd_opt(2025, 8, 2).unwrap());
        assert_eq!(a.prior_end, a.from_30);
        assert_eq!(a.current_window().date_range(), "2025-07-03|2025-10-01");
        assert_eq!(a.prior_window().kind, WindowKind::Prior);
    }

    #[test]
    fn test_last_30_is_exclusive_of_lower_bound() {
        let a = WindowAnchors::from_cutoff(NaiveDate::from_ymd_opt(2025, 10, 1).unwrap());
        assert!(!a.in_last_30(a.from_30));
        assert!(a.in_last_30(a.from_30 + Duration::days(1)));
        assert!(a.in_last_30(a.cutoff));
    }
}
