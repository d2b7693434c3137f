//! Application status and its progression order.
//!
//! The progression is a partial order: `Applied < InReview < Interview`, and
//! both `Offer` and `Rejected` sit above `Interview` without being comparable
//! to each other. `Unknown` is comparable only with itself. Every "is this
//! forward progress?" question in the tracker goes through [`PartialOrd`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Status of a job application as tracked in the sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Applied,
    InReview,
    Interview,
    Offer,
    Rejected,
    Unknown,
}

impl ApplicationStatus {
    /// All statuses in display order
    pub const ALL: [ApplicationStatus; 6] = [
        ApplicationStatus::Applied,
        ApplicationStatus::InReview,
        ApplicationStatus::Interview,
        ApplicationStatus::Offer,
        ApplicationStatus::Rejected,
        ApplicationStatus::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Applied => "Applied",
            ApplicationStatus::InReview => "In Review",
            ApplicationStatus::Interview => "Interview",
            ApplicationStatus::Offer => "Offer",
            ApplicationStatus::Rejected => "Rejected",
            ApplicationStatus::Unknown => "Unknown",
        }
    }

    /// Parse a label as written in the sheet or returned by a model.
    ///
    /// Matching is case-insensitive. `Assessment` is accepted as a legacy
    /// spelling of `InReview`.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "applied" => Some(ApplicationStatus::Applied),
            "inreview" | "assessment" => Some(ApplicationStatus::InReview),
            "interview" => Some(ApplicationStatus::Interview),
            "offer" => Some(ApplicationStatus::Offer),
            "rejected" => Some(ApplicationStatus::Rejected),
            "unknown" => Some(ApplicationStatus::Unknown),
            _ => None,
        }
    }

    /// True when the status carries information worth writing to the sheet
    pub fn is_known(&self) -> bool {
        !matches!(self, ApplicationStatus::Unknown)
    }

    /// True when moving from `current` to `self` is forward progress
    pub fn advances(&self, current: &ApplicationStatus) -> bool {
        self > current
    }

    fn rank(&self) -> Option<u8> {
        match self {
            ApplicationStatus::Applied => Some(0),
            ApplicationStatus::InReview => Some(1),
            ApplicationStatus::Interview => Some(2),
            ApplicationStatus::Offer | ApplicationStatus::Rejected => Some(3),
            ApplicationStatus::Unknown => None,
        }
    }
}

impl PartialOrd for ApplicationStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }

        match (self.rank()?, other.rank()?) {
            // Offer and Rejected share the terminal rank but are distinct outcomes
            (a, b) if a == b => None,
            (a, b) => Some(a.cmp(&b)),
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
