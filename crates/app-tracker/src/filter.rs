//! Job-application mail filtering.
//!
//! The Gmail query narrows the candidate set server-side; [`EmailFilter`]
//! then applies a strict allow-list so only messages with an explicit
//! application signal reach the classifier.

use crate::config::FilterConfig;

/// Gmail search expression: ATS-style senders AND application-related subjects
pub const DEFAULT_JOB_QUERY: &str = "(from:noreply OR from:no-reply OR from:careers OR \
from:recruiting OR from:talent OR from:jobs OR from:hiring OR from:hr OR from:applications OR \
from:workday OR from:myworkday OR from:greenhouse OR from:lever OR from:icims OR from:taleo OR \
from:smartrecruiters OR from:jobvite OR from:ripplehire OR from:applytojob OR from:ashby OR \
from:breezy OR from:successfactors OR from:avature) \
subject:(application OR applied OR interview OR assessment OR position OR role OR confirmed OR \
received OR resume OR thank OR opportunity OR update OR unfortunately OR regret OR offer)";

/// Senders that never carry application updates (job boards, marketing, security alerts)
pub const IGNORED_SENDERS: &[&str] = &[
    "glassdoor",
    "linkedin",
    "indeed",
    "monster",
    "ziprecruiter",
    "dice",
    "careerbuilder",
    "noreply@github.com",
    "hello@github.com",
    "noreply@google.com",
    "targetjobs",
    "fivesurveys",
    "5surveys",
    "apple.com",
    "icloud",
    "accounts.google",
];

/// Subject phrases that block a message unless a positive phrase overrides them
pub const NEGATIVE_SUBJECTS: &[&str] = &[
    // job alerts / marketing
    "job alert",
    "jobs for you",
    "new jobs",
    "hiring now",
    "openings nearby",
    "don't miss these opportunities",
    "latest update from",
    "added today:",
    "earn double",
    "earn rewards",
    "playing games",
    "refer a friend",
    "refer and earn",
    // security / verification
    "security alert",
    "security code",
    "confirm your identity",
    "verify your candidate",
    "verify your account",
    "verify your email",
    "verification code",
    // surveys
    "candidate experience survey",
    "survey",
    // incomplete applications
    "complete your application",
    "finish your application",
    "don't forget to complete",
    // product updates and storage
    "product update",
    "icloud storage",
    "storage is full",
    "get into teaching",
    "initial teaching training",
];

/// Phrases that mark a message as an application event
pub const POSITIVE_PHRASES: &[&str] = &[
    // confirmation
    "thank you for applying",
    "thank you for your application",
    "thanks for applying",
    "application received",
    "we received your application",
    "we have received your application",
    "we've received your application",
    "we have received your resume",
    "we've received your resume",
    "successfully submitted",
    "application confirmed",
    "application has been submitted",
    // review
    "under review",
    "reviewing your application",
    // interview
    "invite you to interview",
    "invitation to interview",
    "interview invitation",
    "schedule an interview",
    "schedule a call",
    "phone screen",
    "video interview",
    "technical interview",
    "prescreen interview",
    // assessment
    "coding challenge",
    "take-home assignment",
    "online assessment",
    "complete this assessment",
    "hackerrank",
    "codility",
    "codesignal",
    // rejection
    "unsuccessful application",
    "unfortunately",
    "we regret to inform",
    "not moving forward",
    "decided not to move forward",
    "will not be proceeding",
    "not be proceeding",
    "position has been filled",
    "decided to pursue other candidates",
    "not selected",
    "another candidate",
    // offer
    "pleased to offer you",
    "offer of employment",
    "job offer",
    "extend an offer",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Keep(String),
    Block(String),
}

impl FilterDecision {
    pub fn is_keep(&self) -> bool {
        matches!(self, FilterDecision::Keep(_))
    }
}

#[derive(Debug, Clone)]
pub struct EmailFilter {
    ignored_senders: Vec<String>,
    negative_subjects: Vec<String>,
    positive_phrases: Vec<String>,
}

impl Default for EmailFilter {
    fn default() -> Self {
        Self {
            ignored_senders: to_owned(IGNORED_SENDERS),
            negative_subjects: to_owned(NEGATIVE_SUBJECTS),
            positive_phrases: to_owned(POSITIVE_PHRASES),
        }
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl EmailFilter {
    pub fn from_config(config: &FilterConfig) -> Self {
        let mut filter = Self::default();
        filter.ignored_senders.extend(
            config
                .extra_ignored_senders
                .iter()
                .map(|s| s.to_lowercase()),
        );
        filter.positive_phrases.extend(
            config
                .extra_positive_phrases
                .iter()
                .map(|s| s.to_lowercase()),
        );
        filter
    }

    /// Decide whether a message is an application event.
    ///
    /// Ignored senders always block. A negative subject blocks unless a
    /// positive phrase appears in the subject or body. Otherwise a positive
    /// phrase is required.
    pub fn check(&self, sender: &str, subject: &str, body: &str) -> FilterDecision {
        let sender_lower = sender.to_lowercase();
        let subject_lower = subject.to_lowercase();
        let combined = format!("{} {}", subject_lower, body.to_lowercase());

        if let Some(ignored) = self
            .ignored_senders
            .iter()
            .find(|ignored| sender_lower.contains(ignored.as_str()))
        {
            return FilterDecision::Block(format!("Blocked sender: {}", ignored));
        }

        let positive = self
            .positive_phrases
            .iter()
            .find(|phrase| combined.contains(phrase.as_str()));

        if let Some(negative) = self
            .negative_subjects
            .iter()
            .find(|phrase| subject_lower.contains(phrase.as_str()))
        {
            return match positive {
                Some(phrase) => {
                    FilterDecision::Keep(format!("Kept: '{}' (overrode '{}')", phrase, negative))
                }
                None => FilterDecision::Block(format!("Blocked subject: {}", negative)),
            };
        }

        match positive {
            Some(phrase) => FilterDecision::Keep(format!("Matched: {}", phrase)),
            None => FilterDecision::Block("Blocked: no positive job signal".to_string()),
        }
    }
}
