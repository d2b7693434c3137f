//! Keyword heuristics used when the LLM is unavailable or unusable.
//!
//! Status rules are evaluated most specific first against the lower-cased
//! subject and snippet; the first matching rule wins and no match yields
//! `Unknown`. Company and role extraction work on the original casing since
//! capitalisation is the main signal for a proper noun.

use regex::Regex;
use std::sync::LazyLock;
use tracker_types::{ApplicationStatus, ClassificationResult, ClassificationSource, EmailRecord};

struct StatusRule {
    status: ApplicationStatus,
    pattern: Regex,
}

static STATUS_RULES: LazyLock<Vec<StatusRule>> = LazyLock::new(|| {
    [
        (
            ApplicationStatus::Offer,
            r"\b(pleased to offer|offer of employment|job offer|offer letter|extend(?:ing)? (?:you )?an offer|congratulations on your offer)\b",
        ),
        (
            ApplicationStatus::Rejected,
            r"\b(not selected|not moving forward|not to move forward|unfortunately|another candidate|other candidates|not the right fit|will not be proceeding|not be proceeding|we regret to inform|after careful consideration|position has been filled|decided not to proceed|unable to offer|unsuccessful)\b",
        ),
        (
            ApplicationStatus::Interview,
            r"\b(interview|schedule a call|available times|calendar invite|phone screen|video call|on-site|onsite|final round|speak with (?:the |our )?hiring manager)\b",
        ),
        (
            ApplicationStatus::InReview,
            r"\b(under review|reviewing your application|being reviewed|shortlisted|assessment|coding challenge|take-home|online test|hackerrank|codility|codesignal|technical screen)\b",
        ),
        (
            ApplicationStatus::Applied,
            r"\b(application received|received your application|received your resume|thank you for applying|thanks for applying|thank you for your application|successfully submitted|successfully applied|application confirmation|application confirmed|application has been submitted|application for the)\b",
        ),
    ]
    .into_iter()
    .map(|(status, pattern)| StatusRule {
        status,
        pattern: Regex::new(pattern).expect("invalid status pattern"),
    })
    .collect()
});

static SUBJECT_COMPANY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i:applying|application|applied)\s+(?i:to|at|with)\s+([A-Z][A-Za-z0-9&]*(?:\s+[A-Z][A-Za-z0-9&]*){0,2})",
        r"(?i:interest in|welcome to)\s+([A-Z][A-Za-z0-9&]*(?:\s+[A-Z][A-Za-z0-9&]*){0,2})",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("invalid subject company pattern"))
    .collect()
});

static BODY_COMPANY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b(?:at|with|from|here at)\s+([A-Z][A-Za-z0-9&]+(?:\s+[A-Z][A-Za-z0-9&]+)?)",
        r"\b([A-Z][A-Za-z0-9&]+(?:\s+[A-Z][A-Za-z0-9&]+)?)\s+(?:team|talent|careers|recruiting)\b",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("invalid body company pattern"))
    .collect()
});

static ROLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)position of\s+([a-z][a-z \-()]+?)(?:\s+at\b|\s+with\b|[.,\n]|$)",
        r"(?i)for the\s+([a-z][a-z \-()]+?)\s+(?:position|role)\b",
        r"(?i)application for (?:the\s+)?([a-z][a-z \-()]+?)(?:\s+position|\s+role|\s+at\b|[.,\n]|$)",
        r"((?:[A-Z][A-Za-z\-]*\s+){0,4}(?:Engineer|Developer|Scientist|Analyst|Manager|Intern|Designer|Architect))\b",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("invalid role pattern"))
    .collect()
});

/// Words that look like proper nouns after "at"/"with" but never name an employer
const COMPANY_BLACKLIST: &[&str] = &[
    "the", "a", "an", "our", "your", "hey", "hi", "dear", "us", "me", "this", "that",
    "hire", "hiring", "careers", "recruiting", "talent", "hr", "people", "team", "staff",
    "admin", "support", "info", "contact", "email", "application", "position", "role",
    "job", "vacancy", "opportunity", "update", "status", "notification", "alert",
    "digest", "newsletter", "verify", "security", "code", "password", "login", "account",
    "unknown", "company", "client", "employer", "organization", "firm", "received",
    "confirmed", "submitted", "successful", "unsuccessful", "thank", "thanks", "best",
    "kind", "regards", "applytojob", "myworkday", "workday", "successfactors", "avature",
    "icims", "jobvite", "smartrecruiters", "breezy", "ashby", "greenhouse", "lever", "via",
    "welcome", "confirm", "noreply", "mailer", "service", "system",
];

/// Sender domains that belong to mail providers or ATS platforms, not employers
const IGNORED_DOMAINS: &[&str] = &[
    "gmail", "googlemail", "yahoo", "outlook", "hotmail", "mail", "no-reply", "noreply",
    "workday", "myworkday", "greenhouse", "greenhouse-mail", "lever", "hire", "icims",
    "taleo", "ripplehire", "smartrecruiters", "jobvite", "applytojob", "breezy", "ashby",
    "ashbyhq", "successfactors", "avature", "recruiting", "careers", "jobs", "e", "email",
    "fivesurveys", "growthassistant", "targetjobs", "getintoteaching",
];

/// Words a role must contain to be accepted
const ROLE_WORDS: &[&str] = &[
    "engineer", "developer", "scientist", "analyst", "manager", "intern", "designer",
    "architect", "lead", "senior", "junior", "graduate",
];

/// Known job titles, checked in order when no pattern matches
const JOB_TITLES: &[&str] = &[
    "software engineer",
    "software developer",
    "machine learning engineer",
    "ml engineer",
    "data scientist",
    "data analyst",
    "data engineer",
    "ai engineer",
    "research engineer",
    "research scientist",
    "frontend engineer",
    "frontend developer",
    "backend engineer",
    "backend developer",
    "full stack engineer",
    "full stack developer",
    "devops engineer",
    "site reliability engineer",
    "product manager",
    "program manager",
    "project manager",
    "solutions architect",
    "cloud engineer",
    "qa engineer",
    "test engineer",
    "mobile developer",
    "ios developer",
    "android developer",
];

/// Leading words trimmed from a captured role
const ROLE_PREFIXES: &[&str] = &["the", "a", "an", "our", "your", "for", "as", "new"];

/// Classify an email from keywords alone. Never fails.
pub fn classify(email: &EmailRecord) -> ClassificationResult {
    let text = format!("{} {}", email.subject, email.body_snippet).to_lowercase();

    let (status, reasoning) = match detect_status(&text) {
        Some((status, phrase)) => (status, format!("Matched {} phrase '{}'", status, phrase)),
        None => (
            ApplicationStatus::Unknown,
            "No status phrase matched".to_string(),
        ),
    };

    ClassificationResult {
        status,
        source: ClassificationSource::Heuristic,
        company: extract_company(email),
        role: extract_role(&email.subject, &email.body_snippet),
        reasoning,
    }
}

/// First matching status rule and the phrase it matched
pub fn detect_status(text: &str) -> Option<(ApplicationStatus, String)> {
    STATUS_RULES.iter().find_map(|rule| {
        rule.pattern
            .captures(text)
            .map(|caps| (rule.status, caps[1].to_string()))
    })
}

/// Employer name from the subject, then the body, then the sender domain
pub fn extract_company(email: &EmailRecord) -> Option<String> {
    let from_subject = SUBJECT_COMPANY
        .iter()
        .find_map(|re| first_company_capture(re, &email.subject));
    if from_subject.is_some() {
        return from_subject;
    }

    let from_body = BODY_COMPANY
        .iter()
        .find_map(|re| first_company_capture(re, &email.body_snippet));
    if from_body.is_some() {
        return from_body;
    }

    email
        .sender_domain()
        .filter(|domain| !IGNORED_DOMAINS.contains(&domain.as_str()))
        .map(|domain| title_case(&domain))
}

fn first_company_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures_iter(text).find_map(|caps| {
        let company = caps[1].trim();
        let first_word = company.split_whitespace().next().unwrap_or_default();
        let blacklisted = COMPANY_BLACKLIST.contains(&company.to_lowercase().as_str())
            || COMPANY_BLACKLIST.contains(&first_word.to_lowercase().as_str());
        (!blacklisted).then(|| company.to_string())
    })
}

/// Job title from common phrasings, then the known-title list
pub fn extract_role(subject: &str, body: &str) -> Option<String> {
    let content = format!("{} {}", subject, body);

    for re in ROLE_PATTERNS.iter() {
        for caps in re.captures_iter(&content) {
            if let Some(role) = clean_role(&caps[1]) {
                return Some(role);
            }
        }
    }

    let lower = content.to_lowercase();
    JOB_TITLES
        .iter()
        .find(|title| lower.contains(*title))
        .map(|title| title_case(title))
}

fn clean_role(raw: &str) -> Option<String> {
    let mut words: Vec<&str> = raw.split_whitespace().collect();
    while words
        .first()
        .is_some_and(|w| ROLE_PREFIXES.contains(&w.to_lowercase().as_str()))
    {
        words.remove(0);
    }

    let role = words.join(" ");
    if role.len() <= 5 || role.len() >= 80 {
        return None;
    }

    let lower = role.to_lowercase();
    if !ROLE_WORDS.iter().any(|w| lower.contains(w)) {
        return None;
    }

    if role == lower {
        Some(title_case(&role))
    } else {
        Some(role)
    }
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::email;

    fn email_with(subject: &str, body: &str, sender: &str) -> EmailRecord {
        let mut record = email("m1", subject, 1);
        record.body_snippet = body.to_string();
        record.sender = sender.to_string();
        record
    }

    #[test]
    fn test_applied_confirmation() {
        let result = classify(&email_with(
            "Thank you for applying to Acme Corp",
            "We have received your application for the Backend Engineer position.",
            "Acme Careers <no-reply@greenhouse.io>",
        ));
        assert_eq!(result.status, ApplicationStatus::Applied);
        assert_eq!(result.source, ClassificationSource::Heuristic);
        assert_eq!(result.company.as_deref(), Some("Acme Corp"));
        assert_eq!(result.role.as_deref(), Some("Backend Engineer"));
    }

    #[test]
    fn test_rules_are_ordered_most_specific_first() {
        // Rejection mentions the interview, rejection must win
        let (status, _) =
            detect_status("unfortunately, after your interview we will not be proceeding").unwrap();
        assert_eq!(status, ApplicationStatus::Rejected);

        let (status, phrase) =
            detect_status("we are pleased to offer you the role following your interview").unwrap();
        assert_eq!(status, ApplicationStatus::Offer);
        assert_eq!(phrase, "pleased to offer");

        let (status, _) = detect_status("please complete the hackerrank assessment").unwrap();
        assert_eq!(status, ApplicationStatus::InReview);
    }

    #[test]
    fn test_no_match_is_unknown() {
        let result = classify(&email_with(
            "Quarterly update",
            "Here is what happened this quarter.",
            "news@initech.com",
        ));
        assert_eq!(result.status, ApplicationStatus::Unknown);
        assert_eq!(result.reasoning, "No status phrase matched");
    }

    #[test]
    fn test_company_from_body_skips_blacklisted_words() {
        let record = email_with(
            "Your application",
            "Thanks for your interest in working with The team. Everyone at Globex Systems is excited.",
            "no-reply@myworkday.com",
        );
        assert_eq!(extract_company(&record).as_deref(), Some("Globex Systems"));
    }

    #[test]
    fn test_company_falls_back_to_sender_domain() {
        let record = email_with("Interview invitation", "", "talent@initech.io");
        assert_eq!(extract_company(&record).as_deref(), Some("Initech"));

        let platform = email_with("Interview invitation", "", "noreply@greenhouse.io");
        assert_eq!(extract_company(&platform), None);
    }

    #[test]
    fn test_role_patterns() {
        assert_eq!(
            extract_role("Update", "regarding the position of data engineer at Acme.").as_deref(),
            Some("Data Engineer")
        );
        assert_eq!(
            extract_role("Interview for Senior Platform Engineer", "").as_deref(),
            Some("Senior Platform Engineer")
        );
        assert_eq!(
            extract_role("Hello", "our ml engineer team is growing").as_deref(),
            Some("Ml Engineer")
        );
        assert_eq!(extract_role("Hello", "nothing relevant here"), None);
    }
}
