// 🔤 Normalizer - Free text → fixed vocabulary
// Keyword containment (case-insensitive) decides the category; the script of the
// input decides which canonical label family is used.

use crate::config::{KeywordConfig, LabelConfig};
use serde::{Deserialize, Serialize};

// ============================================================================
// VOCABULARY
// ============================================================================

/// Script family of a raw value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Script {
    Han,
    Latin,
}

/// Category used for escalation and tallies, independent of language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarningCategory {
    Stern,
    Verbal,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ViolationType {
    Stern(Script),
    Verbal(Script),
    /// Unmatched free text, kept verbatim (trimmed)
    Other(String),
    /// Missing or unparseable value
    Unknown,
}

impl ViolationType {
    pub fn category(&self) -> WarningCategory {
        match self {
            ViolationType::Stern(_) => WarningCategory::Stern,
            ViolationType::Verbal(_) => WarningCategory::Verbal,
            ViolationType::Other(_) | ViolationType::Unknown => WarningCategory::Other,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ViolationType::Unknown)
    }

    /// Canonical label in the record's own language family
    pub fn label(&self, labels: &LabelConfig) -> String {
        match self {
            ViolationType::Stern(Script::Han) => labels.han_stern.clone(),
            ViolationType::Stern(Script::Latin) => labels.latin_stern.clone(),
            ViolationType::Verbal(Script::Han) => labels.han_verbal.clone(),
            ViolationType::Verbal(Script::Latin) => labels.latin_verbal.clone(),
            ViolationType::Other(text) => text.clone(),
            ViolationType::Unknown => labels.unknown.clone(),
        }
    }

    /// Bilingual label used by the original-type sheet (`严厉Stern` / `口述Verbal`)
    pub fn legacy_label(&self, labels: &LabelConfig) -> String {
        match self {
            ViolationType::Stern(_) => labels.legacy_stern.clone(),
            ViolationType::Verbal(_) => labels.legacy_verbal.clone(),
            other => other.label(labels),
        }
    }

    /// Same category promoted to Stern, keeping the script
    pub fn escalated(&self) -> ViolationType {
        match self {
            ViolationType::Verbal(script) => ViolationType::Stern(*script),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmploymentStatus {
    Active,
    Resigned,
    PendingResignation,
    Other(String),
    Unknown,
}

/// Top-level incident family; each one has its own disposition cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationFamily {
    /// Type-A: false delivery (虚假妥投)
    FalseDelivery,
    /// Type-B: false marking (虚假标记)
    FalseMarking,
    Unrecognized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteCategory {
    AppealAccepted,
    AppealInsufficient,
    NoAppealOrPoorAttitude,
    Other,
}

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

pub fn contains_han(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

/// Case-insensitive containment of any keyword
pub fn contains_any(text: &str, keywords: &[String]) -> bool {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .any(|k| lower.contains(&k.to_lowercase()))
}

fn is_missing(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") || trimmed.eq_ignore_ascii_case("none")
}

pub fn normalize_violation_type(
    raw: Option<&str>,
    keywords: &KeywordConfig,
    labels: &LabelConfig,
) -> ViolationType {
    let value = match raw {
        Some(v) if !is_missing(v) => v.trim(),
        _ => return ViolationType::Unknown,
    };

    if value.eq_ignore_ascii_case(labels.unknown.trim()) {
        return ViolationType::Unknown;
    }

    let script = if contains_han(value) {
        Script::Han
    } else {
        Script::Latin
    };

    if contains_any(value, &keywords.stern) {
        ViolationType::Stern(script)
    } else if contains_any(value, &keywords.verbal) {
        ViolationType::Verbal(script)
    } else {
        ViolationType::Other(value.to_string())
    }
}

pub fn normalize_employment_status(raw: Option<&str>, keywords: &KeywordConfig) -> EmploymentStatus {
    let value = match raw {
        Some(v) if !is_missing(v) => v.trim(),
        _ => return EmploymentStatus::Unknown,
    };

    // "待离职" contains "离职": pending must win
    if contains_any(value, &keywords.pending_resignation) {
        EmploymentStatus::PendingResignation
    } else if contains_any(value, &keywords.resigned) {
        EmploymentStatus::Resigned
    } else if contains_any(value, &keywords.active) {
        EmploymentStatus::Active
    } else {
        EmploymentStatus::Other(value.to_string())
    }
}

/// Pending deliveries count as sent in reports
pub fn normalize_sending_status(raw: &str) -> String {
    if raw.contains("待发送") {
        "已发送".to_string()
    } else if raw.to_lowercase().contains("pending") {
        "Has been sent".to_string()
    } else {
        raw.to_string()
    }
}

pub fn detect_violation_family(raw: &str, keywords: &KeywordConfig) -> ViolationFamily {
    if contains_any(raw, &keywords.false_delivery) {
        ViolationFamily::FalseDelivery
    } else if contains_any(raw, &keywords.false_marking) {
        ViolationFamily::FalseMarking
    } else {
        ViolationFamily::Unrecognized
    }
}

/// Note categories are matched exactly (after trim), not by containment
pub fn normalize_note_category(raw: &str, keywords: &KeywordConfig) -> NoteCategory {
    let value = raw.trim();
    let is = |list: &[String]| list.iter().any(|k| k.trim().eq_ignore_ascii_case(value));

    if value.is_empty() {
        NoteCategory::Other
    } else if is(&keywords.appeal_accepted) {
        NoteCategory::AppealAccepted
    } else if is(&keywords.appeal_insufficient) {
        NoteCategory::AppealInsufficient
    } else if is(&keywords.no_appeal_or_poor_attitude) {
        NoteCategory::NoAppealOrPoorAttitude
    } else {
        NoteCategory::Other
    }
}

// ============================================================================
// TESTS
// ============================================================================
