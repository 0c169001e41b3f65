//! Red-flag filter for candidate solutions.
//!
//! Rules run in a fixed order and the first match wins: length, forbidden
//! phrases, explicit failure markers, repetition, then the formatting
//! heuristic. Any flagged verdict keeps the candidate out of the vote tally;
//! severity is informational only.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

const MIN_OUTPUT_CHARS: usize = 10;
const REPETITION_MIN_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedFlagVerdict {
    pub flagged: bool,
    pub severity: Severity,
    pub reason: String,
    pub suggestions: Vec<String>,
}

impl RedFlagVerdict {
    fn clean() -> Self {
        Self {
            flagged: false,
            severity: Severity::Low,
            reason: String::new(),
            suggestions: Vec::new(),
        }
    }

    fn flag(severity: Severity, reason: impl Into<String>, suggestions: &[&str]) -> Self {
        Self {
            flagged: true,
            severity,
            reason: reason.into(),
            suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
        }
    }
}

static FORBIDDEN: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\bi\s+(?:don'?t|do\s+not)\s+know\b",
        r"(?i)\bi(?:'m|\s+am)\s+not\s+(?:sure|certain)\b",
        r"(?i)\bas\s+an?\s+(?:ai|language\s+model|large\s+language\s+model)\b",
        r"(?i)\bi(?:\s+cannot|\s+can'?t|\s+am\s+unable\s+to|'m\s+unable\s+to)\s+(?:help|assist|do|complete|provide)\b",
        r"(?i)\bi\s+(?:won'?t|will\s+not|refuse\s+to)\b",
        r"(?i)\bi\s+apologi[sz]e\b",
        r"(?i)\bsorry,?\s+but\b",
        r"(?i)\bunable\s+to\s+determine\b",
    ])
    .expect("forbidden phrase patterns must compile")
});

static ERROR_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:error|fatal|exception)\b\s*[:!]?")
        .expect("error prefix pattern must compile")
});

static FAILURE_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Traceback \(most recent call last\)|\b\w*(?:Exception|Error):\s|panicked at\b")
        .expect("failure marker pattern must compile")
});

static CODE_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(?:fn|pub\s+fn|def|class|function|import|from\s+\S+\s+import|#include|public\s+(?:static\s+)?(?:class|void)|const|let|var|struct|impl)\b",
    )
    .expect("code keyword pattern must compile")
});

/// Classify one candidate output.
pub fn check(output: &str) -> RedFlagVerdict {
    let trimmed = output.trim();

    if trimmed.chars().count() < MIN_OUTPUT_CHARS {
        return RedFlagVerdict::flag(
            Severity::Critical,
            "output too short to be a valid solution",
            &["return a complete solution rather than a fragment"],
        );
    }

    if FORBIDDEN.is_match(trimmed) {
        return RedFlagVerdict::flag(
            Severity::Medium,
            "output contains refusal or uncertainty language",
            &["answer directly without disclaimers or hedging"],
        );
    }

    if ERROR_PREFIX.is_match(trimmed) || FAILURE_MARKERS.is_match(trimmed) {
        return RedFlagVerdict::flag(
            Severity::Critical,
            "output reports an explicit error or exception",
            &["resolve the underlying failure before answering"],
        );
    }

    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() > REPETITION_MIN_LINES {
        let unique: HashSet<&str> = lines.iter().map(|line| line.trim()).collect();
        if unique.len() * 2 < lines.len() {
            return RedFlagVerdict::flag(
                Severity::Medium,
                format!(
                    "output is repetitive ({} unique of {} lines)",
                    unique.len(),
                    lines.len()
                ),
                &["avoid looping or duplicated content"],
            );
        }
    }

    if CODE_KEYWORDS.is_match(trimmed) && !trimmed.contains("```") {
        return RedFlagVerdict::flag(
            Severity::Low,
            "output looks like code but has no fenced code block",
            &[
                "wrap code in ``` fenced blocks",
                "state the language after the opening fence",
            ],
        );
    }

    RedFlagVerdict::clean()
}
