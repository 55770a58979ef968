//! Failure message classification
//!
//! An ordered rule table maps free-text error messages to a
//! `{category, type}` pair. Rules are evaluated top to bottom and the first
//! rule with any matching pattern wins, so more specific rules sit above
//! broader ones (a 429 is a rate limit before it is an auth problem; a
//! docker socket permission error is a container problem before it is a
//! generic permission problem). Matching is case-insensitive.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::sync::LazyLock;

use crate::types::FailureCategory;

/// Type assigned when no rule matches.
pub const UNCLASSIFIED: &str = "unclassified-error";

/// Result of classifying a failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub category: FailureCategory,
    #[serde(rename = "type")]
    pub failure_type: &'static str,
}

impl Classification {
    pub const fn new(category: FailureCategory, failure_type: &'static str) -> Self {
        Self {
            category,
            failure_type,
        }
    }

    /// `{unknown, unclassified-error}`
    pub const fn unclassified() -> Self {
        Self::new(FailureCategory::Unknown, UNCLASSIFIED)
    }
}

/// One row of the classification table.
pub struct ClassificationRule {
    pub category: FailureCategory,
    pub failure_type: &'static str,
    pub patterns: &'static [&'static str],
}

impl ClassificationRule {
    const fn new(
        category: FailureCategory,
        failure_type: &'static str,
        patterns: &'static [&'static str],
    ) -> Self {
        Self {
            category,
            failure_type,
            patterns,
        }
    }
}

/// The classification table in priority order.
pub const RULES: &[ClassificationRule] = &[
    // ── Containers ─────────────────────────────────────────────────────────
    ClassificationRule::new(
        FailureCategory::DockerIssues,
        "permission-denied",
        &[
            r"permission denied.*docker",
            r"docker.*permission denied",
            r"docker\.sock.*(?:permission|access)",
        ],
    ),
    ClassificationRule::new(
        FailureCategory::DockerIssues,
        "daemon-unavailable",
        &[
            r"cannot connect to the docker daemon",
            r"is the docker daemon running",
            r"docker daemon.*not (?:running|available)",
        ],
    ),
    ClassificationRule::new(
        FailureCategory::DockerIssues,
        "image-pull-failed",
        &[
            r"pull access denied",
            r"(?:error|failed to) pull(?:ing)? image",
            r"manifest (?:for .* )?(?:not found|unknown)",
        ],
    ),
    // ── API limits ─────────────────────────────────────────────────────────
    ClassificationRule::new(
        FailureCategory::ApiLimits,
        "rate-limited",
        &[
            r"rate[ -]?limit",
            r"too many requests",
            r"\b429\b",
            r"abuse detection",
        ],
    ),
    // ── Authentication ─────────────────────────────────────────────────────
    ClassificationRule::new(
        FailureCategory::Authentication,
        "invalid-credentials",
        &[
            r"bad credentials",
            r"authentication (?:failed|required)",
            r"unauthori[sz]ed",
            r"\b401\b",
            r"invalid (?:token|credentials)",
            r"token (?:has )?expired",
        ],
    ),
    ClassificationRule::new(
        FailureCategory::Authentication,
        "insufficient-permissions",
        &[
            r"\b403\b",
            r"forbidden",
            r"resource not accessible by integration",
            r"insufficient (?:permissions?|scopes?)",
        ],
    ),
    // ── Cache ──────────────────────────────────────────────────────────────
    ClassificationRule::new(
        FailureCategory::CacheIssues,
        "cache-corruption",
        &[
            r"cache.*corrupt",
            r"corrupt.*cache",
            r"checksum mismatch",
            r"unexpected end of (?:archive|file)",
        ],
    ),
    ClassificationRule::new(
        FailureCategory::CacheIssues,
        "service-unavailable",
        &[
            r"cache service.*(?:unavailable|responded with)",
            r"failed to (?:save|restore|reserve) cache",
            r"cache (?:save|restore) failed",
        ],
    ),
    // ── Network ────────────────────────────────────────────────────────────
    ClassificationRule::new(
        FailureCategory::Network,
        "timeout",
        &[
            r"timed? ?out",
            r"etimedout",
            r"deadline exceeded",
        ],
    ),
    ClassificationRule::new(
        FailureCategory::Network,
        "connection-failed",
        &[
            r"econnrefused",
            r"econnreset",
            r"enotfound",
            r"connection (?:refused|reset|closed)",
            r"network is unreachable",
            r"could not resolve host",
            r"getaddrinfo",
            r"socket hang up",
        ],
    ),
    // ── Tool installation ──────────────────────────────────────────────────
    ClassificationRule::new(
        FailureCategory::ToolInstallation,
        "install-failed",
        &[
            r"failed to install",
            r"install(?:ation)? failed",
            r"command not found",
            r"unable to download",
            r"executable file not found",
        ],
    ),
    // ── Configuration ──────────────────────────────────────────────────────
    ClassificationRule::new(
        FailureCategory::Configuration,
        "invalid-configuration",
        &[
            r"invalid config",
            r"configuration (?:error|invalid)",
            r"missing required",
            r"yaml.*(?:parse|syntax)",
            r"invalid (?:input|value)",
        ],
    ),
];

struct CompiledRule {
    classification: Classification,
    patterns: Vec<Regex>,
}

static COMPILED: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| {
    RULES
        .iter()
        .map(|rule| CompiledRule {
            classification: Classification::new(rule.category, rule.failure_type),
            patterns: rule
                .patterns
                .iter()
                .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
                .collect(),
        })
        .collect()
});

/// Classify a failure message. Never fails: unmatched messages fall back
/// to [`Classification::unclassified`].
pub fn classify(message: &str) -> Classification {
    COMPILED
        .iter()
        .find(|rule| rule.patterns.iter().any(|p| p.is_match(message)))
        .map(|rule| rule.classification)
        .unwrap_or_else(Classification::unclassified)
}
