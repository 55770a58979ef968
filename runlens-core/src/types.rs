//! Core domain types for runlens
//!
//! These types are the telemetry data model: run identity, per-operation
//! metric records, the per-run [`AnalyticsEvent`] and the cross-run
//! [`AggregatedAnalytics`] rollup.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Run** | One execution of the CI job being observed |
//! | **Operation** | A single cache, container, or API action observed during a run |
//! | **Metric record** | The sanitized, immutable form of an operation produced at collection time |
//! | **Event** | One run's complete telemetry, persisted once |
//! | **Aggregate** | A time-bounded rollup of many events, mergeable with other aggregates |
//!
//! `AnalyticsEvent` and `AggregatedAnalytics` are the only persisted shapes.
//! Both serialize with camelCase field names and carry `schemaVersion`.
//! Fields may be added as optional; existing semantics never change without
//! bumping [`SCHEMA_VERSION`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version of persisted records produced by this build.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Reject a persisted record whose schema this build does not understand.
pub fn ensure_schema_version(found: &str) -> crate::Result<()> {
    if found == SCHEMA_VERSION {
        Ok(())
    } else {
        Err(crate::Error::SchemaVersion {
            expected: SCHEMA_VERSION.to_string(),
            found: found.to_string(),
        })
    }
}

// ============================================
// Run identity
// ============================================

/// Repository visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            // GitHub reports "internal" for enterprise-only repositories
            "private" | "internal" => Ok(Visibility::Private),
            _ => Err(format!("unknown visibility: {}", s)),
        }
    }
}

/// The repository a run belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryInfo {
    pub owner: String,
    pub name: String,
    /// `owner/name`
    pub full_name: String,
    pub id: u64,
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl RepositoryInfo {
    /// Create repository identity from `owner/name`.
    pub fn new(full_name: &str, id: u64, visibility: Visibility) -> Self {
        let (owner, name) = full_name
            .split_once('/')
            .unwrap_or(("", full_name));
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            full_name: full_name.to_string(),
            id,
            visibility,
            size: None,
            language: None,
        }
    }
}

/// The workflow run that produced the telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowContext {
    pub run_id: u64,
    pub run_number: u64,
    pub workflow: String,
    pub event_name: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub actor: String,
}

// ============================================
// Operation kinds
// ============================================

/// Cache operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOperation {
    Restore,
    Save,
    Delete,
}

impl CacheOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOperation::Restore => "restore",
            CacheOperation::Save => "save",
            CacheOperation::Delete => "delete",
        }
    }
}

/// Container operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockerOperation {
    Pull,
    Run,
    Build,
    Exec,
    Cleanup,
}

impl DockerOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DockerOperation::Pull => "pull",
            DockerOperation::Run => "run",
            DockerOperation::Build => "build",
            DockerOperation::Exec => "exec",
            DockerOperation::Cleanup => "cleanup",
        }
    }
}

/// Remote API request kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiOperation {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Graphql,
}

impl ApiOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiOperation::Get => "get",
            ApiOperation::Post => "post",
            ApiOperation::Put => "put",
            ApiOperation::Patch => "patch",
            ApiOperation::Delete => "delete",
            ApiOperation::Graphql => "graphql",
        }
    }
}

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCategory {
    DockerIssues,
    Authentication,
    CacheIssues,
    Network,
    ApiLimits,
    ToolInstallation,
    Configuration,
    Unknown,
}

impl FailureCategory {
    /// Every category, in reporting order.
    pub const ALL: [FailureCategory; 8] = [
        FailureCategory::DockerIssues,
        FailureCategory::Authentication,
        FailureCategory::CacheIssues,
        FailureCategory::Network,
        FailureCategory::ApiLimits,
        FailureCategory::ToolInstallation,
        FailureCategory::Configuration,
        FailureCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::DockerIssues => "docker-issues",
            FailureCategory::Authentication => "authentication",
            FailureCategory::CacheIssues => "cache-issues",
            FailureCategory::Network => "network",
            FailureCategory::ApiLimits => "api-limits",
            FailureCategory::ToolInstallation => "tool-installation",
            FailureCategory::Configuration => "configuration",
            FailureCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Metric records
// ============================================

/// A completed cache transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub operation_id: String,
    pub operation: CacheOperation,
    pub cache_key: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    /// Restore only: whether a matching entry was found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A completed container operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerMetrics {
    pub operation_id: String,
    pub operation: DockerOperation,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A completed remote API request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMetrics {
    pub operation_id: String,
    pub operation: ApiOperation,
    pub endpoint: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A classified failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureMetrics {
    pub failure_id: String,
    pub category: FailureCategory,
    pub failure_type: String,
    pub component: String,
    pub message: String,
    pub recoverable: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    /// Always false; kept so every metric record has the same outcome field
    pub success: bool,
    #[serde(default)]
    pub context: serde_json::Value,
}

/// Whole-run summary reported by the automation itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMetrics {
    pub duration_ms: u64,
    pub success: bool,
    pub tool_version: String,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repositories_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_requests_created: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies_updated: Option<u64>,
}

/// Metric arrays keyed by collector.
///
/// All four keys are always present, possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsBundle {
    pub cache: Vec<CacheMetrics>,
    pub docker: Vec<DockerMetrics>,
    pub api: Vec<ApiMetrics>,
    pub failures: Vec<FailureMetrics>,
}

impl MetricsBundle {
    /// Total number of records across all collectors.
    pub fn len(&self) -> usize {
        self.cache.len() + self.docker.len() + self.api.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One run's complete telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub repository: RepositoryInfo,
    pub workflow: WorkflowContext,
    pub cache_metrics: Vec<CacheMetrics>,
    pub docker_metrics: Vec<DockerMetrics>,
    pub api_metrics: Vec<ApiMetrics>,
    pub failure_metrics: Vec<FailureMetrics>,
    pub action_metrics: ActionMetrics,
    pub schema_version: String,
}

impl AnalyticsEvent {
    /// Wrap a collected bundle into an event stamped with the current schema.
    pub fn new(
        repository: RepositoryInfo,
        workflow: WorkflowContext,
        metrics: MetricsBundle,
        action: ActionMetrics,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            repository,
            workflow,
            cache_metrics: metrics.cache,
            docker_metrics: metrics.docker,
            api_metrics: metrics.api,
            failure_metrics: metrics.failures,
            action_metrics: action,
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }
}

/// Failure counts for every category.
///
/// A struct rather than a map so that no category can ever be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FailureCounts {
    pub docker_issues: u64,
    pub authentication: u64,
    pub cache_issues: u64,
    pub network: u64,
    pub api_limits: u64,
    pub tool_installation: u64,
    pub configuration: u64,
    pub unknown: u64,
}

impl FailureCounts {
    pub fn get(&self, category: FailureCategory) -> u64 {
        match category {
            FailureCategory::DockerIssues => self.docker_issues,
            FailureCategory::Authentication => self.authentication,
            FailureCategory::CacheIssues => self.cache_issues,
            FailureCategory::Network => self.network,
            FailureCategory::ApiLimits => self.api_limits,
            FailureCategory::ToolInstallation => self.tool_installation,
            FailureCategory::Configuration => self.configuration,
            FailureCategory::Unknown => self.unknown,
        }
    }

    fn slot(&mut self, category: FailureCategory) -> &mut u64 {
        match category {
            FailureCategory::DockerIssues => &mut self.docker_issues,
            FailureCategory::Authentication => &mut self.authentication,
            FailureCategory::CacheIssues => &mut self.cache_issues,
            FailureCategory::Network => &mut self.network,
            FailureCategory::ApiLimits => &mut self.api_limits,
            FailureCategory::ToolInstallation => &mut self.tool_installation,
            FailureCategory::Configuration => &mut self.configuration,
            FailureCategory::Unknown => &mut self.unknown,
        }
    }

    pub fn add(&mut self, category: FailureCategory, count: u64) {
        *self.slot(category) += count;
    }

    /// Category-wise sum.
    pub fn merge(&mut self, other: &FailureCounts) {
        for category in FailureCategory::ALL {
            self.add(category, other.get(category));
        }
    }

    pub fn total(&self) -> u64 {
        FailureCategory::ALL.iter().map(|c| self.get(*c)).sum()
    }
}

/// Time-bounded rollup of many events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedAnalytics {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub event_count: u64,
    pub repository_count: u64,
    pub cache_hit_rate: f64,
    pub avg_cache_duration: f64,
    pub avg_docker_duration: f64,
    pub avg_api_duration: f64,
    pub failures_by_category: FailureCounts,
    pub avg_action_duration: f64,
    pub action_success_rate: f64,
    pub schema_version: String,
}
