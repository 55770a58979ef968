//! Per-run collection context
//!
//! Built once at the end of a run from the validated configuration and the
//! run identity, then handed to every collector.

use std::sync::Arc;

use crate::config::AnalyticsConfig;
use crate::error::{Error, Result};
use crate::types::{RepositoryInfo, Visibility, WorkflowContext};

/// Configuration plus repository and workflow identity for one run.
#[derive(Debug, Clone)]
pub struct CollectionContext {
    pub config: Arc<AnalyticsConfig>,
    pub repository: RepositoryInfo,
    pub workflow: WorkflowContext,
}

impl CollectionContext {
    pub fn new(
        config: Arc<AnalyticsConfig>,
        repository: RepositoryInfo,
        workflow: WorkflowContext,
    ) -> Self {
        Self {
            config,
            repository,
            workflow,
        }
    }

    /// Build the context from the CI runner environment.
    pub fn from_env(config: Arc<AnalyticsConfig>) -> Result<Self> {
        let lookup = |name: &str| std::env::var(name).ok();
        Ok(Self::new(
            config,
            RepositoryInfo::from_lookup(lookup)?,
            WorkflowContext::from_lookup(lookup)?,
        ))
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::config(name, "", "required CI variable is not set")),
    }
}

fn numeric(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<u64> {
    let raw = required(lookup, name)?;
    raw.trim()
        .parse()
        .map_err(|_| Error::config(name, raw.as_str(), "must be a whole number"))
}

impl RepositoryInfo {
    /// Read repository identity from the GitHub Actions environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let full_name = required(&lookup, "GITHUB_REPOSITORY")?;
        let id = match lookup("GITHUB_REPOSITORY_ID") {
            Some(_) => numeric(&lookup, "GITHUB_REPOSITORY_ID")?,
            None => 0,
        };
        let visibility = lookup("RUNLENS_REPOSITORY_VISIBILITY")
            .and_then(|v| v.parse().ok())
            .unwrap_or(Visibility::Private);

        let mut repo = RepositoryInfo::new(&full_name, id, visibility);
        if let Some(owner) = lookup("GITHUB_REPOSITORY_OWNER").filter(|o| !o.is_empty()) {
            repo.owner = owner;
        }
        Ok(repo)
    }
}

impl WorkflowContext {
    /// Read workflow run identity from the GitHub Actions environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            run_id: numeric(&lookup, "GITHUB_RUN_ID")?,
            run_number: numeric(&lookup, "GITHUB_RUN_NUMBER")?,
            workflow: lookup("GITHUB_WORKFLOW").unwrap_or_default(),
            event_name: lookup("GITHUB_EVENT_NAME").unwrap_or_default(),
            git_ref: lookup("GITHUB_REF").unwrap_or_default(),
            sha: lookup("GITHUB_SHA").unwrap_or_default(),
            actor: lookup("GITHUB_ACTOR").unwrap_or_default(),
        })
    }
}
