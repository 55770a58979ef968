//! Cache key naming
//!
//! Keys have the shape
//! `{prefix}-{owner}-{name}-{type}-{version}[-{YYYY-MM-DD}]`. Empty parts are
//! left out of the join, so only the type segment is guaranteed to appear.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Separator between key segments.
pub const KEY_SEPARATOR: &str = "-";

/// Current key layout version.
pub const KEY_VERSION: &str = "v1";

/// Date bucket format.
const DATE_BUCKET_FORMAT: &str = "%Y-%m-%d";

/// Length of a rendered `YYYY-MM-DD` bucket.
const DATE_BUCKET_LEN: usize = 10;

/// What a stored blob contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKeyType {
    Events,
    Aggregated,
    Config,
}

impl CacheKeyType {
    pub const ALL: [CacheKeyType; 3] = [
        CacheKeyType::Events,
        CacheKeyType::Aggregated,
        CacheKeyType::Config,
    ];

    pub fn parse(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == segment)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKeyType::Events => "events",
            CacheKeyType::Aggregated => "aggregated",
            CacheKeyType::Config => "config",
        }
    }
}

impl std::fmt::Display for CacheKeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to [`generate_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyParams {
    pub prefix: String,
    /// `owner/name`
    pub repository: String,
    pub key_type: CacheKeyType,
    pub version: String,
    /// Adds a `YYYY-MM-DD` bucket when set
    pub timestamp: Option<DateTime<Utc>>,
}

impl CacheKeyParams {
    pub fn new(prefix: &str, repository: &str, key_type: CacheKeyType) -> Self {
        Self {
            prefix: prefix.to_string(),
            repository: repository.to_string(),
            key_type,
            version: KEY_VERSION.to_string(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }
}

/// Build the cache key for `params`. Pure and deterministic.
pub fn generate_key(params: &CacheKeyParams) -> String {
    let slug = repository_slug(&params.repository);
    let bucket = params.timestamp.map(date_bucket);

    [
        params.prefix.as_str(),
        slug.as_str(),
        params.key_type.as_str(),
        params.version.as_str(),
        bucket.as_deref().unwrap_or(""),
    ]
    .iter()
    .filter(|part| !part.is_empty())
    .copied()
    .collect::<Vec<_>>()
    .join(KEY_SEPARATOR)
}

/// `owner/name` -> `owner-name`
pub fn repository_slug(repository: &str) -> String {
    repository.trim().replace('/', KEY_SEPARATOR)
}

/// Day bucket of `timestamp` in UTC.
pub fn date_bucket(timestamp: DateTime<Utc>) -> String {
    timestamp.format(DATE_BUCKET_FORMAT).to_string()
}

/// Prefix shared by every key of `repository`, trailing separator included.
///
/// Keys of `octo/app-config` also start with the prefix of `octo/app`;
/// use [`key_type_of`] to tell them apart.
pub fn repository_prefix(prefix: &str, repository: &str) -> String {
    let slug = repository_slug(repository);
    [prefix, slug.as_str()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
        + KEY_SEPARATOR
}

/// Key type of a key under `repository_prefix`, if it is one of ours.
///
/// Everything after the prefix must be exactly `{type}-{version}` with an
/// optional `-YYYY-MM-DD` bucket, so a longer repository slug never matches.
pub fn key_type_of(key: &str, repository_prefix: &str) -> Option<CacheKeyType> {
    let rest = strip_date_bucket(key.strip_prefix(repository_prefix)?);
    let (key_type, version) = rest.split_once(KEY_SEPARATOR)?;
    if version.is_empty() || version.contains(KEY_SEPARATOR) {
        return None;
    }
    CacheKeyType::parse(key_type)
}

/// Key type read from the end of a full key, for listings that span
/// repositories.
pub fn trailing_key_type(key: &str) -> Option<CacheKeyType> {
    let (head, version) = strip_date_bucket(key).rsplit_once(KEY_SEPARATOR)?;
    if version.is_empty() {
        return None;
    }
    head.rsplit(KEY_SEPARATOR).next().and_then(CacheKeyType::parse)
}

/// Drop a trailing `-YYYY-MM-DD` bucket, if present.
fn strip_date_bucket(key: &str) -> &str {
    let Some(split) = key.len().checked_sub(DATE_BUCKET_LEN) else {
        return key;
    };
    let (Some(head), Some(bucket)) = (key.get(..split), key.get(split..)) else {
        return key;
    };
    match head.strip_suffix(KEY_SEPARATOR) {
        Some(head) if NaiveDate::parse_from_str(bucket, DATE_BUCKET_FORMAT).is_ok() => head,
        _ => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params() -> CacheKeyParams {
        CacheKeyParams::new("runlens-analytics", "octo/widgets", CacheKeyType::Events)
    }

    #[test]
    fn test_generate_key_layout() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).unwrap();
        assert_eq!(
            generate_key(&params().with_timestamp(ts)),
            "runlens-analytics-octo-widgets-events-v1-2024-03-09"
        );
        assert_eq!(
            generate_key(&params()),
            "runlens-analytics-octo-widgets-events-v1"
        );
    }

    #[test]
    fn test_generate_key_is_deterministic() {
        let ts = Utc::now();
        let a = generate_key(&params().with_timestamp(ts));
        let b = generate_key(&params().with_timestamp(ts));
        assert_eq!(a, b);
    }

    #[test]
    fn test_every_field_changes_key() {
        let base = generate_key(&params());
        let mut other = params();
        other.repository = "octo/gadgets".to_string();
        assert_ne!(generate_key(&other), base);

        let mut other = params();
        other.key_type = CacheKeyType::Aggregated;
        assert_ne!(generate_key(&other), base);

        assert_ne!(generate_key(&params().with_version("v2")), base);
        assert_ne!(generate_key(&params().with_timestamp(Utc::now())), base);
    }

    #[test]
    fn test_degenerate_input_keeps_type() {
        let params = CacheKeyParams {
            prefix: String::new(),
            repository: String::new(),
            key_type: CacheKeyType::Config,
            version: String::new(),
            timestamp: None,
        };
        assert_eq!(generate_key(&params), "config");
    }

    #[test]
    fn test_key_type_of() {
        let prefix = repository_prefix("runlens-analytics", "octo/widgets");
        assert_eq!(prefix, "runlens-analytics-octo-widgets-");

        let events = generate_key(&params().with_timestamp(Utc::now()));
        assert_eq!(key_type_of(&events, &prefix), Some(CacheKeyType::Events));

        let mut agg = params();
        agg.key_type = CacheKeyType::Aggregated;
        assert_eq!(
            key_type_of(&generate_key(&agg), &prefix),
            Some(CacheKeyType::Aggregated)
        );

        // another repository sharing the stem
        let legacy = generate_key(&CacheKeyParams::new(
            "runlens-analytics",
            "octo/widgets-legacy",
            CacheKeyType::Events,
        ));
        assert_eq!(key_type_of(&legacy, &prefix), None);
    }

    #[test]
    fn test_key_type_of_ignores_slug_ending_in_type_word() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        let prefix = repository_prefix("runlens-analytics", "octo/renovate");

        for key_type in CacheKeyType::ALL {
            let params =
                CacheKeyParams::new("runlens-analytics", "octo/renovate-config", key_type);
            assert_eq!(key_type_of(&generate_key(&params), &prefix), None);
            assert_eq!(
                key_type_of(&generate_key(&params.with_timestamp(ts)), &prefix),
                None
            );
        }

        let own =
            CacheKeyParams::new("runlens-analytics", "octo/renovate", CacheKeyType::Config);
        assert_eq!(
            key_type_of(&generate_key(&own.with_timestamp(ts)), &prefix),
            Some(CacheKeyType::Config)
        );
    }

    #[test]
    fn test_trailing_key_type() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        let params = CacheKeyParams::new(
            "runlens-analytics",
            "octo/aggregated-events",
            CacheKeyType::Config,
        );
        assert_eq!(
            trailing_key_type(&generate_key(&params)),
            Some(CacheKeyType::Config)
        );
        assert_eq!(
            trailing_key_type(&generate_key(&params.with_timestamp(ts))),
            Some(CacheKeyType::Config)
        );
        assert_eq!(trailing_key_type("someone-else"), None);
    }
}
