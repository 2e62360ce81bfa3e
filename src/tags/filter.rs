//! Tag filtering and candidate ordering

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tags::semver::{is_semver, parse_tag_version};
use crate::tags::types::Tag;

/// Markers of development, preview and floating tags
static DEV_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(-dev$|-alpha|-beta|-rc|-preview|^sha256-|-r\d+$|nightly|latest)")
        .expect("dev marker pattern is valid")
});

/// Which tags are eligible as resolution candidates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPolicy {
    /// Drop tags that do not parse as a semantic version
    pub only_semver: bool,
    /// Drop pre-release, nightly and floating tags
    pub exclude_dev: bool,
    /// Keep only tags matching this regular expression (unanchored)
    pub name_pattern: Option<String>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            only_semver: true,
            exclude_dev: true,
            name_pattern: None,
        }
    }
}

impl FilterPolicy {
    /// A policy that keeps every tag
    pub fn permissive() -> Self {
        Self {
            only_semver: false,
            exclude_dev: false,
            name_pattern: None,
        }
    }
}

/// Compiled form of a [`FilterPolicy`]
#[derive(Debug, Clone)]
pub struct TagFilter {
    only_semver: bool,
    exclude_dev: bool,
    pattern: Option<Regex>,
}

impl TagFilter {
    pub fn new(policy: &FilterPolicy) -> Result<Self, regex::Error> {
        let pattern = policy.name_pattern.as_deref().map(Regex::new).transpose()?;
        Ok(Self {
            only_semver: policy.only_semver,
            exclude_dev: policy.exclude_dev,
            pattern,
        })
    }

    /// Returns true if a tag with this name passes the policy
    pub fn accepts(&self, name: &str) -> bool {
        if self.exclude_dev && is_dev_tag(name) {
            return false;
        }
        if self.only_semver && !is_semver(name) {
            return false;
        }
        self.pattern
            .as_ref()
            .is_none_or(|pattern| pattern.is_match(name))
    }
}

/// Returns true if the tag name carries a development or floating marker
pub fn is_dev_tag(name: &str) -> bool {
    DEV_MARKERS.is_match(name)
}

/// Orders candidates for resolution.
///
/// Semantic versions come first, highest version first. Ties and
/// non-semver tags fall back to newest `created_at` first, tags without a
/// timestamp last, then to the name so the order is fully deterministic.
pub fn order_candidates(tags: Vec<Tag>) -> Vec<Tag> {
    let mut keyed: Vec<_> = tags
        .into_iter()
        .map(|tag| (parse_tag_version(&tag.name), tag))
        .collect();

    keyed.sort_by(|(va, a), (vb, b)| {
        let by_version = match (va, vb) {
            (Some(va), Some(vb)) => vb.cmp(va),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_version
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| b.name.cmp(&a.name))
    });

    keyed.into_iter().map(|(_, tag)| tag).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn tag(name: &str, day: Option<u32>) -> Tag {
        Tag {
            name: name.to_string(),
            created_at: day.map(|d| Utc.with_ymd_and_hms(2024, 10, d, 0, 0, 0).unwrap()),
            digest: None,
            size_bytes: None,
        }
    }

    fn names(tags: &[Tag]) -> Vec<&str> {
        tags.iter().map(|t| t.name.as_str()).collect()
    }

    #[rstest]
    #[case("3.13.0-dev", true)]
    #[case("1.0.0-alpha.1", true)]
    #[case("1.0.0-BETA", true)]
    #[case("8.0.0-rc.2", true)]
    #[case("9.0-preview.7", true)]
    #[case("sha256-abcdef.sig", true)]
    #[case("3.20-r1", true)]
    #[case("nightly-2024-10-01", true)]
    #[case("latest", true)]
    #[case("3.13.0", false)]
    #[case("3.12-slim", false)]
    #[case("developer", false)]
    fn is_dev_tag_returns_expected(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_dev_tag(name), expected);
    }

    #[rstest]
    #[case(FilterPolicy::permissive(), "latest", true)]
    #[case(FilterPolicy::permissive(), "3.13.0-rc1", true)]
    #[case(FilterPolicy::default(), "latest", false)]
    #[case(FilterPolicy::default(), "3.13.0-rc1", false)]
    #[case(FilterPolicy::default(), "bookworm", false)]
    #[case(FilterPolicy::default(), "3.13.0", true)]
    #[case(
        FilterPolicy { only_semver: false, exclude_dev: true, name_pattern: None },
        "bookworm",
        true
    )]
    #[case(
        FilterPolicy { only_semver: true, exclude_dev: false, name_pattern: None },
        "3.13.0-rc1",
        true
    )]
    #[case(
        FilterPolicy { name_pattern: Some(r"^\d+\.\d+$".to_string()), ..FilterPolicy::default() },
        "3.13.0",
        false
    )]
    #[case(
        FilterPolicy { name_pattern: Some(r"^\d+\.\d+$".to_string()), ..FilterPolicy::default() },
        "3.13",
        true
    )]
    #[case(
        FilterPolicy { name_pattern: Some("alpine".to_string()), ..FilterPolicy::permissive() },
        "3.13-alpine3.20",
        true
    )]
    fn tag_filter_accepts_returns_expected(
        #[case] policy: FilterPolicy,
        #[case] name: &str,
        #[case] expected: bool,
    ) {
        let filter = TagFilter::new(&policy).unwrap();
        assert_eq!(filter.accepts(name), expected);
    }

    #[test]
    fn tag_filter_rejects_invalid_pattern() {
        let policy = FilterPolicy {
            name_pattern: Some("(unclosed".to_string()),
            ..FilterPolicy::default()
        };
        assert!(TagFilter::new(&policy).is_err());
    }

    #[test]
    fn order_candidates_sorts_by_version_descending() {
        let ordered = order_candidates(vec![
            tag("3.9.20", Some(7)),
            tag("3.13.0", Some(8)),
            tag("3.10.15", Some(7)),
            tag("3.12.7", Some(1)),
        ]);

        assert_eq!(names(&ordered), vec!["3.13.0", "3.12.7", "3.10.15", "3.9.20"]);
    }

    #[test]
    fn order_candidates_breaks_version_ties_by_created_at() {
        let ordered = order_candidates(vec![
            tag("v1.2", Some(1)),
            tag("1.2.0", Some(3)),
            tag("1.2", None),
        ]);

        assert_eq!(names(&ordered), vec!["1.2.0", "v1.2", "1.2"]);
    }

    #[test]
    fn order_candidates_puts_non_semver_after_versions() {
        let ordered = order_candidates(vec![
            tag("bookworm", Some(20)),
            tag("1.0.0", Some(1)),
            tag("alpine", Some(25)),
            tag("undated", None),
        ]);

        assert_eq!(names(&ordered), vec!["1.0.0", "alpine", "bookworm", "undated"]);
    }

    #[test]
    fn order_candidates_is_deterministic_for_equal_keys() {
        let first = order_candidates(vec![tag("a", Some(1)), tag("b", Some(1))]);
        let second = order_candidates(vec![tag("b", Some(1)), tag("a", Some(1))]);

        assert_eq!(first, second);
    }
}
