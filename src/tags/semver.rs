use semver::{BuildMetadata, Prerelease, Version};

/// Parse a tag name into a semver::Version, normalizing registry-style tags.
///
/// Strips a leading 'v' and pads partial versions with zeros. Anything after
/// the first '-' becomes the pre-release part and anything after '+' the
/// build metadata.
///
/// Examples:
/// - "3" -> Version(3, 0, 0)
/// - "v1.24" -> Version(1, 24, 0)
/// - "3.12-slim" -> Version(3, 12, 0, pre: "slim")
/// - "latest" -> None
pub fn parse_tag_version(tag: &str) -> Option<Version> {
    let tag = tag.strip_prefix(['v', 'V']).unwrap_or(tag);

    let (rest, build) = match tag.split_once('+') {
        Some((rest, build)) => (rest, Some(build)),
        None => (tag, None),
    };
    let (core, pre) = match rest.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (rest, None),
    };

    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse().ok()?;
    }

    let mut version = Version::new(numbers[0], numbers[1], numbers[2]);
    if let Some(pre) = pre {
        if pre.is_empty() {
            return None;
        }
        version.pre = Prerelease::new(pre).ok()?;
    }
    if let Some(build) = build {
        if build.is_empty() {
            return None;
        }
        version.build = BuildMetadata::new(build).ok()?;
    }
    Some(version)
}

/// Returns true if the tag name is a well-formed semantic version
pub fn is_semver(tag: &str) -> bool {
    parse_tag_version(tag).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("3.13.0", Some("3.13.0"))]
    #[case("3.13", Some("3.13.0"))]
    #[case("3", Some("3.0.0"))]
    #[case("v1.24.0", Some("1.24.0"))]
    #[case("V2.0", Some("2.0.0"))]
    #[case("3.12-slim", Some("3.12.0-slim"))]
    #[case("8.0.10-bookworm-slim", Some("8.0.10-bookworm-slim"))]
    #[case("1.0.0-rc.1", Some("1.0.0-rc.1"))]
    #[case("1.0.0+build.5", Some("1.0.0+build.5"))]
    #[case("latest", None)]
    #[case("nightly", None)]
    #[case("sha256-abc123", None)]
    #[case("1.2.3.4", None)]
    #[case("1..2", None)]
    #[case("v", None)]
    #[case("", None)]
    #[case("1.0-", None)]
    fn parse_tag_version_returns_expected(#[case] tag: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            parse_tag_version(tag),
            expected.map(|v| Version::parse(v).unwrap())
        );
    }

    #[test]
    fn parsed_versions_order_numerically_not_lexically() {
        let mut versions: Vec<Version> = ["3.9", "3.10", "3.13.0", "3.13.0-rc1"]
            .into_iter()
            .filter_map(parse_tag_version)
            .collect();
        versions.sort();

        assert_eq!(
            versions.iter().map(Version::to_string).collect::<Vec<_>>(),
            vec!["3.9.0", "3.10.0", "3.13.0-rc1", "3.13.0"]
        );
    }

    #[test]
    fn is_semver_accepts_partial_versions() {
        assert!(is_semver("22"));
        assert!(!is_semver("lts-alpine"));
    }
}
