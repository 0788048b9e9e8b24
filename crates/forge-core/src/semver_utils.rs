//! Semantic version parsing used by the engine version-compatibility check.
//!
//! `spec.md` §4.1: a `go://` engine that self-identifies via `--version`/`-v`
//! is compared major.minor against the orchestrator's own version. This
//! module does only the parsing the comparison needs.

use semver::Version;

/// Parse a version tag, handling the shapes engine `--version` output and
/// manifest URIs actually use: `"v1.2.3"`, `"1.2.3"`, `"1.2"`, `"1"`.
pub fn parse_version(tag: &str) -> Option<Version> {
    let version_str = tag.strip_prefix('v').unwrap_or(tag);

    if let Ok(version) = Version::parse(version_str) {
        return Some(version);
    }
    if let Ok(version) = Version::parse(&format!("{version_str}.0")) {
        return Some(version);
    }
    if let Ok(version) = Version::parse(&format!("{version_str}.0.0")) {
        return Some(version);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_versions() {
        assert!(parse_version("1.2.3").is_some());
        assert!(parse_version("v1.2.3").is_some());
        assert_eq!(parse_version("1.2.3").unwrap().to_string(), "1.2.3");
    }

    #[test]
    fn parses_short_forms() {
        assert_eq!(parse_version("1.2").unwrap().to_string(), "1.2.0");
        assert_eq!(parse_version("1").unwrap().to_string(), "1.0.0");
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(parse_version("invalid").is_none());
        assert!(parse_version("v").is_none());
        assert!(parse_version("").is_none());
    }
}
