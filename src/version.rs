use std::cmp::Ordering;

use regex::Regex;

/// Oldest git release whose plumbing output braid knows how to parse.
pub const REQUIRED_GIT_VERSION: &str = "1.6";

/// Check whether `actual` is at least `required`.
///
/// Both strings are period-delimited. Components are compared pairwise,
/// numerically when both sides are integers and as plain strings otherwise.
/// The first difference decides. If one string runs out first with the shared
/// prefix equal, the longer one is the greater.
pub fn satisfies(actual: &str, required: &str) -> bool {
    let actual: Vec<&str> = actual.split('.').collect();
    let required: Vec<&str> = required.split('.').collect();

    for (a, r) in actual.iter().zip(&required) {
        match compare_component(a, r) {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => {}
        }
    }

    // Everything shared was equal, so the longer string wins
    actual.len() >= required.len()
}

fn compare_component(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Extract the version number from the output of `git --version`.
pub fn parse_git_version(output: &str) -> Option<String> {
    let version_re = Regex::new(r"git version (\d+(?:\.[0-9A-Za-z]+)*)").ok()?;
    version_re
        .captures(output)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_more_components_with_equal_prefix_passes() {
        assert!(satisfies("1.5.4.5.2", "1.5.4.5"));
        assert!(satisfies("2.0.1", "2.0"));
    }

    #[test]
    fn test_fewer_components_with_equal_prefix_fails() {
        assert!(!satisfies("1.6", "1.6.0"));
    }

    #[test]
    fn test_equal_versions_pass() {
        assert!(satisfies("1.6", "1.6"));
        assert!(satisfies("2.39.2", "2.39.2"));
    }

    #[test]
    fn test_lower_component_fails() {
        assert!(!satisfies("1.5.4.4", "1.5.4.5"));
        assert!(!satisfies("1.5.9", "1.6"));
    }

    #[test]
    fn test_numeric_components_compare_as_integers() {
        // "10" < "9" as strings, but not as numbers
        assert!(satisfies("1.10", "1.9"));
        assert!(!satisfies("1.9", "1.10"));
    }

    #[test]
    fn test_trailing_alphanumeric_component_after_decided_comparison() {
        assert!(satisfies("1.5.5.1.98.gf0ec4", "1.5.4.5"));
        assert!(satisfies("2.39.2.windows", "1.6"));
    }

    #[test]
    fn test_non_numeric_component_compares_as_string() {
        assert!(satisfies("1.6.rc2", "1.6.rc1"));
        assert!(!satisfies("1.6.rc1", "1.6.rc2"));
    }

    #[test]
    fn test_parse_git_version() {
        assert_eq!(
            parse_git_version("git version 2.39.2\n").as_deref(),
            Some("2.39.2")
        );
        assert_eq!(
            parse_git_version("git version 2.39.3 (Apple Git-145)").as_deref(),
            Some("2.39.3")
        );
        assert_eq!(
            parse_git_version("git version 1.5.5.1.98.gf0ec4").as_deref(),
            Some("1.5.5.1.98.gf0ec4")
        );
        assert_eq!(parse_git_version("not git"), None);
    }
}
