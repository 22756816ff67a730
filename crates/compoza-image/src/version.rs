//! Semver-like tag recognition and specificity ordering
//!
//! Registries hand out opaque tags (`latest`, `alpine`, `sha-1f2e3d`) next to
//! version tags (`1`, `1.26`, `1.26.0`). When several tags point at the same
//! digest the most specific version tag is the one shown to users.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

static SEMVER_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?\d+(\.\d+)*(-[\w.]+)?(\+[\w.]+)?$").expect("static regex is valid")
});

/// Whether a tag looks like a version number
pub fn is_semver_like(tag: &str) -> bool {
    SEMVER_LIKE.is_match(tag)
}

/// Numeric core of a version tag: `v1.26.3-alpine+b1` -> `[1, 26, 3]`
fn numeric_parts(tag: &str) -> Vec<u64> {
    let core = tag.strip_prefix('v').unwrap_or(tag);
    let core = core.split(['-', '+']).next().unwrap_or(core);
    core.split('.')
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}

/// Ordering used everywhere a "best" tag is chosen
///
/// Semver-like tags sort before everything else; among them more dot
/// segments win, then higher numbers, then a release beats a suffixed build.
/// `Ordering::Less` means `a` is preferred.
pub fn compare_specificity(a: &str, b: &str) -> Ordering {
    match (is_semver_like(a), is_semver_like(b)) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => return a.cmp(b),
        (true, true) => {}
    }

    let pa = numeric_parts(a);
    let pb = numeric_parts(b);

    pb.len()
        .cmp(&pa.len())
        .then_with(|| pb.cmp(&pa))
        .then_with(|| has_suffix(a).cmp(&has_suffix(b)))
        .then_with(|| a.cmp(b))
}

fn has_suffix(tag: &str) -> bool {
    tag.contains('-') || tag.contains('+')
}

/// Sort tags most-specific-first in place
pub fn sort_by_specificity(tags: &mut [String]) {
    tags.sort_by(|a, b| compare_specificity(a, b));
}

/// The best version tag among candidates, if any is semver-like
pub fn best_semver_tag<'a, I>(tags: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    tags.into_iter()
        .filter(|t| is_semver_like(t))
        .min_by(|a, b| compare_specificity(a, b))
        .map(str::to_string)
}
