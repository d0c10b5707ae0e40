//! Lenient semantic version comparison for app version gating.
//!
//! Device records report versions like `"2.7.2-android"` or `"2.6.10-ios"`.
//! Feature gates only care about the numeric triple; the platform suffix and
//! any missing trailing components are ignored.

use std::cmp::Ordering;

/// Compare two dotted numeric versions, ignoring a trailing `-suffix` and
/// treating missing components as `0`. Non-numeric components compare as `0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = numeric_components(a);
    let b = numeric_components(b);
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// `true` when `version` is at least `minimum`.
pub fn version_at_least(version: &str, minimum: &str) -> bool {
    compare_versions(version, minimum) != Ordering::Less
}

fn numeric_components(v: &str) -> Vec<u64> {
    let core = v.split_once('-').map_or(v, |(core, _)| core);
    core.split('.')
        .map(|part| part.trim().parse::<u64>().unwrap_or(0))
        .collect()
}
