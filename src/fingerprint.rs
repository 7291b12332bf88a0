//! Deterministic cache keys for resolution requests.
use crate::context::{canonical_json, EvaluationContext};

/// Separator between the flag key and the context hash in a composite cache key.
///
/// Flag keys are not expected to contain `|`.
pub(crate) const SEPARATOR: char = '|';

/// Compute the cache key for a `(flag key, context)` pair.
///
/// The key is `flagKey|md5(canonical context JSON)`. Keeping the flag key as a plain prefix lets
/// the cache remove all of one flag's entries without decoding every stored key. The hash is not
/// cryptographic; it only needs to keep distinct contexts of the same flag apart.
///
/// Content-equal contexts produce the same fingerprint regardless of construction order, across
/// calls and across process runs.
pub fn fingerprint(flag_key: &str, context: &EvaluationContext) -> String {
    let digest = md5::compute(canonical_json(context));
    format!("{flag_key}{SEPARATOR}{digest:x}")
}

/// Check whether a composite cache key belongs to `flag_key`.
///
/// Matches the full flag-key segment, so `flag` does not claim entries of `flag-2`.
pub(crate) fn belongs_to_flag(key: &str, flag_key: &str) -> bool {
    key.len() > flag_key.len()
        && key.as_bytes()[flag_key.len()] == SEPARATOR as u8
        && key.starts_with(flag_key)
}
