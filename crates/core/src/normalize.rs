//! Tag whitelisting and diacritic stripping.

use std::collections::BTreeMap;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Entity tags, ordered by key for stable output.
pub type Tags = BTreeMap<String, String>;

/// Tag keys carried into artifacts. Everything else is dropped.
pub const TAG_WHITELIST: &[&str] = &["name", "type"];

/// Suffix given to the unmodified value when a stripped value is also kept.
pub const ORIGINAL_SUFFIX: &str = ":original";

/// Remove diacritics: decompose, drop combining marks, recompose.
///
/// Letters without a canonical decomposition (e.g. `đ`, `ø`) are left as is.
pub fn strip_diacritics(value: &str) -> String {
    value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .nfc()
        .collect()
}

/// Keep only whitelisted tags, optionally adding diacritic-free values.
///
/// When `normalize` is set and stripping changes a value, the result holds
/// the original under `<key>:original` and the stripped value under `<key>`.
/// Otherwise the original value is kept under `<key>` alone.
pub fn normalize_tags(tags: &Tags, whitelist: &[&str], normalize: bool) -> Tags {
    let mut out = Tags::new();
    for key in whitelist {
        let Some(value) = tags.get(*key) else {
            continue;
        };

        if normalize {
            let stripped = strip_diacritics(value);
            if stripped != *value {
                out.insert(format!("{key}{ORIGINAL_SUFFIX}"), value.clone());
                out.insert((*key).to_string(), stripped);
                continue;
            }
        }

        out.insert((*key).to_string(), value.clone());
    }
    out
}
