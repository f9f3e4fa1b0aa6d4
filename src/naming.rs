//! Flow identifier naming and resolution.
//!
//! Every connection observed in a trace report gets a short two-endpoint
//! label derived from its zero-based index (`0 -> a2b`, `1 -> c2d`, ...,
//! `13 -> aa2ab`). Generated artifact filenames embed either the canonical
//! label or its reversed form; `resolve_label` recovers the canonical label
//! and the orientation. Labels must never collide: a collision would
//! silently merge two distinct flows downstream.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

/// A well-formed label: two lowercase endpoint halves around one `2`
static LABEL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z]+)2([a-z]+)$").expect("Invalid label regex"));

/// Letters available for endpoint names
const ALPHABET_SIZE: usize = 26;

/// Endpoint pairs that fit in one alphabet (a2b .. y2z)
const PAIRS_PER_PREFIX: usize = ALPHABET_SIZE / 2;

/// Errors raised while decoding a label from an artifact filename
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelError {
    #[error("no label segment between the two rightmost '_' in {name:?}")]
    MissingSegment { name: String },

    #[error("label {label:?} must contain exactly one '2' separator")]
    BadSeparator { label: String },

    #[error("label {label:?} has a malformed endpoint half")]
    BadEndpoint { label: String },
}

fn letter(index: usize) -> char {
    debug_assert!(index < ALPHABET_SIZE);
    (b'a' + index as u8) as char
}

/// The `index`-th prefix in the positional lowercase-letter scheme
/// (`0 -> a`, `25 -> z`, `26 -> aa`, `27 -> ab`, ...).
pub fn prefix_label(index: usize) -> String {
    if index >= ALPHABET_SIZE {
        let mut prefix = prefix_label(index / ALPHABET_SIZE - 1);
        prefix.push(letter(index % ALPHABET_SIZE));
        prefix
    } else {
        letter(index).to_string()
    }
}

/// Canonical label for the `index`-th connection of a report.
///
/// Total, injective and order preserving over the non-negative integers:
/// each index consumes the next pair of letters, and once an alphabet's
/// worth of pairs is exhausted both endpoints gain an identical prefix
/// generated by [`prefix_label`].
pub fn connection_label(index: usize) -> String {
    if index >= PAIRS_PER_PREFIX {
        let prefix = prefix_label(index / PAIRS_PER_PREFIX - 1);
        let pair = index % PAIRS_PER_PREFIX;
        format!(
            "{prefix}{}2{prefix}{}",
            letter(2 * pair),
            letter(2 * pair + 1)
        )
    } else {
        format!("{}2{}", letter(2 * index), letter(2 * index + 1))
    }
}

/// A label decoded from an artifact filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLabel {
    /// Canonical (non-reversed) form, e.g. `a2b`
    pub canonical: String,
    /// True if the filename carried the reversed form (`b2a`)
    pub reversed: bool,
}

/// Extract the label segment embedded between the two rightmost `_`
/// separators of a generated artifact filename.
fn label_segment(name: &str) -> Result<&str, LabelError> {
    let missing = || LabelError::MissingSegment {
        name: name.to_string(),
    };
    let last = name.rfind('_').ok_or_else(missing)?;
    let previous = name[..last].rfind('_').ok_or_else(missing)?;
    let segment = &name[previous + 1..last];
    if segment.is_empty() {
        return Err(missing());
    }
    Ok(segment)
}

/// Compare two endpoint halves by generated-sequence order: shorter
/// prefixes sort first, equal lengths compare lexicographically.
fn endpoint_order(left: &str, right: &str) -> Ordering {
    left.len().cmp(&right.len()).then_with(|| left.cmp(right))
}

/// Canonicalize a bare label: split at its single `2` separator and swap
/// the endpoint halves if they are out of order.
///
/// Idempotent: canonicalizing an already-canonical label reports
/// `reversed == false`.
pub fn canonicalize_label(label: &str) -> Result<ResolvedLabel, LabelError> {
    let Some(caps) = LABEL_PATTERN.captures(label) else {
        // Exactly one '2' must split the label; anything else is a
        // malformed endpoint half
        if label.chars().filter(|c| *c == '2').count() != 1 {
            return Err(LabelError::BadSeparator {
                label: label.to_string(),
            });
        }
        return Err(LabelError::BadEndpoint {
            label: label.to_string(),
        });
    };
    let (left, right) = (
        caps.get(1).expect("left half").as_str(),
        caps.get(2).expect("right half").as_str(),
    );

    if endpoint_order(right, left) == Ordering::Less {
        Ok(ResolvedLabel {
            canonical: format!("{right}2{left}"),
            reversed: true,
        })
    } else {
        Ok(ResolvedLabel {
            canonical: label.to_string(),
            reversed: false,
        })
    }
}

/// Recover the canonical flow label and orientation from a generated
/// artifact filename, e.g. `trace_foo_b2a_stats.ext -> (a2b, reversed)`.
pub fn resolve_label(artifact_name: &str) -> Result<ResolvedLabel, LabelError> {
    canonicalize_label(label_segment(artifact_name)?)
}
