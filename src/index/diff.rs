//! Human-readable comparison of two repository indexes.
//!
//! Used when changing the generator: regenerate, then diff against the
//! published index to confirm only the intended entries moved. Sections other
//! than authors are compared as keyed sets, so reordering alone is not a
//! difference there; author order is significant because it encodes ranking.

use crate::index::model::RepoIndex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Write};

/// Describe how `right` differs from `left`. Empty when no section differs,
/// including when the only change is the order of keyed entries.
pub fn diff_indexes(left: &RepoIndex, right: &RepoIndex) -> String {
    if left == right {
        return String::new();
    }
    let mut out = String::new();

    if left.authors != right.authors {
        let mut body = diff_section("author", &left.authors, &right.authors, |a| a.id, |a| {
            a.name.clone()
        });
        if body.is_empty() {
            body.push_str("Order differs\n");
        }
        push_section(&mut out, "Authors", &body);
    }
    push_section(
        &mut out,
        "Libraries",
        &diff_section("library", &left.libraries, &right.libraries, |l| l.name.clone(), |l| {
            l.name.clone()
        }),
    );
    push_section(
        &mut out,
        "Extensions",
        &diff_section("extension", &left.extensions, &right.extensions, |e| e.id, |e| {
            e.name.clone()
        }),
    );
    push_section(
        &mut out,
        "Styles",
        &diff_section("style", &left.styles, &right.styles, |s| s.id, |s| s.name.clone()),
    );
    push_section(
        &mut out,
        "Scripts",
        &diff_section("script", &left.scripts, &right.scripts, |s| s.id, |s| s.name.clone()),
    );
    if out.is_empty() {
        return out;
    }
    format!("Differences found:\n{out}")
}

fn push_section(out: &mut String, title: &str, body: &str) {
    if body.is_empty() {
        return;
    }
    let _ = writeln!(out, "  {title} differ:");
    for line in body.lines() {
        let _ = writeln!(out, "    {line}");
    }
}

fn diff_section<T, K>(
    label: &str,
    left: &[T],
    right: &[T],
    key: impl Fn(&T) -> K,
    display: impl Fn(&T) -> String,
) -> String
where
    T: Serialize,
    K: Ord + Display,
{
    let mut out = String::new();
    if left.len() != right.len() {
        let _ = writeln!(out, "Size mismatch: {} != {}", left.len(), right.len());
    }
    let right_by_key: BTreeMap<K, &T> = right.iter().map(|item| (key(item), item)).collect();
    let left_by_key: BTreeMap<K, &T> = left.iter().map(|item| (key(item), item)).collect();

    for (k, item) in &left_by_key {
        let Some(other) = right_by_key.get(k) else {
            let _ = writeln!(out, "Missing {label}: {}", display(item));
            continue;
        };
        let before = serde_json::to_value(item).unwrap_or(Value::Null);
        let after = serde_json::to_value(other).unwrap_or(Value::Null);
        if before == after {
            continue;
        }
        let _ = writeln!(out, "Diff in {label} {}:", display(item));
        for (field, old, new) in changed_fields(&before, &after) {
            let _ = writeln!(out, "  {field}: {old} != {new}");
        }
    }
    for (k, item) in &right_by_key {
        if !left_by_key.contains_key(k) {
            let _ = writeln!(out, "Added {label}: {}", display(item));
        }
    }
    out
}

fn changed_fields(before: &Value, after: &Value) -> Vec<(String, Value, Value)> {
    let (Value::Object(old), Value::Object(new)) = (before, after) else {
        return vec![("value".to_string(), before.clone(), after.clone())];
    };
    let mut fields: Vec<&String> = old.keys().chain(new.keys()).collect();
    fields.sort();
    fields.dedup();
    fields
        .into_iter()
        .filter_map(|field| {
            let lhs = old.get(field).cloned().unwrap_or(Value::Null);
            let rhs = new.get(field).cloned().unwrap_or(Value::Null);
            (lhs != rhs).then(|| (field.clone(), lhs, rhs))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::identity::{AuthorId, ExtensionId};
    use crate::index::model::{RepoAuthor, RepoExtension, RepoLibrary};

    fn extension(id: i32, version: &str) -> RepoExtension {
        RepoExtension {
            id: ExtensionId(id),
            name: format!("Ext{id}"),
            file_name: format!("ext{id}"),
            image_url: String::new(),
            lang: "en".to_string(),
            version: version.to_string(),
            lib_version: "1.0.0".to_string(),
            content_hash: "00".to_string(),
            kind: Default::default(),
        }
    }

    #[test]
    fn equal_indexes_produce_no_output() {
        let index = RepoIndex {
            extensions: vec![extension(1, "1.0.0")],
            ..Default::default()
        };
        assert_eq!(diff_indexes(&index, &index.clone()), "");
    }

    #[test]
    fn reports_changed_missing_and_added_entries() {
        let left = RepoIndex {
            extensions: vec![extension(1, "1.0.0"), extension(2, "1.0.0")],
            ..Default::default()
        };
        let right = RepoIndex {
            extensions: vec![extension(1, "1.1.0"), extension(3, "1.0.0")],
            ..Default::default()
        };
        let report = diff_indexes(&left, &right);
        assert!(report.starts_with("Differences found:"));
        assert!(report.contains("  Extensions differ:"));
        assert!(report.contains("Diff in extension Ext1:"));
        assert!(report.contains("version: \"1.0.0\" != \"1.1.0\""));
        assert!(report.contains("Missing extension: Ext2"));
        assert!(report.contains("Added extension: Ext3"));
        assert!(!report.contains("Size mismatch"));
    }

    #[test]
    fn library_order_is_not_a_difference_but_author_order_is() {
        let lib = |name: &str| RepoLibrary {
            name: name.to_string(),
            version: "1".to_string(),
            url: None,
            content_hash: "00".to_string(),
        };
        let author = |name: &str| RepoAuthor {
            id: AuthorId::from_name(name),
            name: name.to_string(),
            description: "Worked on x".to_string(),
        };
        let left = RepoIndex {
            libraries: vec![lib("a"), lib("b")],
            authors: vec![author("A"), author("B")],
            ..Default::default()
        };
        let right = RepoIndex {
            libraries: vec![lib("b"), lib("a")],
            authors: vec![author("B"), author("A")],
            ..Default::default()
        };
        let report = diff_indexes(&left, &right);
        assert!(!report.contains("Libraries differ"));
        assert!(report.contains("Authors differ:"));
        assert!(report.contains("Order differs"));
    }

    #[test]
    fn reordered_entries_alone_produce_no_output() {
        let left = RepoIndex {
            extensions: vec![extension(1, "1.0.0"), extension(2, "1.0.0")],
            ..Default::default()
        };
        let right = RepoIndex {
            extensions: vec![extension(2, "1.0.0"), extension(1, "1.0.0")],
            ..Default::default()
        };
        assert_ne!(left, right);
        assert_eq!(diff_indexes(&left, &right), "");
    }
}
