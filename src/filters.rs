//! Typed filter trees exposed by extensions.
//!
//! Settings and search filters form a tree: groups and lists nest, every other
//! node is a leaf. Leaf state is what ends up in the parameter map handed to
//! listing and search calls, keyed by filter id.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::info;

/// Value stored in a parameter map slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i32),
    Text(String),
}

/// Parameters passed to listing and search calls, keyed by filter id or one of
/// the reserved indexes (`QUERY_INDEX`, `PAGE_INDEX`, `LISTING_INDEX`).
pub type ParamMap = BTreeMap<i32, ParamValue>;

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "null"),
            ParamValue::Bool(value) => write!(f, "{value}"),
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::Text(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub id: i32,
    pub name: String,
    pub kind: FilterKind,
}

/// Closed set of filter kinds; leaf variants carry their mutable state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterKind {
    Text(String),
    Password(String),
    Switch(bool),
    Checkbox(bool),
    /// 0 = ignored, 1 = included, 2 = excluded.
    TriState(i32),
    Dropdown { choices: Vec<String>, state: i32 },
    RadioGroup { choices: Vec<String>, state: i32 },
    Header,
    Separator,
    Group(Vec<Filter>),
    List(Vec<Filter>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter {id} ({kind}) expects `true` or `false`, got `{value}`")]
    NotBoolean {
        id: i32,
        kind: &'static str,
        value: String,
    },
    #[error("filter {id} ({kind}) expects an integer, got `{value}`")]
    NotInteger {
        id: i32,
        kind: &'static str,
        value: String,
    },
}

impl Filter {
    pub fn new(id: i32, name: impl Into<String>, kind: FilterKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            FilterKind::Text(_) => "Text",
            FilterKind::Password(_) => "Password",
            FilterKind::Switch(_) => "Switch",
            FilterKind::Checkbox(_) => "Checkbox",
            FilterKind::TriState(_) => "TriState",
            FilterKind::Dropdown { .. } => "Dropdown",
            FilterKind::RadioGroup { .. } => "RadioGroup",
            FilterKind::Header => "Header",
            FilterKind::Separator => "Separator",
            FilterKind::Group(_) => "Group",
            FilterKind::List(_) => "List",
        }
    }

    /// Groups and lists; everything else is a leaf.
    pub fn is_container(&self) -> bool {
        matches!(self.kind, FilterKind::Group(_) | FilterKind::List(_))
    }

    pub fn children(&self) -> &[Filter] {
        match &self.kind {
            FilterKind::Group(children) | FilterKind::List(children) => children,
            _ => &[],
        }
    }

    /// Current state of a stateful leaf. Headers, separators and containers
    /// have none.
    pub fn state(&self) -> Option<ParamValue> {
        match &self.kind {
            FilterKind::Text(value) | FilterKind::Password(value) => {
                Some(ParamValue::Text(value.clone()))
            }
            FilterKind::Switch(value) | FilterKind::Checkbox(value) => {
                Some(ParamValue::Bool(*value))
            }
            FilterKind::TriState(value)
            | FilterKind::Dropdown { state: value, .. }
            | FilterKind::RadioGroup { state: value, .. } => Some(ParamValue::Int(*value)),
            FilterKind::Header
            | FilterKind::Separator
            | FilterKind::Group(_)
            | FilterKind::List(_) => None,
        }
    }

    fn state_type(&self) -> &'static str {
        match self.kind {
            FilterKind::Text(_) | FilterKind::Password(_) => "String",
            FilterKind::Switch(_) | FilterKind::Checkbox(_) => "Boolean",
            FilterKind::TriState(_)
            | FilterKind::Dropdown { .. }
            | FilterKind::RadioGroup { .. } => "Integer",
            FilterKind::Group(_) | FilterKind::List(_) => "Array",
            FilterKind::Header | FilterKind::Separator => "null",
        }
    }

    /// Coerce a raw override into this filter's state.
    ///
    /// Booleans accept exactly `true`/`false`; integer kinds parse a decimal
    /// `i32`; text kinds take the raw string. Structural nodes ignore it.
    pub fn apply_override(&mut self, raw: &str) -> Result<(), FilterError> {
        let id = self.id;
        let kind = self.kind_name();
        match &mut self.kind {
            FilterKind::Switch(state) | FilterKind::Checkbox(state) => {
                *state = match raw {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(FilterError::NotBoolean {
                            id,
                            kind,
                            value: raw.to_string(),
                        });
                    }
                };
            }
            FilterKind::TriState(state)
            | FilterKind::Dropdown { state, .. }
            | FilterKind::RadioGroup { state, .. } => {
                *state = raw.parse().map_err(|_| FilterError::NotInteger {
                    id,
                    kind,
                    value: raw.to_string(),
                })?;
            }
            FilterKind::Text(state) | FilterKind::Password(state) => {
                *state = raw.to_string();
            }
            FilterKind::Header
            | FilterKind::Separator
            | FilterKind::Group(_)
            | FilterKind::List(_) => {}
        }
        Ok(())
    }
}

/// Leaves of a filter tree, depth-first in source order.
pub fn flatten(filters: &[Filter]) -> Vec<&Filter> {
    let mut out = Vec::new();
    for filter in filters {
        push_leaves(filter, &mut out);
    }
    out
}

fn push_leaves<'a>(filter: &'a Filter, out: &mut Vec<&'a Filter>) {
    if filter.is_container() {
        for child in filter.children() {
            push_leaves(child, out);
        }
    } else {
        out.push(filter);
    }
}

/// Mutable counterpart of [`flatten`].
pub fn flatten_mut(filters: &mut [Filter]) -> Vec<&mut Filter> {
    let mut out = Vec::new();
    for filter in filters.iter_mut() {
        push_leaves_mut(filter, &mut out);
    }
    out
}

fn push_leaves_mut<'a>(filter: &'a mut Filter, out: &mut Vec<&'a mut Filter>) {
    if filter.is_container() {
        if let FilterKind::Group(children) | FilterKind::List(children) = &mut filter.kind {
            for child in children.iter_mut() {
                push_leaves_mut(child, out);
            }
        }
    } else {
        out.push(filter);
    }
}

/// Apply `id -> raw value` overrides to the leaves of `filters`.
///
/// Ids that match no leaf are ignored. When ids repeat inside a tree every
/// matching leaf is updated.
pub fn apply_overrides(
    filters: &mut [Filter],
    overrides: &BTreeMap<i32, String>,
) -> Result<(), FilterError> {
    if overrides.is_empty() {
        return Ok(());
    }
    for leaf in flatten_mut(filters) {
        if let Some(raw) = overrides.get(&leaf.id) {
            leaf.apply_override(raw)?;
        }
    }
    Ok(())
}

/// Map every stateful leaf to its current state.
pub fn mapify(filters: &[Filter]) -> ParamMap {
    flatten(filters)
        .into_iter()
        .filter_map(|leaf| leaf.state().map(|state| (leaf.id, state)))
        .collect()
}

/// Log a filter tree, one node per line, children indented below parents.
pub fn log_filter_tree(filters: &[Filter]) {
    log_level(filters, 1);
}

fn log_level(filters: &[Filter], depth: usize) {
    let tabs = "\t".repeat(depth);
    for filter in filters {
        info!(
            "{tabs}>{}\t[{}]\t{}\t={{{}}}",
            filter.kind_name(),
            filter.id,
            filter.name,
            filter.state_type()
        );
        if filter.is_container() {
            log_level(filter.children(), depth + 1);
        }
    }
}
