//! Node label selectors compiled from the `--node-label-selector` and
//! `--node-exclude-labels` settings.
//!
//! Both settings share one text format: `key=value` pairs joined by `,`, with
//! whitespace around keys, values and commas ignored. Include pairs become
//! equality requirements, exclude pairs become inequality requirements, and
//! every requirement must hold for a label set to match.
//!
//! Compilation never fails. A segment that does not parse is logged and
//! dropped, the remaining segments still apply.
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::{
    collections::{btree_map::Entry, BTreeMap},
    fmt,
};
use thiserror::Error;

// local type aliases
type Map = BTreeMap<String, String>;

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

/// The comparison a parsed `key=value` segment turns into
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    /// `key=value`: the label must be present with exactly this value
    Equal,
    /// `key!=value`: the label must be absent or carry another value
    NotEqual,
}

impl Operator {
    fn expression(self, key: &str, value: &str) -> Expression {
        match self {
            Operator::Equal => Expression::Equal(key.into(), value.into()),
            Operator::NotEqual => Expression::NotEqual(key.into(), value.into()),
        }
    }

    fn setting(self) -> &'static str {
        match self {
            Operator::Equal => "label selector",
            Operator::NotEqual => "exclude label",
        }
    }
}

/// A single requirement of a [`Selector`]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expression {
    /// The label `.0` must equal `.1`
    Equal(String, String),
    /// The label `.0` must not equal `.1`
    NotEqual(String, String),
}

impl Expression {
    /// The label key this requirement applies to
    pub fn key(&self) -> &str {
        match self {
            Expression::Equal(key, _) | Expression::NotEqual(key, _) => key,
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        match self {
            Expression::Equal(key, value) => labels.get(key) == Some(value),
            Expression::NotEqual(key, value) => labels.get(key) != Some(value),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Equal(key, value) => write!(f, "{key}={value}"),
            Expression::NotEqual(key, value) => write!(f, "{key}!={value}"),
        }
    }
}

/// A conjunction of label requirements
///
/// The empty selector matches every label set, mirroring what happens when
/// node filtering is not configured at all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector(Vec<Expression>);

impl Selector {
    /// A selector matching everything
    pub fn everything() -> Self {
        Self::default()
    }

    /// Compile an include and an exclude list into one selector
    ///
    /// ```
    /// use ccm_core::labels::Selector;
    ///
    /// let selector = Selector::compile("pool = system, zone=1", "managed=false");
    /// assert_eq!(selector.to_selector_string(), "managed!=false,pool=system,zone=1");
    /// ```
    pub fn compile(include: &str, exclude: &str) -> Self {
        let mut expressions = parse(include, Operator::Equal);
        expressions.extend(parse(exclude, Operator::NotEqual));
        // stable, so requirements on one key keep their relative order
        expressions.sort_by(|a, b| a.key().cmp(b.key()));
        Self(expressions)
    }

    /// The requirements of this selector, ordered by key
    pub fn expressions(&self) -> &[Expression] {
        &self.0
    }

    /// Whether this selector places no constraint at all
    pub fn selects_all(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every requirement holds for `labels`
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|expr| expr.matches(labels))
    }

    /// Render as a server-side `labelSelector` query value
    pub fn to_selector_string(&self) -> String {
        self.0.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_selector_string())
    }
}

impl FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        let mut expressions: Vec<_> = iter.into_iter().collect();
        expressions.sort_by(|a, b| a.key().cmp(b.key()));
        Self(expressions)
    }
}

impl From<&Selector> for LabelSelector {
    fn from(selector: &Selector) -> Self {
        let mut equality = Map::new();
        let mut expressions = vec![];
        for expr in &selector.0 {
            match expr {
                Expression::Equal(key, value) => match equality.entry(key.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(value.clone());
                    }
                    // a second equality on the same key can't live in matchLabels
                    Entry::Occupied(_) => expressions.push(LabelSelectorRequirement {
                        key: key.clone(),
                        operator: "In".into(),
                        values: Some(vec![value.clone()]),
                    }),
                },
                Expression::NotEqual(key, value) => expressions.push(LabelSelectorRequirement {
                    key: key.clone(),
                    operator: "NotIn".into(),
                    values: Some(vec![value.clone()]),
                }),
            }
        }

        LabelSelector {
            match_labels: (!equality.is_empty()).then_some(equality),
            match_expressions: (!expressions.is_empty()).then_some(expressions),
        }
    }
}

/// Why a `key=value` segment was rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    /// The segment has no `=`
    #[error("invalid {setting} format: {segment}, expected key=value")]
    MissingSeparator {
        /// Which setting the segment came from
        setting: &'static str,
        /// The offending segment
        segment: String,
    },
    /// The key is not a qualified name
    #[error("invalid label key {key:?}: {reason}")]
    InvalidKey {
        /// The rejected key
        key: String,
        /// What is wrong with it
        reason: &'static str,
    },
    /// The value is not a valid label value
    #[error("invalid label value {value:?} for key {key:?}: {reason}")]
    InvalidValue {
        /// The key the value belongs to
        key: String,
        /// The rejected value
        value: String,
        /// What is wrong with it
        reason: &'static str,
    },
}

/// Parse one comma separated list into requirements using `op`
///
/// Segments that do not parse are logged and skipped.
pub fn parse(list: &str, op: Operator) -> Vec<Expression> {
    list.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| match parse_segment(segment, op) {
            Ok(expr) => Some(expr),
            Err(err @ LabelError::MissingSeparator { .. }) => {
                tracing::warn!(segment, "{}", err);
                None
            }
            Err(err) => {
                tracing::error!(segment, "invalid {} requirement: {}", op.setting(), err);
                None
            }
        })
        .collect()
}

fn parse_segment(segment: &str, op: Operator) -> Result<Expression, LabelError> {
    let (key, value) = segment.split_once('=').ok_or_else(|| LabelError::MissingSeparator {
        setting: op.setting(),
        segment: segment.into(),
    })?;
    let (key, value) = (key.trim(), value.trim());
    validate_key(key)?;
    validate_value(key, value)?;
    Ok(op.expression(key, value))
}

fn validate_key(key: &str) -> Result<(), LabelError> {
    let invalid = |reason| LabelError::InvalidKey {
        key: key.into(),
        reason,
    };
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() {
                return Err(invalid("prefix part must be non-empty"));
            }
            if prefix.len() > MAX_PREFIX_LEN {
                return Err(invalid("prefix part must be no more than 253 characters"));
            }
            if !is_dns_subdomain(prefix) {
                return Err(invalid("prefix part must be a lowercase RFC 1123 subdomain"));
            }
            name
        }
        None => key,
    };
    if name.is_empty() {
        return Err(invalid("name part must be non-empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name part must be no more than 63 characters"));
    }
    if !is_qualified_name(name) {
        return Err(invalid(
            "name part must consist of alphanumeric characters, '-', '_' or '.', and must start and end with an alphanumeric character",
        ));
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<(), LabelError> {
    let invalid = |reason| LabelError::InvalidValue {
        key: key.into(),
        value: value.into(),
        reason,
    };
    if value.len() > MAX_NAME_LEN {
        return Err(invalid("must be no more than 63 characters"));
    }
    if !value.is_empty() && !is_qualified_name(value) {
        return Err(invalid(
            "must consist of alphanumeric characters, '-', '_' or '.', and must start and end with an alphanumeric character",
        ));
    }
    Ok(())
}

fn is_qualified_name(s: &str) -> bool {
    let bytes = s.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) if first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric() => bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.')),
        _ => false,
    }
}

fn is_dns_subdomain(s: &str) -> bool {
    s.split('.').all(|label| {
        let bytes = label.as_bytes();
        let edge = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
        match (bytes.first(), bytes.last()) {
            (Some(first), Some(last)) if edge(first) && edge(last) => {
                bytes.iter().all(|b| edge(b) || *b == b'-')
            }
            _ => false,
        }
    })
}
