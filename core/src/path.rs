//! Path specifications for routes and middleware.
//!
//! A [`PathSpec`] is what a caller passes when registering a route: a template
//! string such as `/users/:id`, a compiled regular expression, or a list of
//! either. Routes match the whole request path; middleware mounted with a path
//! matches on a segment-boundary prefix.
//!
//! Template rules:
//!
//! - literal segments compare case-insensitively
//! - `:name` captures exactly one non-empty segment
//! - `*` captures one segment, or every remaining segment when it is last
//! - a single trailing slash on the request path is ignored

use regex::Regex;
use smallvec::SmallVec;
use std::fmt;
use thiserror::Error;

/// Errors building a [`PathSpec`].
#[derive(Error, Debug)]
pub enum PathError {
    /// The regular expression did not compile
    #[error("Invalid path pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The pattern as supplied
        pattern: String,
        /// Compiler error
        #[source]
        source: regex::Error,
    },

    /// A list spec with no entries can never match
    #[error("Path list is empty")]
    EmptyList,
}

/// Parameters captured while matching a request path.
///
/// Keeps capture order; lookups are linear because routes rarely capture more
/// than a handful of values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(SmallVec<[(String, String); 4]>);

impl Params {
    /// Create an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    /// Value captured for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Append a captured value.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Iterate over `(name, value)` pairs in capture order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of captured values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A path template, regex, or list of specs.
#[derive(Clone)]
pub struct PathSpec {
    kind: Kind,
}

#[derive(Clone)]
enum Kind {
    Template { source: String, segments: Vec<Segment> },
    Pattern(Regex),
    List(Vec<PathSpec>),
}

impl fmt::Debug for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Template { source, .. } => f.debug_tuple("Template").field(source).finish(),
            Kind::Pattern(regex) => f.debug_tuple("Pattern").field(&regex.as_str()).finish(),
            Kind::List(specs) => f.debug_tuple("List").field(specs).finish(),
        }
    }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Template { source, .. } => f.write_str(source),
            Kind::Pattern(regex) => write!(f, "/{}/", regex.as_str()),
            Kind::List(specs) => {
                f.write_str("[")?;
                for (idx, spec) in specs.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{spec}")?;
                }
                f.write_str("]")
            },
        }
    }
}

impl PathSpec {
    /// Parse a template. Templates never fail to parse.
    #[must_use]
    pub fn template(source: &str) -> Self {
        let segments = split_segments(source)
            .map(|segment| match segment {
                "*" => Segment::Wildcard,
                s if s.len() > 1 && s.starts_with(':') => Segment::Param(s[1..].to_string()),
                s => Segment::Literal(s.to_string()),
            })
            .collect();

        Self {
            kind: Kind::Template {
                source: source.to_string(),
                segments,
            },
        }
    }

    /// Compile a regular expression spec.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::InvalidPattern`] if the expression does not compile.
    pub fn pattern(pattern: &str) -> Result<Self, PathError> {
        Regex::new(pattern)
            .map(|regex| Self {
                kind: Kind::Pattern(regex),
            })
            .map_err(|source| PathError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    /// Build a list spec.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::EmptyList`] if `specs` is empty.
    pub fn list(specs: impl IntoIterator<Item = Self>) -> Result<Self, PathError> {
        let specs: Vec<Self> = specs.into_iter().collect();
        if specs.is_empty() {
            return Err(PathError::EmptyList);
        }
        Ok(Self {
            kind: Kind::List(specs),
        })
    }

    /// The root template, matched as a prefix by every request path.
    #[must_use]
    pub fn root() -> Self {
        Self::template("/")
    }

    /// Match the whole request path.
    #[must_use]
    pub fn matches_route(&self, path: &str) -> Option<Params> {
        self.match_with(path, false)
    }

    /// Match a segment-boundary prefix of the request path.
    #[must_use]
    pub fn matches_prefix(&self, path: &str) -> Option<Params> {
        self.match_with(path, true)
    }

    fn match_with(&self, path: &str, prefix: bool) -> Option<Params> {
        match &self.kind {
            Kind::Template { segments, .. } => match_template(segments, path, prefix),
            Kind::Pattern(regex) => match_pattern(regex, path),
            Kind::List(specs) => specs.iter().find_map(|spec| spec.match_with(path, prefix)),
        }
    }
}

impl From<&str> for PathSpec {
    fn from(source: &str) -> Self {
        Self::template(source)
    }
}

impl From<String> for PathSpec {
    fn from(source: String) -> Self {
        Self::template(&source)
    }
}

impl From<Regex> for PathSpec {
    fn from(regex: Regex) -> Self {
        Self {
            kind: Kind::Pattern(regex),
        }
    }
}

impl From<&String> for PathSpec {
    fn from(source: &String) -> Self {
        Self::template(source)
    }
}

impl<const N: usize> From<[&str; N]> for PathSpec {
    fn from(sources: [&str; N]) -> Self {
        Self {
            kind: Kind::List(sources.iter().map(|source| Self::template(source)).collect()),
        }
    }
}

/// Split on `/`, dropping the leading empty segment and one trailing empty segment.
fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    trimmed.split('/').filter(|segment| !segment.is_empty())
}

fn match_template(segments: &[Segment], path: &str, prefix: bool) -> Option<Params> {
    let parts: Vec<&str> = split_segments(path).collect();
    let mut params = Params::new();
    let mut wildcard_idx = 0usize;
    let mut consumed = 0usize;

    for (idx, segment) in segments.iter().enumerate() {
        let is_last = idx + 1 == segments.len();
        match segment {
            Segment::Literal(literal) => {
                let part = parts.get(consumed)?;
                if !part.eq_ignore_ascii_case(literal) {
                    return None;
                }
                consumed += 1;
            },
            Segment::Param(name) => {
                let part = parts.get(consumed)?;
                params.push(name.clone(), *part);
                consumed += 1;
            },
            Segment::Wildcard if is_last => {
                if consumed >= parts.len() {
                    return None;
                }
                params.push(wildcard_idx.to_string(), parts[consumed..].join("/"));
                consumed = parts.len();
            },
            Segment::Wildcard => {
                let part = parts.get(consumed)?;
                params.push(wildcard_idx.to_string(), *part);
                wildcard_idx += 1;
                consumed += 1;
            },
        }
    }

    if prefix || consumed == parts.len() {
        Some(params)
    } else {
        None
    }
}

fn match_pattern(regex: &Regex, path: &str) -> Option<Params> {
    let captures = regex.captures(path)?;
    let mut params = Params::new();
    let mut unnamed = 0usize;

    for (idx, name) in regex.capture_names().enumerate().skip(1) {
        let Some(value) = captures.get(idx) else {
            continue;
        };
        match name {
            Some(name) => params.push(name, value.as_str()),
            None => {
                params.push(unnamed.to_string(), value.as_str());
                unnamed += 1;
            },
        }
    }

    Some(params)
}
