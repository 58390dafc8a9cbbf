//! Per-method route storage and path resolution.
//!
//! Compiled patterns are filed into one of three buckets:
//!
//! - exact static paths, looked up by their canonical form;
//! - parameterized paths, grouped by depth and kept sorted by specificity;
//! - wildcard paths, tried last in registration order.
//!
//! A pattern that is exactly `*` becomes the match-all handler and wins over
//! everything else.

use std::collections::HashMap;
use std::fmt;

use crate::handler::SharedHandler;
use crate::path;

/// Prefix marking a named segment, e.g. `:id`.
pub const NAMED_MARKER: char = ':';

/// A segment matching the remainder of the path.
pub const WILDCARD: &str = "*";

/// A compiled pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    /// Holds the full token, marker included; it becomes the param key.
    Named(String),
    Wildcard,
}

impl Segment {
    fn parse(token: &str) -> Segment {
        if token.starts_with(NAMED_MARKER) {
            Segment::Named(token.to_owned())
        } else if token == WILDCARD {
            Segment::Wildcard
        } else {
            Segment::Static(token.to_owned())
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Segment::Static(token) | Segment::Named(token) => token,
            Segment::Wildcard => WILDCARD,
        }
    }
}

/// A compiled pattern bound to its handler.
struct Record {
    segments: Vec<Segment>,
    /// `(named << 8) | static`; lower keys are tried first.
    key: u16,
    handler: SharedHandler,
}

impl Record {
    /// Matches `parts` against the pattern, capturing named segments.
    ///
    /// Matching stops at the first wildcard, which swallows every remaining
    /// part (at least one).
    fn capture(&self, parts: &[&str]) -> Option<Vec<Param>> {
        let mut params = Vec::new();
        for (idx, segment) in self.segments.iter().enumerate() {
            if let Segment::Wildcard = segment {
                return if parts.len() > idx { Some(params) } else { None };
            }
            let part = parts.get(idx)?;
            match segment {
                Segment::Named(key) => params.push(Param::new(key.as_str(), *part)),
                Segment::Static(token) if token == part => {}
                _ => return None,
            }
        }
        (self.segments.len() == parts.len()).then_some(params)
    }

    fn pattern(&self) -> String {
        let tokens: Vec<&str> = self.segments.iter().map(Segment::as_str).collect();
        path::join(&tokens)
    }
}

/// A value captured from a named segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// The pattern token, marker included (`:name`).
    pub key: String,
    pub value: String,
}

impl Param {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The outcome of a successful [`Registry::get`].
#[derive(Clone)]
pub struct Matched {
    pub handler: SharedHandler,
    /// Captured params in pattern order.
    pub params: Vec<Param>,
}

impl fmt::Debug for Matched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matched")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Routes registered for a single HTTP method.
///
/// A registry is filled before serving starts and is read-only afterwards;
/// [`get`](Registry::get) takes `&self` and is safe to call from any number of
/// threads at once.
#[derive(Default)]
pub struct Registry {
    levels: HashMap<usize, Vec<Record>>,
    statics: HashMap<String, SharedHandler>,
    wildcards: Vec<Record>,
    any: Option<SharedHandler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles `pattern` and files it under `handler`.
    ///
    /// Returns `false` when the pattern is too deep to be split.
    ///
    /// Registering the same static path twice replaces the earlier handler.
    /// Two parameterized patterns with the same depth and specificity are both
    /// kept and tried in registration order.
    pub fn register(&mut self, pattern: &str, handler: SharedHandler) -> bool {
        if pattern.trim() == WILDCARD {
            self.any = Some(handler);
            return true;
        }

        let Some(parts) = path::split(pattern) else {
            return false;
        };

        let segments: Vec<Segment> = parts.iter().map(|part| Segment::parse(part)).collect();
        let mut named: u16 = 0;
        let mut statics: u16 = 0;
        let mut wildcard = false;
        for segment in &segments {
            match segment {
                Segment::Named(_) => named += 1,
                Segment::Static(_) => statics += 1,
                Segment::Wildcard => wildcard = true,
            }
        }

        if wildcard {
            self.wildcards.push(Record {
                segments,
                key: (named << 8) | statics,
                handler,
            });
        } else if named == 0 {
            self.statics.insert(path::join(&parts), handler);
        } else {
            let level = self.levels.entry(segments.len()).or_default();
            level.push(Record {
                segments,
                key: (named << 8) | statics,
                handler,
            });
            // stable: equal keys stay in registration order
            level.sort_by_key(|record| record.key);
        }
        true
    }

    /// Resolves `path` to a handler and its captured params.
    pub fn get(&self, path: &str) -> Option<Matched> {
        if let Some(handler) = &self.any {
            return Some(Matched {
                handler: handler.clone(),
                params: Vec::new(),
            });
        }

        let parts = path::split(path)?;

        if let Some(handler) = self.statics.get(&path::join(&parts)) {
            return Some(Matched {
                handler: handler.clone(),
                params: Vec::new(),
            });
        }

        let candidates = self.levels.get(&parts.len()).into_iter().flatten();
        candidates
            .chain(self.wildcards.iter())
            .find_map(|record| {
                record.capture(&parts).map(|params| Matched {
                    handler: record.handler.clone(),
                    params,
                })
            })
    }

    /// Lists every registered pattern in canonical form.
    ///
    /// The order is unspecified.
    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self.any.iter().map(|_| WILDCARD.to_owned()).collect();
        routes.extend(self.statics.keys().cloned());
        routes.extend(self.levels.values().flatten().map(Record::pattern));
        routes.extend(self.wildcards.iter().map(Record::pattern));
        routes
    }

    pub fn is_empty(&self) -> bool {
        self.any.is_none()
            && self.statics.is_empty()
            && self.levels.is_empty()
            && self.wildcards.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("routes", &self.routes())
            .finish()
    }
}
