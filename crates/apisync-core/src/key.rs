//! Key grammar: `segment(.segment)*` optionally followed by `|dependency`.
//!
//! The base path addresses a signal, state or procedure. The dependency is an
//! opaque discriminator selecting one parameterized slot; the empty dependency
//! is the default slot and is written without the `|` suffix.

use std::fmt;

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '.';

/// Separator between the base path and the dependency.
pub const DEPENDENCY_SEPARATOR: char = '|';

/// A parsed wire key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    path: String,
    dependency: String,
}

impl Key {
    /// Build a key from a base path and a dependency (`""` for the default slot).
    pub fn new(path: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            dependency: dependency.into(),
        }
    }

    /// Parse a wire key. Only the first `|` splits.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(DEPENDENCY_SEPARATOR) {
            Some((path, dependency)) => Self::new(path, dependency),
            None => Self::new(raw, ""),
        }
    }

    /// The base path before `|`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The dependency after `|`, `""` when absent.
    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Path segments of the base path.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split(PATH_SEPARATOR)
    }
}

/// Compose the full wire key for `path` and `dependency` without allocating a [`Key`].
pub fn full_key(path: &str, dependency: &str) -> String {
    if dependency.is_empty() {
        path.to_owned()
    } else {
        format!("{path}{DEPENDENCY_SEPARATOR}{dependency}")
    }
}

/// Join namespace segments into a dotted path.
pub fn join_path<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push(PATH_SEPARATOR);
        }
        out.push_str(segment.as_ref());
    }
    out
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dependency.is_empty() {
            f.write_str(&self.path)
        } else {
            write!(f, "{}{DEPENDENCY_SEPARATOR}{}", self.path, self.dependency)
        }
    }
}

impl From<&str> for Key {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}
