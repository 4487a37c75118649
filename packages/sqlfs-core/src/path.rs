//! Absolute filesystem paths over the schema tree.
//!
//! Depth 0 is the database root, depth 1 a schema, depth 2 a table, view or
//! schema-level module, depth 3 a table-scoped object. Object names that
//! contain `/` or `%` are percent-encoded inside a segment.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::{FsError, Result};

const SEGMENT: &AsciiSet = &CONTROLS.add(b'/').add(b'%');

/// Maximum depth of the projected tree.
pub const MAX_DEPTH: usize = 3;

/// Decoded absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ObjectPath {
    segments: Vec<String>,
}

impl ObjectPath {
    /// The root directory.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses an absolute path, decoding each segment.
    ///
    /// Empty segments (repeated or trailing slashes) are ignored.
    ///
    /// # Arguments
    /// * `raw` - Path as received from the filesystem adapter
    ///
    /// # Returns
    /// `Result<ObjectPath>` with decoded segments, or `Unsupported` for
    /// relative paths and invalid encodings.
    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(FsError::unsupported(raw, "path must be absolute"));
        }
        let mut segments = Vec::new();
        for part in raw.split('/').filter(|s| !s.is_empty()) {
            let name = percent_decode_str(part)
                .decode_utf8()
                .map_err(|_| FsError::unsupported(raw, "invalid segment encoding"))?;
            segments.push(name.into_owned());
        }
        Ok(Self { segments })
    }

    /// Builds a path from already-decoded segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Schema segment, `None` for the root.
    pub fn schema(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Owning table of a table-scoped object (depth 3 only).
    pub fn table(&self) -> Option<&str> {
        if self.depth() == MAX_DEPTH {
            self.segments.get(1).map(String::as_str)
        } else {
            None
        }
    }

    pub fn parent(&self) -> Option<ObjectPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn child(&self, name: &str) -> ObjectPath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// Same parent, different last segment.
    pub fn with_name(&self, name: &str) -> ObjectPath {
        match self.parent() {
            Some(parent) => parent.child(name),
            None => self.clone(),
        }
    }

    /// True when `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &ObjectPath) -> bool {
        self.depth() > ancestor.depth() && self.segments.starts_with(&ancestor.segments)
    }

    /// Every proper ancestor from the first segment down, then `self`.
    pub fn prefixes(&self) -> impl Iterator<Item = ObjectPath> + '_ {
        (1..=self.segments.len()).map(move |n| Self {
            segments: self.segments[..n].to_vec(),
        })
    }

    /// Canonical encoded form, used as the overlay map key.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", utf8_percent_encode(segment, SEGMENT))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ignores_redundant_slashes() {
        let path = ObjectPath::parse("//dbo/orders/").unwrap();
        assert_eq!(path.depth(), 2);
        assert_eq!(path.key(), "/dbo/orders");
        assert_eq!(path.schema(), Some("dbo"));
        assert_eq!(path.table(), None);
    }

    #[test]
    fn relative_paths_are_rejected() {
        assert!(matches!(
            ObjectPath::parse("dbo/orders"),
            Err(FsError::Unsupported { .. })
        ));
    }

    #[test]
    fn names_with_slashes_round_trip_through_keys() {
        let path = ObjectPath::root().child("dbo").child("a/b%c");
        assert_eq!(path.key(), "/dbo/a%2Fb%25c");
        let parsed = ObjectPath::parse(&path.key()).unwrap();
        assert_eq!(parsed.name(), Some("a/b%c"));
    }

    #[test]
    fn ancestry() {
        let column = ObjectPath::parse("/dbo/orders/id").unwrap();
        let table = ObjectPath::parse("/dbo/orders").unwrap();
        assert_eq!(column.table(), Some("orders"));
        assert!(column.is_descendant_of(&table));
        assert!(column.is_descendant_of(&ObjectPath::root()));
        assert!(!table.is_descendant_of(&table));
        assert_eq!(column.parent(), Some(table));
        let prefixes: Vec<String> = column.prefixes().map(|p| p.key()).collect();
        assert_eq!(prefixes, vec!["/dbo", "/dbo/orders", "/dbo/orders/id"]);
        assert_eq!(column.with_name("qty").key(), "/dbo/orders/qty");
    }
}
