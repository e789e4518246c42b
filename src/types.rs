//! Shared value types: segment numbers, names, Interests, Data, Nacks.
//!
//! Mirrors the data model of `pipeline-interests.hpp`/`rtt-estimator.hpp`: a
//! Name is an ordered sequence of opaque binary components, and the segment
//! number is carried as the last component using the same "marker byte plus
//! big-endian value" convention NDN itself uses for `seg=` components.

use serde::{Deserialize, Serialize};

/// A zero-based, unsigned segment index within one content object.
pub type SegmentNo = u64;

/// Marker byte NDN uses to identify a segment-number name component.
const SEGMENT_MARKER: u8 = 0x00;

/// An ordered sequence of opaque binary components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Name {
    components: Vec<Vec<u8>>,
}

impl Name {
    pub fn new() -> Self {
        Name {
            components: Vec::new(),
        }
    }

    /// Parses a human-readable `/a/b/c` name. Plain components are taken
    /// verbatim (no URI percent-decoding); `seg=N`/`v=N` components are
    /// recognized and turned back into marker-byte components so a name
    /// typed on the command line round-trips through `last_segment_number`
    /// and `has_version` the same way `to_uri` renders it.
    pub fn parse(uri: &str) -> Self {
        let components = uri
            .split('/')
            .filter(|c| !c.is_empty())
            .map(|c| {
                if let Some(n) = c.strip_prefix("seg=").and_then(|n| n.parse::<u64>().ok()) {
                    segment_component(n)
                } else if let Some(n) = c.strip_prefix("v=").and_then(|n| n.parse::<u64>().ok()) {
                    let mut comp = vec![b'V'];
                    comp.extend_from_slice(&n.to_be_bytes());
                    comp
                } else {
                    c.as_bytes().to_vec()
                }
            })
            .collect();
        Name { components }
    }

    pub fn components(&self) -> &[Vec<u8>] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns this name with its last component removed.
    pub fn without_last(&self) -> Name {
        let mut components = self.components.clone();
        components.pop();
        Name { components }
    }

    /// Appends a segment-number component, returning a new Name.
    pub fn with_segment(&self, segment_no: SegmentNo) -> Name {
        let mut components = self.components.clone();
        components.push(segment_component(segment_no));
        Name { components }
    }

    /// True if the last component is a version marker (`v=` in the CLI
    /// surface's notation, carried here as a `V` marker byte).
    pub fn has_version(&self) -> bool {
        matches!(self.components.last(), Some(c) if c.first() == Some(&b'V'))
    }

    pub fn with_version(&self, version: u64) -> Name {
        let mut components = self.components.clone();
        let mut comp = vec![b'V'];
        comp.extend_from_slice(&version.to_be_bytes());
        components.push(comp);
        Name { components }
    }

    /// Interprets the last component as a segment number, if it looks like
    /// one (i.e. starts with the segment marker byte).
    pub fn last_segment_number(&self) -> Option<SegmentNo> {
        let last = self.components.last()?;
        decode_segment_component(last)
    }

    pub fn to_uri(&self) -> String {
        let mut uri = String::new();
        for c in &self.components {
            uri.push('/');
            uri.push_str(&component_to_display(c));
        }
        if uri.is_empty() {
            uri.push('/');
        }
        uri
    }
}

impl Default for Name {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

fn segment_component(segment_no: SegmentNo) -> Vec<u8> {
    let mut comp = vec![SEGMENT_MARKER];
    let bytes = segment_no.to_be_bytes();
    let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    comp.extend_from_slice(&bytes[first_nonzero..]);
    comp
}

fn decode_segment_component(comp: &[u8]) -> Option<SegmentNo> {
    if comp.first() != Some(&SEGMENT_MARKER) {
        return None;
    }
    let value_bytes = &comp[1..];
    if value_bytes.len() > 8 {
        return None;
    }
    let mut buf = [0u8; 8];
    buf[8 - value_bytes.len()..].copy_from_slice(value_bytes);
    Some(u64::from_be_bytes(buf))
}

fn component_to_display(c: &[u8]) -> String {
    if let Some(seg) = decode_segment_component(c) {
        return format!("seg={seg}");
    }
    if c.first() == Some(&b'V') && c.len() == 9 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&c[1..]);
        return format!("v={}", u64::from_be_bytes(buf));
    }
    String::from_utf8_lossy(c).into_owned()
}

/// A request naming the desired content, plus freshness/lifetime/nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    pub name: Name,
    pub must_be_fresh: bool,
    pub lifetime_ms: u64,
    pub nonce: u64,
    /// Mirrors `setMaxSuffixComponents(1)` in the source: the replying Data's
    /// name must be exactly this Interest's name (no further suffix).
    pub max_suffix_components: u32,
}

impl Interest {
    pub fn new(name: Name, must_be_fresh: bool, lifetime_ms: u64) -> Self {
        Interest {
            name,
            must_be_fresh,
            lifetime_ms,
            nonce: rand::random(),
            max_suffix_components: 1,
        }
    }

    /// Refreshes the nonce in place, as required before every retransmission
    /// so upstream duplicate-suppression does not swallow the retry.
    pub fn refresh_nonce(&mut self) {
        self.nonce = rand::random();
    }
}

/// A reply carrying one named content segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    pub name: Name,
    pub content: Vec<u8>,
    pub final_block_id: Option<SegmentNo>,
    pub content_type: ContentType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Blob,
    /// An application-level Nack, carried as a Data content-type rather than
    /// a link-level Nack; always fatal to the fetch (§7).
    Nack,
}

/// A link-level negative acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NackReason {
    Duplicate,
    Congestion,
    Other(String),
}

impl std::fmt::Display for NackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NackReason::Duplicate => write!(f, "duplicate"),
            NackReason::Congestion => write!(f, "congestion"),
            NackReason::Other(reason) => write!(f, "{reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_round_trips_through_name() {
        for seg in [0u64, 1, 255, 256, 65536, u64::MAX] {
            let name = Name::parse("/a/b").with_segment(seg);
            assert_eq!(name.last_segment_number(), Some(seg));
        }
    }

    #[test]
    fn parse_strips_empty_components() {
        let name = Name::parse("/a/b/c");
        assert_eq!(name.len(), 3);
    }

    #[test]
    fn without_last_drops_segment_component() {
        let name = Name::parse("/a").with_segment(3);
        let prefix = name.without_last();
        assert_eq!(prefix, Name::parse("/a"));
    }

    #[test]
    fn version_component_round_trips() {
        let name = Name::parse("/a").with_version(7);
        assert!(name.has_version());
    }
}
