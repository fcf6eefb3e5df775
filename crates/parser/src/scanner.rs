//! Tag matching that tolerates arbitrary chunk boundaries.
//!
//! Every function here is a pure function of the bytes it inspects: a
//! decision reported for a prefix never changes once more input arrives,
//! except that `Partial` may later resolve to text or a tag.

use std::collections::BTreeMap;

/// Attributes parsed from an open tag, in name order.
pub type Attributes = BTreeMap<String, String>;

/// A complete open tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTag {
    pub attributes: Attributes,
    /// `<tag ... />`
    pub self_closing: bool,
    /// Byte offset just past the terminating `>`.
    pub end: usize,
}

/// Outcome of trying to match `<tagName ...>` at a given offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenTagMatch {
    /// Bytes `start..end` are plain text.
    Text { end: usize },
    /// The buffer ends inside something that may still become the tag.
    Partial,
    Open(OpenTag),
}

/// Outcome of trying to match `</tagName>` at a given offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTagMatch {
    Close { end: usize },
    Partial,
    NoMatch,
}

/// Match `<tag_name` followed by attributes and `>` (or `/>`) at `start`.
///
/// The name comparison is case-sensitive. A divergence reports the text up to
/// the first byte that cannot be part of the tag, so callers resume scanning
/// right there and nothing is dropped. The tag ends at the first `>`, quotes
/// included, so stray quotes never hold back the rest of the message.
pub fn match_open_tag(input: &str, start: usize, tag_name: &str) -> OpenTagMatch {
    let bytes = input.as_bytes();
    let mut pos = start;

    for expected in std::iter::once(b'<').chain(tag_name.bytes()) {
        match bytes.get(pos) {
            None => return OpenTagMatch::Partial,
            Some(&b) if b == expected => pos += 1,
            Some(_) if pos == start => {
                return OpenTagMatch::Text {
                    end: next_char_boundary(input, start),
                };
            },
            Some(_) => return OpenTagMatch::Text { end: pos },
        }
    }

    match bytes.get(pos) {
        None => OpenTagMatch::Partial,
        Some(&b) if b == b'>' || b == b'/' || b.is_ascii_whitespace() => {
            let Some(gt) = input[pos..].find('>').map(|i| pos + i) else {
                return OpenTagMatch::Partial;
            };
            let inner = &input[pos..gt];
            let self_closing = inner.trim_end().ends_with('/');
            OpenTagMatch::Open(OpenTag {
                attributes: parse_attributes(inner),
                self_closing,
                end: gt + 1,
            })
        },
        // `<boltArtifactt`: the name continues, so this is some other tag.
        Some(_) => OpenTagMatch::Text { end: pos },
    }
}

/// Match `</tag_name>` at `start`.
pub fn match_close_tag(input: &str, start: usize, tag_name: &str) -> CloseTagMatch {
    let bytes = input.as_bytes();
    let expected = b"</"
        .iter()
        .copied()
        .chain(tag_name.bytes())
        .chain(std::iter::once(b'>'));

    let mut pos = start;
    for b in expected {
        match bytes.get(pos) {
            None => return CloseTagMatch::Partial,
            Some(&actual) if actual == b => pos += 1,
            Some(_) => return CloseTagMatch::NoMatch,
        }
    }
    CloseTagMatch::Close { end: pos }
}

/// Outcome of searching a body for its closing tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTagSearch {
    /// The closing tag spans `start..end`.
    Found { start: usize, end: usize },
    /// Not present yet; search again from `resume` once more input arrives.
    Missing { resume: usize },
}

/// The literal closing tag for `tag_name`.
pub fn closing_tag(tag_name: &str) -> String {
    format!("</{tag_name}>")
}

/// Search for `</tag_name>` at or after `from`.
pub fn find_close_tag(input: &str, from: usize, tag_name: &str) -> CloseTagSearch {
    let literal = closing_tag(tag_name);
    match input[from..].find(&literal) {
        Some(offset) => CloseTagSearch::Found {
            start: from + offset,
            end: from + offset + literal.len(),
        },
        None => CloseTagSearch::Missing {
            resume: resume_offset(input, from, literal.len()),
        },
    }
}

/// Offset from which a failed search for `literal` has to be retried once
/// more input arrives: the last `literal.len() - 1` bytes may hold the start
/// of a split literal. Never earlier than `from`, always a char boundary.
pub fn resume_offset(input: &str, from: usize, literal_len: usize) -> usize {
    let mut offset = input
        .len()
        .saturating_sub(literal_len.saturating_sub(1))
        .max(from);
    while offset > from && !input.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

/// Parse `name="value"` pairs. Only double-quoted values are recognised;
/// anything else is skipped. The first occurrence of a name wins.
pub fn parse_attributes(source: &str) -> Attributes {
    let mut attributes = Attributes::new();
    let mut rest = source;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
        if rest.is_empty() {
            break;
        }

        let name_end = rest
            .find(|c: char| c == '=' || c == '/' || c.is_whitespace())
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        rest = &rest[name_end..];

        let Some(after_eq) = rest.strip_prefix('=') else {
            continue;
        };
        let Some(quoted) = after_eq.strip_prefix('"') else {
            // Unquoted value: skip it.
            let value_end = after_eq
                .find(char::is_whitespace)
                .unwrap_or(after_eq.len());
            rest = &after_eq[value_end..];
            continue;
        };
        let Some(close) = quoted.find('"') else {
            break;
        };

        if !name.is_empty() {
            attributes
                .entry(name.to_string())
                .or_insert_with(|| quoted[..close].to_string());
        }
        rest = &quoted[close + 1..];
    }

    attributes
}

fn next_char_boundary(input: &str, start: usize) -> usize {
    input[start..]
        .chars()
        .next()
        .map_or(input.len(), |c| start + c.len_utf8())
}
