// src/ingest/parser.rs
//! RSS 2.0, RSS 1.0 (RDF) and Atom documents into [`FeedEntry`] values.
//!
//! Bytes are decoded with the charset named by the BOM or the XML declaration,
//! the root element picks the dialect, then a pull parser walks the entries.
//! Entry children are matched on their qualified name, so extension elements
//! such as `media:title` or `atom:link` never stand in for `title` or `link`.
//! Entries keep document order.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::OnceCell;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;
use regex::{Captures, Regex};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::error::FetchError;
use crate::ingest::normalize_text;
use crate::ingest::types::FeedEntry;

pub const UNTITLED: &str = "Untitled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Rdf,
    Atom,
}

impl FeedKind {
    fn from_root(local_name: &[u8]) -> Option<Self> {
        match local_name {
            b"rss" => Some(Self::Rss),
            b"RDF" => Some(Self::Rdf),
            b"feed" => Some(Self::Atom),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Rss => "rss",
            Self::Rdf => "rdf",
            Self::Atom => "atom",
        }
    }

    /// RDF puts `<item>` next to `<channel>`, RSS 2.0 inside it; both are
    /// picked up wherever they appear.
    fn is_entry(self, name: &[u8]) -> bool {
        match self {
            Self::Rss | Self::Rdf => name == b"item",
            Self::Atom => atom_name(name) == b"entry",
        }
    }

    fn field(self, name: &[u8]) -> Option<Field> {
        match self {
            Self::Rss | Self::Rdf => match name {
                b"title" => Some(Field::Title),
                b"link" => Some(Field::Link),
                b"description" => Some(Field::Summary),
                b"content:encoded" => Some(Field::Content),
                b"pubDate" => Some(Field::Published),
                b"dc:date" => Some(Field::Updated),
                _ => None,
            },
            Self::Atom => match atom_name(name) {
                b"title" => Some(Field::Title),
                b"link" => Some(Field::Link),
                b"summary" => Some(Field::Summary),
                b"content" => Some(Field::Content),
                b"published" => Some(Field::Published),
                b"updated" => Some(Field::Updated),
                _ => None,
            },
        }
    }
}

/// Atom elements in the default namespace or behind an `atom:` prefix.
fn atom_name(name: &[u8]) -> &[u8] {
    name.strip_prefix(b"atom:").unwrap_or(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Summary,
    Content,
    Published,
    Updated,
}

/// Raw child values of one entry; the first occurrence of a field wins.
#[derive(Debug, Default)]
struct RawEntry {
    title: Option<String>,
    link: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    atom_links: Vec<AtomLink>,
}

#[derive(Debug, Default)]
struct AtomLink {
    href: Option<String>,
    rel: Option<String>,
}

impl AtomLink {
    fn from_start(e: &BytesStart<'_>) -> Self {
        let attr = |key: &str| {
            e.try_get_attribute(key)
                .ok()
                .flatten()
                .and_then(|a| a.unescape_value().ok().map(Cow::into_owned))
        };
        Self {
            href: attr("href"),
            rel: attr("rel"),
        }
    }
}

impl RawEntry {
    fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Summary => &mut self.summary,
            Field::Content => &mut self.content,
            Field::Published => &mut self.published,
            Field::Updated => &mut self.updated,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    /// `rel="alternate"` (or no rel) wins, otherwise the first href.
    fn best_atom_link(&self) -> Option<String> {
        let with_href = || {
            self.atom_links
                .iter()
                .filter_map(|l| l.href.as_deref().map(|h| (l, h)))
        };
        with_href()
            .find(|(l, _)| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| with_href().next())
            .map(|(_, h)| h.to_string())
    }

    fn into_entry(self, summary_max_chars: usize) -> FeedEntry {
        let link = if self.atom_links.is_empty() {
            self.link.clone()
        } else {
            self.best_atom_link()
        };
        let summary_src = [self.summary.as_deref(), self.content.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .unwrap_or_default();
        FeedEntry {
            title: title_or_default(self.title.as_deref()),
            link: link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
            summary: normalize_text(summary_src, summary_max_chars),
            time_candidates: [self.published, self.updated].into_iter().flatten().collect(),
        }
    }
}

/// Parse a raw feed document. On a structural error the bytes are stripped of
/// illegal control characters and parsed exactly once more.
pub fn parse_feed(bytes: &[u8], summary_max_chars: usize) -> Result<Vec<FeedEntry>, FetchError> {
    match parse_document(bytes, summary_max_chars) {
        Ok(entries) => Ok(entries),
        Err(first) => {
            let cleaned = clean_xml_bytes(bytes);
            if cleaned.len() == bytes.len() {
                return Err(first);
            }
            tracing::debug!(
                target: "ingest",
                removed = bytes.len() - cleaned.len(),
                error = %first,
                "retrying parse after stripping control characters"
            );
            parse_document(&cleaned, summary_max_chars)
        }
    }
}

/// Drop every byte below 0x20 except tab, LF and CR.
pub fn clean_xml_bytes(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .copied()
        .filter(|&b| b == 9 || b == 10 || b == 13 || b >= 32)
        .collect()
}

fn parse_document(bytes: &[u8], summary_max_chars: usize) -> Result<Vec<FeedEntry>, FetchError> {
    if let Some(pos) = bytes
        .iter()
        .position(|&b| b < 32 && b != 9 && b != 10 && b != 13)
    {
        return Err(FetchError::Parse(format!(
            "illegal control character 0x{:02x} at byte {pos}",
            bytes[pos]
        )));
    }

    let text = escape_stray_entities(&decode_document(bytes));
    let mut reader = Reader::from_str(&text);
    let kind = read_root(&mut reader)?;
    let fail = |reader: &Reader<&[u8]>, err: FetchError| {
        let detail = match err {
            FetchError::Parse(msg) => msg,
            other => other.to_string(),
        };
        FetchError::Parse(format!(
            "{}: {detail} (near byte {})",
            kind.label(),
            reader.buffer_position()
        ))
    };

    let mut entries = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if kind.is_entry(e.name().as_ref()) => {
                let raw = read_entry(&mut reader, kind, e.name()).map_err(|err| fail(&reader, err))?;
                entries.push(raw.into_entry(summary_max_chars));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(fail(&reader, xml_error(e))),
        }
    }
    Ok(entries)
}

/// Decode with the BOM or the declared `encoding`; UTF-8 when neither says
/// otherwise.
fn decode_document(bytes: &[u8]) -> Cow<'_, str> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        return encoding.decode_without_bom_handling(&bytes[bom_len..]).0;
    }
    let encoding = declared_encoding(bytes).unwrap_or(UTF_8);
    encoding.decode_without_bom_handling(bytes).0
}

/// A declaration readable as ASCII cannot be UTF-16, so `output_encoding`
/// folds those labels back to UTF-8.
fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let mut reader = Reader::from_reader(bytes);
    match reader.read_event() {
        Ok(Event::Decl(decl)) => {
            let label = decl.encoding()?.ok()?;
            Encoding::for_label(&label).map(Encoding::output_encoding)
        }
        _ => None,
    }
}

fn read_root(reader: &mut Reader<&[u8]>) -> Result<FeedKind, FetchError> {
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let local = e.local_name();
                return FeedKind::from_root(local.as_ref()).ok_or_else(|| {
                    FetchError::Parse(format!(
                        "unsupported root element <{}>",
                        String::from_utf8_lossy(local.as_ref())
                    ))
                });
            }
            Ok(Event::Eof) => return Err(FetchError::Parse("no root element".into())),
            Ok(_) => continue,
            Err(e) => return Err(xml_error(e)),
        }
    }
}

/// Consume one entry up to its end tag. Unknown children, namespaced
/// extensions included, are skipped with their whole subtree.
fn read_entry(
    reader: &mut Reader<&[u8]>,
    kind: FeedKind,
    end: QName<'_>,
) -> Result<RawEntry, FetchError> {
    let mut raw = RawEntry::default();
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => match kind.field(e.name().as_ref()) {
                Some(Field::Link) if kind == FeedKind::Atom => {
                    raw.atom_links.push(AtomLink::from_start(&e));
                    reader.read_to_end(e.name()).map_err(xml_error)?;
                }
                Some(field) => {
                    let value = read_text(reader, e.name())?;
                    raw.set(field, value);
                }
                None => {
                    reader.read_to_end(e.name()).map_err(xml_error)?;
                }
            },
            Event::Empty(e)
                if kind == FeedKind::Atom && kind.field(e.name().as_ref()) == Some(Field::Link) =>
            {
                raw.atom_links.push(AtomLink::from_start(&e));
            }
            Event::End(e) if e.name() == end => return Ok(raw),
            Event::Eof => return Err(unexpected_eof(end)),
            _ => {}
        }
    }
}

/// Text and CDATA below `end`. Nested markup (Atom `type="xhtml"`) is
/// flattened to its text.
fn read_text(reader: &mut Reader<&[u8]>, end: QName<'_>) -> Result<String, FetchError> {
    let mut out = String::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Text(t) => out.push_str(&t.unescape().map_err(xml_error)?),
            Event::CData(c) => out.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::Start(_) => {
                depth += 1;
                out.push(' ');
            }
            Event::Empty(_) => out.push(' '),
            Event::End(e) if depth == 0 && e.name() == end => return Ok(out),
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                out.push(' ');
            }
            Event::Eof => return Err(unexpected_eof(end)),
            _ => {}
        }
    }
}

fn xml_error(e: quick_xml::Error) -> FetchError {
    FetchError::Parse(e.to_string())
}

fn unexpected_eof(open: QName<'_>) -> FetchError {
    FetchError::Parse(format!(
        "document ends inside <{}>",
        String::from_utf8_lossy(open.as_ref())
    ))
}

/// XML knows five named entities; feeds routinely carry HTML ones (`&nbsp;`)
/// and bare ampersands. Rewrite both into something the XML reader accepts.
fn escape_stray_entities(s: &str) -> String {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"&(#[0-9]+;|#[xX][0-9a-fA-F]+;|[A-Za-z][A-Za-z0-9]*;)?")
            .expect("entity regex")
    });
    re.replace_all(s, |caps: &Captures| {
        let Some(m) = caps.get(1) else {
            return "&amp;".to_string();
        };
        let body = m.as_str();
        if body.starts_with('#')
            || matches!(body, "amp;" | "lt;" | "gt;" | "quot;" | "apos;")
        {
            return format!("&{body}");
        }
        let named = format!("&{body}");
        let decoded = html_escape::decode_html_entities(&named);
        if decoded.as_ref() == named.as_str() {
            format!("&amp;{body}")
        } else {
            decoded.chars().map(|c| format!("&#{};", c as u32)).collect()
        }
    })
    .into_owned()
}

fn title_or_default(raw: Option<&str>) -> String {
    let t = raw.map(|t| normalize_text(t, 1_000)).unwrap_or_default();
    if t.is_empty() {
        UNTITLED.to_string()
    } else {
        t
    }
}

/// Parse one feed timestamp into UTC. Offsets are honoured; naive values are
/// taken as UTC.
pub fn parse_feed_time(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(dt) = via_time(s, &Rfc2822).or_else(|| via_time(s, &Rfc3339)) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

/// First parsable candidate, else `now`.
pub fn entry_time(entry: &FeedEntry, now: DateTime<Utc>) -> DateTime<Utc> {
    entry
        .time_candidates
        .iter()
        .find_map(|c| parse_feed_time(c))
        .unwrap_or(now)
}

fn via_time(s: &str, fmt: &(impl time::parsing::Parsable + ?Sized)) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(s, fmt)
        .ok()
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0))
}
