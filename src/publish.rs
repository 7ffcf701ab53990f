// src/publish.rs
//! RSS 2.0 rendering of a selection. Formatting only: items are written in the
//! order given, never filtered or re-scored here.

use anyhow::Result;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::config::pipeline::ServeCfg;
use crate::store::Item;

pub const DESCRIPTION_SUMMARY_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMeta {
    pub title: String,
    pub link: String,
    pub description: String,
}

impl From<&ServeCfg> for ChannelMeta {
    fn from(c: &ServeCfg) -> Self {
        Self {
            title: c.title.clone(),
            link: c.link.clone(),
            description: c.description.clone(),
        }
    }
}

pub fn render_rss(meta: &ChannelMeta, items: &[Item], now: DateTime<Utc>) -> Result<String> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    w.write_event(Event::Start(rss))?;
    w.write_event(Event::Start(BytesStart::new("channel")))?;

    text_el(&mut w, "title", &meta.title)?;
    text_el(&mut w, "link", &meta.link)?;
    text_el(&mut w, "description", &meta.description)?;
    text_el(&mut w, "lastBuildDate", &now.to_rfc2822())?;
    text_el(&mut w, "generator", concat!("feed-curator ", env!("CARGO_PKG_VERSION")))?;

    for item in items {
        write_item(&mut w, item)?;
    }

    w.write_event(Event::End(BytesEnd::new("channel")))?;
    w.write_event(Event::End(BytesEnd::new("rss")))?;
    Ok(String::from_utf8(w.into_inner())?)
}

fn write_item(w: &mut Writer<Vec<u8>>, item: &Item) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new("item")))?;
    text_el(w, "title", &item.title)?;

    match item.link.as_deref() {
        Some(link) => {
            text_el(w, "link", link)?;
            text_el(w, "guid", link)?;
        }
        None => {
            let mut guid = BytesStart::new("guid");
            guid.push_attribute(("isPermaLink", "false"));
            w.write_event(Event::Start(guid))?;
            w.write_event(Event::Text(BytesText::new(&format!("item-{}", item.id))))?;
            w.write_event(Event::End(BytesEnd::new("guid")))?;
        }
    }

    text_el(w, "description", &item_description(item))?;
    text_el(w, "pubDate", &item.published_at.to_rfc2822())?;
    text_el(w, "author", &item.source_name)?;
    text_el(w, "source", &item.source_name)?;
    if let Some(score) = item.relevance_score {
        text_el(w, "category", &format!("score:{score:.0}"))?;
    }

    w.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

/// "Why it was picked: <reason>\n\nSummary: <first 500 chars of the summary>"
pub fn item_description(item: &Item) -> String {
    let reason = item.relevance_reason.as_deref().unwrap_or_default();
    let summary: String = item.summary.chars().take(DESCRIPTION_SUMMARY_CHARS).collect();
    format!("Why it was picked: {reason}\n\nSummary: {summary}")
}

fn text_el(w: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::new(value)))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}
