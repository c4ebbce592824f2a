//! Message content with embedded document references.
//!
//! Assistant replies cite source documents inline as
//! `[[doc:<id>|<label>]]`, optionally anchored to a page with
//! `[[doc:<id>#page=<n>|<label>]]`. The label may be omitted.

use std::sync::OnceLock;
use pulldown_cmark::{html, Options, Parser};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
}

impl DocumentRef {
    pub fn display(&self) -> String {
        let name = self.label.as_deref().unwrap_or(&self.id);
        match self.page {
            Some(page) => format!("{} (p. {})", name, page),
            None => name.to_string(),
        }
    }

    pub fn link(&self) -> String {
        match self.page {
            Some(page) => format!("doc://{}?page={}", self.id, page),
            None => format!("doc://{}", self.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ContentSegment {
    Text { text: String },
    Document { reference: DocumentRef },
}

fn doc_ref_regex() -> &'static Regex {
    static DOC_REF: OnceLock<Regex> = OnceLock::new();
    DOC_REF.get_or_init(|| {
        Regex::new(r"\[\[doc:([A-Za-z0-9_.\-]+)(?:#page=(\d+))?(?:\|([^\]]*))?\]\]")
            .expect("document reference pattern is valid")
    })
}

pub fn parse_content(content: &str) -> Vec<ContentSegment> {
    let mut segments = Vec::new();
    let mut last = 0;

    for caps in doc_ref_regex().captures_iter(content) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            segments.push(ContentSegment::Text {
                text: content[last..whole.start()].to_string(),
            });
        }

        segments.push(ContentSegment::Document {
            reference: DocumentRef {
                id: caps[1].to_string(),
                page: caps.get(2).and_then(|p| p.as_str().parse().ok()),
                label: caps
                    .get(3)
                    .map(|l| l.as_str().trim().to_string())
                    .filter(|l| !l.is_empty()),
            },
        });
        last = whole.end();
    }

    if last < content.len() {
        segments.push(ContentSegment::Text {
            text: content[last..].to_string(),
        });
    }

    segments
}

/// Distinct referenced document ids, in order of first appearance.
pub fn referenced_documents(content: &str) -> Vec<DocumentRef> {
    let mut refs: Vec<DocumentRef> = Vec::new();
    for segment in parse_content(content) {
        if let ContentSegment::Document { reference } = segment {
            if !refs.iter().any(|r| r.id == reference.id && r.page == reference.page) {
                refs.push(reference);
            }
        }
    }
    refs
}

pub fn to_plain_text(content: &str) -> String {
    parse_content(content)
        .into_iter()
        .map(|segment| match segment {
            ContentSegment::Text { text } => text,
            ContentSegment::Document { reference } => reference.display(),
        })
        .collect()
}

fn escape_link_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('[', "\\[")
        .replace(']', "\\]")
}

/// Render message Markdown to HTML, turning document references into
/// `doc://` links.
pub fn render_html(content: &str) -> String {
    let markdown: String = parse_content(content)
        .into_iter()
        .map(|segment| match segment {
            ContentSegment::Text { text } => text,
            ContentSegment::Document { reference } => format!(
                "[{}]({})",
                escape_link_text(&reference.display()),
                reference.link()
            ),
        })
        .collect();

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(&markdown, options);
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}
