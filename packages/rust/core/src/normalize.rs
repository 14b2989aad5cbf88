//! Normalize raw archive.org metadata into [`Item`] documents.
//!
//! archive.org metadata is loosely typed: any field may be a string or an
//! array of strings, descriptions are HTML, and user favorites show up as
//! `fav-<username>` entries in the `collection` field.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};

use spacecraft_archive::ArchiveMetadata;
use spacecraft_shared::Item;

use crate::cover::sha256_hex;

/// Prefix of the per-user favorites collections.
const FAVORITES_PREFIX: &str = "fav-";

const DETAILS_URL: &str = "https://archive.org/details/";

/// Elements that start a new line when flattening HTML.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "blockquote", "pre",
    "table", "hr",
];

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}").expect("year regex"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Build an [`Item`] from the metadata of `id`.
///
/// `fetched_at` and `cover_image` are left unset; the importer owns those.
pub fn normalize_item(id: &str, meta: &ArchiveMetadata) -> Item {
    let title = meta
        .first("title")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .unwrap_or_else(|| id.to_string());

    let creators: Vec<&str> = meta
        .all("creator")
        .into_iter()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    let creator = (!creators.is_empty()).then(|| creators.join("; "));

    let description = meta
        .all("description")
        .into_iter()
        .map(description_to_text)
        .filter(|d| !d.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let (collections, favorite_count) = split_favorites(&meta.all("collection"));

    let date = meta.first("date").map(|d| d.trim().to_string());
    let year = date
        .as_deref()
        .and_then(extract_year)
        .or_else(|| meta.first("year").and_then(extract_year));

    Item {
        id: id.to_string(),
        title,
        creator,
        description,
        subjects: subjects(meta),
        mediatype: meta.first("mediatype").map(String::from),
        date,
        year,
        language: meta.first("language").map(String::from),
        collections,
        favorite_count,
        downloads: downloads(meta),
        archive_url: format!("{DETAILS_URL}{id}"),
        cover_image: None,
        fetched_at: None,
        metadata_hash: metadata_hash(meta),
        extra: serde_json::Map::new(),
    }
}

/// SHA-256 of the metadata map. `serde_json::Map` iterates in key order, so
/// the serialization is canonical.
pub fn metadata_hash(meta: &ArchiveMetadata) -> String {
    let canonical = serde_json::to_string(&meta.metadata).unwrap_or_default();
    sha256_hex(canonical.as_bytes())
}

/// Separate `fav-*` entries from real collections and count them.
fn split_favorites(entries: &[&str]) -> (Vec<String>, u32) {
    let mut collections = Vec::new();
    let mut favorites = HashSet::new();

    for entry in entries {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if entry.starts_with(FAVORITES_PREFIX) {
            favorites.insert(entry);
        } else if !collections.iter().any(|c| c == entry) {
            collections.push(entry.to_string());
        }
    }

    (collections, favorites.len() as u32)
}

/// Subjects arrive as an array, or as one `;`-separated string.
fn subjects(meta: &ArchiveMetadata) -> Vec<String> {
    let mut seen = HashSet::new();
    meta.all("subject")
        .into_iter()
        .flat_map(|s| s.split(';'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_lowercase()))
        .map(String::from)
        .collect()
}

fn downloads(meta: &ArchiveMetadata) -> Option<u64> {
    match meta.metadata.get("downloads")? {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn extract_year(s: &str) -> Option<i32> {
    YEAR_RE.find(s).and_then(|m| m.as_str().parse().ok())
}

// ---------------------------------------------------------------------------
// HTML → text
// ---------------------------------------------------------------------------

/// Flatten an HTML (or plain text) description to readable text.
pub fn description_to_text(raw: &str) -> String {
    if !raw.contains('<') && !raw.contains('&') {
        return tidy_lines(raw);
    }

    let fragment = Html::parse_fragment(raw);
    let mut out = String::with_capacity(raw.len());
    collect_text(fragment.root_element(), &mut out);
    tidy_lines(&out)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(&WHITESPACE_RE.replace_all(text, " "));
            continue;
        }

        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child.value().name();
        match name {
            "br" => out.push('\n'),
            "script" | "style" => {}
            // List items start a line of their own but never a paragraph.
            "li" => {
                out.push_str("\n- ");
                collect_text(child, out);
            }
            _ => {
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    out.push('\n');
                }
                collect_text(child, out);
                if block {
                    out.push('\n');
                }
            }
        }
    }
}

/// Trim every line and collapse runs of blank lines into one.
fn tidy_lines(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank = false;

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            blank = !lines.is_empty();
            continue;
        }
        if blank {
            lines.push("");
            blank = false;
        }
        lines.push(line);
    }

    lines.join("\n")
}
