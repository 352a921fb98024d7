//! Metadata and link extraction
//!
//! The [`Extractor`] trait is the seam between the index and whatever
//! understands the document format. [`OrgExtractor`] handles org-style
//! notes:
//!
//! ```text
//! #+TITLE: Alpha
//! #+ROAM_ALIAS: "First letter" A
//! #+ROAM_KEY: cite:alpha2020
//!
//! See [[file:b.org][Beta]] and [[file:sub/c.org]].
//! ```

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::corpus::canonicalize_path;

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[file:([^\]\[]+)\](?:\[([^\]\[]*)\])?\]").expect("link pattern compiles")
});

static ALIAS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]*)"|(\S+)"#).expect("alias pattern compiles"));

/// An outbound link found in a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    /// Canonical identity of the target (may not exist yet)
    pub target: PathBuf,
    pub preview: String,
    pub offset: usize,
}

/// Everything the index records about one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Primary title first, then aliases
    pub titles: Vec<String>,
    pub ref_key: Option<String>,
    pub links: Vec<ExtractedLink>,
}

/// Turns document text into titles, a ref and links
pub trait Extractor: Send + Sync {
    fn extract(&self, identity: &Path, bytes: &[u8]) -> Extraction;
}

/// Extractor for org-style keywords and `[[file:...]]` links
#[derive(Debug, Clone, Copy, Default)]
pub struct OrgExtractor;

impl Extractor for OrgExtractor {
    fn extract(&self, identity: &Path, bytes: &[u8]) -> Extraction {
        let text = String::from_utf8_lossy(bytes);
        let mut title = None;
        let mut aliases = Vec::new();
        let mut ref_key = None;

        for line in text.lines() {
            let Some((keyword, value)) = parse_keyword(line) else {
                continue;
            };
            match keyword.to_ascii_uppercase().as_str() {
                "TITLE" if title.is_none() && !value.is_empty() => {
                    title = Some(value.to_string());
                }
                "ROAM_ALIAS" => aliases.extend(parse_aliases(value)),
                "ROAM_KEY" if ref_key.is_none() && !value.is_empty() => {
                    ref_key = Some(value.to_string());
                }
                _ => {}
            }
        }

        let mut titles: Vec<String> = title.into_iter().collect();
        for alias in aliases {
            if !titles.contains(&alias) {
                titles.push(alias);
            }
        }

        let links = find_links(&text, identity)
            .into_iter()
            .map(|link| ExtractedLink {
                preview: paragraph_at(&text, link.range.start).to_string(),
                offset: link.range.start,
                target: link.target,
            })
            .collect();

        Extraction {
            titles,
            ref_key,
            links,
        }
    }
}

/// A `[[file:...]]` link located in source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOccurrence<'a> {
    /// Byte range of the whole link, brackets included
    pub range: Range<usize>,
    /// Path as written
    pub path: &'a str,
    /// Org search option after `::`, if any
    pub search: Option<&'a str>,
    pub description: Option<&'a str>,
    /// Canonical identity the path resolves to
    pub target: PathBuf,
}

impl LinkOccurrence<'_> {
    /// Whether the path was written relative to the source's directory
    pub fn is_relative(&self) -> bool {
        !Path::new(self.path).is_absolute()
    }
}

/// Find every file link in `text`, resolving paths against `source`
pub fn find_links<'a>(text: &'a str, source: &Path) -> Vec<LinkOccurrence<'a>> {
    let base = source.parent().unwrap_or_else(|| Path::new("/"));

    LINK_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let raw = caps.get(1)?.as_str();
            let (path, search) = match raw.split_once("::") {
                Some((path, search)) => (path, Some(search)),
                None => (raw, None),
            };
            if path.is_empty() {
                return None;
            }
            let description = caps.get(2).map(|m| m.as_str());
            let target = canonicalize_path(&base.join(path));

            Some(LinkOccurrence {
                range: whole.range(),
                path,
                search,
                description,
                target,
            })
        })
        .collect()
}

/// Render a file link
pub fn format_link(path: &str, search: Option<&str>, description: Option<&str>) -> String {
    let target = match search {
        Some(search) => format!("{}::{}", path, search),
        None => path.to_string(),
    };
    match description {
        Some(description) => format!("[[file:{}][{}]]", target, description),
        None => format!("[[file:{}]]", target),
    }
}

/// Split `#+KEY: value` into its parts
fn parse_keyword(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start().strip_prefix("#+")?;
    let (keyword, value) = rest.split_once(':')?;
    if keyword.is_empty() || keyword.contains(char::is_whitespace) {
        return None;
    }
    Some((keyword, value.trim()))
}

fn parse_aliases(value: &str) -> Vec<String> {
    ALIAS_RE
        .captures_iter(value)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|alias| !alias.is_empty())
        .collect()
}

/// The paragraph of non-blank lines around `offset`, trimmed
///
/// Lines holding only whitespace count as blank, so `\r\n` endings and
/// indented separators split paragraphs too.
fn paragraph_at(text: &str, offset: usize) -> &str {
    let mut start = 0;
    let mut end = text.len();
    let mut line_start = 0;

    for line in text.split_inclusive('\n') {
        let line_end = line_start + line.len();
        if line.trim().is_empty() {
            if line_end <= offset {
                start = line_end;
            } else if line_start > offset {
                end = line_start;
                break;
            }
        }
        line_start = line_end;
    }
    text[start..end].trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Extraction {
        OrgExtractor.extract(Path::new("/notes/a.org"), text.as_bytes())
    }

    #[test]
    fn test_title_and_aliases() {
        let e = extract("#+TITLE: Alpha\n#+ROAM_ALIAS: \"First letter\" A\n");
        assert_eq!(e.titles, vec!["Alpha", "First letter", "A"]);
        assert!(e.ref_key.is_none());
        assert!(e.links.is_empty());
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let e = extract("#+title: Lower\n#+roam_key: https://example.com\n");
        assert_eq!(e.titles, vec!["Lower"]);
        assert_eq!(e.ref_key.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_first_title_wins() {
        let e = extract("#+TITLE: One\n#+TITLE: Two\n");
        assert_eq!(e.titles, vec!["One"]);
    }

    #[test]
    fn test_no_title() {
        let e = extract("just some text\n");
        assert!(e.titles.is_empty());
    }

    #[test]
    fn test_links_with_preview_and_offset() {
        let text = "#+TITLE: Alpha\n\nSee [[file:b.org][Beta]] here.\n\nAnd [[file:sub/c.org]].\n";
        let e = extract(text);

        assert_eq!(e.links.len(), 2);
        assert_eq!(e.links[0].target, PathBuf::from("/notes/b.org"));
        assert_eq!(e.links[0].preview, "See [[file:b.org][Beta]] here.");
        assert_eq!(&text[e.links[0].offset..e.links[0].offset + 2], "[[");
        assert_eq!(e.links[1].target, PathBuf::from("/notes/sub/c.org"));
        assert_eq!(e.links[1].preview, "And [[file:sub/c.org]].");
    }

    #[test]
    fn test_preview_with_crlf_line_endings() {
        let text = "#+TITLE: Alpha\r\n\r\nSee [[file:b.org]].\r\n\r\nNext paragraph.\r\n";
        let e = extract(text);
        assert_eq!(e.links.len(), 1);
        assert_eq!(e.links[0].preview, "See [[file:b.org]].");
    }

    #[test]
    fn test_preview_stops_at_whitespace_only_lines() {
        let text = "Intro line\n  \t\nFirst [[file:b.org]]\nsecond line\n \nAfter\n";
        let e = extract(text);
        assert_eq!(e.links[0].preview, "First [[file:b.org]]\nsecond line");
    }

    #[test]
    fn test_preview_without_blank_lines_is_whole_text() {
        let e = extract("  only [[file:b.org]] here");
        assert_eq!(e.links[0].preview, "only [[file:b.org]] here");
    }

    #[test]
    fn test_repeated_links_are_kept() {
        let e = extract("[[file:b.org]] and again [[file:b.org][b]]\n");
        assert_eq!(e.links.len(), 2);
        assert_ne!(e.links[0].offset, e.links[1].offset);
    }

    #[test]
    fn test_parent_relative_and_search_option() {
        let text = "[[file:../other/x.org::*Heading][X]]";
        let links = find_links(text, Path::new("/notes/sub/a.org"));
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].path, "../other/x.org");
        assert_eq!(links[0].search, Some("*Heading"));
        assert_eq!(links[0].description, Some("X"));
        assert_eq!(links[0].target, PathBuf::from("/notes/other/x.org"));
        assert!(links[0].is_relative());
    }

    #[test]
    fn test_non_file_links_ignored() {
        let e = extract("[[https://example.com][web]] [[id:123][id]]");
        assert!(e.links.is_empty());
    }

    #[test]
    fn test_format_link() {
        assert_eq!(format_link("b.org", None, None), "[[file:b.org]]");
        assert_eq!(
            format_link("b.org", Some("*Top"), Some("Beta")),
            "[[file:b.org::*Top][Beta]]"
        );
    }
}
