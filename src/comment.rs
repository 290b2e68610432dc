//! Comment markup resolution and reference extraction
//!
//! Transforms the raw comment payload of a post into display text plus a list
//! of typed references: same-thread quotes, cross-thread and cross-board
//! links, catalog search links, and plain URLs. Quote targets are resolved
//! against the set of post numbers known to exist in the current fetch, which
//! decides whether a quote is internal (clickable in place) or external.

use std::collections::{BTreeSet, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A typed reference extracted from a comment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentLink {
    /// A `>>N` quote to a post in the same thread
    Quote {
        /// The quoted post number
        post_no: i64,
        /// Whether the target exists in the current fetch
        internal: bool,
        /// Whether the source marked the target as dead
        dead: bool,
    },
    /// A `>>>/board/` link to another board
    BoardLink {
        /// Target board code
        board: String,
    },
    /// A link to a post in another thread
    ThreadLink {
        /// Target board code
        board: String,
        /// Target thread number
        thread_no: i64,
        /// Target post number
        post_no: i64,
    },
    /// A catalog search link
    SearchLink {
        /// Target board code
        board: String,
        /// Search query
        query: String,
    },
    /// A plain URL
    Url {
        /// The link target
        link: String,
    },
}

/// A comment after markup resolution
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedComment {
    /// The raw payload the comment was parsed from
    pub raw: String,
    /// Display text with markup stripped and entities decoded
    pub text: String,
    /// References extracted from the markup, in document order
    pub links: Vec<CommentLink>,
}

impl ParsedComment {
    /// Post numbers this comment quotes that exist in the current fetch.
    ///
    /// Self-quotes are dropped; a post does not reply to itself.
    pub fn internal_quote_targets(&self, own_no: i64) -> BTreeSet<i64> {
        self.links
            .iter()
            .filter_map(|link| match link {
                CommentLink::Quote {
                    post_no,
                    internal: true,
                    ..
                } if *post_no != own_no => Some(*post_no),
                _ => None,
            })
            .collect()
    }
}

/// Markup parser for imageboard comment payloads.
///
/// Compiled once and shared across parse workers; `parse` is pure.
#[derive(Debug)]
pub struct CommentParser {
    element: Regex,
    bare_quote: Regex,
    quote_href: Regex,
    thread_href: Regex,
    board_href: Regex,
    search_href: Regex,
    entity: Regex,
}

impl Default for CommentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CommentParser {
    /// Build a parser with all patterns compiled
    pub fn new() -> Self {
        // The patterns are all literals; compilation cannot fail.
        #[allow(clippy::expect_used)]
        let compile = |pattern: &str| Regex::new(pattern).expect("invalid builtin pattern");

        Self {
            element: compile(
                r#"(?s)<a\s[^>]*?href="([^"]*)"[^>]*>(.*?)</a>|<span\s+class="deadlink">(.*?)</span>|<br\s*/?>|<[^>]+>"#,
            ),
            bare_quote: compile(r"&gt;&gt;(\d+)|>>(\d+)"),
            quote_href: compile(r"^#p?(\d+)$"),
            thread_href: compile(r"^/([^/]+)/(?:thread|res)/(\d+)(?:\.html)?(?:#p?(\d+))?$"),
            board_href: compile(r"^/([^/]+)/(?:index\.html)?$"),
            search_href: compile(r"^/([^/]+)/catalog#s=(.+)$"),
            entity: compile(r"&(?:#(\d+)|amp|lt|gt|quot|apos|nbsp);"),
        }
    }

    /// Resolve `raw` comment markup against the post numbers present in the
    /// current fetch.
    pub fn parse(&self, raw: &str, internal_ids: &HashSet<i64>) -> ParsedComment {
        let mut text = String::with_capacity(raw.len());
        let mut links = Vec::new();
        let mut last_end = 0;

        for caps in self.element.captures_iter(raw) {
            // Safe: captures always carry the overall match at index 0.
            #[allow(clippy::expect_used)]
            let whole = caps.get(0).expect("match without group 0");

            self.consume_plain(&raw[last_end..whole.start()], internal_ids, &mut text, &mut links);
            last_end = whole.end();

            if let Some(href) = caps.get(1) {
                let inner = self.decode_entities(&self.strip_tags(caps.get(2).map_or("", |m| m.as_str())));
                self.classify_anchor(href.as_str(), internal_ids, &mut links);
                text.push_str(&inner);
            } else if let Some(dead) = caps.get(3) {
                let inner = self.decode_entities(&self.strip_tags(dead.as_str()));
                if let Some(no) = self.first_bare_quote(dead.as_str()) {
                    links.push(CommentLink::Quote {
                        post_no: no,
                        internal: internal_ids.contains(&no),
                        dead: true,
                    });
                }
                text.push_str(&inner);
            } else if whole.as_str().starts_with("<br") {
                text.push('\n');
            }
            // Any other tag is dropped from the output text.
        }

        self.consume_plain(&raw[last_end..], internal_ids, &mut text, &mut links);

        ParsedComment {
            raw: raw.to_string(),
            text,
            links,
        }
    }

    /// Append a markup-free segment to the output, picking up bare `>>N`
    /// quotes (common in archive renditions that ship no anchors).
    fn consume_plain(
        &self,
        segment: &str,
        internal_ids: &HashSet<i64>,
        text: &mut String,
        links: &mut Vec<CommentLink>,
    ) {
        if segment.is_empty() {
            return;
        }
        for caps in self.bare_quote.captures_iter(segment) {
            if let Some(no) = caps
                .get(1)
                .or_else(|| caps.get(2))
                .and_then(|m| m.as_str().parse::<i64>().ok())
            {
                links.push(CommentLink::Quote {
                    post_no: no,
                    internal: internal_ids.contains(&no),
                    dead: false,
                });
            }
        }
        text.push_str(&self.decode_entities(segment));
    }

    fn classify_anchor(
        &self,
        href: &str,
        internal_ids: &HashSet<i64>,
        links: &mut Vec<CommentLink>,
    ) {
        if let Some(caps) = self.quote_href.captures(href) {
            if let Some(no) = caps.get(1).and_then(|m| m.as_str().parse::<i64>().ok()) {
                links.push(CommentLink::Quote {
                    post_no: no,
                    internal: internal_ids.contains(&no),
                    dead: false,
                });
            }
            return;
        }

        if let Some(caps) = self.search_href.captures(href) {
            links.push(CommentLink::SearchLink {
                board: caps[1].to_string(),
                query: caps[2].to_string(),
            });
            return;
        }

        if let Some(caps) = self.thread_href.captures(href) {
            let thread_no = caps[2].parse::<i64>().unwrap_or(0);
            let post_no = caps
                .get(3)
                .and_then(|m| m.as_str().parse::<i64>().ok())
                .unwrap_or(thread_no);
            links.push(CommentLink::ThreadLink {
                board: caps[1].to_string(),
                thread_no,
                post_no,
            });
            return;
        }

        if let Some(caps) = self.board_href.captures(href) {
            links.push(CommentLink::BoardLink {
                board: caps[1].to_string(),
            });
            return;
        }

        links.push(CommentLink::Url {
            link: href.to_string(),
        });
    }

    fn first_bare_quote(&self, segment: &str) -> Option<i64> {
        self.bare_quote.captures(segment).and_then(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .and_then(|m| m.as_str().parse::<i64>().ok())
        })
    }

    fn strip_tags(&self, markup: &str) -> String {
        self.element.replace_all(markup, "").into_owned()
    }

    fn decode_entities(&self, text: &str) -> String {
        self.entity
            .replace_all(text, |caps: &regex::Captures<'_>| {
                if let Some(code) = caps.get(1) {
                    return code
                        .as_str()
                        .parse::<u32>()
                        .ok()
                        .and_then(char::from_u32)
                        .map(String::from)
                        .unwrap_or_default();
                }
                match &caps[0] {
                    "&amp;" => "&",
                    "&lt;" => "<",
                    "&gt;" => ">",
                    "&quot;" => "\"",
                    "&apos;" => "'",
                    "&nbsp;" => " ",
                    _ => "",
                }
                .to_string()
            })
            .into_owned()
    }
}
