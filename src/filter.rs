//! Filter rules and the filter-engine seam
//!
//! Rules are evaluated in priority order during post parsing; the first
//! matching rule attaches its action as the post's tag and evaluation stops.
//! Actions are a closed set; the single effect-application site in the parse
//! worker matches on them exhaustively.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{BoardDescriptor, PostDraft};

/// Outcome attached to a post when a filter rule matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    /// Highlight the post with the given ARGB color
    Highlight {
        /// ARGB highlight color
        color: u32,
    },
    /// Collapse the post to a stub
    Stub,
    /// Hide the post entirely
    Remove,
    /// Automatically watch the matching thread (OPs only)
    Watch,
}

/// A single filter rule
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterRule {
    /// Rule id, unique within the engine
    pub id: i64,
    /// Pattern matched against the post's text fields
    pub pattern: String,
    /// Action attached on match
    pub action: FilterAction,
    /// Boards the rule applies to; `None` means all boards
    pub boards: Option<Vec<String>>,
    /// Disabled rules never match
    pub enabled: bool,
}

impl FilterRule {
    /// Whether this rule applies on the given board
    pub fn applies_to(&self, board: &BoardDescriptor) -> bool {
        self.enabled
            && self
                .boards
                .as_ref()
                .is_none_or(|boards| boards.iter().any(|b| *b == board.board))
    }
}

/// Matches filter rules against post drafts.
///
/// The rule list returned by [`rules_for_board`](FilterEngine::rules_for_board)
/// is in priority order; callers stop at the first match.
pub trait FilterEngine: Send + Sync {
    /// Enabled rules applicable to `board`, highest priority first.
    fn rules_for_board(&self, board: &BoardDescriptor) -> Vec<FilterRule>;

    /// Whether `rule` matches `draft`.
    fn matches(&self, rule: &FilterRule, draft: &PostDraft) -> bool;
}

/// Evaluate `rules` against `draft` in order; first match wins.
///
/// Watch rules are skipped for non-OP drafts, a watch can only attach to a
/// thread's originating post.
pub fn first_matching_action(
    engine: &dyn FilterEngine,
    rules: &[FilterRule],
    draft: &PostDraft,
) -> Option<FilterAction> {
    for rule in rules {
        if rule.action == FilterAction::Watch && !draft.op {
            continue;
        }
        if engine.matches(rule, draft) {
            return Some(rule.action);
        }
    }
    None
}

/// Default [`FilterEngine`] matching rule patterns as regular expressions
/// over a post's comment, subject, name, tripcode, and media filenames.
pub struct RegexFilterEngine {
    rules: Vec<(FilterRule, Option<Regex>)>,
}

impl RegexFilterEngine {
    /// Compile `rules`; rules whose pattern fails to compile never match.
    pub fn new(rules: Vec<FilterRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| {
                // Size limit bounds pathological patterns instead of letting a
                // user rule blow up compilation memory.
                let compiled = regex::RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .size_limit(1 << 20)
                    .build();

                let compiled = match compiled {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::warn!(rule_id = rule.id, error = %e, "invalid filter pattern, rule disabled");
                        None
                    }
                };

                (rule, compiled)
            })
            .collect();

        Self { rules }
    }
}

impl FilterEngine for RegexFilterEngine {
    fn rules_for_board(&self, board: &BoardDescriptor) -> Vec<FilterRule> {
        self.rules
            .iter()
            .filter(|(rule, compiled)| compiled.is_some() && rule.applies_to(board))
            .map(|(rule, _)| rule.clone())
            .collect()
    }

    fn matches(&self, rule: &FilterRule, draft: &PostDraft) -> bool {
        let Some((_, Some(re))) = self.rules.iter().find(|(r, _)| r.id == rule.id) else {
            return false;
        };

        re.is_match(&draft.raw_comment)
            || re.is_match(&draft.subject)
            || re.is_match(&draft.name)
            || re.is_match(&draft.tripcode)
            || draft
                .media
                .iter()
                .any(|m| re.is_match(&m.original_filename))
    }
}
