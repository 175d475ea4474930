//! Executable index queries.
//!
//! A [`SearchExpressionQueryBuilder`](builder::SearchExpressionQueryBuilder)
//! translates a boolean expression tree into an [`IndexQuery`], which is
//! evaluated directly against the stored fields of shard documents. Queries
//! are a tagged sum type so the builder can inspect boolean structure when
//! collapsing nested clauses.

pub mod builder;

use serde::{Deserialize, Serialize};

use crate::shard::ShardDocument;

pub use builder::{SearchExpressionQuery, SearchExpressionQueryBuilder};

/// Occurrence requirements for boolean clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Occur {
    /// The clause must match (equivalent to AND).
    Must,
    /// The clause should match (equivalent to OR).
    Should,
    /// The clause must not match (equivalent to NOT).
    MustNot,
}

/// A clause in a boolean query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanClause {
    /// The query for this clause.
    pub query: IndexQuery,
    /// The occurrence requirement.
    pub occur: Occur,
}

impl BooleanClause {
    /// Create a new boolean clause.
    pub fn new(query: IndexQuery, occur: Occur) -> Self {
        BooleanClause { query, occur }
    }

    /// Create a MUST clause.
    pub fn must(query: IndexQuery) -> Self {
        BooleanClause::new(query, Occur::Must)
    }

    /// Create a SHOULD clause.
    pub fn should(query: IndexQuery) -> Self {
        BooleanClause::new(query, Occur::Should)
    }

    /// Create a MUST_NOT clause.
    pub fn must_not(query: IndexQuery) -> Self {
        BooleanClause::new(query, Occur::MustNot)
    }
}

/// An executable query over a shard's stored fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexQuery {
    /// Matches documents whose field contains the given word.
    Term {
        /// Field name.
        field: String,
        /// Word to match against the field's tokens.
        word: String,
        /// Whether comparison respects case.
        case_sensitive: bool,
    },
    /// Matches documents whose field contains a word matching the glob
    /// pattern (`*` and `?` wildcards).
    Wildcard {
        /// Field name.
        field: String,
        /// Glob pattern.
        pattern: String,
        /// Whether comparison respects case.
        case_sensitive: bool,
    },
    /// Matches numeric or date fields within an inclusive/exclusive range.
    LongRange {
        /// Field name.
        field: String,
        /// Lower bound, None for unbounded.
        from: Option<i64>,
        /// Upper bound, None for unbounded.
        to: Option<i64>,
        /// Whether the lower bound is inclusive.
        from_inclusive: bool,
        /// Whether the upper bound is inclusive.
        to_inclusive: bool,
    },
    /// Combines clauses with boolean logic.
    Boolean {
        /// The clauses in this boolean query.
        clauses: Vec<BooleanClause>,
    },
    /// Matches no documents.
    MatchNone,
}

impl IndexQuery {
    /// Create an inclusive range covering exactly one value.
    pub fn long_exact<S: Into<String>>(field: S, value: i64) -> Self {
        IndexQuery::LongRange {
            field: field.into(),
            from: Some(value),
            to: Some(value),
            from_inclusive: true,
            to_inclusive: true,
        }
    }

    /// Total number of leaf clauses in this query. Used to enforce the
    /// configured maximum boolean clause count.
    pub fn clause_count(&self) -> usize {
        match self {
            IndexQuery::Boolean { clauses } => {
                clauses.iter().map(|c| c.query.clause_count()).sum()
            }
            _ => 1,
        }
    }

    /// Evaluate this query against a document's stored fields.
    pub fn matches(&self, doc: &ShardDocument) -> bool {
        match self {
            IndexQuery::Term {
                field,
                word,
                case_sensitive,
            } => doc
                .text_tokens(field)
                .any(|token| token_equals(&token, word, *case_sensitive)),

            IndexQuery::Wildcard {
                field,
                pattern,
                case_sensitive,
            } => doc
                .text_tokens(field)
                .any(|token| glob_match(pattern, &token, *case_sensitive)),

            IndexQuery::LongRange {
                field,
                from,
                to,
                from_inclusive,
                to_inclusive,
            } => match doc.long_value(field) {
                Some(value) => {
                    let lower_ok = match from {
                        Some(from) if *from_inclusive => value >= *from,
                        Some(from) => value > *from,
                        None => true,
                    };
                    let upper_ok = match to {
                        Some(to) if *to_inclusive => value <= *to,
                        Some(to) => value < *to,
                        None => true,
                    };
                    lower_ok && upper_ok
                }
                None => false,
            },

            IndexQuery::Boolean { clauses } => {
                // No clauses means no match, not match-all.
                if clauses.is_empty() {
                    return false;
                }

                let mut has_positive = false;
                let mut must_matched = true;
                let mut should_present = false;
                let mut should_matched = false;

                for clause in clauses {
                    match clause.occur {
                        Occur::Must => {
                            has_positive = true;
                            if !clause.query.matches(doc) {
                                must_matched = false;
                            }
                        }
                        Occur::Should => {
                            has_positive = true;
                            should_present = true;
                            if clause.query.matches(doc) {
                                should_matched = true;
                            }
                        }
                        Occur::MustNot => {
                            if clause.query.matches(doc) {
                                return false;
                            }
                        }
                    }
                }

                if !must_matched {
                    return false;
                }

                // A boolean with only MUST_NOT clauses matches the
                // complement of its negative clauses.
                if !has_positive {
                    return true;
                }

                // SHOULD clauses are optional when a MUST clause exists,
                // otherwise at least one must match.
                if should_present && !clauses.iter().any(|c| c.occur == Occur::Must) {
                    return should_matched;
                }

                true
            }

            IndexQuery::MatchNone => false,
        }
    }
}

fn token_equals(token: &str, word: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        token == word
    } else {
        token.eq_ignore_ascii_case(word)
    }
}

/// Match a glob pattern (`*` any run, `?` any single char) against a token.
fn glob_match(pattern: &str, token: &str, case_sensitive: bool) -> bool {
    let pattern: Vec<char> = if case_sensitive {
        pattern.chars().collect()
    } else {
        pattern.to_lowercase().chars().collect()
    };
    let token: Vec<char> = if case_sensitive {
        token.chars().collect()
    } else {
        token.to_lowercase().chars().collect()
    };

    // Classic iterative glob with backtracking over the last `*`.
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < token.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == token[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}
