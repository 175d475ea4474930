//! Translation of boolean expression trees into executable index queries.
//!
//! The builder recursively walks the expression tree, dispatches each term on
//! the resolved field's type, and combines child queries with an explicit
//! double-negation and single-child collapse so the resulting query nests no
//! deeper than it has to. Every literal text or wildcard word met along the
//! way is collected into a highlight set used purely for UI highlighting.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use lazy_static::lazy_static;
use regex::Regex;

use crate::dictionary::DictionaryStore;
use crate::error::{FathomError, Result};
use crate::expression::{Condition, DictionaryRef, ExpressionNode, Op};
use crate::query::{BooleanClause, IndexQuery, Occur};
use crate::schema::{FieldType, IndexField, IndexSchema};

const DELIMITER: char = ',';

lazy_static! {
    static ref NON_WORD_OR_WILDCARD: Regex = Regex::new("[^a-zA-Z0-9_*?]").unwrap();
    static ref NON_WORD: Regex = Regex::new("[^a-zA-Z0-9_]").unwrap();
    static ref MULTIPLE_SPACE: Regex = Regex::new("[ ]+").unwrap();
}

/// An executable query plus the literal words collected for highlighting.
#[derive(Debug, Clone)]
pub struct SearchExpressionQuery {
    /// The executable query.
    pub query: IndexQuery,
    /// Literal words for hit highlighting. Has no effect on matching.
    pub highlight_terms: HashSet<String>,
}

/// Converts search expression trees to executable index queries.
pub struct SearchExpressionQueryBuilder<'a> {
    schema: &'a IndexSchema,
    dictionary_store: &'a dyn DictionaryStore,
    max_boolean_clause_count: usize,
    time_zone_offset: FixedOffset,
    now_epoch_milli: i64,
}

impl<'a> SearchExpressionQueryBuilder<'a> {
    /// Create a builder for one index schema.
    ///
    /// `time_zone` is an offset string such as `"+02:00"` or `"Z"`, applied
    /// to date terms without an explicit offset; `now_epoch_milli` anchors
    /// relative `now()` date expressions.
    pub fn new(
        schema: &'a IndexSchema,
        dictionary_store: &'a dyn DictionaryStore,
        max_boolean_clause_count: usize,
        time_zone: Option<&str>,
        now_epoch_milli: i64,
    ) -> Result<Self> {
        let time_zone_offset = match time_zone {
            Some(tz) => parse_offset(tz)?,
            None => FixedOffset::east_opt(0).unwrap(),
        };
        Ok(Self {
            schema,
            dictionary_store,
            max_boolean_clause_count,
            time_zone_offset,
            now_epoch_milli,
        })
    }

    /// Build an executable query from an expression tree.
    pub fn build(&self, expression: &ExpressionNode) -> Result<SearchExpressionQuery> {
        if !expression.has_terms() {
            return Err(FathomError::search("No search terms have been specified"));
        }

        let mut highlight_terms = HashSet::new();
        let query = self
            .get_query(expression, &mut highlight_terms)?
            .ok_or_else(|| FathomError::search("Failed to build query from expression"))?;

        let clause_count = query.clause_count();
        if clause_count > self.max_boolean_clause_count {
            return Err(FathomError::search(format!(
                "Query contains {clause_count} clauses, exceeding the maximum of {}",
                self.max_boolean_clause_count
            )));
        }

        Ok(SearchExpressionQuery {
            query,
            highlight_terms,
        })
    }

    fn get_query(
        &self,
        item: &ExpressionNode,
        terms: &mut HashSet<String>,
    ) -> Result<Option<IndexQuery>> {
        if !item.enabled() {
            return Ok(None);
        }

        match item {
            ExpressionNode::Term { .. } => self.get_term_query(item, terms),
            ExpressionNode::Operator { op, children, .. } => {
                let mut child_queries = Vec::new();
                for child in children {
                    if let Some(q) = self.get_query(child, terms)? {
                        child_queries.push(q);
                    }
                }

                if child_queries.is_empty() {
                    return Ok(None);
                }

                if child_queries.len() == 1 {
                    let child = child_queries.into_iter().next().unwrap();
                    return Ok(Some(match op {
                        // Single children collapse straight through.
                        Op::And | Op::Or => child,
                        Op::Not => negate(child),
                    }));
                }

                let occur = occur_for(*op);
                let mut clauses = Vec::new();

                for child in child_queries {
                    match (occur, child) {
                        (Occur::Must, IndexQuery::Boolean { clauses: inner }) => {
                            // An AND can hoist child MUST/MUST_NOT clauses
                            // and keep only pure OR groups nested.
                            let mut or_terms = Vec::new();
                            for clause in inner {
                                match clause.occur {
                                    Occur::Must | Occur::MustNot => clauses.push(clause),
                                    Occur::Should => or_terms.push(clause),
                                }
                            }
                            push_group(&mut clauses, or_terms, Occur::Must);
                        }
                        (Occur::MustNot, child) => {
                            // Each excluded child stays whole; a child that
                            // is itself a negation collapses back to a
                            // positive requirement.
                            match negate(child) {
                                IndexQuery::Boolean { clauses: mut inner }
                                    if inner.len() == 1 =>
                                {
                                    clauses.push(inner.pop().unwrap());
                                }
                                positive => clauses.push(BooleanClause::must(positive)),
                            }
                        }
                        (occur, child) => clauses.push(BooleanClause::new(child, occur)),
                    }
                }

                Ok(Some(IndexQuery::Boolean { clauses }))
            }
        }
    }

    fn get_term_query(
        &self,
        item: &ExpressionNode,
        terms: &mut HashSet<String>,
    ) -> Result<Option<IndexQuery>> {
        let ExpressionNode::Term {
            field,
            condition,
            value,
            dictionary,
            ..
        } = item
        else {
            return Ok(None);
        };

        // Remove whitespace the user may have added accidentally.
        let field = field.trim();
        let value = value.trim();

        if field.is_empty() {
            return Err(FathomError::search("Field not set"));
        }
        let index_field = self
            .schema
            .field(field)
            .ok_or_else(|| FathomError::search(format!("Field not found in index: {field}")))?;
        if !index_field.indexed {
            return Err(FathomError::search(format!("Field is not indexed: {field}")));
        }

        // Ensure an appropriate value has been provided for the condition.
        if *condition == Condition::InDictionary {
            let dictionary = dictionary
                .as_ref()
                .ok_or_else(|| FathomError::search(format!("Dictionary not set for field: {field}")))?;
            return self
                .get_dictionary(index_field, dictionary, terms)
                .map(Some);
        }
        if value.is_empty() {
            return Ok(None);
        }

        let query = match index_field.field_type {
            FieldType::Numeric | FieldType::Id => {
                self.get_numeric_query(index_field, *condition, value)?
            }
            FieldType::Date => self.get_date_query(index_field, *condition, value)?,
            FieldType::Text => self.get_text_query(index_field, *condition, value, terms)?,
        };

        Ok(query)
    }

    fn get_numeric_query(
        &self,
        field: &IndexField,
        condition: Condition,
        value: &str,
    ) -> Result<Option<IndexQuery>> {
        let name = field.name.as_str();
        let query = match condition {
            Condition::Equals | Condition::Contains => {
                IndexQuery::long_exact(name, self.get_long(name, value)?)
            }
            Condition::GreaterThan => IndexQuery::LongRange {
                field: name.to_string(),
                from: Some(self.get_long(name, value)?),
                to: None,
                from_inclusive: false,
                to_inclusive: true,
            },
            Condition::GreaterThanOrEqualTo => IndexQuery::LongRange {
                field: name.to_string(),
                from: Some(self.get_long(name, value)?),
                to: None,
                from_inclusive: true,
                to_inclusive: true,
            },
            Condition::LessThan => IndexQuery::LongRange {
                field: name.to_string(),
                from: None,
                to: Some(self.get_long(name, value)?),
                from_inclusive: true,
                to_inclusive: false,
            },
            Condition::LessThanOrEqualTo => IndexQuery::LongRange {
                field: name.to_string(),
                from: None,
                to: Some(self.get_long(name, value)?),
                from_inclusive: true,
                to_inclusive: true,
            },
            Condition::Between => {
                let between = self.get_longs(name, value)?;
                if between.len() != 2 {
                    return Err(FathomError::search("2 numbers needed for between query"));
                }
                if between[0] >= between[1] {
                    return Err(FathomError::search("From number must be lower than to number"));
                }
                IndexQuery::LongRange {
                    field: name.to_string(),
                    from: Some(between[0]),
                    to: Some(between[1]),
                    from_inclusive: true,
                    to_inclusive: true,
                }
            }
            Condition::In => match long_in(name, self.get_longs(name, value)?) {
                Some(q) => q,
                None => return Ok(None),
            },
            _ => return Err(unexpected_condition(condition, field)),
        };

        Ok(Some(query))
    }

    fn get_date_query(
        &self,
        field: &IndexField,
        condition: Condition,
        value: &str,
    ) -> Result<Option<IndexQuery>> {
        let name = field.name.as_str();
        let query = match condition {
            Condition::Equals | Condition::Contains => {
                IndexQuery::long_exact(name, self.get_date(name, value)?)
            }
            Condition::GreaterThan => IndexQuery::LongRange {
                field: name.to_string(),
                from: Some(self.get_date(name, value)?),
                to: None,
                from_inclusive: false,
                to_inclusive: true,
            },
            Condition::GreaterThanOrEqualTo => IndexQuery::LongRange {
                field: name.to_string(),
                from: Some(self.get_date(name, value)?),
                to: None,
                from_inclusive: true,
                to_inclusive: true,
            },
            Condition::LessThan => IndexQuery::LongRange {
                field: name.to_string(),
                from: None,
                to: Some(self.get_date(name, value)?),
                from_inclusive: true,
                to_inclusive: false,
            },
            Condition::LessThanOrEqualTo => IndexQuery::LongRange {
                field: name.to_string(),
                from: None,
                to: Some(self.get_date(name, value)?),
                from_inclusive: true,
                to_inclusive: true,
            },
            Condition::Between => {
                let between = self.get_dates(name, value)?;
                if between.len() != 2 {
                    return Err(FathomError::search("2 dates needed for between query"));
                }
                if between[0] >= between[1] {
                    return Err(FathomError::search("From date must occur before to date"));
                }
                IndexQuery::LongRange {
                    field: name.to_string(),
                    from: Some(between[0]),
                    to: Some(between[1]),
                    from_inclusive: true,
                    to_inclusive: true,
                }
            }
            Condition::In => match long_in(name, self.get_dates(name, value)?) {
                Some(q) => q,
                None => return Ok(None),
            },
            _ => return Err(unexpected_condition(condition, field)),
        };

        Ok(Some(query))
    }

    fn get_text_query(
        &self,
        field: &IndexField,
        condition: Condition,
        value: &str,
        terms: &mut HashSet<String>,
    ) -> Result<Option<IndexQuery>> {
        match condition {
            // Text equality is word containment, the same as CONTAINS.
            Condition::Equals | Condition::Contains => {
                Ok(self.get_sub_query(field, value, terms, Occur::Must))
            }
            Condition::In => Ok(self.get_sub_query(field, value, terms, Occur::Should)),
            _ => Err(unexpected_condition(condition, field)),
        }
    }

    fn get_dictionary(
        &self,
        field: &IndexField,
        dictionary: &DictionaryRef,
        terms: &mut HashSet<String>,
    ) -> Result<IndexQuery> {
        let words = self.dictionary_store.words(dictionary).ok_or_else(|| {
            FathomError::search(format!("Dictionary \"{}\" not found", dictionary.name))
        })?;

        let mut clauses = Vec::new();
        for line in &words {
            // Terms on one dictionary line must all exist in a matching
            // document, lines combine as alternatives.
            let query = match field.field_type {
                FieldType::Numeric | FieldType::Id => {
                    long_in(&field.name, self.get_longs(&field.name, line)?)
                }
                FieldType::Date => long_in(&field.name, self.get_dates(&field.name, line)?),
                FieldType::Text => self.get_sub_query(field, line, terms, Occur::Must),
            };
            if let Some(query) = query {
                clauses.push(BooleanClause::should(query));
            }
        }

        match clauses.len() {
            // No line produced a usable query, so nothing can match.
            0 => Ok(IndexQuery::MatchNone),
            1 => Ok(clauses.into_iter().next().unwrap().query),
            _ => Ok(IndexQuery::Boolean { clauses }),
        }
    }

    /// Build a word-level query from a literal text value, registering the
    /// cleaned words for highlighting.
    fn get_sub_query(
        &self,
        field: &IndexField,
        value: &str,
        terms: &mut HashSet<String>,
        occur: Occur,
    ) -> Option<IndexQuery> {
        // Store terms for hit highlighting.
        let highlight = NON_WORD.replace_all(value, " ");
        for word in highlight.split_whitespace() {
            terms.insert(word.to_string());
        }

        let cleaned = NON_WORD_OR_WILDCARD.replace_all(value, " ");
        let cleaned = MULTIPLE_SPACE.replace_all(cleaned.trim(), " ");

        let mut queries = Vec::new();
        for word in cleaned.split(' ') {
            if word.is_empty() {
                continue;
            }
            let word = if field.case_sensitive {
                word.to_string()
            } else {
                word.to_lowercase()
            };
            if word.contains('*') || word.contains('?') {
                queries.push(IndexQuery::Wildcard {
                    field: field.name.clone(),
                    pattern: word,
                    case_sensitive: field.case_sensitive,
                });
            } else {
                queries.push(IndexQuery::Term {
                    field: field.name.clone(),
                    word,
                    case_sensitive: field.case_sensitive,
                });
            }
        }

        match queries.len() {
            0 => None,
            1 => Some(queries.into_iter().next().unwrap()),
            _ => Some(IndexQuery::Boolean {
                clauses: queries
                    .into_iter()
                    .map(|q| BooleanClause::new(q, occur))
                    .collect(),
            }),
        }
    }

    fn get_long(&self, field_name: &str, value: &str) -> Result<i64> {
        value.parse::<i64>().map_err(|_| {
            FathomError::search(format!(
                "Expected a numeric value for field \"{field_name}\" but was given string \"{value}\""
            ))
        })
    }

    fn get_longs(&self, field_name: &str, value: &str) -> Result<Vec<i64>> {
        value
            .split(DELIMITER)
            .map(|v| self.get_long(field_name, v.trim()))
            .collect()
    }

    fn get_date(&self, field_name: &str, value: &str) -> Result<i64> {
        parse_date_expression(value, self.time_zone_offset, self.now_epoch_milli).ok_or_else(
            || {
                FathomError::search(format!(
                    "Expected a standard date value for field \"{field_name}\" but was given string \"{value}\""
                ))
            },
        )
    }

    fn get_dates(&self, field_name: &str, value: &str) -> Result<Vec<i64>> {
        value
            .split(DELIMITER)
            .map(|v| self.get_date(field_name, v.trim()))
            .collect()
    }
}

fn occur_for(op: Op) -> Occur {
    match op {
        Op::And => Occur::Must,
        Op::Or => Occur::Should,
        Op::Not => Occur::MustNot,
    }
}

fn unexpected_condition(condition: Condition, field: &IndexField) -> FathomError {
    FathomError::search(format!(
        "Unexpected condition '{}' for {} field type",
        condition.display_value(),
        field.field_type.display_value()
    ))
}

/// Negate a query. A single-clause boolean flips in place, which cancels
/// double negation; anything wider stays whole under one MUST_NOT clause so
/// the negation only excludes documents matching the group as a unit.
fn negate(query: IndexQuery) -> IndexQuery {
    match query {
        IndexQuery::Boolean { clauses } if clauses.len() == 1 => {
            let clause = clauses.into_iter().next().unwrap();
            match clause.occur {
                // NOT(NOT(x)) collapses back to x.
                Occur::MustNot => clause.query,
                Occur::Must | Occur::Should => IndexQuery::Boolean {
                    clauses: vec![BooleanClause::must_not(clause.query)],
                },
            }
        }
        other => IndexQuery::Boolean {
            clauses: vec![BooleanClause::must_not(other)],
        },
    }
}

/// Append a SHOULD group to `clauses` with the given occurrence, collapsing
/// a single-clause group to its inner query.
fn push_group(clauses: &mut Vec<BooleanClause>, or_terms: Vec<BooleanClause>, occur: Occur) {
    match or_terms.len() {
        0 => {}
        1 => clauses.push(BooleanClause::new(
            or_terms.into_iter().next().unwrap().query,
            occur,
        )),
        _ => clauses.push(BooleanClause::new(
            IndexQuery::Boolean { clauses: or_terms },
            occur,
        )),
    }
}

fn long_in(field_name: &str, values: Vec<i64>) -> Option<IndexQuery> {
    match values.len() {
        0 => None,
        1 => Some(IndexQuery::long_exact(field_name, values[0])),
        _ => Some(IndexQuery::Boolean {
            clauses: values
                .into_iter()
                .map(|v| BooleanClause::should(IndexQuery::long_exact(field_name, v)))
                .collect(),
        }),
    }
}

/// Parse a time zone offset string such as "Z", "+02:00" or "-0500".
fn parse_offset(tz: &str) -> Result<FixedOffset> {
    if tz == "Z" || tz == "UTC" {
        return Ok(FixedOffset::east_opt(0).unwrap());
    }

    let bytes = tz.as_bytes();
    let sign = match bytes.first() {
        Some(b'+') => 1,
        Some(b'-') => -1,
        _ => return Err(FathomError::search(format!("Unknown time zone: {tz}"))),
    };
    let digits: String = tz[1..].chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 4 {
        return Err(FathomError::search(format!("Unknown time zone: {tz}")));
    }
    let hours: i32 = digits[..2].parse().unwrap();
    let minutes: i32 = digits[2..].parse().unwrap();
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| FathomError::search(format!("Unknown time zone: {tz}")))
}

/// Parse a date term value into epoch milliseconds.
///
/// Accepts RFC 3339 timestamps, naive timestamps resolved in the request's
/// time zone, raw epoch milliseconds, and relative `now()` expressions with
/// an optional `+`/`-` offset (`s`, `m`, `h` or `d` units).
fn parse_date_expression(value: &str, offset: FixedOffset, now_epoch_milli: i64) -> Option<i64> {
    let value = value.trim();

    if let Some(rest) = value.strip_prefix("now()") {
        let rest = rest.replace(' ', "");
        if rest.is_empty() {
            return Some(now_epoch_milli);
        }
        let (sign, amount) = match rest.strip_prefix('+') {
            Some(amount) => (1i64, amount),
            None => (-1i64, rest.strip_prefix('-')?),
        };
        let unit = amount.chars().last()?;
        let magnitude: i64 = amount[..amount.len() - 1].parse().ok()?;
        let millis = match unit {
            's' => magnitude * 1_000,
            'm' => magnitude * 60_000,
            'h' => magnitude * 3_600_000,
            'd' => magnitude * 86_400_000,
            _ => return None,
        };
        return Some(now_epoch_milli + sign * millis);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp_millis());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.3f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            if let Some(dt) = offset.from_local_datetime(&naive).single() {
                return Some(dt.timestamp_millis());
            }
        }
    }

    value.parse::<i64>().ok()
}
