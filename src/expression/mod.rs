//! Boolean search expression trees.
//!
//! An expression is an immutable tree of AND/OR/NOT operator nodes over leaf
//! terms. Terms carry a field name, a condition, an optional value string and
//! an optional dictionary reference. Nodes can be disabled, in which case the
//! query builder prunes them without affecting their siblings.

use serde::{Deserialize, Serialize};

/// Boolean operator for expression nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// All children must match.
    And,
    /// At least one child must match.
    Or,
    /// No child may match.
    Not,
}

/// Condition applied by a leaf term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// Field equals the value exactly.
    Equals,
    /// Field contains the value's words.
    Contains,
    /// Field is greater than the value.
    GreaterThan,
    /// Field is greater than or equal to the value.
    GreaterThanOrEqualTo,
    /// Field is less than the value.
    LessThan,
    /// Field is less than or equal to the value.
    LessThanOrEqualTo,
    /// Field lies in the inclusive range "from,to".
    Between,
    /// Field matches one of the comma separated values.
    In,
    /// Field matches one of the lines of a referenced dictionary.
    InDictionary,
}

impl Condition {
    /// Human readable name used in validation error messages.
    pub fn display_value(&self) -> &'static str {
        match self {
            Condition::Equals => "=",
            Condition::Contains => "contains",
            Condition::GreaterThan => ">",
            Condition::GreaterThanOrEqualTo => ">=",
            Condition::LessThan => "<",
            Condition::LessThanOrEqualTo => "<=",
            Condition::Between => "between",
            Condition::In => "in",
            Condition::InDictionary => "in dictionary",
        }
    }
}

/// Reference to a dictionary document holding newline separated match words.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DictionaryRef {
    /// Unique identifier of the dictionary.
    pub uuid: String,
    /// Display name.
    pub name: String,
}

impl DictionaryRef {
    /// Create a new dictionary reference.
    pub fn new<S: Into<String>>(uuid: S, name: S) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
        }
    }
}

/// A node in a boolean search expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpressionNode {
    /// An operator node combining child expressions.
    Operator {
        /// The boolean operator.
        op: Op,
        /// Child expressions.
        children: Vec<ExpressionNode>,
        /// Disabled nodes are pruned by the query builder.
        enabled: bool,
    },
    /// A leaf term.
    Term {
        /// Field name the term applies to.
        field: String,
        /// Condition to apply.
        condition: Condition,
        /// Value string. Conditions other than `InDictionary` require one.
        value: String,
        /// Dictionary reference, required for `InDictionary`.
        dictionary: Option<DictionaryRef>,
        /// Disabled terms are pruned by the query builder.
        enabled: bool,
    },
}

impl ExpressionNode {
    /// Create an enabled AND operator node.
    pub fn and(children: Vec<ExpressionNode>) -> Self {
        ExpressionNode::Operator {
            op: Op::And,
            children,
            enabled: true,
        }
    }

    /// Create an enabled OR operator node.
    pub fn or(children: Vec<ExpressionNode>) -> Self {
        ExpressionNode::Operator {
            op: Op::Or,
            children,
            enabled: true,
        }
    }

    /// Create an enabled NOT operator node.
    pub fn not(children: Vec<ExpressionNode>) -> Self {
        ExpressionNode::Operator {
            op: Op::Not,
            children,
            enabled: true,
        }
    }

    /// Create an enabled leaf term.
    pub fn term<S: Into<String>>(field: S, condition: Condition, value: S) -> Self {
        ExpressionNode::Term {
            field: field.into(),
            condition,
            value: value.into(),
            dictionary: None,
            enabled: true,
        }
    }

    /// Create an enabled dictionary term.
    pub fn dictionary_term<S: Into<String>>(field: S, dictionary: DictionaryRef) -> Self {
        ExpressionNode::Term {
            field: field.into(),
            condition: Condition::InDictionary,
            value: String::new(),
            dictionary: Some(dictionary),
            enabled: true,
        }
    }

    /// Return a copy of this node with the enabled flag cleared.
    pub fn disabled(mut self) -> Self {
        match &mut self {
            ExpressionNode::Operator { enabled, .. } => *enabled = false,
            ExpressionNode::Term { enabled, .. } => *enabled = false,
        }
        self
    }

    /// Whether this node participates in query building.
    pub fn enabled(&self) -> bool {
        match self {
            ExpressionNode::Operator { enabled, .. } => *enabled,
            ExpressionNode::Term { enabled, .. } => *enabled,
        }
    }

    /// Whether the tree rooted here contains at least one enabled term.
    pub fn has_terms(&self) -> bool {
        match self {
            ExpressionNode::Term { enabled, .. } => *enabled,
            ExpressionNode::Operator {
                children, enabled, ..
            } => *enabled && children.iter().any(|c| c.has_terms()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_terms() {
        let empty = ExpressionNode::and(vec![]);
        assert!(!empty.has_terms());

        let term = ExpressionNode::term("Feed", Condition::Equals, "TEST_FEED");
        assert!(term.has_terms());

        let nested = ExpressionNode::and(vec![ExpressionNode::or(vec![term.clone()])]);
        assert!(nested.has_terms());

        let disabled = ExpressionNode::and(vec![term.clone().disabled()]);
        assert!(!disabled.has_terms());

        let disabled_parent = ExpressionNode::and(vec![term]).disabled();
        assert!(!disabled_parent.has_terms());
    }

    #[test]
    fn test_expression_serialization() {
        let expr = ExpressionNode::and(vec![
            ExpressionNode::term("Feed", Condition::Equals, "TEST_FEED"),
            ExpressionNode::not(vec![ExpressionNode::term(
                "EventId",
                Condition::Between,
                "1,10",
            )]),
        ]);

        let json = serde_json::to_string(&expr).unwrap();
        let parsed: ExpressionNode = serde_json::from_str(&json).unwrap();
        assert_eq!(expr, parsed);
    }
}
