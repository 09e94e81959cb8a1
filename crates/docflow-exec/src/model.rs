use docflow_types::Node;
use docflow_types::builtins::EXPRESSION;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::expr::EvalError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expr {
    Ref(ExprRef),
    Const(ExprConst),
    Op(ExprOp),
    Record(ExprRecord),
    List(ExprList),
}

/// Reference into the evaluation environment: `@event.path`, `@steps.name.path` or `@doc/pointer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprRef {
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExprConst {
    Bool { bool: bool },
    Int { int: i64 },
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprOp {
    pub op: ExprOpCode,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExprOpCode {
    Len,
    Get,
    Has,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    If,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    StartsWith,
    EndsWith,
    Contains,
    Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprRecord {
    pub record: IndexMap<String, Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprList {
    pub list: Vec<Expr>,
}

/// Parses an `Expression` node (`{type: Expression, expr: ...}`).
///
/// Returns `None` for any other node so callers can treat plain payloads as literals.
pub fn expression_from_node(node: &Node) -> Option<Result<Expr, EvalError>> {
    if node.type_ref() != Some(EXPRESSION) {
        return None;
    }
    let Some(body) = node.property("expr") else {
        return Some(Err(EvalError::InvalidExpression(
            "expression node has no 'expr'".into(),
        )));
    };
    Some(
        serde_json::from_value(body.to_json())
            .map_err(|err| EvalError::InvalidExpression(err.to_string())),
    )
}
