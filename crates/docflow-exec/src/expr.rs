use std::cmp::Ordering;

use docflow_cbor::Signature;
use docflow_types::pointer;
use indexmap::IndexMap;
use thiserror::Error;

use crate::meter::{GasMeter, costs};
use crate::model::{Expr, ExprConst, ExprList, ExprOp, ExprOpCode, ExprRecord};
use crate::value::Value;

/// Evaluation environment: the current event, the scope document and prior step outputs.
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub event: Option<Value>,
    pub document: Option<Value>,
    pub steps: IndexMap<String, Value>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, event: Value) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_document(mut self, document: Value) -> Self {
        self.document = Some(document);
        self
    }

    pub fn insert_step(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.steps.insert(name.into(), value)
    }
}

pub type EvalResult<T = Value> = Result<T, EvalError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("out of gas: evaluation exceeded its limit of {limit}")]
    OutOfGas { limit: u64 },
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
    #[error("missing ref {0}")]
    MissingRef(String),
    #[error("missing field '{field}' on {context}")]
    MissingField {
        field: String,
        context: &'static str,
    },
    #[error("type error: expected {expected}, got {actual}")]
    TypeError {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("invalid argument count for {op:?}: {message}")]
    InvalidArity { op: ExprOpCode, message: String },
    #[error("numeric overflow in {0:?}")]
    NumericOverflow(ExprOpCode),
    #[error("division by zero in {0:?}")]
    DivideByZero(ExprOpCode),
    #[error("op {op:?} error: {message}")]
    OpError { op: ExprOpCode, message: String },
}

impl EvalError {
    pub fn is_out_of_gas(&self) -> bool {
        matches!(self, EvalError::OutOfGas { .. })
    }
}

/// Outcome of one isolated evaluation together with the fuel it burned.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub result: EvalResult,
    pub gas_used: u64,
}

/// Evaluates `expr` under a fresh meter capped at `gas_limit`.
pub fn evaluate(expr: &Expr, env: &Env, gas_limit: u64) -> Evaluation {
    let mut meter = GasMeter::new(gas_limit);
    let result = eval_expr(expr, env, &mut meter);
    Evaluation {
        result,
        gas_used: meter.used(),
    }
}

/// Evaluate an expression, charging every visited node against `meter`.
pub fn eval_expr(expr: &Expr, env: &Env, meter: &mut GasMeter) -> EvalResult {
    meter.charge(costs::NODE)?;
    match expr {
        Expr::Ref(eref) => resolve_ref(&eref.reference, env, meter),
        Expr::Const(lit) => Ok(eval_const(lit)),
        Expr::Op(op) => eval_op(op, env, meter),
        Expr::Record(record) => eval_record(record, env, meter),
        Expr::List(list) => eval_list(list, env, meter),
    }
}

fn eval_const(constant: &ExprConst) -> Value {
    match constant {
        ExprConst::Bool { bool } => Value::Bool(*bool),
        ExprConst::Int { int } => Value::Int(*int),
        ExprConst::Text { text } => Value::Text(text.clone()),
    }
}

fn eval_record(record: &ExprRecord, env: &Env, meter: &mut GasMeter) -> EvalResult {
    let mut out = IndexMap::with_capacity(record.record.len());
    for (key, value_expr) in &record.record {
        out.insert(key.clone(), eval_expr(value_expr, env, meter)?);
    }
    Ok(Value::Record(out))
}

fn eval_list(list: &ExprList, env: &Env, meter: &mut GasMeter) -> EvalResult {
    let mut out = Vec::with_capacity(list.list.len());
    for item in &list.list {
        out.push(eval_expr(item, env, meter)?);
    }
    Ok(Value::List(out))
}

fn eval_op(op: &ExprOp, env: &Env, meter: &mut GasMeter) -> EvalResult {
    meter.charge(costs::OP + op.args.len() as u64)?;
    // `if` only evaluates the branch it takes.
    if op.op == ExprOpCode::If {
        if op.args.len() != 3 {
            return Err(EvalError::InvalidArity {
                op: op.op,
                message: format!("expected 3, got {}", op.args.len()),
            });
        }
        let condition = eval_expr(&op.args[0], env, meter)?;
        let branch = if as_bool(&condition)? {
            &op.args[1]
        } else {
            &op.args[2]
        };
        return eval_expr(branch, env, meter);
    }
    let values: Vec<Value> = op
        .args
        .iter()
        .map(|arg| eval_expr(arg, env, meter))
        .collect::<EvalResult<_>>()?;
    let result = apply_op(op.op, &values)?;
    if let Value::Text(text) = &result {
        meter.charge(text.len() as u64 / costs::TEXT_BYTES_PER_UNIT)?;
    }
    Ok(result)
}

fn apply_op(op: ExprOpCode, args: &[Value]) -> EvalResult {
    use ExprOpCode::*;
    match op {
        Len => {
            require_args_exact(op, args, 1)?;
            Ok(Value::Int(len_of(&args[0])?))
        }
        Get => {
            require_args_exact(op, args, 2)?;
            get_value(op, &args[0], &args[1])
        }
        Has => {
            require_args_exact(op, args, 2)?;
            has_value(&args[0], &args[1])
        }
        Eq => {
            require_args_exact(op, args, 2)?;
            Ok(Value::Bool(args[0] == args[1]))
        }
        Ne => {
            require_args_exact(op, args, 2)?;
            Ok(Value::Bool(args[0] != args[1]))
        }
        Lt | Le | Gt | Ge => {
            require_args_exact(op, args, 2)?;
            let ordering = compare_orderable(&args[0], &args[1])?;
            let result = match op {
                Lt => ordering == Ordering::Less,
                Le => ordering != Ordering::Greater,
                Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        And => {
            require_args_at_least(op, args, 2)?;
            let mut result = true;
            for value in args {
                result &= as_bool(value)?;
            }
            Ok(Value::Bool(result))
        }
        Or => {
            require_args_at_least(op, args, 2)?;
            let mut result = false;
            for value in args {
                result |= as_bool(value)?;
            }
            Ok(Value::Bool(result))
        }
        Not => {
            require_args_exact(op, args, 1)?;
            Ok(Value::Bool(!as_bool(&args[0])?))
        }
        If => Err(EvalError::OpError {
            op,
            message: "conditional must be evaluated lazily".into(),
        }),
        Concat => {
            require_args_at_least(op, args, 2)?;
            let mut out = String::new();
            for value in args {
                out.push_str(&display_text(value)?);
            }
            Ok(Value::Text(out))
        }
        Hash => {
            require_args_exact(op, args, 1)?;
            let signature = Signature::of(&args[0].to_json()).map_err(|err| EvalError::OpError {
                op,
                message: err.to_string(),
            })?;
            Ok(Value::Text(signature.to_string()))
        }
        StartsWith | EndsWith | Contains => {
            require_args_exact(op, args, 2)?;
            string_op(op, &args[0], &args[1])
        }
        Add | Sub | Mul | Div | Mod => {
            require_args_exact(op, args, 2)?;
            arithmetic(op, as_int(&args[0])?, as_int(&args[1])?)
        }
    }
}

fn resolve_ref(reference: &str, env: &Env, meter: &mut GasMeter) -> EvalResult {
    meter.charge(costs::REF)?;
    if let Some(rest) = reference.strip_prefix("@event") {
        let event = env
            .event
            .as_ref()
            .ok_or_else(|| EvalError::MissingRef(reference.to_string()))?;
        return access_path(event, rest, meter);
    }
    if let Some(step) = reference.strip_prefix("@steps.") {
        let (name, tail) = match step.split_once('.') {
            Some((name, rest)) => (name, rest),
            None => (step, ""),
        };
        let value = env
            .steps
            .get(name)
            .ok_or_else(|| EvalError::MissingRef(reference.to_string()))?;
        return access_path(value, tail, meter);
    }
    if let Some(ptr) = reference.strip_prefix("@doc") {
        let document = env
            .document
            .as_ref()
            .ok_or_else(|| EvalError::MissingRef(reference.to_string()))?;
        return access_pointer(document, ptr, meter);
    }
    Err(EvalError::MissingRef(reference.to_string()))
}

fn access_path(root: &Value, path: &str, meter: &mut GasMeter) -> EvalResult {
    let mut current = root;
    for segment in path.trim_start_matches('.').split('.') {
        if segment.is_empty() {
            continue;
        }
        meter.charge(1)?;
        current = step_into(current, segment)?;
    }
    Ok(current.clone())
}

fn access_pointer(root: &Value, ptr: &str, meter: &mut GasMeter) -> EvalResult {
    let segments = pointer::segments(ptr)
        .map_err(|err| EvalError::InvalidExpression(err.to_string()))?;
    let mut current = root;
    for segment in &segments {
        meter.charge(1)?;
        current = step_into(current, segment)?;
    }
    Ok(current.clone())
}

fn step_into<'a>(current: &'a Value, segment: &str) -> EvalResult<&'a Value> {
    match current {
        Value::Record(map) => map.get(segment).ok_or_else(|| EvalError::MissingField {
            field: segment.to_string(),
            context: "record",
        }),
        Value::List(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index))
            .ok_or_else(|| EvalError::MissingField {
                field: segment.to_string(),
                context: "list",
            }),
        other => Err(EvalError::TypeError {
            expected: "record or list",
            actual: other.kind(),
        }),
    }
}

fn len_of(value: &Value) -> EvalResult<i64> {
    let len = match value {
        Value::List(items) => items.len(),
        Value::Record(fields) => fields.len(),
        Value::Text(text) => text.chars().count(),
        _ => {
            return Err(EvalError::TypeError {
                expected: "collection or text",
                actual: value.kind(),
            });
        }
    };
    i64::try_from(len).map_err(|_| EvalError::NumericOverflow(ExprOpCode::Len))
}

fn get_value(op: ExprOpCode, target: &Value, key: &Value) -> EvalResult {
    match target {
        Value::Record(map) => {
            let field = as_text(key)?.to_string();
            map.get(&field)
                .cloned()
                .ok_or_else(|| EvalError::MissingField {
                    field,
                    context: "record",
                })
        }
        Value::List(list) => {
            let index = as_index(key, op)?;
            list.get(index).cloned().ok_or_else(|| EvalError::OpError {
                op,
                message: format!("index {index} out of range"),
            })
        }
        other => Err(EvalError::TypeError {
            expected: "list|record",
            actual: other.kind(),
        }),
    }
}

fn has_value(container: &Value, needle: &Value) -> EvalResult {
    let result = match container {
        Value::Record(map) => map.contains_key(as_text(needle)?),
        Value::List(list) => list.iter().any(|item| item == needle),
        other => {
            return Err(EvalError::TypeError {
                expected: "list|record",
                actual: other.kind(),
            });
        }
    };
    Ok(Value::Bool(result))
}

fn string_op(op: ExprOpCode, haystack: &Value, needle: &Value) -> EvalResult {
    match (haystack, needle) {
        (Value::Text(h), Value::Text(n)) => {
            let result = match op {
                ExprOpCode::StartsWith => h.starts_with(n.as_str()),
                ExprOpCode::EndsWith => h.ends_with(n.as_str()),
                _ => h.contains(n.as_str()),
            };
            Ok(Value::Bool(result))
        }
        (Value::List(list), needle) if op == ExprOpCode::Contains => {
            Ok(Value::Bool(list.iter().any(|item| item == needle)))
        }
        (Value::Record(map), Value::Text(key)) if op == ExprOpCode::Contains => {
            Ok(Value::Bool(map.contains_key(key)))
        }
        (other, _) => Err(EvalError::TypeError {
            expected: match op {
                ExprOpCode::StartsWith | ExprOpCode::EndsWith => "text",
                _ => "text|list|record",
            },
            actual: other.kind(),
        }),
    }
}

fn compare_orderable(a: &Value, b: &Value) -> EvalResult<Ordering> {
    match (a, b) {
        (Value::Int(lhs), Value::Int(rhs)) => Ok(lhs.cmp(rhs)),
        (Value::Text(lhs), Value::Text(rhs)) => Ok(lhs.cmp(rhs)),
        (Value::Int(_), Value::Text(_)) => Err(EvalError::TypeError {
            expected: "comparable pair",
            actual: "int vs text",
        }),
        (Value::Text(_), Value::Int(_)) => Err(EvalError::TypeError {
            expected: "comparable pair",
            actual: "text vs int",
        }),
        (Value::Int(_) | Value::Text(_), other) | (other, _) => Err(EvalError::TypeError {
            expected: "int or text",
            actual: other.kind(),
        }),
    }
}

fn arithmetic(op: ExprOpCode, lhs: i64, rhs: i64) -> EvalResult {
    let result = match op {
        ExprOpCode::Add => lhs.checked_add(rhs),
        ExprOpCode::Sub => lhs.checked_sub(rhs),
        ExprOpCode::Mul => lhs.checked_mul(rhs),
        ExprOpCode::Div | ExprOpCode::Mod if rhs == 0 => {
            return Err(EvalError::DivideByZero(op));
        }
        ExprOpCode::Div => lhs.checked_div(rhs),
        ExprOpCode::Mod => lhs.checked_rem(rhs),
        _ => {
            return Err(EvalError::OpError {
                op,
                message: "not an arithmetic operator".into(),
            });
        }
    };
    result.map(Value::Int).ok_or(EvalError::NumericOverflow(op))
}

fn as_int(value: &Value) -> EvalResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(EvalError::TypeError {
            expected: "int",
            actual: other.kind(),
        }),
    }
}

fn as_bool(value: &Value) -> EvalResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(EvalError::TypeError {
            expected: "bool",
            actual: other.kind(),
        }),
    }
}

fn as_text(value: &Value) -> EvalResult<&str> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(EvalError::TypeError {
            expected: "text",
            actual: other.kind(),
        }),
    }
}

/// Text rendering used by `concat`; scalars only.
fn display_text(value: &Value) -> EvalResult<String> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(EvalError::TypeError {
            expected: "text, int or bool",
            actual: other.kind(),
        }),
    }
}

fn as_index(value: &Value, op: ExprOpCode) -> EvalResult<usize> {
    match value {
        Value::Int(i) if *i >= 0 => usize::try_from(*i).map_err(|_| EvalError::OpError {
            op,
            message: "index out of range for platform".into(),
        }),
        _ => Err(EvalError::OpError {
            op,
            message: "index must be a non-negative int".into(),
        }),
    }
}

fn require_args_exact(op: ExprOpCode, args: &[Value], expected: usize) -> Result<(), EvalError> {
    if args.len() != expected {
        return Err(EvalError::InvalidArity {
            op,
            message: format!("expected {expected}, got {}", args.len()),
        });
    }
    Ok(())
}

fn require_args_at_least(op: ExprOpCode, args: &[Value], min: usize) -> Result<(), EvalError> {
    if args.len() < min {
        return Err(EvalError::InvalidArity {
            op,
            message: format!("expected >= {min}, got {}", args.len()),
        });
    }
    Ok(())
}
