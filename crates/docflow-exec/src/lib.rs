//! Gas-metered expression evaluation over a deterministic value model.

mod expr;
mod meter;
mod model;
mod value;

pub use expr::{Env, EvalError, EvalResult, Evaluation, eval_expr, evaluate};
pub use meter::{GasMeter, costs};
pub use model::{
    Expr, ExprConst, ExprList, ExprOp, ExprOpCode, ExprRecord, ExprRef, expression_from_node,
};
pub use value::Value;
