use std::cmp::Ordering;

use serde_json::Value;

use crate::errors::{CalcError, Result};

/// Ordering between two values for the `<`, `<=`, `>`, `>=` operators.
/// Numbers compare numerically and strings lexicographically; anything else
/// is not ordered.
pub fn compare(a: &Value, b: &Value) -> Result<Ordering> {
    match (a, b) {
        (Value::Number(na), Value::Number(nb)) => {
            match (na.as_f64(), nb.as_f64()) {
                (Some(da), Some(db)) => da.partial_cmp(&db).ok_or_else(|| {
                    CalcError::Evaluation(format!("cannot order {a} and {b}"))
                }),
                _ => Err(CalcError::Evaluation(format!("cannot order {a} and {b}"))),
            }
        }
        (Value::String(sa), Value::String(sb)) => Ok(sa.cmp(sb)),
        _ => Err(CalcError::InvalidArgument(format!(
            "cannot compare {a} with {b}"
        ))),
    }
}
