//! A minimal solver driving re-entrant evaluation: expressions are solved
//! in the order given, each result bound before the next runs. Ordering of
//! interdependent sets is the caller's job; the calculator only guarantees
//! the repeated, nested calls are safe and leave no bindings behind.

use formula_calc::errors::Result;
use formula_calc::{BulkSolver, Calculator, Expression};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

struct SequentialSolver;

impl BulkSolver for SequentialSolver {
    fn solve_strict(
        &self,
        calculator: &mut Calculator,
        expressions: &[(String, Expression)],
    ) -> Result<Vec<(String, Value)>> {
        calculator.store_scoped(&json!({}), |calc| {
            let mut out = Vec::new();
            for (name, expression) in expressions {
                let value = calc.evaluate_strict(expression.clone(), &json!({}))?;
                calc.store_value(name, value.clone());
                out.push((name.clone(), value));
            }
            Ok(out)
        })
    }

    fn solve(
        &self,
        calculator: &mut Calculator,
        expressions: &[(String, Expression)],
    ) -> Vec<(String, Option<Value>)> {
        calculator
            .store_scoped(&json!({}), |calc| {
                let mut out = Vec::new();
                for (name, expression) in expressions {
                    let value = calc.evaluate(expression.clone(), &json!({})).ok().flatten();
                    if let Some(v) = &value {
                        calc.store_value(name, v.clone());
                    }
                    out.push((name.clone(), value));
                }
                Ok(out)
            })
            .unwrap_or_default()
    }
}

fn exprs(pairs: &[(&str, &str)]) -> Vec<(String, Expression)> {
    pairs
        .iter()
        .map(|(name, text)| (name.to_string(), Expression::from(*text)))
        .collect()
}

#[test]
fn chained_expressions_solve_in_order() {
    let mut calc = Calculator::new();
    calc.store_value("base", json!(10));
    let out = calc
        .solve_strict_with(
            &SequentialSolver,
            &exprs(&[("double", "base * 2"), ("quad", "double * 2")]),
        )
        .unwrap();
    assert_eq!(
        out,
        vec![
            ("double".to_string(), json!(20)),
            ("quad".to_string(), json!(40)),
        ]
    );
    // Intermediate results were scoped to the pass.
    assert!(calc.dependencies("double").unwrap().contains(&"double".to_string()));
}

#[test]
fn strict_solving_propagates_the_first_failure() {
    let mut calc = Calculator::new();
    let err = calc
        .solve_strict_with(
            &SequentialSolver,
            &exprs(&[("a", "1 + 1"), ("b", "missing + 1")]),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        formula_calc::errors::CalcError::UnboundVariable { .. }
    ));
    assert!(calc.is_empty());
}

#[test]
fn lenient_solving_leaves_gaps_for_failures() {
    let mut calc = Calculator::new();
    let out = calc.solve_with(
        &SequentialSolver,
        &exprs(&[("a", "2 * 3"), ("b", "missing + 1"), ("c", "a + 1")]),
    );
    assert_eq!(
        out,
        vec![
            ("a".to_string(), Some(json!(6))),
            ("b".to_string(), None),
            ("c".to_string(), Some(json!(7))),
        ]
    );
}
