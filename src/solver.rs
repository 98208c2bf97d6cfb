//! Seam for multi-expression solving.
//!
//! Solving a set of interdependent formulas needs an evaluation order;
//! choosing that order is not this crate's concern. Implementors drive
//! repeated `evaluate_strict`/`resolve` calls against one calculator;
//! the scoped binding discipline guarantees such re-entrant use is safe
//! within one pass.

use serde_json::Value;

use crate::errors::Result;
use crate::{Calculator, Expression};

pub trait BulkSolver {
    /// Solve every named expression, propagating the first failure.
    fn solve_strict(
        &self,
        calculator: &mut Calculator,
        expressions: &[(String, Expression)],
    ) -> Result<Vec<(String, Value)>>;

    /// Solve every named expression; entries whose evaluation was swallowed
    /// carry no result.
    fn solve(
        &self,
        calculator: &mut Calculator,
        expressions: &[(String, Expression)],
    ) -> Vec<(String, Option<Value>)>;
}

impl Calculator {
    pub fn solve_strict_with<S: BulkSolver + ?Sized>(
        &mut self,
        solver: &S,
        expressions: &[(String, Expression)],
    ) -> Result<Vec<(String, Value)>> {
        solver.solve_strict(self, expressions)
    }

    pub fn solve_with<S: BulkSolver + ?Sized>(
        &mut self,
        solver: &S,
        expressions: &[(String, Expression)],
    ) -> Vec<(String, Option<Value>)> {
        solver.solve(self, expressions)
    }
}
