//! Resolution of deferred edge values.
//!
//! The map engine never executes code stored in a map file. A deferred
//! value is handed, as an opaque string, to an evaluator supplied by the
//! host, which may look it up in a table, run it in a sandbox, or refuse.

use std::collections::HashMap;

use log::trace;

use crate::map::types::{Command, Cost, EdgeValue};

/// Host-supplied resolver for deferred wayto/timeto values.
pub trait ExpressionEvaluator: Send + Sync {
    /// Cost in seconds, or `None` if the edge is unusable right now.
    fn cost(&self, expression: &str) -> Option<f64>;

    /// Concrete movement command, or `None` if it cannot be produced.
    fn command(&self, expression: &str) -> Option<String>;
}

/// Evaluator that refuses every expression. Deferred edges are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEvaluator;

impl ExpressionEvaluator for NoEvaluator {
    fn cost(&self, _expression: &str) -> Option<f64> {
        None
    }

    fn command(&self, _expression: &str) -> Option<String> {
        None
    }
}

/// Table-driven evaluator keyed by the exact expression text.
#[derive(Debug, Default, Clone)]
pub struct StaticEvaluator {
    costs: HashMap<String, f64>,
    commands: HashMap<String, String>,
}

impl StaticEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cost(mut self, expression: &str, cost: f64) -> Self {
        self.costs.insert(expression.to_string(), cost);
        self
    }

    pub fn with_command(mut self, expression: &str, command: &str) -> Self {
        self.commands.insert(expression.to_string(), command.to_string());
        self
    }
}

impl ExpressionEvaluator for StaticEvaluator {
    fn cost(&self, expression: &str) -> Option<f64> {
        self.costs.get(expression).copied()
    }

    fn command(&self, expression: &str) -> Option<String> {
        self.commands.get(expression).cloned()
    }
}

/// Concrete weight of an edge. Non-finite results count as missing.
pub fn resolve_cost(value: &Cost, evaluator: &dyn ExpressionEvaluator) -> Option<f64> {
    let cost = match value {
        EdgeValue::Literal(cost) => Some(*cost),
        EdgeValue::Expression(expr) => {
            let cost = evaluator.cost(expr);
            trace!("deferred cost {:?} -> {:?}", expr, cost);
            cost
        }
    };
    cost.filter(|c| c.is_finite())
}

pub fn resolve_command(value: &Command, evaluator: &dyn ExpressionEvaluator) -> Option<String> {
    match value {
        EdgeValue::Literal(command) => Some(command.clone()),
        EdgeValue::Expression(expr) => evaluator.command(expr),
    }
}
