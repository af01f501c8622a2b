use crate::bits::BitValue;
use crate::config::SolverSettings;
use z3::ast::{Ast, BV, Bool};
use z3::{Params, SatResult, Solver};

/// A solver session holding the constraints of one execution path.
///
/// All satisfiability questions the engine asks go through here. A query the solver cannot
/// decide within the timeout is treated as "could be either way".
pub struct PathSolver {
    solver: Solver,
    constraints: Vec<Bool>,
}

impl PathSolver {
    pub fn new(settings: &SolverSettings) -> Self {
        let solver = Solver::new();
        let mut params = Params::new();
        params.set_u32("timeout", settings.timeout_ms);
        solver.set_params(&params);
        Self {
            solver,
            constraints: Vec::new(),
        }
    }

    pub fn assert(&mut self, constraint: &Bool) {
        self.solver.assert(constraint);
        self.constraints.push(constraint.clone());
    }

    /// `false` only when the solver proves the path constraints contradictory
    pub fn is_feasible(&self) -> bool {
        !matches!(self.solver.check(), SatResult::Unsat)
    }

    /// Whether `extra` can hold together with the path constraints. Undecided counts as
    /// possible.
    pub fn possible(&self, extra: &Bool) -> bool {
        self.solver.push();
        self.solver.assert(extra);
        let result = self.solver.check();
        self.solver.pop(1);
        !matches!(result, SatResult::Unsat)
    }

    /// Decide what is known about one bit, given its value in both lanes
    pub fn classify(&self, lane_a: &BV, lane_b: &BV, lanes_may_differ: bool) -> BitValue {
        let a = lane_a.simplify();
        if let Some(v) = a.as_u64() {
            return BitValue::from_bool(v == 1);
        }
        let one = BV::from_u64(1, 1);
        let can_be_one = self.possible(&a.eq(&one));
        let can_be_zero = self.possible(&a.eq(&one).not());
        match (can_be_one, can_be_zero) {
            (true, false) => BitValue::One,
            (false, true) => BitValue::Zero,
            // the path itself is infeasible
            (false, false) => BitValue::Inconsistent,
            (true, true) => {
                if lanes_may_differ && self.possible(&a.eq(lane_b).not()) {
                    BitValue::Undefined
                } else {
                    BitValue::Unknown
                }
            }
        }
    }

    /// The path constraints rendered as SMT-LIB terms
    pub fn rendered_constraints(&self) -> Vec<String> {
        self.constraints
            .iter()
            .map(|c| c.simplify().to_string())
            .filter(|c| c != "true")
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_constants_and_forced_bits() {
        let mut solver = PathSolver::new(&SolverSettings::default());
        let x = BV::fresh_const("x", 1);
        assert_eq!(
            solver.classify(&BV::from_u64(1, 1), &BV::from_u64(1, 1), true),
            BitValue::One
        );
        assert_eq!(solver.classify(&x, &x, true), BitValue::Unknown);
        solver.assert(&x.eq(&BV::from_u64(0, 1)));
        assert_eq!(solver.classify(&x, &x, true), BitValue::Zero);
        assert_eq!(solver.rendered_constraints().len(), 1);
    }

    #[test]
    fn lanes_that_can_differ_are_undefined() {
        let solver = PathSolver::new(&SolverSettings::default());
        let a = BV::fresh_const("a", 1);
        let b = BV::fresh_const("b", 1);
        assert_eq!(solver.classify(&a, &b, true), BitValue::Undefined);
        assert_eq!(solver.classify(&a, &b, false), BitValue::Unknown);
    }

    #[test]
    fn detects_infeasible_paths() {
        let mut solver = PathSolver::new(&SolverSettings::default());
        let x = BV::fresh_const("x", 8);
        solver.assert(&x.eq(&BV::from_u64(1, 8)));
        assert!(solver.is_feasible());
        solver.assert(&x.eq(&BV::from_u64(2, 8)));
        assert!(!solver.is_feasible());
    }
}
