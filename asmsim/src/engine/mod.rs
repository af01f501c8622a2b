use crate::AsmSimError;
use crate::bits::BitValue;
use crate::cfg::{ControlFlowModel, Flow};
use crate::config::{SimulatorConfig, SolverSettings};
use crate::liveness::LivenessConfig;
use crate::modeling::{MachineLane, ModeledMemory, SharedValues};
use crate::solver::PathSolver;
use crate::state::{Position, SymbolicState};
use asmsim_isa::Mnemonic;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use z3::ast::Ast;

mod tree;

pub use tree::ExecutionTree;

/// Computes the symbolic state at a line by bounded backward exploration followed by forward
/// symbolic execution of every path found.
#[derive(Debug)]
pub struct BoundedExecutionEngine {
    settings: SolverSettings,
    max_paths: usize,
    slow_job_warning: Duration,
    runs: u64,
    #[cfg(test)]
    fault_next: bool,
}

impl BoundedExecutionEngine {
    pub fn new(config: &SimulatorConfig) -> Self {
        Self {
            settings: config.solver.clone(),
            max_paths: config.max_paths.max(1),
            slow_job_warning: Duration::from_millis(config.slow_job_warning_ms),
            runs: 0,
            #[cfg(test)]
            fault_next: false,
        }
    }

    /// Makes the next execution panic inside the solver section
    #[cfg(test)]
    pub(crate) fn fail_next_run(&mut self) {
        self.fault_next = true;
    }

    /// Number of executions performed so far
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// `Ok(None)` when the target is out of range or cannot be reached. A panic inside the
    /// solver is reported as [`AsmSimError::SolverFault`].
    pub fn run_backward(
        &mut self,
        model: &ControlFlowModel,
        target: usize,
        max_steps: usize,
        config: &LivenessConfig,
        position: Position,
    ) -> Result<Option<SymbolicState>, AsmSimError> {
        if target >= model.line_count() {
            return Ok(None);
        }
        let tree = ExecutionTree::build(model, target, max_steps, self.max_paths);
        if tree.is_truncated() {
            tracing::warn!(
                "execution tree for line {target} truncated to {} paths",
                tree.path_count()
            );
        }
        if tree.path_count() == 0 {
            tracing::debug!("line {target} is unreachable within {max_steps} steps");
            return Ok(None);
        }
        self.runs += 1;
        let start = Instant::now();
        let z3_config = self.settings.z3_config();
        #[cfg(test)]
        let fault = std::mem::take(&mut self.fault_next);
        #[cfg(not(test))]
        let fault = false;
        let settings = &self.settings;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if fault {
                panic!("injected solver fault");
            }
            z3::with_z3_config(&z3_config, || {
                execute_tree(settings, model, &tree, target, config, position)
            })
        }));
        let elapsed = start.elapsed();
        if elapsed > self.slow_job_warning {
            tracing::warn!("simulating {position} line {target} took {elapsed:?}");
        }
        match outcome {
            Ok(result) => result.map(Some),
            Err(payload) => Err(AsmSimError::SolverFault(panic_message(payload))),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn execute_tree(
    settings: &SolverSettings,
    model: &ControlFlowModel,
    tree: &ExecutionTree,
    target: usize,
    config: &LivenessConfig,
    position: Position,
) -> Result<SymbolicState, AsmSimError> {
    let mut merged: Option<SymbolicState> = None;
    for path in tree.paths() {
        let Some(state) = execute_path(settings, model, &path, config, position)? else {
            tracing::debug!("skipping infeasible path {path:?}");
            continue;
        };
        match merged.as_mut() {
            Some(m) => m.merge(&state),
            None => merged = Some(state),
        }
    }
    let state = merged.unwrap_or_else(|| inconsistent(config));
    Ok(state.relocated(target, position, model.version()))
}

/// The result when no path is feasible: every tracked bit contradicts itself
fn inconsistent(config: &LivenessConfig) -> SymbolicState {
    let mut state = SymbolicState::undefined(0, Position::After, 0);
    for gpr in config.registers().iter() {
        state.set_gpr_bits(gpr, vec![BitValue::Inconsistent; 64]);
    }
    for flag in config.flags().iter() {
        state.set_flag(flag, BitValue::Inconsistent);
    }
    state
}

/// Runs one path in two lanes. Returns `None` if the path constraints are contradictory.
fn execute_path(
    settings: &SolverSettings,
    model: &ControlFlowModel,
    path: &[usize],
    config: &LivenessConfig,
    position: Position,
) -> Result<Option<SymbolicState>, AsmSimError> {
    let mode = model.parameters().mode;
    let memory = ModeledMemory::fresh_const("mem");
    let mut lane_a = MachineLane::window_entry("a", mode, &memory);
    let mut lane_b = MachineLane::window_entry("b", mode, &memory);
    let mut solver = PathSolver::new(settings);

    let executed = match position {
        Position::After => path.len(),
        Position::Before => path.len() - 1,
    };
    for (i, &line) in path.iter().enumerate().take(executed) {
        let Some(instr) = model.instruction(line) else {
            continue;
        };
        let mut shared = SharedValues::new();
        lane_a.execute(instr, &mut shared)?;
        shared.rewind();
        lane_b.execute(instr, &mut shared)?;

        let Mnemonic::Jcc(cond) = instr.mnemonic else {
            continue;
        };
        let Some(&next) = path.get(i + 1) else {
            continue;
        };
        // a conditional jump to the very next line constrains nothing
        if model.successors(line).len() < 2 {
            continue;
        }
        let (taken_a, taken_b) = (lane_a.condition(cond), lane_b.condition(cond));
        match model.flow(line, next) {
            Some(Flow::Taken) => {
                solver.assert(&taken_a);
                solver.assert(&taken_b);
            }
            Some(Flow::Fallthrough) => {
                solver.assert(&taken_a.not());
                solver.assert(&taken_b.not());
            }
            None => {}
        }
    }

    if !solver.is_feasible() {
        return Ok(None);
    }

    let mut state = SymbolicState::undefined(0, Position::After, 0);
    for gpr in config.registers().iter() {
        let a = lane_a.gpr(gpr).simplify();
        let b = lane_b.gpr(gpr).simplify();
        let may_differ = solver.possible(&a.eq(&b).not());
        let bits = (0..64)
            .map(|i| solver.classify(&a.extract(i, i), &b.extract(i, i), may_differ))
            .collect();
        state.set_gpr_bits(gpr, bits);
    }
    for flag in config.flags().iter() {
        let value = solver.classify(lane_a.flag(flag), lane_b.flag(flag), true);
        state.set_flag(flag, value);
    }
    state.add_path(solver.rendered_constraints());
    Ok(Some(state))
}

#[cfg(test)]
mod tests;
