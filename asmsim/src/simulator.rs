use crate::cache::StateCache;
use crate::cfg::ControlFlowModel;
use crate::config::SimulatorConfig;
use crate::display;
use crate::liveness::LivenessConfig;
use crate::scheduler::{SharedModel, SimulationScheduler};
use crate::state::SymbolicState;
use asmsim_isa::{Flag, Gpr, Instruction, Mnemonic, Operand, Register, instantiate, parse_line};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// How a single line of source reads to the simulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxInfo {
    /// Whether the simulator can execute this instruction
    pub is_implemented: bool,
    pub mnemonic: Mnemonic,
    /// Why the line is malformed, if it is
    pub message: Option<String>,
}

/// One simulation session over one source buffer.
///
/// Owns the control flow model, the state cache and the scheduler. When disabled there is no
/// scheduler at all, so nothing gets computed or cached and every query answers with its empty
/// value.
pub struct AsmSimulator {
    config: SimulatorConfig,
    model: SharedModel,
    cache: Arc<StateCache>,
    scheduler: RwLock<Option<SimulationScheduler>>,
}

impl AsmSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let model = ControlFlowModel::new(config.parameters());
        let cache = Arc::new(StateCache::new(model.version()));
        let model = Arc::new(RwLock::new(Arc::new(model)));
        let scheduler = config
            .enabled
            .then(|| SimulationScheduler::new(&config, model.clone(), cache.clone()));
        Self {
            config,
            model,
            cache,
            scheduler: RwLock::new(scheduler),
        }
    }

    pub fn with_source(config: SimulatorConfig, text: &str) -> Self {
        let simulator = Self::new(config);
        simulator.on_content_changed(text);
        simulator
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    fn scheduler(&self) -> RwLockReadGuard<'_, Option<SimulationScheduler>> {
        self.scheduler.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_enabled(&self) -> bool {
        self.scheduler().is_some()
    }

    /// Turns the whole subsystem on or off. Switching off stops the worker and drops every
    /// cached state.
    pub fn set_enabled(&self, enabled: bool) {
        let mut scheduler = self.scheduler.write().unwrap_or_else(|e| e.into_inner());
        if enabled == scheduler.is_some() {
            return;
        }
        if enabled {
            tracing::info!("simulator enabled");
            *scheduler = Some(SimulationScheduler::new(
                &self.config,
                self.model.clone(),
                self.cache.clone(),
            ));
        } else {
            tracing::info!("simulator disabled");
            *scheduler = None;
            self.cache.invalidate_all(self.cache.version());
        }
    }

    /// The model as of the last edit
    pub fn model(&self) -> Arc<ControlFlowModel> {
        self.model.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Feeds the full new text of the buffer. Returns whether cached states were dropped.
    pub fn on_content_changed(&self, text: &str) -> bool {
        let mut model = self.model.write().unwrap_or_else(|e| e.into_inner());
        if !Arc::make_mut(&mut model).update(text) {
            tracing::debug!("edit does not affect simulation results");
            return false;
        }
        self.cache.invalidate_all(model.version());
        true
    }

    /// The cached state after `line`. On a miss the line is handed to the background worker
    /// and `None` is returned.
    pub fn get_state_after(&self, line: usize) -> Option<Arc<SymbolicState>> {
        self.scheduler().as_ref()?.get_after(line, true)
    }

    pub fn get_state_before(&self, line: usize) -> Option<Arc<SymbolicState>> {
        self.scheduler().as_ref()?.get_before(line, true)
    }

    /// Computes the state after `line` if it is not cached yet, blocking until it is done
    pub fn create_state_after(&self, line: usize) -> Option<Arc<SymbolicState>> {
        self.scheduler().as_ref()?.create_after(line)
    }

    pub fn create_state_before(&self, line: usize) -> Option<Arc<SymbolicState>> {
        self.scheduler().as_ref()?.create_before(line)
    }

    /// Blocks until the background worker has nothing left to do
    pub fn wait_idle(&self) {
        if let Some(scheduler) = self.scheduler().as_ref() {
            scheduler.wait_idle();
        }
    }

    /// The state that holds right before `line` runs, as far as the cache-facing queries see it:
    /// the state after the previous line, or the entry state for the first line.
    fn state_reaching(&self, line: usize) -> Option<Arc<SymbolicState>> {
        match line.checked_sub(1) {
            Some(previous) => self.create_state_after(previous),
            None => self.create_state_before(0),
        }
    }

    fn instruction(&self, line_text: &str) -> Option<Instruction> {
        let parsed = parse_line(line_text);
        instantiate(&parsed, &self.config.parameters())?
            .instruction()
            .cloned()
    }

    /// Classifies a line without simulating anything. `None` when disabled.
    pub fn syntax_errors(&self, line_text: &str) -> Option<SyntaxInfo> {
        if !self.is_enabled() {
            return None;
        }
        let parsed = parse_line(line_text);
        let info = match instantiate(&parsed, &self.config.parameters()) {
            None => SyntaxInfo {
                is_implemented: false,
                mnemonic: Mnemonic::None,
                message: None,
            },
            Some(op) => SyntaxInfo {
                is_implemented: op.instruction().is_some() || op.syntax_error().is_some(),
                mnemonic: op.mnemonic(),
                message: op.syntax_error().map(str::to_string),
            },
        };
        Some(info)
    }

    /// Names every register and flag the instruction on `line_text` reads while it is undefined,
    /// e.g. `"Flag CF is undefined; Register ebx has undefined content"`. Empty when there is
    /// nothing to report or no state is available.
    pub fn undefined_usage_warnings(&self, line_text: &str, line: usize) -> String {
        if !self.is_enabled() {
            return String::new();
        }
        let Some(instr) = self.instruction(line_text) else {
            return String::new();
        };
        let model = self.model();
        let Some(last) = model.last_line() else {
            return String::new();
        };
        let liveness = LivenessConfig::compute(&model, 0, last);
        let Some(state) = self.state_reaching(line) else {
            return String::new();
        };

        let mut warnings = Vec::new();
        for flag in instr.flags_read_static().iter() {
            if liveness.is_flag_on(flag) && state.flag(flag).is_undefined() {
                warnings.push(format!("Flag {flag} is undefined"));
            }
        }
        for gpr in instr.regs_read_static().iter() {
            if !liveness.is_reg_on(gpr) {
                continue;
            }
            let reg = spelled_register(&instr, gpr).unwrap_or_else(|| gpr.widest(instr.mode));
            if state.has_undefined(reg) {
                warnings.push(format!("Register {reg} has undefined content"));
            }
        }
        warnings.join("; ")
    }

    /// `"Instruction has no effect"` when everything the instruction writes is concrete before
    /// and after it and nothing changed
    pub fn redundant_instruction_warnings(&self, line_text: &str, line: usize) -> String {
        if !self.is_enabled() {
            return String::new();
        }
        let Some(instr) = self.instruction(line_text) else {
            return String::new();
        };
        let regs = instr.regs_written_static();
        let flags = instr.flags_written_static();
        if regs.is_empty() && flags.is_empty() {
            return String::new();
        }
        let (Some(before), Some(after)) =
            (self.create_state_before(line), self.create_state_after(line))
        else {
            return String::new();
        };
        let regs_unchanged = regs.iter().all(|gpr| unchanged_gpr(&before, &after, gpr));
        let flags_unchanged = flags.iter().all(|flag| unchanged_flag(&before, &after, flag));
        if regs_unchanged && flags_unchanged {
            "Instruction has no effect".to_string()
        } else {
            String::new()
        }
    }

    /// Renders a register by name in the given state. Empty when disabled, when the name is
    /// not a register, or when there is no state.
    pub fn format_register(&self, name: &str, state: Option<&SymbolicState>) -> String {
        if !self.is_enabled() {
            return String::new();
        }
        match Register::parse(name) {
            Some(reg) => display::format_register(reg, state),
            None => String::new(),
        }
    }
}

/// The register as the instruction spells it, so warnings use the user's names
fn spelled_register(instr: &Instruction, gpr: Gpr) -> Option<Register> {
    instr
        .operands
        .iter()
        .flat_map(|op| match op {
            Operand::Reg(r) => vec![*r],
            Operand::Mem(m) => m.base.iter().chain(m.index.iter()).copied().collect(),
            Operand::Imm(_) | Operand::Label(_) => vec![],
        })
        .find(|r| r.full() == gpr)
}

fn unchanged_gpr(before: &SymbolicState, after: &SymbolicState, gpr: Gpr) -> bool {
    let (b, a) = (before.gpr_bits(gpr), after.gpr_bits(gpr));
    b.iter().all(|bit| bit.is_concrete()) && b == a
}

fn unchanged_flag(before: &SymbolicState, after: &SymbolicState, flag: Flag) -> bool {
    let (b, a) = (before.flag(flag), after.flag(flag));
    b.is_concrete() && b == a
}
