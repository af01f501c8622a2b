use super::*;
use asmsim_isa::{Flag, Gpr, Parameters, Register};

fn reg(name: &str) -> Register {
    Register::parse(name).unwrap()
}

fn model(text: &str) -> ControlFlowModel {
    ControlFlowModel::from_source(text, Parameters::default())
}

fn run_with(
    model: &ControlFlowModel,
    target: usize,
    steps: usize,
    position: Position,
) -> Option<SymbolicState> {
    let config = LivenessConfig::compute(model, 0, model.last_line().unwrap());
    let mut engine = BoundedExecutionEngine::new(&SimulatorConfig::default());
    engine
        .run_backward(model, target, steps, &config, position)
        .unwrap()
}

fn after(text: &str, target: usize) -> SymbolicState {
    run_with(&model(text), target, 8, Position::After).unwrap()
}

const SCENARIO: &str = "mov eax, 1\nadd eax, ebx\nmov ecx, eax";

#[test]
fn literal_assignment_is_concrete() {
    let state = after(SCENARIO, 0);
    assert_eq!(state.line(), 0);
    assert_eq!(state.position(), Position::After);
    assert_eq!(state.concrete_value(reg("rax")), Some(1));
    assert!(state.gpr_bits(Gpr::Rbx).iter().all(BitValue::is_undefined));
    // untracked
    assert!(state.gpr_bits(Gpr::Rdx).iter().all(BitValue::is_undefined));
}

#[test]
fn undefined_content_propagates() {
    let m = model(SCENARIO);
    let after_add = run_with(&m, 1, 4, Position::After).unwrap();
    let after_copy = run_with(&m, 2, 4, Position::After).unwrap();
    assert!(after_add.has_undefined(reg("eax")));
    assert_eq!(after_copy.gpr_bits(Gpr::Rcx), after_add.gpr_bits(Gpr::Rax));
    assert!(!after_copy.is_concrete(reg("ecx")));
    // the upper half is cleared by the dword write
    assert_eq!(after_copy.bit(Gpr::Rcx, 63), Some(BitValue::Zero));
    assert!(after_add.flag(Flag::CF).is_undefined());
}

#[test]
fn before_position_skips_the_target() {
    let m = model("mov eax, 1\nmov ebx, eax");
    let before = run_with(&m, 1, 4, Position::Before).unwrap();
    assert_eq!(before.position(), Position::Before);
    assert_eq!(before.concrete_value(reg("eax")), Some(1));
    assert!(before.has_undefined(reg("ebx")));

    let entry = run_with(&m, 0, 4, Position::Before).unwrap();
    assert!(entry.has_undefined(reg("eax")));
}

#[test]
fn same_literal_on_every_path() {
    let text = "jz skip\nmov eax, 5\njmp done\nskip:\nmov eax, 5\ndone:\nnop";
    let state = after(text, 6);
    assert_eq!(state.paths(), 2);
    assert_eq!(state.concrete_value(reg("eax")), Some(5));
}

#[test]
fn different_literals_join_to_unknown() {
    let text = "jz skip\nmov eax, 5\njmp done\nskip:\nmov eax, 4\ndone:\nnop";
    let state = after(text, 6);
    assert_eq!(state.bit(Gpr::Rax, 0), Some(BitValue::Unknown));
    assert_eq!(state.bit(Gpr::Rax, 1), Some(BitValue::Zero));
    assert_eq!(state.bit(Gpr::Rax, 2), Some(BitValue::One));
}

#[test]
fn infeasible_paths_are_skipped() {
    let text = "mov eax, 0\ncmp eax, 0\njne skip\nmov ebx, 1\nskip:\nnop";
    let state = after(text, 5);
    assert_eq!(state.paths(), 1);
    assert_eq!(state.concrete_value(reg("ebx")), Some(1));
}

#[test]
fn no_feasible_path_is_inconsistent() {
    let text = "xor eax, eax\njnz out\nret\nout:\nnop";
    let state = after(text, 4);
    assert_eq!(state.paths(), 0);
    assert_eq!(state.bit(Gpr::Rax, 0), Some(BitValue::Inconsistent));
    assert_eq!(state.flag(Flag::CF), BitValue::Inconsistent);
    assert_eq!(state.bit(Gpr::Rbx, 0), Some(BitValue::Undefined));
    assert_eq!(state.concrete_value(reg("eax")), None);
}

#[test]
fn loop_exit_forces_the_counter() {
    let text = "mov ecx, 4\ntop:\ndec ecx\njnz top\nnop";
    let state = run_with(&model(text), 4, 4, Position::After).unwrap();
    assert_eq!(state.concrete_value(reg("rcx")), Some(0));
    assert_eq!(state.flag(Flag::ZF), BitValue::One);
}

#[test]
fn memory_is_unknown_not_undefined() {
    let state = after("mov rsp, 0x1000\nmov eax, [rsp]", 1);
    assert_eq!(state.bit(Gpr::Rax, 0), Some(BitValue::Unknown));
    assert_eq!(state.bit(Gpr::Rax, 40), Some(BitValue::Zero));

    let state = after("rdrand eax", 0);
    assert_eq!(state.bit(Gpr::Rax, 3), Some(BitValue::Unknown));
    assert_eq!(state.flag(Flag::ZF), BitValue::Zero);

    let state = after("xor eax, eax", 0);
    assert_eq!(state.flag(Flag::AF), BitValue::Undefined);
    assert_eq!(state.flag(Flag::ZF), BitValue::One);
}

#[test]
fn window_bounds_the_lookback() {
    let text = "mov eax, 1\nnop\nnop\nnop\nnop\nnop";
    let m = model(text);
    let short = run_with(&m, 5, 4, Position::After).unwrap();
    assert!(short.has_undefined(reg("eax")));
    let long = run_with(&m, 5, 5, Position::After).unwrap();
    assert_eq!(long.concrete_value(reg("eax")), Some(1));
}

#[test]
fn untracked_registers_skip_the_solver() {
    let m = model("mov eax, 1\nmov ebx, 2");
    let config = LivenessConfig::new([Gpr::Rax].into_iter().collect(), Default::default());
    let mut engine = BoundedExecutionEngine::new(&SimulatorConfig::default());
    let state = engine
        .run_backward(&m, 1, 4, &config, Position::After)
        .unwrap()
        .unwrap();
    assert_eq!(state.concrete_value(reg("eax")), Some(1));
    assert!(state.has_undefined(reg("ebx")));
    assert!(state.flag(Flag::CF).is_undefined());
    assert_eq!(engine.runs(), 1);
}

#[test]
fn out_of_range_and_unreachable_targets() {
    let m = model("nop\nret\nmov eax, 1");
    assert!(run_with(&m, 9, 4, Position::After).is_none());
    assert!(run_with(&m, 2, 4, Position::After).is_none());
}

#[test]
fn versions_follow_the_model() {
    let mut m = model(SCENARIO);
    m.update("mov eax, 2\nadd eax, ebx\nmov ecx, eax");
    let state = run_with(&m, 0, 4, Position::After).unwrap();
    assert_eq!(state.version(), m.version());
    assert_eq!(state.concrete_value(reg("eax")), Some(2));
}

#[test]
fn solver_panics_become_faults() {
    let m = model(SCENARIO);
    let config = LivenessConfig::compute(&m, 0, 2);
    let mut engine = BoundedExecutionEngine::new(&SimulatorConfig::default());
    engine.fail_next_run();
    let result = engine.run_backward(&m, 2, 4, &config, Position::After);
    match result {
        Err(AsmSimError::SolverFault(message)) => assert!(message.contains("injected")),
        other => panic!("expected a solver fault, got {other:?}"),
    }
    // the engine stays usable afterwards
    let state = engine
        .run_backward(&m, 0, 4, &config, Position::After)
        .unwrap()
        .unwrap();
    assert_eq!(state.concrete_value(reg("eax")), Some(1));
    assert_eq!(engine.runs(), 2);
}
