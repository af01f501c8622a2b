use asmsim_isa::{
    Instruction, IsaError, Mnemonic, Opcode, Parameters, ParsedLine, instantiate, parse_line,
};
use itertools::Itertools;
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::prelude::DiGraph;
use std::collections::HashMap;

/// How control reaches a successor line
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Flow {
    Fallthrough,
    Taken,
}

/// One line of source as the simulator sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub parsed: ParsedLine,
    /// `None` for blank lines, bare labels and anything without a recognized mnemonic
    pub opcode: Option<Opcode>,
}

impl SourceLine {
    pub fn instruction(&self) -> Option<&Instruction> {
        self.opcode.as_ref().and_then(Opcode::instruction)
    }
}

/// What a line means to the simulator: its label and the opcode it instantiates to
type LineKey = (Option<String>, Option<Opcode>);

/// The instruction sequence of one source buffer together with its control flow.
///
/// Node `i` of the graph is line `i`. Lines that cannot be executed (unknown, unmodeled or
/// malformed) are kept as no-op placeholders that fall through to the next line.
#[derive(Debug, Clone)]
pub struct ControlFlowModel {
    params: Parameters,
    lines: Vec<SourceLine>,
    keys: Vec<LineKey>,
    graph: DiGraph<usize, Flow>,
    version: u64,
}

impl ControlFlowModel {
    pub fn new(params: Parameters) -> Self {
        Self {
            params,
            lines: Vec::new(),
            keys: Vec::new(),
            graph: DiGraph::new(),
            version: 0,
        }
    }

    pub fn from_source(text: &str, params: Parameters) -> Self {
        let mut model = Self::new(params);
        model.update(text);
        model
    }

    /// Re-reads the whole buffer. Returns whether anything changed that could affect a
    /// simulation result; edits to whitespace or comments do not.
    pub fn update(&mut self, text: &str) -> bool {
        let parsed: Vec<ParsedLine> = text.lines().map(parse_line).collect();
        let opcodes: Vec<Option<Opcode>> = parsed
            .iter()
            .map(|p| instantiate(p, &self.params))
            .collect();
        let keys: Vec<LineKey> = parsed
            .iter()
            .zip(&opcodes)
            .map(|(p, op)| (p.label.clone(), op.clone()))
            .collect();
        if keys == self.keys && self.version != 0 {
            return false;
        }
        self.keys = keys;
        self.rebuild(parsed, opcodes);
        self.version += 1;
        tracing::debug!(
            "control flow model now at version {} with {} lines",
            self.version,
            self.lines.len()
        );
        true
    }

    fn rebuild(&mut self, parsed: Vec<ParsedLine>, opcodes: Vec<Option<Opcode>>) {
        let labels: HashMap<String, usize> = parsed
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.label.clone().map(|l| (l, i)))
            .collect();
        self.lines = parsed
            .into_iter()
            .zip(opcodes)
            .map(|(parsed, opcode)| SourceLine {
                parsed,
                opcode: opcode.map(|op| check_target(op, &labels)),
            })
            .collect();

        let mut graph = DiGraph::with_capacity(self.lines.len(), self.lines.len());
        for i in 0..self.lines.len() {
            graph.add_node(i);
        }
        for (i, line) in self.lines.iter().enumerate() {
            let from = NodeIndex::new(i);
            let next = (i + 1 < self.lines.len()).then_some(i + 1);
            let target = line
                .instruction()
                .and_then(Instruction::jump_target)
                .and_then(|l| labels.get(l).copied());
            let fallthrough = match &line.opcode {
                Some(Opcode::Modeled(instr)) => instr.mnemonic != Mnemonic::Jmp,
                Some(Opcode::NotImplemented(m)) => !m.ends_flow(),
                _ => true,
            };
            if fallthrough {
                if let Some(next) = next {
                    graph.add_edge(from, NodeIndex::new(next), Flow::Fallthrough);
                }
            }
            if let Some(target) = target {
                if !(fallthrough && Some(target) == next) {
                    graph.add_edge(from, NodeIndex::new(target), Flow::Taken);
                }
            }
        }
        self.graph = graph;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn last_line(&self) -> Option<usize> {
        self.lines.len().checked_sub(1)
    }

    pub fn line(&self, i: usize) -> Option<&SourceLine> {
        self.lines.get(i)
    }

    /// The executable instruction on line `i`, if there is one
    pub fn instruction(&self, i: usize) -> Option<&Instruction> {
        self.lines.get(i).and_then(SourceLine::instruction)
    }

    pub fn successors(&self, i: usize) -> Vec<usize> {
        self.neighbors(i, Direction::Outgoing)
    }

    pub fn predecessors(&self, i: usize) -> Vec<usize> {
        self.neighbors(i, Direction::Incoming)
    }

    fn neighbors(&self, i: usize, dir: Direction) -> Vec<usize> {
        if i >= self.lines.len() {
            return Vec::new();
        }
        self.graph
            .neighbors_directed(NodeIndex::new(i), dir)
            .map(|n| n.index())
            .sorted()
            .dedup()
            .collect()
    }

    /// How control gets from line `from` to line `to`, if it can
    pub fn flow(&self, from: usize, to: usize) -> Option<Flow> {
        let edge = self
            .graph
            .find_edge(NodeIndex::new(from), NodeIndex::new(to))?;
        self.graph.edge_weight(edge).copied()
    }
}

fn check_target(opcode: Opcode, labels: &HashMap<String, usize>) -> Opcode {
    let Opcode::Modeled(instr) = opcode else {
        return opcode;
    };
    match instr.jump_target() {
        Some(label) if !labels.contains_key(label) => Opcode::Malformed {
            mnemonic: instr.mnemonic,
            message: IsaError::UnknownLabel(label.to_string()).to_string(),
        },
        _ => Opcode::Modeled(instr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOOP: &str = "\
        mov ecx, 4
top:
        dec ecx
        jnz top
        ret
        mov eax, 1";

    fn model(text: &str) -> ControlFlowModel {
        ControlFlowModel::from_source(text, Parameters::default())
    }

    #[test]
    fn straight_line_flow() {
        let m = model("mov eax, 1\nadd eax, ebx\nmov ecx, eax");
        assert_eq!(m.line_count(), 3);
        assert_eq!(m.last_line(), Some(2));
        assert_eq!(m.successors(0), vec![1]);
        assert_eq!(m.predecessors(2), vec![1]);
        assert!(m.predecessors(0).is_empty());
        assert!(m.successors(2).is_empty());
    }

    #[test]
    fn jumps_and_returns() {
        let m = model(LOOP);
        assert_eq!(m.successors(3), vec![1, 4]);
        assert_eq!(m.flow(3, 1), Some(Flow::Taken));
        assert_eq!(m.flow(3, 4), Some(Flow::Fallthrough));
        assert_eq!(m.predecessors(1), vec![0, 3]);
        // ret ends the flow, so the last line is unreachable
        assert!(m.successors(4).is_empty());
        assert!(m.predecessors(5).is_empty());
    }

    #[test]
    fn unknown_labels_are_malformed() {
        let m = model("jmp nowhere\nnop");
        let line = m.line(0).unwrap();
        assert!(matches!(line.opcode, Some(Opcode::Malformed { .. })));
        assert_eq!(m.successors(0), vec![1]);
    }

    #[test]
    fn update_detects_semantic_changes_only() {
        let mut m = model("mov eax, 1\nadd eax, ebx");
        let v = m.version();
        assert!(!m.update("mov   eax,1\n  add eax, ebx ; sum"));
        assert_eq!(m.version(), v);
        assert!(m.update("mov eax, 2\nadd eax, ebx"));
        assert_eq!(m.version(), v + 1);
        assert!(m.update("mov eax, 2\nadd eax, ebx\nnop"));
    }

    #[test]
    fn whitespace_inside_an_operand_is_a_change() {
        let mut m = model("mov ecx, 12");
        assert!(m.update("mov ecx, 1 2"));
        assert!(matches!(m.line(0).unwrap().opcode, Some(Opcode::Malformed { .. })));
        assert!(m.update("mov ecx, 12"));
        assert!(m.instruction(0).is_some());

        let mut m = model("mov eax, dword ptr [rbx]");
        assert!(m.update("mov eax, dwordptr [rbx]"));
        assert!(m.instruction(0).is_none());
    }

    #[test]
    fn label_edits_are_changes() {
        let mut m = model("top:\njmp top");
        assert!(m.update("top2:\njmp top"));
        assert!(matches!(m.line(1).unwrap().opcode, Some(Opcode::Malformed { .. })));
    }

    #[test]
    fn empty_models() {
        let mut m = ControlFlowModel::new(Parameters::default());
        assert_eq!(m.last_line(), None);
        assert!(m.update(""));
        assert_eq!(m.version(), 1);
        assert!(!m.update(""));
        assert!(m.successors(3).is_empty());
    }
}
