use crate::cfg::ControlFlowModel;

#[derive(Debug, Clone, Copy)]
struct TreeNode {
    line: usize,
    parent: Option<usize>,
}

/// Every way of reaching a target line within a bounded number of steps, rooted at the target.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTree {
    nodes: Vec<TreeNode>,
    leaves: Vec<usize>,
    truncated: bool,
}

impl ExecutionTree {
    /// Expands predecessors of `target` breadth first. Line 0 is a program entry and always
    /// ends a path (its predecessors are still explored); a line without predecessors is
    /// unreachable and dropped; nodes `max_steps` away from the target end a path.
    pub fn build(
        model: &ControlFlowModel,
        target: usize,
        max_steps: usize,
        max_paths: usize,
    ) -> Self {
        let mut tree = Self::default();
        if target >= model.line_count() {
            return tree;
        }
        tree.nodes.push(TreeNode {
            line: target,
            parent: None,
        });
        let mut frontier = vec![0usize];
        for depth in 0..=max_steps {
            let mut next = Vec::new();
            for idx in frontier {
                let line = tree.nodes[idx].line;
                let preds = model.predecessors(line);
                if line == 0 || depth == max_steps {
                    tree.leaves.push(idx);
                }
                if depth == max_steps {
                    continue;
                }
                for pred in preds {
                    tree.nodes.push(TreeNode {
                        line: pred,
                        parent: Some(idx),
                    });
                    next.push(tree.nodes.len() - 1);
                }
            }
            if tree.leaves.len() + next.len() > max_paths {
                let room = max_paths.saturating_sub(tree.leaves.len());
                next.truncate(room);
                tree.truncated = true;
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        tree.leaves.truncate(max_paths);
        tree
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn path_count(&self) -> usize {
        self.leaves.len()
    }

    /// Paths in execution order, each ending at the target line
    pub fn paths(&self) -> Vec<Vec<usize>> {
        self.leaves
            .iter()
            .map(|&leaf| {
                let mut path = Vec::new();
                let mut current = Some(leaf);
                while let Some(idx) = current {
                    path.push(self.nodes[idx].line);
                    current = self.nodes[idx].parent;
                }
                path
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmsim_isa::Parameters;

    const DIAMOND: &str = "\
jz skip
mov eax, 5
jmp done
skip:
mov eax, 5
done:
nop";

    fn model(text: &str) -> ControlFlowModel {
        ControlFlowModel::from_source(text, Parameters::default())
    }

    fn sorted_paths(tree: &ExecutionTree) -> Vec<Vec<usize>> {
        let mut paths = tree.paths();
        paths.sort();
        paths
    }

    #[test]
    fn straight_line_window() {
        let m = model("mov eax, 1\nadd eax, ebx\nmov ecx, eax");
        let tree = ExecutionTree::build(&m, 2, 4, 64);
        assert_eq!(tree.paths(), vec![vec![0, 1, 2]]);
        let tree = ExecutionTree::build(&m, 2, 1, 64);
        assert_eq!(tree.paths(), vec![vec![1, 2]]);
        let tree = ExecutionTree::build(&m, 0, 4, 64);
        assert_eq!(tree.paths(), vec![vec![0]]);
    }

    #[test]
    fn branches_fan_out() {
        let m = model(DIAMOND);
        let tree = ExecutionTree::build(&m, 6, 8, 64);
        assert_eq!(
            sorted_paths(&tree),
            vec![vec![0, 1, 2, 5, 6], vec![0, 3, 4, 5, 6]]
        );
        assert!(!tree.is_truncated());
    }

    #[test]
    fn loops_end_at_the_bound() {
        let m = model("mov ecx, 4\ntop:\ndec ecx\njnz top\nnop");
        let tree = ExecutionTree::build(&m, 4, 4, 64);
        assert_eq!(
            sorted_paths(&tree),
            vec![vec![0, 1, 2, 3, 4], vec![3, 1, 2, 3, 4]]
        );
    }

    #[test]
    fn unreachable_lines_have_no_paths() {
        let m = model("nop\nret\nmov eax, 1");
        let tree = ExecutionTree::build(&m, 2, 4, 64);
        assert_eq!(tree.path_count(), 0);
        assert_eq!(ExecutionTree::build(&m, 7, 4, 64).path_count(), 0);
    }

    #[test]
    fn path_count_is_capped() {
        let m = model(DIAMOND);
        let tree = ExecutionTree::build(&m, 6, 8, 1);
        assert!(tree.is_truncated());
        assert_eq!(tree.path_count(), 1);
    }
}
