use crate::state::Position;
use std::collections::{HashSet, VecDeque};

/// Lines waiting for a background computation, in request order, each at most once
#[derive(Debug, Default)]
pub struct PendingQueue {
    order: VecDeque<usize>,
    members: HashSet<usize>,
}

impl PendingQueue {
    /// Returns `false` if the line was already pending
    pub fn push(&mut self, line: usize) -> bool {
        if !self.members.insert(line) {
            return false;
        }
        self.order.push_back(line);
        true
    }

    pub fn pop(&mut self) -> Option<usize> {
        let line = self.order.pop_front()?;
        self.members.remove(&line);
        Some(line)
    }

    pub fn remove(&mut self, line: usize) -> bool {
        if !self.members.remove(&line) {
            return false;
        }
        self.order.retain(|l| *l != line);
        true
    }

    pub fn contains(&self, line: usize) -> bool {
        self.members.contains(&line)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn lines(&self) -> Vec<usize> {
        self.order.iter().copied().collect()
    }
}

/// Everything the worker thread and the request side share about outstanding work
#[derive(Debug, Default)]
pub(crate) struct PendingWork {
    pub(crate) after: PendingQueue,
    pub(crate) before: PendingQueue,
    /// The worker has dequeued a line and not finished it yet
    pub(crate) in_flight: bool,
    pub(crate) shutdown: bool,
}

impl PendingWork {
    pub(crate) fn queue(&mut self, which: Position) -> &mut PendingQueue {
        match which {
            Position::Before => &mut self.before,
            Position::After => &mut self.after,
        }
    }

    /// "After" requests are served first, each queue in request order
    pub(crate) fn next(&mut self) -> Option<(usize, Position)> {
        if let Some(line) = self.after.pop() {
            return Some((line, Position::After));
        }
        self.before.pop().map(|line| (line, Position::Before))
    }

    pub(crate) fn has_work(&self) -> bool {
        !self.after.is_empty() || !self.before.is_empty()
    }

    pub(crate) fn is_idle(&self) -> bool {
        !self.has_work() && !self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo_without_duplicates() {
        let mut q = PendingQueue::default();
        assert!(q.push(7));
        assert!(q.push(5));
        assert!(!q.push(7));
        assert_eq!(q.lines(), vec![7, 5]);
        assert_eq!(q.pop(), Some(7));
        assert!(q.push(7));
        assert_eq!(q.lines(), vec![5, 7]);
    }

    #[test]
    fn remove_drops_membership() {
        let mut q = PendingQueue::default();
        q.push(1);
        q.push(2);
        assert!(q.remove(1));
        assert!(!q.remove(1));
        assert!(!q.contains(1));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn after_requests_go_first() {
        let mut work = PendingWork::default();
        work.queue(Position::Before).push(1);
        work.queue(Position::After).push(2);
        assert_eq!(work.next(), Some((2, Position::After)));
        assert_eq!(work.next(), Some((1, Position::Before)));
        assert_eq!(work.next(), None);
        assert!(work.is_idle());
    }
}
