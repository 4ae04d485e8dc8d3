//! Ancestry queries
//!
//! Every event carries a summary propagated from its parents at insertion:
//! the latest event of each creator among its ancestors and the creators
//! whose forks it has observed. Queries answer from those summaries and only
//! fall back to a bounded walk for creators that forked.

use crate::graph::{EventId, Graph};
use std::collections::{BTreeSet, HashSet};

impl Graph {
    /// Compute the summary of a new event from its parents.
    ///
    /// `id` is the handle the event is about to receive.
    pub(crate) fn merge_ancestry(
        &self,
        id: EventId,
        creator: usize,
        self_parent: Option<EventId>,
        other_parent: Option<EventId>,
    ) -> (Vec<Option<EventId>>, BTreeSet<usize>) {
        let n = self.participants().len();
        let mut forks_seen = BTreeSet::new();
        for parent in self_parent.iter().chain(other_parent.iter()) {
            forks_seen.extend(self.node(*parent).forks_seen.iter().copied());
        }

        let mut last_ancestors = vec![None; n];
        for (p, slot) in last_ancestors.iter_mut().enumerate() {
            let from_self = self_parent.and_then(|sp| self.node(sp).last_ancestors[p]);
            let from_other = other_parent.and_then(|op| self.node(op).last_ancestors[p]);

            if p == creator {
                // Reaching an own event that is not on our chain is a fork too
                if let Some(theirs) = from_other {
                    let on_own_chain =
                        self_parent.map_or(false, |sp| self.is_self_ancestor(sp, theirs));
                    if self.is_forker(p) && !on_own_chain {
                        forks_seen.insert(p);
                    }
                }
                *slot = Some(id);
                continue;
            }

            *slot = match (from_self, from_other) {
                (None, None) => None,
                (Some(only), None) | (None, Some(only)) => Some(only),
                (Some(a), Some(b)) => {
                    let (high, low) = if self.chain_key(a) >= self.chain_key(b) {
                        (a, b)
                    } else {
                        (b, a)
                    };
                    if self.is_forker(p)
                        && !forks_seen.contains(&p)
                        && !self.is_self_ancestor(high, low)
                    {
                        forks_seen.insert(p);
                    }
                    Some(high)
                }
            };
        }

        (last_ancestors, forks_seen)
    }

    fn chain_key(&self, id: EventId) -> (u64, hashweave_core::Hash) {
        let node = self.node(id);
        (node.seq(), node.hash())
    }

    /// True if `y` is `x` or lies on `x`'s self-parent chain
    pub fn is_self_ancestor(&self, x: EventId, y: EventId) -> bool {
        let target = self.node(y);
        let start = self.node(x);
        if start.creator() != target.creator() || start.seq() < target.seq() {
            return false;
        }
        if !self.is_forker(target.creator()) {
            return true;
        }

        let mut current = x;
        loop {
            let node = self.node(current);
            if node.seq() == target.seq() {
                return current == y;
            }
            match node.self_parent() {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// True if `y` is reachable from `x` through parent edges, `x` included
    pub fn is_ancestor(&self, x: EventId, y: EventId) -> bool {
        if x == y {
            return true;
        }
        // Arena order is topological
        if x < y {
            return false;
        }

        let creator = self.node(y).creator();
        if !self.node(x).forks_seen.contains(&creator) {
            return self.reaches_through_last(x, y);
        }

        let mut visited = HashSet::new();
        let mut stack = vec![x];
        while let Some(current) = stack.pop() {
            if current == y {
                return true;
            }
            if current < y || !visited.insert(current) {
                continue;
            }
            let node = self.node(current);
            if !node.forks_seen.contains(&creator) {
                if self.reaches_through_last(current, y) {
                    return true;
                }
                continue;
            }
            stack.extend(node.parents());
        }
        false
    }

    fn reaches_through_last(&self, x: EventId, y: EventId) -> bool {
        let creator = self.node(y).creator();
        match self.node(x).last_ancestors[creator] {
            Some(last) => self.is_self_ancestor(last, y),
            None => false,
        }
    }

    /// `y` is an ancestor of `x` and `x` has seen no fork by `y`'s creator
    pub fn sees(&self, x: EventId, y: EventId) -> bool {
        !self.node(x).forks_seen.contains(&self.node(y).creator()) && self.is_ancestor(x, y)
    }

    /// `x` sees `y` through events of creators holding a weighted supermajority
    pub fn strongly_sees(&self, x: EventId, y: EventId) -> bool {
        if !self.sees(x, y) {
            return false;
        }

        let node = self.node(x);
        let participants = self.participants();
        let weight: u64 = node
            .last_ancestors
            .iter()
            .enumerate()
            .filter(|(p, _)| !node.forks_seen.contains(p))
            .filter_map(|(p, last)| last.map(|z| (p, z)))
            .filter(|&(_, z)| self.is_ancestor(z, y))
            .map(|(p, _)| participants.weight(p))
            .sum();

        participants.is_supermajority(weight)
    }

    /// Creators whose forks `x` has observed
    pub fn forks_seen_by(&self, x: EventId) -> impl Iterator<Item = usize> + '_ {
        self.node(x).forks_seen.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use crate::event::Event;
    use crate::graph::tests::{child, graph_for, initial, keys};
    use crate::graph::EventId;

    #[test]
    fn test_ancestry_in_small_graph() {
        let keys = keys(3);
        let mut graph = graph_for(&keys);
        let a0 = initial(&keys[0], 0);
        let b0 = initial(&keys[1], 0);
        let c0 = initial(&keys[2], 0);
        let a1 = child(&keys[0], &a0, &b0, 1);
        let c1 = child(&keys[2], &c0, &a1, 2);

        let ids: Vec<EventId> = [&a0, &b0, &c0, &a1, &c1]
            .iter()
            .map(|e| graph.insert((*e).clone()).unwrap().id)
            .collect();
        let (a0, b0, c0, a1, c1) = (ids[0], ids[1], ids[2], ids[3], ids[4]);

        assert!(graph.is_ancestor(c1, b0));
        assert!(graph.is_ancestor(c1, a0));
        assert!(graph.is_ancestor(c1, c1));
        assert!(!graph.is_ancestor(a1, c0));
        assert!(!graph.is_ancestor(b0, a1));

        assert!(graph.is_self_ancestor(c1, c0));
        assert!(!graph.is_self_ancestor(c1, a1));
        assert!(graph.is_self_ancestor(a1, a0));

        assert!(graph.sees(c1, b0));
        assert!(!graph.sees(a1, c0));
    }

    #[test]
    fn test_strongly_sees_needs_supermajority() {
        let keys = keys(4);
        let mut graph = graph_for(&keys);
        let e0: Vec<Event> = keys.iter().map(|k| initial(k, 0)).collect();
        for e in &e0 {
            graph.insert(e.clone()).unwrap();
        }

        // d1 reaches a0 directly; d2 also through b1
        let b1 = child(&keys[1], &e0[1], &e0[0], 1);
        let d1 = child(&keys[3], &e0[3], &e0[0], 1);
        let d2 = child(&keys[3], &d1, &b1, 2);
        for e in [&b1, &d1, &d2] {
            graph.insert(e.clone()).unwrap();
        }

        let a0 = graph.lookup(&e0[0].hash()).unwrap();
        let d1 = graph.lookup(&d1.hash()).unwrap();
        let d2 = graph.lookup(&d2.hash()).unwrap();

        // Paths through a and d only: 2 of 4
        assert!(graph.sees(d1, a0));
        assert!(!graph.strongly_sees(d1, a0));

        // Through a, b and d: 3 of 4
        assert!(graph.strongly_sees(d2, a0));
    }

    #[test]
    fn test_observer_of_fork_stops_seeing_forker() {
        let keys = keys(3);
        let mut graph = graph_for(&keys);
        let a0 = initial(&keys[0], 0);
        let b0 = initial(&keys[1], 0);
        let c0 = initial(&keys[2], 0);
        for e in [&a0, &b0, &c0] {
            graph.insert(e.clone()).unwrap();
        }

        // a equivocates on a0
        let a1 = child(&keys[0], &a0, &b0, 1);
        let a1_fork = child(&keys[0], &a0, &c0, 1);
        let b1 = child(&keys[1], &b0, &a1, 2);
        let c1 = child(&keys[2], &c0, &a1_fork, 2);
        let b2 = child(&keys[1], &b1, &c1, 3);
        for e in [&a1, &a1_fork, &b1, &c1, &b2] {
            graph.insert(e.clone()).unwrap();
        }

        let id = |e: &Event| graph.lookup(&e.hash()).unwrap();

        // Single-branch observers still see the forker
        assert!(graph.sees(id(&b1), id(&a1)));
        assert!(graph.sees(id(&c1), id(&a1_fork)));

        // b2 has both branches among its ancestors
        assert!(graph.is_ancestor(id(&b2), id(&a1)));
        assert!(graph.is_ancestor(id(&b2), id(&a1_fork)));
        assert!(!graph.sees(id(&b2), id(&a1)));
        assert!(!graph.sees(id(&b2), id(&a0)));
        assert!(graph.sees(id(&b2), id(&c0)));
        assert_eq!(graph.forks_seen_by(id(&b2)).count(), 1);

        // The branches are not self-ancestors of each other
        assert!(!graph.is_self_ancestor(id(&a1_fork), id(&a1)));
        assert!(graph.is_self_ancestor(id(&a1_fork), id(&a0)));
    }

    #[test]
    fn test_ancestry_matches_graph_walk() {
        let keys = keys(4);
        let mut graph = graph_for(&keys);
        let mut heads: Vec<Event> = keys.iter().map(|k| initial(k, 0)).collect();
        for e in &heads {
            graph.insert(e.clone()).unwrap();
        }
        for step in 1..40u64 {
            let i = (step * 7 % 4) as usize;
            let j = ((step * 3 + 1) % 4) as usize;
            if i == j {
                continue;
            }
            let e = child(&keys[i], &heads[i], &heads[j], step);
            graph.insert(e.clone()).unwrap();
            heads[i] = e;
        }

        // Plain reachability by walking parents
        let reach = |x: EventId, y: EventId| {
            let mut stack = vec![x];
            let mut seen = std::collections::HashSet::new();
            while let Some(v) = stack.pop() {
                if v == y {
                    return true;
                }
                if seen.insert(v) {
                    stack.extend(graph.node(v).parents());
                }
            }
            false
        };

        let ids: Vec<EventId> = graph.iter().map(|(id, _)| id).collect();
        for &x in &ids {
            for &y in &ids {
                assert_eq!(graph.is_ancestor(x, y), reach(x, y));
            }
        }
    }
}
