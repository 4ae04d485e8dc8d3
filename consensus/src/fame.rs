//! Virtual voting
//!
//! Witnesses of later rounds vote on the fame of earlier witnesses. Votes are
//! never transmitted: every node derives them from the graph it holds.

use crate::graph::{EventId, Fame, Graph};
use crate::round::RoundTable;
use hashweave_core::{UndecidedFameTimeout, Weight};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Weighted yes/no count of a voter's strongly seen witnesses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub yes: Weight,
    pub no: Weight,
}

impl Tally {
    /// Majority value, ties count as yes
    pub fn majority(&self) -> bool {
        self.yes >= self.no
    }

    /// Weight behind the majority value
    pub fn strength(&self) -> Weight {
        self.yes.max(self.no)
    }
}

/// Fame decider with memoized votes
pub struct FameDecider {
    coin_round_frequency: u64,
    /// `(voter, candidate) -> vote`
    votes: HashMap<(EventId, EventId), bool>,
    /// Witnesses of the previous round each voter strongly sees
    strongly_seen: HashMap<EventId, Vec<EventId>>,
}

impl FameDecider {
    pub fn new(coin_round_frequency: u64) -> Self {
        Self {
            coin_round_frequency,
            votes: HashMap::new(),
            strongly_seen: HashMap::new(),
        }
    }

    /// Decide every witness from `from_round` on that the graph now allows.
    ///
    /// Returns the new decisions; the caller records them on the graph.
    pub fn decide(
        &mut self,
        graph: &Graph,
        rounds: &RoundTable,
        from_round: u64,
    ) -> Vec<(EventId, bool)> {
        let participants = graph.participants().clone();
        let last_round = rounds.len() as u64;
        let mut decisions = Vec::new();

        for round in from_round..last_round {
            for &candidate in rounds.witnesses(round) {
                if graph.node(candidate).fame().is_decided() {
                    continue;
                }

                'voting: for voting_round in round + 2..last_round {
                    // Coin rounds never decide
                    if (voting_round - round) % self.coin_round_frequency == 0 {
                        continue;
                    }
                    for &voter in rounds.witnesses(voting_round) {
                        let tally = self.tally(graph, rounds, voter, candidate);
                        if participants.is_supermajority(tally.strength()) {
                            debug!(
                                "Witness {} of round {} decided {} at round {}",
                                graph.node(candidate).hash(),
                                round,
                                if tally.majority() { "famous" } else { "not famous" },
                                voting_round
                            );
                            decisions.push((candidate, tally.majority()));
                            break 'voting;
                        }
                    }
                }
            }
        }

        if !decisions.is_empty() {
            self.votes
                .retain(|(_, candidate), _| !decisions.iter().any(|(d, _)| d == candidate));
        }
        decisions
    }

    /// Vote of witness `voter` on the fame of witness `candidate`
    pub fn vote(
        &mut self,
        graph: &Graph,
        rounds: &RoundTable,
        voter: EventId,
        candidate: EventId,
    ) -> bool {
        if let Some(&vote) = self.votes.get(&(voter, candidate)) {
            return vote;
        }

        let round = graph.node(candidate).round();
        let voting_round = graph.node(voter).round();
        debug_assert!(voting_round > round);
        let distance = voting_round - round;

        let vote = if distance == 1 {
            graph.sees(voter, candidate)
        } else {
            let tally = self.tally(graph, rounds, voter, candidate);
            self.carried_vote(graph, tally, round, voting_round)
                .unwrap_or_else(|timeout| {
                    trace!("{}, flipping coin", timeout);
                    graph.node(voter).event().signature.middle_bit()
                })
        };

        self.votes.insert((voter, candidate), vote);
        vote
    }

    fn carried_vote(
        &self,
        graph: &Graph,
        tally: Tally,
        round: u64,
        voting_round: u64,
    ) -> Result<bool, UndecidedFameTimeout> {
        let coin_round = (voting_round - round) % self.coin_round_frequency == 0;
        if coin_round && !graph.participants().is_supermajority(tally.strength()) {
            return Err(UndecidedFameTimeout {
                round,
                voting_round,
            });
        }
        Ok(tally.majority())
    }

    /// Collect the votes on `candidate` of the witnesses `voter` strongly sees
    pub fn tally(
        &mut self,
        graph: &Graph,
        rounds: &RoundTable,
        voter: EventId,
        candidate: EventId,
    ) -> Tally {
        let mut tally = Tally::default();
        for witness in self.strongly_seen(graph, rounds, voter) {
            let weight = graph.participants().weight(graph.node(witness).creator());
            if self.vote(graph, rounds, witness, candidate) {
                tally.yes += weight;
            } else {
                tally.no += weight;
            }
        }
        tally
    }

    fn strongly_seen(&mut self, graph: &Graph, rounds: &RoundTable, voter: EventId) -> Vec<EventId> {
        if let Some(cached) = self.strongly_seen.get(&voter) {
            return cached.clone();
        }
        let round = graph.node(voter).round();
        let seen: Vec<EventId> = match round.checked_sub(1) {
            Some(previous) => rounds
                .witnesses(previous)
                .iter()
                .copied()
                .filter(|&w| graph.strongly_sees(voter, w))
                .collect(),
            None => Vec::new(),
        };
        self.strongly_seen.insert(voter, seen.clone());
        seen
    }

    /// Drop caches of voters that can no longer vote on an undecided round
    pub fn prune(&mut self, graph: &Graph, first_undecided: u64) {
        self.strongly_seen
            .retain(|voter, _| graph.node(*voter).round() > first_undecided);
    }

    pub fn cached_votes(&self) -> usize {
        self.votes.len()
    }
}

impl Graph {
    /// Record a fame decision; decisions are final
    pub(crate) fn set_fame(&mut self, id: EventId, famous: bool) {
        let node = self.node_mut(id);
        if node.fame.is_decided() {
            return;
        }
        node.fame = if famous { Fame::Famous } else { Fame::NotFamous };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally() {
        let tally = Tally { yes: 2, no: 2 };
        assert!(tally.majority());
        assert_eq!(tally.strength(), 2);

        let tally = Tally { yes: 1, no: 3 };
        assert!(!tally.majority());
        assert_eq!(tally.strength(), 3);
    }

    #[test]
    fn test_coin_round_without_supermajority_times_out() {
        use crate::graph::tests::{graph_for, keys};

        let graph = graph_for(&keys(4));
        let decider = FameDecider::new(2);
        let split = Tally { yes: 1, no: 1 };

        assert_eq!(
            decider.carried_vote(&graph, split, 0, 2),
            Err(UndecidedFameTimeout {
                round: 0,
                voting_round: 2
            })
        );
        assert_eq!(decider.carried_vote(&graph, split, 0, 3), Ok(true));

        let strong = Tally { yes: 0, no: 3 };
        assert_eq!(decider.carried_vote(&graph, strong, 0, 2), Ok(false));
        assert_eq!(decider.carried_vote(&graph, strong, 1, 5), Ok(false));
    }

    #[test]
    fn test_set_fame_is_final() {
        use crate::graph::tests::{graph_for, initial, keys};

        let keys = keys(1);
        let mut graph = graph_for(&keys);
        let id = graph.insert(initial(&keys[0], 0)).unwrap().id;

        assert_eq!(graph.node(id).fame(), Fame::Undecided);
        graph.set_fame(id, true);
        graph.set_fame(id, false);
        assert_eq!(graph.node(id).fame(), Fame::Famous);
    }
}
