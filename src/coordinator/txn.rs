use thiserror::Error;

use crate::model::{Operation, TxId};
use crate::protocol::ErrorKind;
use crate::topology::{NodeId, NodeInfo};

/// Lifecycle of a coordinator-driven transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Preparing,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TxState {
    pub fn can_advance(self, next: TxState) -> bool {
        use TxState::*;
        matches!(
            (self, next),
            (Preparing, Committing)
                | (Preparing, Aborting)
                | (Committing, Committed)
                | (Aborting, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Committed | TxState::Aborted)
    }
}

/// A participant's answer to PREPARE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vote {
    Ready,
    Refused { kind: ErrorKind, message: String },
    /// No answer: connection failure or PREPARE timeout
    Unreachable,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("transaction {tx_id} cannot move from {from:?} to {to:?}")]
pub struct IllegalTransition {
    pub tx_id: TxId,
    pub from: TxState,
    pub to: TxState,
}

/// Outcome of the voting round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Commit,
    /// Abort, carrying the vote that caused it
    Abort(Vote),
}

/// Bookkeeping of one transaction between its first PREPARE and the end of
/// its decision round.
#[derive(Debug, Clone)]
pub struct InFlightTx {
    pub tx_id: TxId,
    pub operation: Operation,
    pub participants: Vec<NodeInfo>,
    votes: Vec<(NodeId, Vote)>,
    state: TxState,
}

impl InFlightTx {
    pub fn new(tx_id: TxId, operation: Operation, participants: Vec<NodeInfo>) -> Self {
        Self {
            tx_id,
            operation,
            participants,
            votes: Vec::new(),
            state: TxState::Preparing,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn advance(&mut self, next: TxState) -> Result<(), IllegalTransition> {
        if !self.state.can_advance(next) {
            return Err(IllegalTransition {
                tx_id: self.tx_id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn record_vote(&mut self, node: NodeId, vote: Vote) {
        match self.votes.iter_mut().find(|(id, _)| *id == node) {
            Some((_, slot)) => *slot = vote,
            None => self.votes.push((node, vote)),
        }
    }

    pub fn vote(&self, node: NodeId) -> Option<&Vote> {
        self.votes.iter().find(|(id, _)| *id == node).map(|(_, v)| v)
    }

    /// Commit only when every participant voted READY. Otherwise the first
    /// explicit refusal in participant order is the cause, then a missing vote.
    pub fn decision(&self) -> Decision {
        let votes: Vec<Vote> = self
            .participants
            .iter()
            .map(|node| self.vote(node.id).cloned().unwrap_or(Vote::Unreachable))
            .collect();

        if votes.iter().all(|v| *v == Vote::Ready) {
            return Decision::Commit;
        }
        let cause = votes
            .iter()
            .find(|v| matches!(v, Vote::Refused { .. }))
            .cloned()
            .unwrap_or(Vote::Unreachable);
        Decision::Abort(cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;

    // test utils

    fn node(id: NodeId) -> NodeInfo {
        NodeInfo {
            id,
            host: "127.0.0.1".to_string(),
            port: 7000 + id as u16,
            data: None,
        }
    }

    fn in_flight(nodes: &[NodeId]) -> InFlightTx {
        InFlightTx::new(
            TxId::from("tx_test"),
            Operation::Transfer {
                from: 1,
                to: 2,
                amount: Amount::from_scaled(100),
            },
            nodes.iter().map(|&id| node(id)).collect(),
        )
    }

    fn refused(message: &str) -> Vote {
        Vote::Refused {
            kind: ErrorKind::Conflict,
            message: message.to_string(),
        }
    }

    #[test]
    fn legal_paths_reach_terminal_states() {
        let mut tx = in_flight(&[1]);
        tx.advance(TxState::Committing).unwrap();
        tx.advance(TxState::Committed).unwrap();
        assert!(tx.state().is_terminal());

        let mut tx = in_flight(&[1]);
        tx.advance(TxState::Aborting).unwrap();
        tx.advance(TxState::Aborted).unwrap();
        assert!(tx.state().is_terminal());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut tx = in_flight(&[1]);
        assert!(tx.advance(TxState::Committed).is_err());

        tx.advance(TxState::Committing).unwrap();
        let err = tx.advance(TxState::Aborting).unwrap_err();
        assert_eq!(err.from, TxState::Committing);
        assert_eq!(err.to, TxState::Aborting);
        assert_eq!(tx.state(), TxState::Committing);
    }

    #[test]
    fn all_ready_commits() {
        let mut tx = in_flight(&[1, 2]);
        tx.record_vote(1, Vote::Ready);
        tx.record_vote(2, Vote::Ready);
        assert_eq!(tx.decision(), Decision::Commit);
    }

    #[test]
    fn missing_vote_aborts() {
        let mut tx = in_flight(&[1, 2]);
        tx.record_vote(1, Vote::Ready);
        assert_eq!(tx.decision(), Decision::Abort(Vote::Unreachable));
    }

    #[test]
    fn refusal_wins_over_unreachable() {
        let mut tx = in_flight(&[1, 2, 3]);
        tx.record_vote(1, Vote::Unreachable);
        tx.record_vote(2, refused("insufficient funds"));
        tx.record_vote(3, Vote::Ready);
        assert_eq!(tx.decision(), Decision::Abort(refused("insufficient funds")));
    }

    #[test]
    fn later_vote_replaces_earlier_one() {
        let mut tx = in_flight(&[1]);
        tx.record_vote(1, Vote::Unreachable);
        tx.record_vote(1, Vote::Ready);
        assert_eq!(tx.vote(1), Some(&Vote::Ready));
        assert_eq!(tx.decision(), Decision::Commit);
    }
}
