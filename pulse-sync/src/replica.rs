//! Client-side copy of the shared state.
//!
//! A `Replica` folds server events into local `{proposals, users}` with
//! the same rules the store applies, so a client that has seen every
//! event since its `INITIAL_DATA` holds exactly the server's state.

use pulse_core::{Proposal, Snapshot, User};

use crate::protocol::ServerMessage;

#[derive(Debug, Clone, Default)]
pub struct Replica {
    proposals: Vec<Proposal>,
    users: Vec<User>,
    me: Option<User>,
    last_error: Option<String>,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proposals(&self) -> &[Proposal] {
        &self.proposals
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn proposal(&self, proposal_id: &str) -> Option<&Proposal> {
        self.proposals.iter().find(|p| p.id == proposal_id)
    }

    /// Our own user record, from the registration acknowledgment.
    pub fn me(&self) -> Option<&User> {
        self.me.as_ref()
    }

    /// Message of the most recent `ERROR` event.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            proposals: self.proposals.clone(),
            users: self.users.clone(),
        }
    }

    /// Fold one event in. Returns whether proposals or users changed.
    pub fn apply(&mut self, msg: &ServerMessage) -> bool {
        match msg {
            ServerMessage::UserRegistered(user) => {
                self.me = Some(user.clone());
                false
            }

            ServerMessage::InitialData(snapshot) => {
                self.proposals = snapshot.proposals.clone();
                self.users = snapshot.users.clone();
                true
            }

            ServerMessage::NewUser(user) => {
                match self.users.iter_mut().find(|u| u.id == user.id) {
                    Some(existing) => *existing = user.clone(),
                    None => self.users.push(user.clone()),
                }
                true
            }

            ServerMessage::NewProposal(proposal) => {
                if self.proposal(&proposal.id).is_some() {
                    return false;
                }
                self.proposals.insert(0, proposal.clone());
                true
            }

            ServerMessage::NewComment {
                proposal_id,
                comment,
            } => {
                let Some(proposal) = self.proposal_mut(proposal_id) else {
                    return false;
                };
                if proposal.comments.iter().any(|c| c.id == comment.id) {
                    return false;
                }
                proposal.comments.push(comment.clone());
                true
            }

            ServerMessage::NewVote { proposal_id, vote } => {
                let Some(proposal) = self.proposal_mut(proposal_id) else {
                    return false;
                };
                proposal.votes.retain(|v| v.user_id != vote.user_id);
                proposal.votes.push(vote.clone());
                true
            }

            ServerMessage::UpdateProposalStatus {
                proposal_id,
                status,
                updated_at,
            } => {
                let Some(proposal) = self.proposal_mut(proposal_id) else {
                    return false;
                };
                proposal.status = *status;
                proposal.updated_at = *updated_at;
                true
            }

            ServerMessage::UpdateUsers(users) => {
                self.users = users.clone();
                true
            }

            ServerMessage::Error { message } => {
                self.last_error = Some(message.clone());
                false
            }
        }
    }

    fn proposal_mut(&mut self, proposal_id: &str) -> Option<&mut Proposal> {
        let found = self.proposals.iter_mut().find(|p| p.id == proposal_id);
        if found.is_none() {
            log::debug!("Event for unknown proposal {proposal_id} ignored");
        }
        found
    }
}
