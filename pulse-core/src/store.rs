//! The authoritative in-memory store.
//!
//! `SharedState` is an owned value: no globals, so tests can run as many
//! independent instances as they like. It performs no locking; callers
//! must serialize access (one writer at a time).
//!
//! Ordering:
//! - users are kept in join order, so index 0 is always the first user
//! - proposals are kept most-recent-first

use chrono::Utc;
use thiserror::Error;

use crate::id::generate_id;
use crate::model::{Comment, Proposal, ProposalFields, ProposalStatus, Snapshot, User, Vote};

/// Failure signal returned by mutations that leave the state untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Proposal not found: {0}")]
    ProposalNotFound(String),
    #[error("User {user_id} has already commented on proposal {proposal_id}")]
    DuplicateComment { proposal_id: String, user_id: String },
}

#[derive(Debug, Default)]
pub struct SharedState {
    proposals: Vec<Proposal>,
    users: Vec<User>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// Proposals, most recent first.
    pub fn proposals(&self) -> &[Proposal] {
        &self.proposals
    }

    /// Users, in join order.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn proposal(&self, proposal_id: &str) -> Option<&Proposal> {
        self.proposals.iter().find(|p| p.id == proposal_id)
    }

    pub fn user(&self, user_id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == user_id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn proposal_count(&self) -> usize {
        self.proposals.len()
    }

    /// Clone the full state for a newly registered client.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            proposals: self.proposals.clone(),
            users: self.users.clone(),
        }
    }

    fn proposal_mut(&mut self, proposal_id: &str) -> Result<&mut Proposal, StoreError> {
        self.proposals
            .iter_mut()
            .find(|p| p.id == proposal_id)
            .ok_or_else(|| StoreError::ProposalNotFound(proposal_id.to_string()))
    }

    // ---------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------

    /// Register `user_id`, or refresh `last_active` if it is already known.
    pub fn add_user(&mut self, user_id: &str) -> User {
        let now = Utc::now();

        if let Some(existing) = self.users.iter_mut().find(|u| u.id == user_id) {
            existing.last_active = now;
            log::debug!("User {user_id} re-registered");
            return existing.clone();
        }

        let user = User {
            id: user_id.to_string(),
            joined_at: now,
            last_active: now,
            is_first_user: self.users.is_empty(),
        };
        self.users.push(user.clone());
        log::info!("User {user_id} joined ({} known)", self.users.len());
        user
    }

    /// Delete a user record. The earliest-joined remaining user inherits
    /// `is_first_user`.
    pub fn remove_user(&mut self, user_id: &str) -> Option<User> {
        let index = self.users.iter().position(|u| u.id == user_id)?;
        let removed = self.users.remove(index);
        self.reassign_first_user();
        log::info!("User {user_id} removed ({} remaining)", self.users.len());
        Some(removed)
    }

    fn reassign_first_user(&mut self) {
        for (i, user) in self.users.iter_mut().enumerate() {
            user.is_first_user = i == 0;
        }
    }

    // ---------------------------------------------------------------
    // Proposals
    // ---------------------------------------------------------------

    /// Create a pending proposal and put it at the front of the listing.
    pub fn add_proposal(&mut self, fields: ProposalFields) -> Proposal {
        let proposal = Proposal {
            id: generate_id("proposal"),
            title: fields.title,
            description: fields.description,
            creator_id: fields.creator_id,
            treasury_phone: fields.treasury_phone,
            status: ProposalStatus::Pending,
            created_at: Utc::now(),
            updated_at: None,
            comments: Vec::new(),
            votes: Vec::new(),
            transactions: Vec::new(),
        };
        self.proposals.insert(0, proposal.clone());
        log::info!("Proposal {} created by {}", proposal.id, proposal.creator_id);
        proposal
    }

    /// Append a comment. Rejects unknown proposals and second comments
    /// from the same user.
    pub fn add_comment(
        &mut self,
        proposal_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<Comment, StoreError> {
        let proposal = self.proposal_mut(proposal_id)?;
        if proposal.has_comment_from(user_id) {
            return Err(StoreError::DuplicateComment {
                proposal_id: proposal_id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        let comment = Comment {
            id: generate_id("comment"),
            user_id: user_id.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            updated_at: None,
            sentiment: None,
        };
        proposal.comments.push(comment.clone());
        Ok(comment)
    }

    /// Cast a vote, replacing any earlier vote by the same user.
    pub fn add_vote(
        &mut self,
        proposal_id: &str,
        user_id: &str,
        in_favor: bool,
    ) -> Result<Vote, StoreError> {
        let proposal = self.proposal_mut(proposal_id)?;
        let vote = Vote {
            user_id: user_id.to_string(),
            in_favor,
        };
        proposal.votes.retain(|v| v.user_id != user_id);
        proposal.votes.push(vote.clone());
        Ok(vote)
    }

    /// Set the status and stamp `updated_at`. Any transition is allowed.
    pub fn update_status(
        &mut self,
        proposal_id: &str,
        status: ProposalStatus,
    ) -> Result<Proposal, StoreError> {
        let proposal = self.proposal_mut(proposal_id)?;
        log::info!("Proposal {proposal_id}: {} -> {status}", proposal.status);
        proposal.status = status;
        proposal.updated_at = Some(Utc::now());
        Ok(proposal.clone())
    }
}
