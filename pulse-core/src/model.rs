//! Shared entities exchanged between the server and its clients.
//!
//! All structs serialize with camelCase field names so the JSON produced
//! here is exactly what browser clients consume. Timestamps are RFC 3339
//! strings in UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A participant, identified by a durable client-supplied id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// Held by the earliest-joined known user only.
    pub is_first_user: bool,
}

/// Lifecycle status of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Active,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A comment on a proposal. One per user per proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Positive/negative classification; unset when the comment is created.
    pub sentiment: Option<bool>,
}

/// A vote. `(proposal id, user_id)` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub user_id: String,
    pub in_favor: bool,
}

/// Treasury movement attached to a proposal. Read-only here; populated
/// by the treasury integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub amount: f64,
    pub confirmations: u32,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// The caller-supplied part of a new proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalFields {
    pub title: String,
    pub description: String,
    pub creator_id: String,
    pub treasury_phone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    pub title: String,
    pub description: String,
    pub creator_id: String,
    pub treasury_phone: String,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub comments: Vec<Comment>,
    pub votes: Vec<Vote>,
    pub transactions: Vec<Transaction>,
}

impl Proposal {
    /// Whether `user_id` has already commented.
    pub fn has_comment_from(&self, user_id: &str) -> bool {
        self.comments.iter().any(|c| c.user_id == user_id)
    }

    /// The vote currently held by `user_id`, if any.
    pub fn vote_of(&self, user_id: &str) -> Option<&Vote> {
        self.votes.iter().find(|v| v.user_id == user_id)
    }

    /// `(in favor, against)` counts.
    pub fn tally(&self) -> (usize, usize) {
        let in_favor = self.votes.iter().filter(|v| v.in_favor).count();
        (in_favor, self.votes.len() - in_favor)
    }
}

/// Full state handed to a newly registered client.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub proposals: Vec<Proposal>,
    pub users: Vec<User>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_proposal() -> Proposal {
        Proposal {
            id: "proposal-1".into(),
            title: "Garden".into(),
            description: "Community garden".into(),
            creator_id: "user-a".into(),
            treasury_phone: "+254712345678".into(),
            status: ProposalStatus::Pending,
            created_at: Utc::now(),
            updated_at: None,
            comments: Vec::new(),
            votes: vec![
                Vote { user_id: "user-a".into(), in_favor: true },
                Vote { user_id: "user-b".into(), in_favor: false },
                Vote { user_id: "user-c".into(), in_favor: true },
            ],
            transactions: Vec::new(),
        }
    }

    #[test]
    fn test_proposal_json_uses_camel_case() {
        let value = serde_json::to_value(sample_proposal()).unwrap();
        assert_eq!(value["creatorId"], "user-a");
        assert_eq!(value["treasuryPhone"], "+254712345678");
        assert_eq!(value["status"], "pending");
        assert!(value["updatedAt"].is_null());
        assert!(value.get("creator_id").is_none());
    }

    #[test]
    fn test_status_parses_lowercase_only() {
        let status: ProposalStatus = serde_json::from_value(json!("active")).unwrap();
        assert_eq!(status, ProposalStatus::Active);
        assert!(serde_json::from_value::<ProposalStatus>(json!("Active")).is_err());
        assert!(serde_json::from_value::<ProposalStatus>(json!("archived")).is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ProposalStatus::Rejected.to_string(), "rejected");
    }

    #[test]
    fn test_tally_and_vote_lookup() {
        let proposal = sample_proposal();
        assert_eq!(proposal.tally(), (2, 1));
        assert_eq!(proposal.vote_of("user-b").map(|v| v.in_favor), Some(false));
        assert!(proposal.vote_of("user-z").is_none());
    }

    #[test]
    fn test_user_json_fields() {
        let user = User {
            id: "user-a".into(),
            joined_at: Utc::now(),
            last_active: Utc::now(),
            is_first_user: true,
        };
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["isFirstUser"], true);
        assert!(value["joinedAt"].is_string());
        let back: User = serde_json::from_value(value).unwrap();
        assert_eq!(back, user);
    }
}
