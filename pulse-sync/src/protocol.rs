//! JSON envelope protocol.
//!
//! Wire format (one WebSocket text frame per envelope):
//! ```text
//! { "type": "ADD_VOTE", "payload": { "proposalId": "...", "inFavor": true, "userId": "..." } }
//! ```
//!
//! Inbound and outbound envelopes are closed enums. Parsing separates three
//! failure classes so the router can answer each one: not JSON at all,
//! an unknown `type`, and a known `type` whose payload does not fit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;

use pulse_core::{Comment, Proposal, ProposalFields, ProposalStatus, Snapshot, User, Vote};

/// Reply text for frames that are not a `{type, payload}` object.
pub const MSG_INVALID_FORMAT: &str = "Invalid message format";
/// Reply text for envelopes with an unrecognized `type`.
pub const MSG_UNKNOWN_TYPE: &str = "Unknown message type";

/// Commands sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    RegisterUser {
        user_id: String,
    },
    AddProposal {
        title: String,
        description: String,
        creator_id: String,
        treasury_phone: String,
    },
    AddComment {
        proposal_id: String,
        content: String,
        user_id: String,
    },
    AddVote {
        proposal_id: String,
        in_favor: bool,
        user_id: String,
    },
    UpdateProposalStatus {
        proposal_id: String,
        status: ProposalStatus,
    },
    UserDisconnect {
        user_id: String,
    },
}

impl ClientMessage {
    /// Every inbound `type` tag.
    pub const TYPES: [&'static str; 6] = [
        "REGISTER_USER",
        "ADD_PROPOSAL",
        "ADD_COMMENT",
        "ADD_VOTE",
        "UPDATE_PROPOSAL_STATUS",
        "USER_DISCONNECT",
    ];

    /// Parse one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::Malformed)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::Malformed)?
            .to_string();

        if !Self::TYPES.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
            kind,
            reason: e.to_string(),
        })
    }

    /// The wire `type` tag of this command.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterUser { .. } => Self::TYPES[0],
            Self::AddProposal { .. } => Self::TYPES[1],
            Self::AddComment { .. } => Self::TYPES[2],
            Self::AddVote { .. } => Self::TYPES[3],
            Self::UpdateProposalStatus { .. } => Self::TYPES[4],
            Self::UserDisconnect { .. } => Self::TYPES[5],
        }
    }

    /// Build an `ADD_PROPOSAL` command from proposal fields.
    pub fn add_proposal(fields: ProposalFields) -> Self {
        Self::AddProposal {
            title: fields.title,
            description: fields.description,
            creator_id: fields.creator_id,
            treasury_phone: fields.treasury_phone,
        }
    }

    /// Serialize to a JSON string.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Registration acknowledgment, carrying the caller's user record.
    UserRegistered(User),
    InitialData(Snapshot),
    NewUser(User),
    NewProposal(Proposal),
    NewComment {
        proposal_id: String,
        comment: Comment,
    },
    NewVote {
        proposal_id: String,
        vote: Vote,
    },
    UpdateProposalStatus {
        proposal_id: String,
        status: ProposalStatus,
        updated_at: Option<DateTime<Utc>>,
    },
    /// Full user list after a departure.
    UpdateUsers(Vec<User>),
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Status-change event for an updated proposal.
    pub fn status_changed(proposal: &Proposal) -> Self {
        Self::UpdateProposalStatus {
            proposal_id: proposal.id.clone(),
            status: proposal.status,
            updated_at: proposal.updated_at,
        }
    }

    /// The wire `type` tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserRegistered(_) => "USER_REGISTERED",
            Self::InitialData(_) => "INITIAL_DATA",
            Self::NewUser(_) => "NEW_USER",
            Self::NewProposal(_) => "NEW_PROPOSAL",
            Self::NewComment { .. } => "NEW_COMMENT",
            Self::NewVote { .. } => "NEW_VOTE",
            Self::UpdateProposalStatus { .. } => "UPDATE_PROPOSAL_STATUS",
            Self::UpdateUsers(_) => "UPDATE_USERS",
            Self::Error { .. } => "ERROR",
        }
    }

    /// Serialize to a JSON string.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Serialize into a WebSocket text frame. Cloning the frame is cheap,
    /// so one frame can be fanned out to every connection.
    pub fn to_frame(&self) -> Result<Message, ProtocolError> {
        Ok(Message::text(self.encode()?))
    }

    /// Parse one outbound text frame (client side).
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed envelope")]
    Malformed,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: String, reason: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl ProtocolError {
    /// Text of the `ERROR` envelope sent back for this failure.
    pub fn reply_message(&self) -> String {
        match self {
            Self::Malformed | Self::Deserialization(_) => MSG_INVALID_FORMAT.to_string(),
            Self::UnknownType(_) => MSG_UNKNOWN_TYPE.to_string(),
            Self::InvalidPayload { kind, .. } => format!("Invalid payload for {kind}"),
            Self::Serialization(e) => format!("Serialization error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::SharedState;
    use serde_json::json;

    #[test]
    fn test_parse_register_user() {
        let msg = ClientMessage::parse(r#"{"type":"REGISTER_USER","payload":{"userId":"u1"}}"#)
            .unwrap();
        assert_eq!(msg, ClientMessage::RegisterUser { user_id: "u1".into() });
        assert_eq!(msg.kind(), "REGISTER_USER");
    }

    #[test]
    fn test_parse_add_vote() {
        let text = json!({
            "type": "ADD_VOTE",
            "payload": { "proposalId": "p1", "inFavor": false, "userId": "u1" }
        })
        .to_string();
        assert_eq!(
            ClientMessage::parse(&text).unwrap(),
            ClientMessage::AddVote {
                proposal_id: "p1".into(),
                in_favor: false,
                user_id: "u1".into(),
            }
        );
    }

    #[test]
    fn test_parse_update_status() {
        let text = json!({
            "type": "UPDATE_PROPOSAL_STATUS",
            "payload": { "proposalId": "p1", "status": "rejected" }
        })
        .to_string();
        assert_eq!(
            ClientMessage::parse(&text).unwrap(),
            ClientMessage::UpdateProposalStatus {
                proposal_id: "p1".into(),
                status: ProposalStatus::Rejected,
            }
        );
    }

    #[test]
    fn test_parse_not_json() {
        assert_eq!(ClientMessage::parse("not json {"), Err(ProtocolError::Malformed));
    }

    #[test]
    fn test_parse_missing_type() {
        assert_eq!(
            ClientMessage::parse(r#"{"payload":{"userId":"u1"}}"#),
            Err(ProtocolError::Malformed)
        );
        assert_eq!(ClientMessage::parse(r#"{"type":42}"#), Err(ProtocolError::Malformed));
        assert_eq!(ClientMessage::parse("[1,2,3]"), Err(ProtocolError::Malformed));
    }

    #[test]
    fn test_parse_unknown_type() {
        let err = ClientMessage::parse(r#"{"type":"DELETE_EVERYTHING","payload":{}}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType("DELETE_EVERYTHING".into()));
        assert_eq!(err.reply_message(), MSG_UNKNOWN_TYPE);
    }

    #[test]
    fn test_parse_invalid_payload() {
        let err = ClientMessage::parse(r#"{"type":"ADD_VOTE","payload":{"proposalId":"p1"}}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { ref kind, .. } if kind == "ADD_VOTE"));
        assert_eq!(err.reply_message(), "Invalid payload for ADD_VOTE");

        let bad_status = r#"{"type":"UPDATE_PROPOSAL_STATUS","payload":{"proposalId":"p1","status":"archived"}}"#;
        assert!(matches!(
            ClientMessage::parse(bad_status),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_client_message_wire_shape() {
        let msg = ClientMessage::add_proposal(ProposalFields {
            title: "Garden".into(),
            description: "Grow things".into(),
            creator_id: "u1".into(),
            treasury_phone: "+254700000000".into(),
        });
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "ADD_PROPOSAL");
        assert_eq!(value["payload"]["creatorId"], "u1");
        assert_eq!(value["payload"]["treasuryPhone"], "+254700000000");
    }

    #[test]
    fn test_server_message_tags() {
        let value: Value =
            serde_json::from_str(&ServerMessage::error("boom").encode().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "ERROR", "payload": {"message": "boom"}}));
    }

    #[test]
    fn test_new_comment_preserves_fields() {
        let mut state = SharedState::new();
        let proposal = state.add_proposal(ProposalFields {
            title: "Garden".into(),
            description: "Grow things".into(),
            creator_id: "u1".into(),
            treasury_phone: "+254700000000".into(),
        });
        let comment = state.add_comment(&proposal.id, "u2", "Yes please").unwrap();
        let msg = ServerMessage::NewComment {
            proposal_id: proposal.id.clone(),
            comment: comment.clone(),
        };

        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "NEW_COMMENT");
        assert_eq!(value["payload"]["proposalId"], proposal.id.as_str());
        assert_eq!(value["payload"]["comment"]["userId"], "u2");
        assert!(value["payload"]["comment"]["sentiment"].is_null());

        assert_eq!(ServerMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_status_changed_event() {
        let mut state = SharedState::new();
        let proposal = state.add_proposal(ProposalFields {
            title: "Garden".into(),
            description: "Grow things".into(),
            creator_id: "u1".into(),
            treasury_phone: "+254700000000".into(),
        });
        let updated = state.update_status(&proposal.id, ProposalStatus::Active).unwrap();
        let msg = ServerMessage::status_changed(&updated);

        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "UPDATE_PROPOSAL_STATUS");
        assert_eq!(value["payload"]["status"], "active");
        assert!(value["payload"]["updatedAt"].is_string());
    }

    #[test]
    fn test_snapshot_and_user_list_shapes() {
        let mut state = SharedState::new();
        state.add_user("u1");
        state.add_user("u2");

        let initial = ServerMessage::InitialData(state.snapshot());
        let value: Value = serde_json::from_str(&initial.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "INITIAL_DATA");
        assert_eq!(value["payload"]["users"].as_array().unwrap().len(), 2);
        assert!(value["payload"]["proposals"].as_array().unwrap().is_empty());

        let users = ServerMessage::UpdateUsers(state.users().to_vec());
        let value: Value = serde_json::from_str(&users.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "UPDATE_USERS");
        assert_eq!(value["payload"][0]["id"], "u1");
        assert_eq!(value["payload"][0]["isFirstUser"], true);
    }

    #[test]
    fn test_to_frame_is_text() {
        let frame = ServerMessage::error("x").to_frame().unwrap();
        assert!(frame.is_text());
        assert_eq!(
            ServerMessage::decode(frame.to_text().unwrap()).unwrap(),
            ServerMessage::error("x")
        );
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            ServerMessage::decode("{\"type\":\"NOPE\"}"),
            Err(ProtocolError::Deserialization(_))
        ));
    }
}
