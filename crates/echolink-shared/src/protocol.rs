//! The wire-level event contract between the signaling core and its
//! transport sessions.
//!
//! Events are adjacently tagged JSON objects: `{"event": "...", "data": {...}}`.
//! Event names are kebab-case, payload keys camelCase; this exact shape is
//! the compatibility contract with deployed clients, so field renames here
//! are breaking changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CallType, LinkType, UserId};

/// Events a client session sends to the core.
///
/// Transport disconnect is implicit (a lifecycle hook on the router), not a
/// variant here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    RegisterUser {
        user_email: UserId,
    },
    JoinConnection {
        connection_id: Uuid,
        user_email: UserId,
    },
    SendMessage {
        connection_id: Uuid,
        message: String,
        sender_email: UserId,
    },
    StartCall {
        user_email: UserId,
        other_user_email: UserId,
        connection_id: Uuid,
        call_type: CallType,
    },
    AnswerCall {
        connection_id: Uuid,
        to_user: UserId,
        call_id: Uuid,
    },
    RejectCall {
        call_id: Uuid,
        to_user: UserId,
    },
    EndCall {
        to_user: UserId,
        connection_id: Uuid,
        call_id: Uuid,
    },
    /// Opaque SDP offer, routed by `to_user` only. The core never looks
    /// inside `payload`.
    WebrtcOffer {
        to_user: UserId,
        payload: serde_json::Value,
    },
    /// Opaque SDP answer, routed by `to_user` only.
    WebrtcAnswer {
        to_user: UserId,
        payload: serde_json::Value,
    },
    /// Opaque ICE candidate, routed by `to_user` only.
    IceCandidate {
        to_user: UserId,
        payload: serde_json::Value,
    },
    CreateInvitation {
        sender_email: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_email: Option<UserId>,
        link_type: LinkType,
    },
    AcceptInvitation {
        invitation_id: Uuid,
        receiver_email: UserId,
    },
    DeleteMessage {
        message_id: Uuid,
        connection_id: Uuid,
    },
}

/// Events the core sends to client sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    ContactsUpdated(Vec<ContactEntry>),
    UserStatusChanged {
        email: UserId,
        is_online: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen: Option<DateTime<Utc>>,
    },
    IncomingCall {
        from: UserId,
        call_type: CallType,
        connection_id: Uuid,
        call_id: Uuid,
    },
    CallInitiated {
        connection_id: Uuid,
        call_id: Uuid,
        to: UserId,
    },
    CallAnswered {
        connection_id: Uuid,
        call_id: Uuid,
    },
    CallRejected {
        call_id: Uuid,
    },
    CallEnded {
        from: UserId,
        call_id: Uuid,
        duration: i64,
        ended_by: String,
    },
    CallHistoryUpdated(Vec<CallHistoryEntry>),
    ReceiveMessage {
        id: Uuid,
        sender_email: UserId,
        message: String,
        timestamp: DateTime<Utc>,
    },
    MessageSent {
        id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
    MessageDeleted {
        message_id: Uuid,
        connection_id: Uuid,
    },
    RequestAccepted {
        connection_id: Uuid,
        receiver_email: UserId,
        message: String,
    },
    ConnectionEstablished {
        connection_id: Uuid,
        sender_email: UserId,
        receiver_email: UserId,
    },
    InvitationCreated {
        invitation_id: Uuid,
        link_type: LinkType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
    },
    WebrtcOffer {
        from: UserId,
        payload: serde_json::Value,
    },
    WebrtcAnswer {
        from: UserId,
        payload: serde_json::Value,
    },
    IceCandidate {
        from: UserId,
        payload: serde_json::Value,
    },
    Error {
        message: String,
    },
}

/// One row of a user's contact list: the peer plus live presence, joined at
/// query time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactEntry {
    pub email: UserId,
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    pub connection_type: LinkType,
}

/// One recorded call, as shown in a user's call history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryEntry {
    pub call_id: Uuid,
    pub peer: UserId,
    pub call_type: CallType,
    pub state: crate::types::CallState,
    pub started_at: DateTime<Utc>,
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_by: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_events_use_reference_names_and_keys() {
        let raw = r#"{"event":"register-user","data":{"userEmail":"a@x.com"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            ClientEvent::RegisterUser {
                user_email: UserId::from("a@x.com")
            }
        );

        let raw = r#"{"event":"start-call","data":{
            "userEmail":"a@x.com",
            "otherUserEmail":"b@x.com",
            "connectionId":"6dfac7f6-4f9f-4f09-9f3c-1fbd18e9f1a0",
            "callType":"video"
        }}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::StartCall { call_type, .. } => {
                assert_eq!(call_type, CallType::Video);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn opaque_signaling_payload_is_passed_through() {
        let raw = r#"{"event":"ice-candidate","data":{
            "toUser":"b@x.com",
            "payload":{"candidate":"candidate:1 1 UDP 2122252543 10.0.0.1 54321 typ host"}
        }}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::IceCandidate { to_user, payload } => {
                assert_eq!(to_user, UserId::from("b@x.com"));
                assert!(payload.get("candidate").is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn outbound_events_serialize_with_camel_case_keys() {
        let event = ServerEvent::CallEnded {
            from: UserId::from("a@x.com"),
            call_id: Uuid::nil(),
            duration: 42,
            ended_by: "system".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "call-ended");
        assert_eq!(json["data"]["endedBy"], "system");
        assert_eq!(json["data"]["duration"], 42);

        let event = ServerEvent::ContactsUpdated(vec![ContactEntry {
            email: UserId::from("b@x.com"),
            is_online: true,
            last_seen: None,
            connection_type: LinkType::Permanent,
        }]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "contacts-updated");
        assert_eq!(json["data"][0]["isOnline"], true);
        assert_eq!(json["data"][0]["connectionType"], "permanent");
        // lastSeen omitted entirely when unknown
        assert!(json["data"][0].get("lastSeen").is_none());
    }
}
