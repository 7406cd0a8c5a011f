use serde::{Deserialize, Serialize};

// User identity = opaque email string. No uniqueness enforcement beyond
// string equality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(email: impl Into<String>) -> Self {
        Self(email.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Normalized unordered pair of user identities.
///
/// `PairKey::new(a, b) == PairKey::new(b, a)`, so it can key symmetric
/// relations: connection edges and live call sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PairKey {
    first: UserId,
    second: UserId,
}

impl PairKey {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    pub fn contains(&self, user: &UserId) -> bool {
        &self.first == user || &self.second == user
    }

    /// The other member of the pair, if `user` is a member at all.
    pub fn other(&self, user: &UserId) -> Option<&UserId> {
        if &self.first == user {
            Some(&self.second)
        } else if &self.second == user {
            Some(&self.first)
        } else {
            None
        }
    }

    pub fn users(&self) -> (&UserId, &UserId) {
        (&self.first, &self.second)
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<->{}", self.first, self.second)
    }
}

/// Whether an invitation (and the edge it produces) is time-boxed or not.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Ephemeral,
    Permanent,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Ephemeral => "ephemeral",
            LinkType::Permanent => "permanent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ephemeral" => Some(LinkType::Ephemeral),
            "permanent" => Some(LinkType::Permanent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Voice,
    Video,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Voice => "voice",
            CallType::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "voice" => Some(CallType::Voice),
            "video" => Some(CallType::Video),
            _ => None,
        }
    }
}

/// Call session state machine states.
///
/// `Ended` and `Rejected` are terminal: the session is recorded to call
/// history and removed from live state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Initiated,
    Answered,
    Ended,
    Rejected,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Initiated => "initiated",
            CallState::Answered => "answered",
            CallState::Ended => "ended",
            CallState::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(CallState::Initiated),
            "answered" => Some(CallState::Answered),
            "ended" => Some(CallState::Ended),
            "rejected" => Some(CallState::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Rejected)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Accepted => "accepted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InviteStatus::Pending),
            "accepted" => Some(InviteStatus::Accepted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Active,
    Removed,
}

impl EdgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeStatus::Active => "active",
            EdgeStatus::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(EdgeStatus::Active),
            "removed" => Some(EdgeStatus::Removed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        let a = UserId::from("a@x.com");
        let b = UserId::from("b@x.com");

        let ab = PairKey::new(a.clone(), b.clone());
        let ba = PairKey::new(b.clone(), a.clone());
        assert_eq!(ab, ba);

        assert!(ab.contains(&a));
        assert!(ab.contains(&b));
        assert_eq!(ab.other(&a), Some(&b));
        assert_eq!(ab.other(&b), Some(&a));
        assert_eq!(ab.other(&UserId::from("c@x.com")), None);
    }

    #[test]
    fn enums_round_trip_as_strings() {
        assert_eq!(LinkType::parse("ephemeral"), Some(LinkType::Ephemeral));
        assert_eq!(CallType::parse(CallType::Video.as_str()), Some(CallType::Video));
        assert_eq!(CallState::parse("answered"), Some(CallState::Answered));
        assert!(CallState::Ended.is_terminal());
        assert!(!CallState::Initiated.is_terminal());
        assert_eq!(InviteStatus::parse("bogus"), None);
    }
}
