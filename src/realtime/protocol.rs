use serde::{Deserialize, Serialize};

pub const LOGIN_SYSTEM: &str = "LOGIN_SYSTEM";

/// Instance lifecycle events fanned out by the relay to subscribed clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapEvent {
    SendSnap,
    PublishSnap,
    ErrorSnap,
}

impl SnapEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapEvent::SendSnap => "SEND_SNAP",
            SnapEvent::PublishSnap => "PUBLISH_SNAP",
            SnapEvent::ErrorSnap => "ERROR_SNAP",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSystem<'a> {
    pub token: &'a str,
    pub action: &'static str,
    pub device_uuid: Option<String>,
    pub data: Option<serde_json::Value>,
}

impl<'a> LoginSystem<'a> {
    pub fn new(token: &'a str) -> Self {
        Self {
            token,
            action: LOGIN_SYSTEM,
            device_uuid: None,
            data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BroadcastData {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Broadcast {
    pub action: SnapEvent,
    pub data: BroadcastData,
}

impl Broadcast {
    pub fn new(action: SnapEvent, key: impl Into<String>) -> Self {
        Self {
            action,
            data: BroadcastData { key: key.into() },
        }
    }
}

#[derive(Debug, Deserialize)]
struct Inbound {
    action: Option<String>,
    success: Option<bool>,
}

/// Relay messages the notifier reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayReply {
    LoginAck(bool),
    BroadcastAck(bool),
    Ignored,
}

impl RelayReply {
    /// The relay acks SEND_SNAP with a bare `{success}`. Replies tagged with
    /// any other action never resolve a SEND_SNAP waiter.
    pub fn parse(text: &str) -> RelayReply {
        let Ok(inbound) = serde_json::from_str::<Inbound>(text) else {
            return RelayReply::Ignored;
        };
        match (inbound.action.as_deref(), inbound.success) {
            (Some(LOGIN_SYSTEM), success) => RelayReply::LoginAck(success.unwrap_or(false)),
            (None, Some(success)) => RelayReply::BroadcastAck(success),
            (Some(action), Some(success)) if action == SnapEvent::SendSnap.as_str() => {
                RelayReply::BroadcastAck(success)
            }
            _ => RelayReply::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn login_matches_the_relay_wire_shape() {
        let value = serde_json::to_value(LoginSystem::new("tok")).unwrap();
        assert_eq!(
            value,
            json!({"token": "tok", "action": "LOGIN_SYSTEM", "deviceUuid": null, "data": null})
        );
    }

    #[test]
    fn broadcast_carries_action_and_instance_key() {
        let value = serde_json::to_value(Broadcast::new(SnapEvent::ErrorSnap, "ABC123")).unwrap();
        assert_eq!(value, json!({"action": "ERROR_SNAP", "data": {"key": "ABC123"}}));
    }

    #[test]
    fn replies_are_classified() {
        assert_eq!(
            RelayReply::parse(r#"{"action":"LOGIN_SYSTEM","success":true}"#),
            RelayReply::LoginAck(true)
        );
        assert_eq!(
            RelayReply::parse(r#"{"action":"LOGIN_SYSTEM"}"#),
            RelayReply::LoginAck(false)
        );
        assert_eq!(
            RelayReply::parse(r#"{"success":false,"message":"no subscribers"}"#),
            RelayReply::BroadcastAck(false)
        );
        assert_eq!(
            RelayReply::parse(r#"{"action":"SEND_SNAP","success":true}"#),
            RelayReply::BroadcastAck(true)
        );
        assert_eq!(
            RelayReply::parse(r#"{"action":"PUBLISH_SNAP","success":true}"#),
            RelayReply::Ignored
        );
        assert_eq!(
            RelayReply::parse(r#"{"action":"ERROR_SNAP","success":false}"#),
            RelayReply::Ignored
        );
        assert_eq!(RelayReply::parse("not json"), RelayReply::Ignored);
    }
}
