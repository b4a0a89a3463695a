//! Inbound envelope and event types
//!
//! All types use camelCase JSON serialization for wire compatibility.

use serde::{Deserialize, Serialize};

/// Top-level discriminator of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Subscription/timer/command events for one installation
    Event,
    /// Page/UI execution request
    Execute,
    /// Registration confirmation challenge
    Confirmation,
    /// Any message type this crate does not recognize
    #[serde(other)]
    Unknown,
}

/// The top-level inbound message
///
/// Carries one payload section matching `message_type`; the others
/// are absent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_type: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<EventData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_data: Option<ConfirmationData>,

    /// Raw execute payload — never dispatched, kept for logging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_data: Option<serde_json::Value>,
}

/// Payload of an `EVENT` message
///
/// Every event in `events` belongs to the installation identified by
/// `installed_app`; the whole sequence is processed as one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    pub installed_app: InstalledAppRef,

    /// Short-lived token for follow-up API calls, when delivered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default)]
    pub events: Vec<Event>,
}

/// Installation reference carried in every `EVENT` message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledAppRef {
    pub installed_app_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,

    /// Installed configuration values, passed through untyped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// Payload of a `CONFIRMATION` message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    pub confirmation_url: String,
}

/// One event within an `EVENT` envelope
///
/// Internally tagged on `eventType`; the payload rides in a sibling
/// field named after the event type, matching the wire format.
/// Unrecognized event types deserialize to `Unknown` instead of
/// failing the whole envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum Event {
    #[serde(rename = "DEVICE_EVENT", rename_all = "camelCase")]
    Device { device_event: DeviceEvent },

    #[serde(rename = "TIMER_EVENT", rename_all = "camelCase")]
    Timer { timer_event: TimerEvent },

    #[serde(rename = "DEVICE_COMMANDS_EVENT", rename_all = "camelCase")]
    DeviceCommands {
        device_commands_event: DeviceCommandsEvent,
    },

    #[serde(rename = "MODE_EVENT", rename_all = "camelCase")]
    Mode { mode_event: ModeEvent },

    #[serde(rename = "SECURITY_ARM_STATE_EVENT", rename_all = "camelCase")]
    SecurityArmState {
        security_arm_state_event: SecurityArmStateEvent,
    },

    #[serde(rename = "INSTALLED_APP_LIFECYCLE_EVENT", rename_all = "camelCase")]
    InstalledAppLifecycle {
        installed_app_lifecycle_event: InstalledAppLifecycleEvent,
    },

    #[serde(other)]
    Unknown,
}

/// A device attribute change delivered through a named subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,

    pub device_id: String,
    pub component_id: String,
    pub capability: String,
    pub attribute: String,
    pub value: serde_json::Value,

    #[serde(default)]
    pub state_change: bool,

    /// Name of the subscription that matched; the handler key is the
    /// part before the first `_`
    pub subscription_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A scheduled execution firing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    /// Schedule name — the handler key, used as-is
    pub name: String,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub timer_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

/// Commands issued to a device the app exposes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommandsEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    pub device_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    #[serde(default)]
    pub commands: Vec<DeviceCommand>,
}

/// A single command within a `DeviceCommandsEvent`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommand {
    pub component_id: String,
    pub capability: String,
    pub command: String,

    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
}

/// A location mode change
///
/// The wire payload carries no subscription name for this event type;
/// dispatch uses the fixed registration name `modeChangeHandler`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    pub mode_id: String,
}

/// A security system arm-state change
///
/// Same fixed-name dispatch as `ModeEvent`, under
/// `securityArmStateHandler`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityArmStateEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    pub arm_state: String,
}

/// An installation lifecycle transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledAppLifecycleEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    pub installed_app_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    pub lifecycle: InstalledAppLifecycle,
}

/// Lifecycle value of an `InstalledAppLifecycleEvent`
///
/// Only `Delete` is dispatched; everything else is logged and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstalledAppLifecycle {
    Create,
    Install,
    Update,
    Delete,
    #[serde(other)]
    Other,
}

/// The single aggregated response for one envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub status_code: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DispatchResponse {
    /// Happy-path acknowledgement: `{statusCode: 200, eventData: {}}`
    pub fn ok() -> Self {
        Self {
            status_code: 200,
            event_data: Some(serde_json::json!({})),
            message: None,
        }
    }

    /// Authentication failure: status 401, body `Forbidden`
    pub fn forbidden() -> Self {
        Self {
            status_code: 401,
            event_data: None,
            message: Some("Forbidden".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_envelope_deserialization() {
        let json = r#"{
            "messageType": "EVENT",
            "eventData": {
                "installedApp": {"installedAppId": "ia1"},
                "events": [
                    {"eventType": "TIMER_EVENT", "timerEvent": {"name": "dailyCheck"}}
                ]
            }
        }"#;

        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.message_type, MessageType::Event);

        let data = envelope.event_data.unwrap();
        assert_eq!(data.installed_app.installed_app_id, "ia1");
        assert_eq!(data.events.len(), 1);
        match &data.events[0] {
            Event::Timer { timer_event } => assert_eq!(timer_event.name, "dailyCheck"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_device_event_deserialization() {
        let json = r#"{
            "eventType": "DEVICE_EVENT",
            "deviceEvent": {
                "eventId": "e-1",
                "deviceId": "d-1",
                "componentId": "main",
                "capability": "switch",
                "attribute": "switch",
                "value": "on",
                "stateChange": true,
                "subscriptionName": "switchHandler_1"
            }
        }"#;

        let event: Event = serde_json::from_str(json).unwrap();
        match event {
            Event::Device { device_event } => {
                assert_eq!(device_event.subscription_name, "switchHandler_1");
                assert_eq!(device_event.value, serde_json::json!("on"));
                assert!(device_event.state_change);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_device_commands_deserialization() {
        let json = r#"{
            "eventType": "DEVICE_COMMANDS_EVENT",
            "deviceCommandsEvent": {
                "deviceId": "d-9",
                "commands": [
                    {"componentId": "main", "capability": "switch", "command": "on"},
                    {"componentId": "main", "capability": "switchLevel", "command": "setLevel", "arguments": [80]}
                ]
            }
        }"#;

        let event: Event = serde_json::from_str(json).unwrap();
        match event {
            Event::DeviceCommands {
                device_commands_event,
            } => {
                assert_eq!(device_commands_event.commands.len(), 2);
                assert_eq!(device_commands_event.commands[1].command, "setLevel");
                assert_eq!(
                    device_commands_event.commands[1].arguments,
                    vec![serde_json::json!(80)]
                );
                assert!(device_commands_event.commands[0].arguments.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_type_tolerated() {
        let json = r#"{"eventType": "HUB_HEALTH_EVENT", "hubHealthEvent": {"status": "OFFLINE"}}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert!(matches!(event, Event::Unknown));
    }

    #[test]
    fn test_unknown_message_type_tolerated() {
        let json = r#"{"messageType": "PING"}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.message_type, MessageType::Unknown);
    }

    #[test]
    fn test_lifecycle_deserialization() {
        let json = r#"{
            "eventType": "INSTALLED_APP_LIFECYCLE_EVENT",
            "installedAppLifecycleEvent": {
                "installedAppId": "ia1",
                "lifecycle": "DELETE"
            }
        }"#;

        let event: Event = serde_json::from_str(json).unwrap();
        match event {
            Event::InstalledAppLifecycle {
                installed_app_lifecycle_event,
            } => {
                assert_eq!(
                    installed_app_lifecycle_event.lifecycle,
                    InstalledAppLifecycle::Delete
                );
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_lifecycle_unknown_value_tolerated() {
        let json = r#"{"installedAppId": "ia1", "lifecycle": "SOMETHING_NEW"}"#;
        let event: InstalledAppLifecycleEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.lifecycle, InstalledAppLifecycle::Other);
    }

    #[test]
    fn test_confirmation_deserialization() {
        let json = r#"{
            "messageType": "CONFIRMATION",
            "confirmationData": {
                "appId": "app-1",
                "confirmationUrl": "https://example.com/confirm?token=abc"
            }
        }"#;

        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.message_type, MessageType::Confirmation);
        assert_eq!(
            envelope.confirmation_data.unwrap().confirmation_url,
            "https://example.com/confirm?token=abc"
        );
    }

    #[test]
    fn test_response_serialization() {
        let ok = DispatchResponse::ok();
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"statusCode\":200"));
        assert!(json.contains("\"eventData\":{}"));
        assert!(!json.contains("message"));

        let forbidden = DispatchResponse::forbidden();
        let json = serde_json::to_string(&forbidden).unwrap();
        assert!(json.contains("\"statusCode\":401"));
        assert!(json.contains("\"message\":\"Forbidden\""));
        assert!(!json.contains("eventData"));
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = Envelope {
            message_type: MessageType::Event,
            event_data: Some(EventData {
                installed_app: InstalledAppRef {
                    installed_app_id: "ia-42".to_string(),
                    location_id: Some("loc-1".to_string()),
                    config: None,
                },
                auth_token: Some("tok".to_string()),
                refresh_token: None,
                events: vec![Event::Mode {
                    mode_event: ModeEvent {
                        event_id: None,
                        mode_id: "night".to_string(),
                    },
                }],
            }),
            confirmation_data: None,
            execute_data: None,
        };

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"messageType\":\"EVENT\""));
        assert!(json.contains("\"eventType\":\"MODE_EVENT\""));
        assert!(json.contains("\"modeId\":\"night\""));

        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        let data = parsed.event_data.unwrap();
        assert_eq!(data.installed_app.installed_app_id, "ia-42");
        assert_eq!(data.events.len(), 1);
    }
}
