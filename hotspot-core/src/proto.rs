//! Control socket wire protocol: newline-delimited JSON.
//!
//! Requests carry a `cmd` tag, replies a `reply` tag, pushed notifications
//! an `event` tag, so a connection can tell the three apart. Senders that
//! only want fire-and-forget semantics simply drop the connection without
//! reading the reply line.

use crate::traits::ApState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Bring the AP up, optionally with a new SSID/passphrase.
    ApEnable {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ssid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    /// Tear the AP down.
    ApDisable,
    /// Snapshot of state, configuration and station count.
    Status,
    /// Merge a new desired configuration without touching the radio.
    SetConfig {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ssid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<u8>,
    },
    /// Switch this connection to a stream of state-change events.
    Subscribe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ControlReply {
    Ack { accepted: bool },
    Status { state: ApState, ssid: String, channel: u8, stations: u32 },
    Subscribed,
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControlEvent {
    StateChanged { state: ApState, ssid: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_command_parses_with_and_without_arguments() {
        let req: ControlRequest =
            serde_json::from_str(r#"{"cmd":"ap_enable","ssid":"Office","password":"passw0rd"}"#)
                .unwrap();
        match req {
            ControlRequest::ApEnable { ssid, password } => {
                assert_eq!(ssid.as_deref(), Some("Office"));
                assert_eq!(password.as_deref(), Some("passw0rd"));
            }
            other => panic!("unexpected request: {:?}", other),
        }

        let req: ControlRequest = serde_json::from_str(r#"{"cmd":"ap_enable"}"#).unwrap();
        assert!(matches!(req, ControlRequest::ApEnable { ssid: None, password: None }));
    }

    #[test]
    fn state_names_are_snake_case_on_the_wire() {
        let line = serde_json::to_string(&ControlEvent::StateChanged {
            state: ApState::Enabling,
            ssid: "Office".into(),
        })
        .unwrap();
        assert_eq!(line, r#"{"event":"state_changed","state":"enabling","ssid":"Office"}"#);
    }

    #[test]
    fn unknown_command_is_a_parse_error() {
        assert!(serde_json::from_str::<ControlRequest>(r#"{"cmd":"reboot"}"#).is_err());
    }
}
