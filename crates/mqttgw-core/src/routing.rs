//! Per-record routing policy.
//!
//! Pure functions deciding which state write a payload produces and how the
//! notification flip-flop advances. The async router in `mqttgw-runtime`
//! applies these to the host registry.

use crate::types::{OnOffState, StateUpdate};

/// Interpret a payload as an on/off command (`"ON"` / `"OFF"`, any case).
///
/// The whole payload must match; `"ON "` or `"turn on"` do not.
pub fn parse_on_off(payload: &str) -> Option<OnOffState> {
    if payload.eq_ignore_ascii_case("ON") {
        Some(OnOffState::On)
    } else if payload.eq_ignore_ascii_case("OFF") {
        Some(OnOffState::Off)
    } else {
        None
    }
}

/// State write produced by a payload for a device with the given policy.
///
/// On/off payloads only drive `onOffState` when the device supports it;
/// everything else lands verbatim in `topicMessage`.
pub fn classify_payload(payload: &str, supports_on_off_state: bool) -> StateUpdate {
    match parse_on_off(payload) {
        Some(state) if supports_on_off_state => StateUpdate::OnOff(state),
        _ => StateUpdate::TopicMessage(payload.to_string()),
    }
}

/// Result of advancing the notification flip-flop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationStep {
    /// Value to write back to `topicNotification`.
    pub value: &'static str,
    /// The previous value was missing; callers log this as a state error.
    pub initialized: bool,
}

/// Advance the notification flip-flop: `"0"` becomes `"1"`, anything else
/// becomes `"0"`. A missing value is initialized to `"0"`.
pub fn next_notification(current: Option<&str>) -> NotificationStep {
    match current {
        Some("0") => NotificationStep {
            value: "1",
            initialized: false,
        },
        Some(_) => NotificationStep {
            value: "0",
            initialized: false,
        },
        None => NotificationStep {
            value: "0",
            initialized: true,
        },
    }
}
