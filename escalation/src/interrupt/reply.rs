//! Inbound reply events and how their actions are read.
//!
//! Replies arrive from three places: messaging keypresses, voice DTMF
//! digits and in-app buttons. All of them reduce to one of three actions.
//!
//! | Input                                 | Action                       |
//! |---------------------------------------|------------------------------|
//! | `acknowledge`, `ack`, `done`, `1`     | acknowledge                  |
//! | `reschedule` with `new_time`          | reschedule to `new_time`     |
//! | `reschedule` alone, `snooze`, `2`     | reschedule to now + snooze   |
//! | `skip`, `cancel`, `3`                 | skip                         |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::state::TaskId;

/// Where a reply came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    /// Keypress on a messaging channel
    Messaging,
    /// DTMF digit during a call
    Voice,
    #[default]
    App,
}

/// Parsed reply action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyAction {
    Acknowledge,
    /// `None` means "snooze": now plus the configured snooze interval
    Reschedule(Option<DateTime<Utc>>),
    Skip,
}

impl ReplyAction {
    /// Read an action name or digit. `new_time` only matters for
    /// `reschedule`.
    pub fn parse(action: &str, new_time: Option<&str>) -> EngineResult<Self> {
        match action.trim().to_ascii_lowercase().as_str() {
            "acknowledge" | "ack" | "done" | "1" => Ok(Self::Acknowledge),
            "skip" | "cancel" | "3" => Ok(Self::Skip),
            "snooze" | "2" => Ok(Self::Reschedule(None)),
            "reschedule" => match new_time.map(str::trim).filter(|s| !s.is_empty()) {
                Some(raw) => DateTime::parse_from_rfc3339(raw)
                    .map(|t| Self::Reschedule(Some(t.with_timezone(&Utc))))
                    .map_err(|e| {
                        EngineError::MalformedAction(format!("new_time {raw:?} is not RFC 3339: {e}"))
                    }),
                None => Ok(Self::Reschedule(None)),
            },
            "" => Err(EngineError::MalformedAction("empty action".into())),
            other => Err(EngineError::MalformedAction(format!("unknown action {other:?}"))),
        }
    }

    /// Concrete reschedule time for this action at `now`, or `None` for
    /// non-reschedule actions. A time not after `now` is malformed.
    pub fn reschedule_time(
        &self,
        now: DateTime<Utc>,
        snooze: Duration,
    ) -> EngineResult<Option<DateTime<Utc>>> {
        let Self::Reschedule(requested) = self else {
            return Ok(None);
        };
        let at = requested.unwrap_or(now + snooze);
        if at <= now {
            return Err(EngineError::MalformedAction(format!(
                "reschedule time {at} is not after {now}"
            )));
        }
        Ok(Some(at))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acknowledge => "acknowledge",
            Self::Reschedule(_) => "reschedule",
            Self::Skip => "skip",
        }
    }
}

/// Reply payload handed over by the webhook transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEvent {
    pub task_id: TaskId,
    /// Action name or keypress/DTMF digit
    pub action: String,
    /// RFC 3339 instant, for `reschedule`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_time: Option<String>,
    #[serde(default)]
    pub source: ReplySource,
}

impl ReplyEvent {
    pub fn new(task_id: impl Into<TaskId>, action: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            action: action.into(),
            new_time: None,
            source: ReplySource::default(),
        }
    }

    pub fn with_new_time(mut self, at: DateTime<Utc>) -> Self {
        self.new_time = Some(at.to_rfc3339());
        self
    }

    pub fn from_source(mut self, source: ReplySource) -> Self {
        self.source = source;
        self
    }

    pub fn parse_action(&self) -> EngineResult<ReplyAction> {
        ReplyAction::parse(&self.action, self.new_time.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn names_and_digits_map_to_actions() {
        for input in ["acknowledge", "ACK", " done ", "1"] {
            assert_eq!(ReplyAction::parse(input, None).unwrap(), ReplyAction::Acknowledge);
        }
        for input in ["skip", "cancel", "3"] {
            assert_eq!(ReplyAction::parse(input, None).unwrap(), ReplyAction::Skip);
        }
        for input in ["snooze", "2", "reschedule"] {
            assert_eq!(
                ReplyAction::parse(input, None).unwrap(),
                ReplyAction::Reschedule(None)
            );
        }
    }

    #[test]
    fn unknown_or_empty_action_is_malformed() {
        for input in ["", "  ", "later", "4", "*"] {
            let err = ReplyAction::parse(input, None).unwrap_err();
            assert_eq!(err.kind(), "malformed_action", "{input:?}");
        }
    }

    #[test]
    fn reschedule_reads_rfc3339_time() {
        let action = ReplyAction::parse("reschedule", Some("2026-03-02T09:00:00+02:00")).unwrap();
        assert_eq!(
            action,
            ReplyAction::Reschedule(Some(Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap()))
        );
        assert!(ReplyAction::parse("reschedule", Some("tomorrow")).is_err());
    }

    #[test]
    fn snooze_resolves_relative_to_now() {
        let snooze = Duration::seconds(900);
        let at = ReplyAction::Reschedule(None)
            .reschedule_time(now(), snooze)
            .unwrap();
        assert_eq!(at, Some(now() + snooze));
        assert_eq!(ReplyAction::Acknowledge.reschedule_time(now(), snooze).unwrap(), None);
    }

    #[test]
    fn reschedule_into_the_past_is_malformed() {
        let err = ReplyAction::Reschedule(Some(now()))
            .reschedule_time(now(), Duration::seconds(900))
            .unwrap_err();
        assert_eq!(err.kind(), "malformed_action");
    }

    #[test]
    fn event_defaults_to_app_source() {
        let event: ReplyEvent = serde_json::from_str(r#"{"task_id":"t-1","action":"1"}"#).unwrap();
        assert_eq!(event.source, ReplySource::App);
        assert_eq!(event.parse_action().unwrap(), ReplyAction::Acknowledge);
    }
}
