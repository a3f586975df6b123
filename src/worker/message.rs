use serde::Deserialize;

use super::WorkerError;

/// Messages a page can post to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    SkipWaiting,
    ClearCache,
}

impl ControlMessage {
    pub fn parse(raw: &str) -> Result<Self, WorkerError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_messages() {
        assert_eq!(
            ControlMessage::parse(r#"{"type":"SKIP_WAITING"}"#).expect("skip"),
            ControlMessage::SkipWaiting
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"CLEAR_CACHE"}"#).expect("clear"),
            ControlMessage::ClearCache
        );
    }

    #[test]
    fn rejects_unknown_messages() {
        assert!(matches!(
            ControlMessage::parse(r#"{"type":"RELOAD"}"#),
            Err(WorkerError::Message(_))
        ));
    }
}
