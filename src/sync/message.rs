// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire format for cross-shard statistic updates.
//!
//! ```json
//! {"entityId": 42, "stat": "Donated", "value": 50}
//! ```
//!
//! Inbound payloads are untrusted. [`CrossServerMessage::from_value`] checks
//! each field and reports the first problem; callers drop the message.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::identity::EntityId;
use crate::stats::record::{parse_stat_value, StatKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("payload is not an object")]
    NotAnObject,
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("invalid entity id: {0}")]
    InvalidEntity(String),
    #[error("unknown stat '{0}'")]
    UnknownStat(String),
    #[error("invalid stat value: {0}")]
    InvalidValue(String),
}

impl ValidationError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotAnObject => "not_object",
            Self::MissingField(_) => "missing_field",
            Self::InvalidEntity(_) => "invalid_entity",
            Self::UnknownStat(_) => "unknown_stat",
            Self::InvalidValue(_) => "invalid_value",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossServerMessage {
    pub entity_id: EntityId,
    pub stat: StatKind,
    pub value: u64,
}

impl CrossServerMessage {
    pub fn new(entity_id: EntityId, stat: StatKind, value: u64) -> Self {
        Self { entity_id, stat, value }
    }

    /// Validate an inbound payload.
    pub fn from_value(payload: &Value) -> Result<Self, ValidationError> {
        let fields = payload.as_object().ok_or(ValidationError::NotAnObject)?;

        let raw_id = fields.get("entityId").ok_or(ValidationError::MissingField("entityId"))?;
        let entity_id = raw_id
            .as_u64()
            .and_then(EntityId::new)
            .ok_or_else(|| ValidationError::InvalidEntity(raw_id.to_string()))?;

        let raw_stat = fields.get("stat").ok_or(ValidationError::MissingField("stat"))?;
        let stat = raw_stat
            .as_str()
            .ok_or_else(|| ValidationError::UnknownStat(raw_stat.to_string()))?
            .parse::<StatKind>()
            .map_err(ValidationError::UnknownStat)?;

        let raw_value = fields.get("value").ok_or(ValidationError::MissingField("value"))?;
        let value = parse_stat_value(raw_value).ok_or_else(|| ValidationError::InvalidValue(raw_value.to_string()))?;

        Ok(Self { entity_id, stat, value })
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "entityId": self.entity_id.get(),
            "stat": self.stat.as_str(),
            "value": self.value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_message() {
        let msg = CrossServerMessage::from_value(&json!({"entityId": 42, "stat": "Donated", "value": 50})).unwrap();
        assert_eq!(msg, CrossServerMessage::new(EntityId::new(42).unwrap(), StatKind::Donated, 50));
        assert_eq!(CrossServerMessage::from_value(&msg.to_value()), Ok(msg));
    }

    #[test]
    fn test_float_values_are_floored() {
        let msg = CrossServerMessage::from_value(&json!({"entityId": 1, "stat": "Raised", "value": 7.8})).unwrap();
        assert_eq!(msg.value, 7);
    }

    #[test]
    fn test_rejections() {
        let cases = [
            (json!("text"), "not_object"),
            (json!({"stat": "Donated", "value": 1}), "missing_field"),
            (json!({"entityId": 0, "stat": "Donated", "value": 1}), "invalid_entity"),
            (json!({"entityId": -5, "stat": "Donated", "value": 1}), "invalid_entity"),
            (json!({"entityId": "42", "stat": "Donated", "value": 1}), "invalid_entity"),
            (json!({"entityId": 42, "stat": "Coins", "value": 1}), "unknown_stat"),
            (json!({"entityId": 42, "stat": 3, "value": 1}), "unknown_stat"),
            (json!({"entityId": 42, "stat": "Donated", "value": -1}), "invalid_value"),
            (json!({"entityId": 42, "stat": "Donated", "value": "50"}), "invalid_value"),
        ];
        for (payload, reason) in cases {
            let err = CrossServerMessage::from_value(&payload).unwrap_err();
            assert_eq!(err.reason(), reason, "payload {}", payload);
        }
    }

    #[test]
    fn test_serde_uses_camel_case() {
        let msg = CrossServerMessage::new(EntityId::new(3).unwrap(), StatKind::Visits, 2);
        assert_eq!(serde_json::to_value(msg).unwrap(), json!({"entityId": 3, "stat": "Visits", "value": 2}));
    }
}
