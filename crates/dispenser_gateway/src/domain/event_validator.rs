use common::domain::{
    is_present, DeviceEvent, DeviceId, DomainError, DomainResult, EventType, PresentedToken,
};
use garde::Validate;
use serde_json::Value;
use tracing::warn;

const ID_FIELD: &str = "id";
const TOKEN_FIELD: &str = "token";
const TYPE_FIELD: &str = "type";

/// The three fields every event must carry, before any interpretation
#[derive(Debug, Validate)]
struct RequiredFields {
    #[garde(required)]
    id: Option<DeviceId>,
    #[garde(required)]
    token: Option<PresentedToken>,
    #[garde(required, length(min = 1))]
    event_type: Option<String>,
}

/// Structural and type-legality checks on a decoded event body.
/// Runs before authentication and has no side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventValidator;

impl EventValidator {
    pub fn new() -> Self {
        Self
    }

    /// Returns the validated event, `MissingField` when `id`, `token` or `type`
    /// is absent or empty, or `IllegalType` when `type` is not a known event.
    pub fn validate(&self, body: &Value) -> DomainResult<DeviceEvent> {
        let Some(object) = body.as_object() else {
            warn!("Request rejected: event body is not a JSON object");
            return Err(DomainError::MissingField(
                [ID_FIELD, TOKEN_FIELD, TYPE_FIELD].join(", "),
            ));
        };

        let required = RequiredFields {
            id: object.get(ID_FIELD).and_then(DeviceId::from_json),
            token: object.get(TOKEN_FIELD).and_then(presented_token),
            event_type: object.get(TYPE_FIELD).and_then(type_text),
        };

        if let Err(report) = required.validate() {
            let fields = common::garde::failed_fields(&report)
                .iter()
                .map(|field| wire_name(field))
                .collect::<Vec<_>>()
                .join(", ");
            warn!(fields = %fields, "Request rejected: required field absent");
            return Err(DomainError::MissingField(fields));
        }

        let (Some(device_id), Some(token), Some(event_type)) =
            (required.id, required.token, required.event_type)
        else {
            return Err(DomainError::MissingField(
                [ID_FIELD, TOKEN_FIELD, TYPE_FIELD].join(", "),
            ));
        };

        let event_type = event_type.parse::<EventType>().map_err(|e| {
            warn!(event_type = %event_type, "Request rejected: invalid event type");
            e
        })?;

        let payload = object
            .iter()
            .filter(|(key, _)| ![ID_FIELD, TOKEN_FIELD, TYPE_FIELD].contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(DeviceEvent {
            device_id,
            token,
            event_type,
            payload,
        })
    }
}

/// A present non-string token is kept so it fails authentication rather
/// than validation.
fn presented_token(value: &Value) -> Option<PresentedToken> {
    if !is_present(value) {
        return None;
    }
    Some(match value {
        Value::String(token) => PresentedToken::Text(token.clone()),
        _ => PresentedToken::NonText,
    })
}

/// `type` as text. A present non-string value surfaces as an illegal type.
fn type_text(value: &Value) -> Option<String> {
    if !is_present(value) {
        return None;
    }
    Some(match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn wire_name(field: &str) -> &str {
    match field {
        "event_type" => TYPE_FIELD,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_startup_event() {
        let event = EventValidator::new()
            .validate(&json!({"id": 1, "token": "42x5yz", "type": "STARTUP"}))
            .unwrap();

        assert_eq!(event.device_id, DeviceId::new("1"));
        assert_eq!(event.token, PresentedToken::from("42x5yz"));
        assert_eq!(event.event_type, EventType::Startup);
        assert!(event.payload.is_empty());
    }

    #[test]
    fn test_extra_fields_become_payload() {
        let event = EventValidator::new()
            .validate(&json!({"id": 1, "token": "42x5yz", "type": "DISPENSE", "quantity": 2}))
            .unwrap();

        assert_eq!(event.payload.len(), 1);
        assert_eq!(event.payload["quantity"], json!(2));
    }

    #[test]
    fn test_missing_id() {
        let result = EventValidator::new().validate(&json!({"token": "42x5yz", "type": "STARTUP"}));
        match result {
            Err(DomainError::MissingField(fields)) => assert_eq!(fields, "id"),
            other => panic!("Expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_type_reports_wire_name() {
        let result = EventValidator::new().validate(&json!({"id": 1, "token": "42x5yz"}));
        match result {
            Err(DomainError::MissingField(fields)) => assert_eq!(fields, "type"),
            other => panic!("Expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_falsy_values_count_as_missing() {
        for body in [
            json!({"id": 0, "token": "42x5yz", "type": "STARTUP"}),
            json!({"id": 1, "token": "", "type": "STARTUP"}),
            json!({"id": 1, "token": null, "type": "STARTUP"}),
            json!({"id": 1, "token": "42x5yz", "type": ""}),
            json!({"id": 1, "token": "42x5yz", "type": false}),
        ] {
            let result = EventValidator::new().validate(&body);
            assert!(
                matches!(result, Err(DomainError::MissingField(_))),
                "body {} should be rejected as missing a field",
                body
            );
        }
    }

    #[test]
    fn test_non_string_token_is_present() {
        let event = EventValidator::new()
            .validate(&json!({"id": 1, "token": 12345, "type": "STARTUP"}))
            .unwrap();

        assert_eq!(event.token, PresentedToken::NonText);
        assert_eq!(event.token.as_text(), None);
    }

    #[test]
    fn test_fractional_and_float_ids_are_present() {
        let fractional = EventValidator::new()
            .validate(&json!({"id": 1.5, "token": "42x5yz", "type": "STARTUP"}))
            .unwrap();
        let whole = EventValidator::new()
            .validate(&json!({"id": 1.0, "token": "42x5yz", "type": "STARTUP"}))
            .unwrap();

        assert_eq!(fractional.device_id, DeviceId::new("1.5"));
        assert_eq!(whole.device_id, DeviceId::new("1"));
    }

    #[test]
    fn test_all_fields_missing() {
        let result = EventValidator::new().validate(&json!({}));
        match result {
            Err(DomainError::MissingField(fields)) => assert_eq!(fields, "id, token, type"),
            other => panic!("Expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_non_object_body() {
        let result = EventValidator::new().validate(&json!(["STARTUP"]));
        assert!(matches!(result, Err(DomainError::MissingField(_))));
    }

    #[test]
    fn test_illegal_type() {
        let result =
            EventValidator::new().validate(&json!({"id": 1, "token": "42x5yz", "type": "FOO"}));
        assert!(matches!(result, Err(DomainError::IllegalType(t)) if t == "FOO"));
    }

    #[test]
    fn test_non_string_type_is_illegal_not_missing() {
        let result =
            EventValidator::new().validate(&json!({"id": 1, "token": "42x5yz", "type": 5}));
        assert!(matches!(result, Err(DomainError::IllegalType(_))));
    }

    #[test]
    fn test_missing_field_wins_over_illegal_type() {
        let result = EventValidator::new().validate(&json!({"id": 1, "type": "FOO"}));
        assert!(matches!(result, Err(DomainError::MissingField(_))));
    }
}
