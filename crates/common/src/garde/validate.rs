use crate::domain::DomainError;
use garde::{Report, Validate};

/// Convert garde validation report to DomainError
pub fn validate_struct<T>(value: &T) -> Result<(), DomainError>
where
    T: Validate,
    T::Context: Default,
{
    value
        .validate()
        .map_err(|report| DomainError::ValidationError(format_validation_errors(&report)))
}

/// Names of the fields that failed validation, in report order, without duplicates
pub fn failed_fields(report: &Report) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for (path, _) in report.iter() {
        let field = path.to_string();
        if !field.is_empty() && !fields.contains(&field) {
            fields.push(field);
        }
    }
    fields
}

/// Format validation errors from garde Report into a human-readable string
fn format_validation_errors(report: &Report) -> String {
    report
        .iter()
        .map(|(path, error)| {
            if path.to_string().is_empty() {
                error.message().to_string()
            } else {
                format!("{}: {}", path, error.message())
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use garde::Validate;

    #[derive(Validate)]
    struct TestRequest {
        #[garde(length(min = 1))]
        field: String,
        #[garde(required, length(min = 1))]
        other: Option<String>,
    }

    #[test]
    fn test_validate_success() {
        let request = TestRequest {
            field: "value".to_string(),
            other: Some("value".to_string()),
        };
        assert!(validate_struct(&request).is_ok());
    }

    #[test]
    fn test_validate_failure() {
        let request = TestRequest {
            field: "".to_string(),
            other: Some("value".to_string()),
        };
        let result = validate_struct(&request);
        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }

    #[test]
    fn test_validate_error_message_contains_field_info() {
        let request = TestRequest {
            field: "".to_string(),
            other: Some("value".to_string()),
        };
        if let Err(DomainError::ValidationError(msg)) = validate_struct(&request) {
            assert!(msg.contains("field"));
        } else {
            panic!("Expected ValidationError");
        }
    }

    #[test]
    fn test_failed_fields_lists_each_field_once() {
        let request = TestRequest {
            field: "".to_string(),
            other: None,
        };
        let report = request.validate().unwrap_err();
        let fields = failed_fields(&report);
        assert_eq!(fields, vec!["field".to_string(), "other".to_string()]);
    }
}
