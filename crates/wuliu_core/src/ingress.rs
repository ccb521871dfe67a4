use serde_json::Value;

/// Splits a raw broker payload into candidate records.
///
/// The source publishes either one record object or an array of them. Any
/// other JSON value is passed through as a single candidate and left for
/// the validator to reject.
pub fn parse_payload(payload: &[u8]) -> Result<Vec<Value>, serde_json::Error> {
    match serde_json::from_slice(payload)? {
        Value::Array(records) => Ok(records),
        record => Ok(vec![record]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_object() {
        let records = parse_payload(br#"{"index":5,"Occupied":true}"#).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["index"], 5);
    }

    #[test]
    fn test_array_of_objects() {
        let records = parse_payload(br#"[{"index":1},{"index":2},{"index":3}]"#).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2]["index"], 3);
    }

    #[test]
    fn test_empty_array() {
        assert!(parse_payload(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(parse_payload(b"{index: 5").is_err());
        assert!(parse_payload(b"").is_err());
    }
}
