use super::Value;

/// Render a value as a SQL literal.
///
/// Null becomes `NULL`, numbers stay bare, everything else is single-quoted
/// with embedded quotes doubled. Booleans use the `T`/`F` markers.
pub fn quote_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(_) | Value::Float(_) => value.to_string(),
        Value::Boolean(b) => quote_text(if *b { "T" } else { "F" }),
        other => quote_text(&other.to_key_string()),
    }
}

pub fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_rules() {
        assert_eq!(quote_literal(&Value::Null), "NULL");
        assert_eq!(quote_literal(&Value::Integer(1001)), "1001");
        assert_eq!(quote_literal(&Value::Float(2.5)), "2.5");
        assert_eq!(quote_literal(&Value::Text("CLOSED".into())), "'CLOSED'");
        assert_eq!(quote_literal(&Value::Text("O'Brien".into())), "'O''Brien'");
    }

    #[test]
    fn test_booleans_are_quoted_markers() {
        assert_eq!(quote_literal(&Value::Boolean(true)), "'T'");
        assert_eq!(quote_literal(&Value::Boolean(false)), "'F'");
    }

    #[test]
    fn test_numeric_text_stays_quoted() {
        assert_eq!(quote_literal(&Value::Text("42".into())), "'42'");
    }
}
