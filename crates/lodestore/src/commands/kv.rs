//! Key-value commands: get, set, delete, list.

use super::Session;
use serde_json::{Map, Value};

/// Format a value for the terminal: strings bare, everything else as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a command-line value, storing non-JSON text as a string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn get(session: &Session, key: &str, default: Option<&str>) -> anyhow::Result<()> {
    match (session.storage.get(key), default) {
        (Some(value), _) => println!("{}", display_value(&value)),
        (None, Some(default)) => println!("{default}"),
        (None, None) => anyhow::bail!("Key not found: {key}"),
    }
    Ok(())
}

pub async fn set(session: &Session, key: &str, raw: &str) -> anyhow::Result<()> {
    let value = parse_value(raw);
    let _ = session.storage.set(key, &value);
    session.storage.flush().await?;
    Ok(())
}

pub async fn delete(session: &Session, key: &str) -> anyhow::Result<()> {
    if !session.storage.contains_key(key) {
        eprintln!("Key not found: {key}");
        return Ok(());
    }
    let _ = session.storage.delete(key);
    session.storage.flush().await?;
    Ok(())
}

pub fn list(session: &Session, json: bool) -> anyhow::Result<()> {
    let keys = session.storage.keys();

    if json {
        let mut object = Map::new();
        for key in keys {
            if let Some(value) = session.storage.get(&key) {
                object.insert(key, value);
            }
        }
        println!("{}", serde_json::to_string_pretty(&Value::Object(object))?);
        return Ok(());
    }

    if keys.is_empty() {
        println!("(empty)");
        return Ok(());
    }
    for key in keys {
        if let Some(value) = session.storage.get(&key) {
            println!("{key}\t{}", value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("\"dark\""), json!("dark"));
        assert_eq!(parse_value("dark"), json!("dark"));
        assert_eq!(parse_value("{\"a\":[1]}"), json!({ "a": [1] }));
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&json!("dark")), "dark");
        assert_eq!(display_value(&json!(true)), "true");
        assert_eq!(display_value(&json!([1, 2])), "[1,2]");
    }
}
