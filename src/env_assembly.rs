//! Assembles the environment a child process is spawned with (§4.1 step 8, §6 grammar).
//!
//! Precedence, lowest to highest: inherited process environment, then the service's
//! env file, then its inline JSON env map. `PORT` and `ENVIRONMENT` are filled in from
//! the service definition only if nothing earlier in the chain already set them.

use crate::log;
use crate::logger::LogLevel;
use crate::service::ServiceDefinition;
use std::collections::HashMap;

/// Parses an env-file's contents per the grammar in §6:
/// `line := blank | comment | assignment`, `assignment := key '=' value`, where `value`
/// may be bare, single-quoted, or double-quoted (no escape processing inside quotes).
pub fn parse_env_file(contents: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), unquote(value.trim()));
    }
    vars
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

/// Stringifies one leaf of the inline env JSON object per §6's grammar: strings pass
/// through unquoted, numbers and booleans render as their textual form, and null becomes
/// the empty string. Arrays/objects (not part of the declared grammar) fall back to their
/// JSON text so nothing is silently dropped.
fn stringify_json_value(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Builds the full environment map for a service's child process, given the contents
/// of its env file (already read by the caller, if declared) and the process's own
/// inherited environment.
pub fn assemble_env(
    definition: &ServiceDefinition,
    env_file_contents: Option<&str>,
    inherited: impl IntoIterator<Item = (String, String)>,
) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = inherited.into_iter().collect();

    if let Some(contents) = env_file_contents {
        vars.extend(parse_env_file(contents));
    }

    if let Some(json) = &definition.env_json {
        match serde_json::from_str::<HashMap<String, serde_json::Value>>(json) {
            Ok(inline) => vars.extend(
                inline
                    .into_iter()
                    .map(|(key, value)| (key, stringify_json_value(value))),
            ),
            Err(e) => log!(
                LogLevel::Warn,
                "Failed to parse inline env JSON for '{}': {}",
                definition.id,
                e
            ),
        }
    }

    if let Some(port) = definition.port {
        vars.entry("PORT".to_string()).or_insert_with(|| port.to_string());
    }

    if let Some(environment) = definition.environment {
        vars.entry("ENVIRONMENT".to_string())
            .or_insert_with(|| environment.to_string());
    }

    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{EnvironmentTag, ServiceType};

    #[test]
    fn parses_quoted_and_bare_and_comment_lines() {
        let contents = "# a comment\nBARE=value\nDQ=\"hello world\"\nSQ='single quoted'\n\nTRAILING = padded \n";
        let vars = parse_env_file(contents);
        assert_eq!(vars.get("BARE").unwrap(), "value");
        assert_eq!(vars.get("DQ").unwrap(), "hello world");
        assert_eq!(vars.get("SQ").unwrap(), "single quoted");
        assert_eq!(vars.get("TRAILING").unwrap(), "padded");
        assert_eq!(vars.len(), 4);
    }

    #[test]
    fn precedence_inline_over_file_over_inherited() {
        let mut def = ServiceDefinition::new("svc", ServiceType::Backend, "/tmp");
        def.env_json = Some(r#"{"KEY":"inline"}"#.to_string());

        let inherited = vec![("KEY".to_string(), "inherited".to_string())];
        let vars = assemble_env(&def, Some("KEY=fromfile\n"), inherited);

        assert_eq!(vars.get("KEY").unwrap(), "inline");
    }

    #[test]
    fn inline_json_stringifies_non_string_leaves() {
        let mut def = ServiceDefinition::new("svc", ServiceType::Backend, "/tmp");
        def.env_json = Some(r#"{"PORT":8080,"DEBUG":true,"FOO":null,"NAME":"svc"}"#.to_string());

        let vars = assemble_env(&def, None, std::iter::empty());

        assert_eq!(vars.get("PORT").unwrap(), "8080");
        assert_eq!(vars.get("DEBUG").unwrap(), "true");
        assert_eq!(vars.get("FOO").unwrap(), "");
        assert_eq!(vars.get("NAME").unwrap(), "svc");
    }

    #[test]
    fn port_and_environment_defaults_only_apply_when_unset() {
        let mut def = ServiceDefinition::new("svc", ServiceType::Backend, "/tmp");
        def.port = Some(8080);
        def.environment = Some(EnvironmentTag::Staging);

        let inherited = vec![("PORT".to_string(), "9999".to_string())];
        let vars = assemble_env(&def, None, inherited);

        assert_eq!(vars.get("PORT").unwrap(), "9999");
        assert_eq!(vars.get("ENVIRONMENT").unwrap(), "staging");
    }
}
