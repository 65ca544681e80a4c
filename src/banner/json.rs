//! JSON parsing utilities for the Banner API client.

use anyhow::Result;

/// Attempt to parse JSON, reporting the path to the mismatched field and a
/// snippet of the offending line on failure. This keeps huge JSON bodies out
/// of the logs while still pinpointing shape drift.
pub fn parse_json_with_context<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let deserializer = &mut serde_json::Deserializer::from_str(body);
    match serde_path_to_error::deserialize::<_, T>(deserializer) {
        Ok(value) => Ok(value),
        Err(err) => {
            let path = err.path().to_string();
            let inner = err.into_inner();
            let (line, column) = (inner.line(), inner.column());
            let snippet = build_error_snippet(body, line, column, 80);
            Err(anyhow::anyhow!(
                "{inner} at {path} (line {line}, column {column})\nSnippet:\n{snippet}",
            ))
        }
    }
}

fn build_error_snippet(body: &str, line: usize, column: usize, context_len: usize) -> String {
    let target_line = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if target_line.is_empty() {
        return "(empty line)".to_string();
    }

    // column is 1-based, convert to 0-based for slicing
    let error_idx = column.saturating_sub(1).min(target_line.len());

    let half_len = context_len / 2;
    let start = error_idx.saturating_sub(half_len);
    let end = (error_idx + half_len).min(target_line.len());

    // Snap to char boundaries so slicing can't panic on multi-byte text.
    let start = (0..=start).rev().find(|i| target_line.is_char_boundary(*i)).unwrap_or(0);
    let end = (end..=target_line.len())
        .find(|i| target_line.is_char_boundary(*i))
        .unwrap_or(target_line.len());

    let slice = &target_line[start..end];
    let indicator = " ".repeat(error_idx.saturating_sub(start)) + "^";

    format!("...{slice}...\n   {indicator}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize, Debug)]
    struct Sample {
        #[allow(dead_code)]
        count: i32,
    }

    #[test]
    fn valid_json_parses() {
        let value: Sample = parse_json_with_context(r#"{"count": 3}"#).unwrap();
        assert_eq!(value.count, 3);
    }

    #[test]
    fn error_includes_path_and_snippet() {
        let err = parse_json_with_context::<Sample>(r#"{"count": "three"}"#).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("count"), "missing path in: {msg}");
        assert!(msg.contains("Snippet"), "missing snippet in: {msg}");
    }
}
