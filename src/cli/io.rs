//! JSON-lines I/O for the CLI
//!
//! - Input: one JSON object per line; blank lines are skipped
//! - Output: one JSON object per line, `{"status": "ok", "data": ...}` or
//!   `{"status": "error", "code": ..., "message": ...}`

use std::io::{BufRead, Write};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::errors::{CliError, CliResult};

/// Parses each non-blank line of `reader` as a `T`.
pub fn read_requests<R: BufRead, T: DeserializeOwned>(
    reader: R,
) -> impl Iterator<Item = CliResult<T>> {
    reader
        .lines()
        .filter(|line| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
        .map(|line| {
            let line = line.map_err(CliError::from)?;
            serde_json::from_str(&line).map_err(CliError::from)
        })
}

/// Write a success response line
pub fn write_response<W: Write>(writer: &mut W, data: Value) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "ok",
        "data": data
    });
    serde_json::to_writer(&mut *writer, &response)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Write an error response line
pub fn write_error<W: Write>(writer: &mut W, code: &str, message: &str) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    });
    serde_json::to_writer(&mut *writer, &response)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_requests_skips_blank_lines() {
        let input = "{\"a\": 1}\n\n{\"a\": 2}\n";
        let values: Vec<Value> = read_requests(input.as_bytes())
            .collect::<CliResult<_>>()
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1]["a"], 2);
    }

    #[test]
    fn test_response_lines() {
        let mut out = Vec::new();
        write_response(&mut out, serde_json::json!({"x": 1})).unwrap();
        write_error(&mut out, "E", "boom").unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0]["status"], "ok");
        assert_eq!(lines[0]["data"]["x"], 1);
        assert_eq!(lines[1]["code"], "E");
    }
}
