//! Trace export: pretty-printed JSON, one finished trace per file.

use std::path::Path;

use crate::trace::Trace;

/// Writes the trace as pretty JSON, creating parent directories as needed.
/// Overwrites an existing file; re-running the tracer replaces the previous
/// trace for the same program.
pub fn write_json(path: &Path, trace: &Trace) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(trace)?;
    std::fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{ControlFlowEvent, LineRef};

    #[test]
    fn writes_pretty_json_and_creates_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("trace").join("Main-trace.json");

        let mut trace = Trace::new();
        trace.record(|uid| ControlFlowEvent::FunCall {
            uid,
            parent: None,
            fun_id: "main".to_string(),
            args: Some(vec![]),
        });
        trace.record(|uid| ControlFlowEvent::LineVisited {
            uid,
            parent: Some(1),
            line: LineRef::new("Main.java", 3),
            visible_vars: None,
        });

        write_json(&path, &trace).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        let events = parsed.as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "FunCall");
        assert_eq!(events[0]["uid"], 1);
        assert_eq!(events[1]["type"], "LineVisited");
        assert_eq!(events[1]["parent"], 1);
        assert!(text.contains('\n'), "expected pretty printing");
    }
}
