//! Lightweight Java source scanner.
//!
//! The engine only needs the names of the types each file declares, so this
//! is a declaration scanner, not a parser: it strips comments and literals,
//! then picks up `class` / `interface` / `enum` / `record` declarations.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::scope::InstrumentationScope;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no type declarations found in {path}")]
    NoTypes { path: PathBuf },
}

/// Builds the instrumentation scope from a set of `.java` files. Every file
/// must declare at least one type; a file that declares none is almost
/// always a wrong path on the command line.
pub fn scan_sources(paths: &[PathBuf]) -> Result<InstrumentationScope, ScanError> {
    let mut scope = InstrumentationScope::new();
    for path in paths {
        let text = std::fs::read_to_string(path).map_err(|source| ScanError::Read {
            path: path.clone(),
            source,
        })?;
        let filename = file_name(path);
        let types = declared_types(&text);
        if types.is_empty() {
            return Err(ScanError::NoTypes { path: path.clone() });
        }
        for type_name in types {
            scope.add_type(type_name, filename.clone());
        }
    }
    Ok(scope)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Type names declared in one source text, in declaration order.
pub fn declared_types(source: &str) -> Vec<String> {
    let stripped = strip_comments_and_literals(source);
    let mut names = Vec::new();
    let mut tokens = stripped.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if matches!(token, "class" | "interface" | "enum" | "record") {
            if let Some(next) = tokens.peek() {
                let name: String = next
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
                    .collect();
                if !name.is_empty() && !name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                    names.push(name);
                }
            }
        }
    }
    names
}

/// Replaces comments and string/char literals with spaces so keyword
/// scanning cannot match inside them. Positions are preserved, not that the
/// scanner needs them.
fn strip_comments_and_literals(source: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Str,
        Chr,
    }
    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment;
                }
                '"' => {
                    out.push(' ');
                    state = State::Str;
                }
                '\'' => {
                    out.push(' ');
                    state = State::Chr;
                }
                _ => out.push(c),
            },
            State::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Code;
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else {
                    out.push(if c == '\n' { '\n' } else { ' ' });
                }
            }
            State::Str | State::Chr => {
                let terminator = if state == State::Str { '"' } else { '\'' };
                if c == '\\' {
                    chars.next();
                    out.push_str("  ");
                } else if c == terminator {
                    out.push(' ');
                    state = State::Code;
                } else {
                    out.push(' ');
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_declarations() {
        let src = r#"
            public class Main {
                static class Helper {}
            }
            interface Greeter {}
            enum Color { RED }
            record Point(int x, int y) {}
        "#;
        assert_eq!(
            declared_types(src),
            vec!["Main", "Helper", "Greeter", "Color", "Point"]
        );
    }

    #[test]
    fn ignores_keywords_in_comments_and_strings() {
        let src = r#"
            // class NotReal
            /* enum AlsoNot */
            public class Real {
                String s = "class Fake";
                char c = 'x';
            }
        "#;
        assert_eq!(declared_types(src), vec!["Real"]);
    }

    #[test]
    fn generic_declarations_keep_only_the_name() {
        let src = "class Box<T> {}";
        assert_eq!(declared_types(src), vec!["Box"]);
    }
}
