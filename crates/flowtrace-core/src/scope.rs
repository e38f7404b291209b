//! Instrumentation scope: which declared types and source files the engine
//! monitors. Computed once before launch and immutable for the session.

use std::collections::BTreeMap;

/// Declared type names paired with their declaring source file names.
///
/// Type names select which loaded classes get method entry/exit
/// subscriptions; file names decide whether a stop location belongs to user
/// code or should be skipped as library/synthetic.
#[derive(Clone, Debug, Default)]
pub struct InstrumentationScope {
    /// type name (binary name, e.g. `Main` or `com.example.Foo`) -> file name
    types: BTreeMap<String, String>,
}

impl InstrumentationScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(&mut self, type_name: impl Into<String>, filename: impl Into<String>) {
        self.types.insert(type_name.into(), filename.into());
    }

    pub fn contains_type(&self, type_name: &str) -> bool {
        if self.types.contains_key(type_name) {
            return true;
        }
        // Nested classes load under their binary name (`Outer$Inner`); the
        // source scan records the declared simple name.
        match type_name.rsplit_once('$') {
            Some((_, inner)) if !inner.is_empty() => self.types.contains_key(inner),
            _ => false,
        }
    }

    pub fn contains_file(&self, filename: &str) -> bool {
        self.types.values().any(|f| f == filename)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership() {
        let mut scope = InstrumentationScope::new();
        scope.add_type("Main", "Main.java");
        scope.add_type("Aux", "Aux.java");
        assert!(scope.contains_type("Main"));
        assert!(!scope.contains_type("java.util.ArrayList"));
        assert!(scope.contains_file("Aux.java"));
        assert!(!scope.contains_file("ArrayList.java"));
    }

    #[test]
    fn nested_binary_names_match_their_declared_simple_name() {
        let mut scope = InstrumentationScope::new();
        scope.add_type("Main", "Main.java");
        scope.add_type("Helper", "Main.java");
        assert!(scope.contains_type("Main$Helper"));
        // Anonymous classes have no declared name and stay out of scope.
        assert!(!scope.contains_type("Main$1"));
    }
}
