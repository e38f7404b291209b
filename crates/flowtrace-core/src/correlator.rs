//! Call-stack correlator: attributes every trace event to its dynamically
//! enclosing call.

use crate::error::{Result, SessionError};
use crate::trace::EventUid;

/// Stack of uids of unmatched `FunCall` events. The top is the current
/// parent for anything recorded while execution sits inside that call.
#[derive(Debug, Default)]
pub struct CallStack {
    stack: Vec<EventUid>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushed after the corresponding `FunCall` event is appended, so events
    /// nested inside the call see it as their parent.
    pub fn push(&mut self, uid: EventUid) {
        self.stack.push(uid);
    }

    /// Uid of the innermost unmatched call, `None` at top level.
    pub fn current(&self) -> Option<EventUid> {
        self.stack.last().copied()
    }

    /// Pops the entry matching a method exit. Entry/exit events are paired
    /// by the VM, so an empty stack here means the engine missed an entry
    /// and the trace is unsound.
    pub fn pop(&mut self, fun_id: &str) -> Result<EventUid> {
        self.stack.pop().ok_or_else(|| SessionError::UnmatchedReturn {
            fun_id: fun_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_tracks_nesting() {
        let mut stack = CallStack::new();
        assert_eq!(stack.current(), None);
        stack.push(1);
        stack.push(4);
        assert_eq!(stack.current(), Some(4));
        assert_eq!(stack.pop("inner").unwrap(), 4);
        assert_eq!(stack.current(), Some(1));
        assert_eq!(stack.pop("outer").unwrap(), 1);
        assert_eq!(stack.current(), None);
    }

    #[test]
    fn pop_on_empty_stack_is_fatal() {
        let mut stack = CallStack::new();
        let err = stack.pop("main").unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnmatchedReturn { fun_id } if fun_id == "main"
        ));
    }
}
