//! The control-flow trace: event variants, uid allocation, the append-only
//! log.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Process-wide monotonically increasing event identifier. Total order over
/// uids equals the order of observation.
pub type EventUid = u64;

/// A source position, keyed by file name rather than path: the instrumented
/// program is staged into one flat directory, so names are unambiguous.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct LineRef {
    pub filename: String,
    pub line: i32,
}

impl LineRef {
    pub fn new(filename: impl Into<String>, line: i32) -> Self {
        Self {
            filename: filename.into(),
            line,
        }
    }
}

impl fmt::Display for LineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.line)
    }
}

/// Rendered local variables visible at a stop, keyed by name. A `None` value
/// means that one variable failed to render; a `None` map on the event means
/// the whole frame was unreadable.
pub type VisibleVars = BTreeMap<String, Option<String>>;

/// Rendered formal arguments in declaration order.
pub type RenderedArgs = Vec<(String, Option<String>)>;

/// One observed control-flow fact. Closed set: adding a variant is a
/// compile-checked change at every `match` site, including the renderer.
///
/// Every variant carries its `uid` and `parent`, the uid of the `FunCall`
/// event for the dynamically enclosing call (`None` at top level). The
/// parent link is a back-reference for tree reconstruction, never an
/// ownership relation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ControlFlowEvent {
    LineVisited {
        uid: EventUid,
        parent: Option<EventUid>,
        line: LineRef,
        visible_vars: Option<VisibleVars>,
    },
    FunCall {
        uid: EventUid,
        parent: Option<EventUid>,
        fun_id: String,
        args: Option<RenderedArgs>,
    },
    FunExit {
        uid: EventUid,
        parent: Option<EventUid>,
        fun_id: String,
        ret_val: Option<String>,
    },
    LoopEnter {
        uid: EventUid,
        parent: Option<EventUid>,
        loop_line: LineRef,
    },
    LoopNewIter {
        uid: EventUid,
        parent: Option<EventUid>,
        loop_line: LineRef,
    },
    LoopExit {
        uid: EventUid,
        parent: Option<EventUid>,
        loop_line: LineRef,
    },
    NewVarDefined {
        uid: EventUid,
        parent: Option<EventUid>,
        var_name: String,
        value: Option<String>,
    },
    VarSet {
        uid: EventUid,
        parent: Option<EventUid>,
        var_name: String,
        value: Option<String>,
    },
    FieldSet {
        uid: EventUid,
        parent: Option<EventUid>,
        owner: String,
        field: String,
        value: String,
    },
}

impl ControlFlowEvent {
    pub fn uid(&self) -> EventUid {
        match self {
            Self::LineVisited { uid, .. }
            | Self::FunCall { uid, .. }
            | Self::FunExit { uid, .. }
            | Self::LoopEnter { uid, .. }
            | Self::LoopNewIter { uid, .. }
            | Self::LoopExit { uid, .. }
            | Self::NewVarDefined { uid, .. }
            | Self::VarSet { uid, .. }
            | Self::FieldSet { uid, .. } => *uid,
        }
    }

    pub fn parent(&self) -> Option<EventUid> {
        match self {
            Self::LineVisited { parent, .. }
            | Self::FunCall { parent, .. }
            | Self::FunExit { parent, .. }
            | Self::LoopEnter { parent, .. }
            | Self::LoopNewIter { parent, .. }
            | Self::LoopExit { parent, .. }
            | Self::NewVarDefined { parent, .. }
            | Self::VarSet { parent, .. }
            | Self::FieldSet { parent, .. } => *parent,
        }
    }
}

struct ParentRef(Option<EventUid>);

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(uid) => write!(f, "{uid}"),
            None => f.write_str("-"),
        }
    }
}

impl fmt::Display for ControlFlowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = |f: &mut fmt::Formatter<'_>, uid: &EventUid, parent: &Option<EventUid>| {
            write!(f, "[{uid} ({})]", ParentRef(*parent))
        };
        match self {
            Self::LineVisited {
                uid,
                parent,
                line,
                visible_vars,
            } => {
                head(f, uid, parent)?;
                write!(f, " VISIT {line} => ")?;
                match visible_vars {
                    Some(vars) => {
                        f.write_str("{ ")?;
                        for (i, (name, value)) in vars.iter().enumerate() {
                            if i > 0 {
                                f.write_str(", ")?;
                            }
                            write!(f, "{name} = {}", value.as_deref().unwrap_or("??"))?;
                        }
                        f.write_str(" }")
                    }
                    None => f.write_str("<?? missing vars>"),
                }
            }
            Self::FunCall {
                uid,
                parent,
                fun_id,
                args,
            } => {
                head(f, uid, parent)?;
                write!(f, " CALL {fun_id}")?;
                match args {
                    Some(args) => {
                        f.write_str("(")?;
                        for (i, (name, value)) in args.iter().enumerate() {
                            if i > 0 {
                                f.write_str(",")?;
                            }
                            write!(f, "{name} = {}", value.as_deref().unwrap_or("<??>"))?;
                        }
                        f.write_str(")")
                    }
                    None => f.write_str("<?? missing args>"),
                }
            }
            Self::FunExit {
                uid,
                parent,
                fun_id,
                ret_val,
            } => {
                head(f, uid, parent)?;
                write!(
                    f,
                    " EXIT {fun_id} --> return {}",
                    ret_val.as_deref().unwrap_or("??")
                )
            }
            Self::LoopEnter {
                uid,
                parent,
                loop_line,
            } => {
                head(f, uid, parent)?;
                write!(f, " LOOP-ENTER {loop_line}")
            }
            Self::LoopNewIter {
                uid,
                parent,
                loop_line,
            } => {
                head(f, uid, parent)?;
                write!(f, " LOOP-ITER {loop_line}")
            }
            Self::LoopExit {
                uid,
                parent,
                loop_line,
            } => {
                head(f, uid, parent)?;
                write!(f, " LOOP-EXIT {loop_line}")
            }
            Self::NewVarDefined {
                uid,
                parent,
                var_name,
                value,
            } => {
                head(f, uid, parent)?;
                write!(f, " VAR-DEF {var_name} = {}", value.as_deref().unwrap_or("??"))
            }
            Self::VarSet {
                uid,
                parent,
                var_name,
                value,
            } => {
                head(f, uid, parent)?;
                write!(f, " VAR-SET {var_name} = {}", value.as_deref().unwrap_or("??"))
            }
            Self::FieldSet {
                uid,
                parent,
                owner,
                field,
                value,
            } => {
                head(f, uid, parent)?;
                write!(f, " FIELD-SET {owner}.{field} = {value}")
            }
        }
    }
}

/// Append-only ordered event log owning the uid allocator. Uids start at 1
/// and are assigned at append time, so append order and uid order coincide
/// by construction.
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct Trace {
    events: Vec<ControlFlowEvent>,
    #[serde(skip)]
    next_uid: EventUid,
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

impl Trace {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            next_uid: 1,
        }
    }

    /// Allocates the next uid, builds the event with it, and appends. The
    /// builder must store the uid it is given.
    pub fn record(&mut self, build: impl FnOnce(EventUid) -> ControlFlowEvent) -> EventUid {
        let uid = self.next_uid;
        self.next_uid += 1;
        let event = build(uid);
        debug_assert_eq!(event.uid(), uid);
        self.events.push(event);
        uid
    }

    pub fn events(&self) -> &[ControlFlowEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uids_are_monotonic_and_match_append_order() {
        let mut trace = Trace::new();
        for i in 0..5 {
            trace.record(|uid| ControlFlowEvent::LineVisited {
                uid,
                parent: None,
                line: LineRef::new("Main.java", i),
                visible_vars: None,
            });
        }
        let uids: Vec<_> = trace.events().iter().map(ControlFlowEvent::uid).collect();
        assert_eq!(uids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn display_forms() {
        let mut vars = VisibleVars::new();
        vars.insert("x".to_string(), Some("5".to_string()));
        vars.insert("y".to_string(), None);
        let visit = ControlFlowEvent::LineVisited {
            uid: 3,
            parent: Some(1),
            line: LineRef::new("Main.java", 12),
            visible_vars: Some(vars),
        };
        assert_eq!(
            visit.to_string(),
            "[3 (1)] VISIT Main.java:12 => { x = 5, y = ?? }"
        );

        let call = ControlFlowEvent::FunCall {
            uid: 4,
            parent: None,
            fun_id: "helper".to_string(),
            args: Some(vec![("x".to_string(), Some("5".to_string()))]),
        };
        assert_eq!(call.to_string(), "[4 (-)] CALL helper(x = 5)");

        let exit = ControlFlowEvent::FunExit {
            uid: 5,
            parent: None,
            fun_id: "helper".to_string(),
            ret_val: Some("10".to_string()),
        };
        assert_eq!(exit.to_string(), "[5 (-)] EXIT helper --> return 10");
    }

    #[test]
    fn unreadable_frame_displays_as_missing() {
        let visit = ControlFlowEvent::LineVisited {
            uid: 1,
            parent: None,
            line: LineRef::new("Main.java", 1),
            visible_vars: None,
        };
        assert_eq!(visit.to_string(), "[1 (-)] VISIT Main.java:1 => <?? missing vars>");
    }
}
