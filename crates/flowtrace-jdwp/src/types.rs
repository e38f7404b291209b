use std::io;

use thiserror::Error;

pub type ObjectId = u64;
pub type ThreadId = u64;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type FrameId = u64;

pub type Result<T> = std::result::Result<T, JdwpError>;

#[derive(Debug, Error)]
pub enum JdwpError {
    #[error("JDWP handshake failed")]
    HandshakeFailed,
    #[error("JDWP protocol error: {0}")]
    Protocol(String),
    #[error("JDWP command failed with VM error code {0}")]
    VmError(u16),
    #[error("JDWP connection closed")]
    ConnectionClosed,
    #[error("JDWP request timed out")]
    Timeout,
    #[error("JDWP request cancelled")]
    Cancelled,
    #[error("failed to launch target VM: {0}")]
    Launch(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl JdwpError {
    /// True when the error means the target went away rather than a command
    /// being malformed or rejected.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Cancelled)
    }
}

/// JDWP `Error.ABSENT_INFORMATION`: the class was compiled without debug
/// attributes (no source file, line table, or variable table).
pub const ERROR_ABSENT_INFORMATION: u16 = 101;
/// JDWP `Error.INVALID_OBJECT`: the object has been garbage collected.
pub const ERROR_INVALID_OBJECT: u16 = 20;

/// Identifier sizes negotiated via `VirtualMachine.IDSizes`. Modern JVMs use
/// 8 bytes for everything, but the protocol allows smaller ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JdwpIdSizes {
    pub field_id: usize,
    pub method_id: usize,
    pub object_id: usize,
    pub reference_type_id: usize,
    pub frame_id: usize,
}

impl Default for JdwpIdSizes {
    fn default() -> Self {
        Self {
            field_id: 8,
            method_id: 8,
            object_id: 8,
            reference_type_id: 8,
            frame_id: 8,
        }
    }
}

/// A raw JDWP value. `Char` keeps the UTF-16 code unit; `Object` keeps the
/// wire tag so the value can be re-encoded without a type lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum JdwpValue {
    Void,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object { tag: u8, id: ObjectId },
}

impl JdwpValue {
    pub fn null() -> Self {
        Self::Object { tag: TAG_OBJECT, id: 0 }
    }
}

pub const TAG_ARRAY: u8 = b'[';
pub const TAG_OBJECT: u8 = b'L';
pub const TAG_STRING: u8 = b's';
pub const TAG_THREAD: u8 = b't';
pub const TAG_VOID: u8 = b'V';

/// An executable code location: reference type + method + bytecode index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub type_tag: u8,
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodInfo {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariableInfo {
    /// First bytecode index at which the variable is live.
    pub code_index: u64,
    pub name: String,
    pub signature: String,
    /// Liveness range length, in bytecode indices starting at `code_index`.
    pub length: u32,
    pub slot: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineTableEntry {
    pub code_index: u64,
    pub line: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LineTable {
    pub start: u64,
    pub end: u64,
    pub lines: Vec<LineTableEntry>,
}

impl LineTable {
    /// Source line covering `index`, i.e. the last entry at or before it.
    pub fn line_at(&self, index: u64) -> Option<i32> {
        let mut best = None;
        for entry in &self.lines {
            if entry.code_index <= index {
                best = Some(entry.line);
            }
        }
        best
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    pub location: Location,
}

/// Outcome of `ObjectReference.InvokeMethod`: either a return value or the
/// object id of a thrown exception.
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeResult {
    pub value: JdwpValue,
    pub exception: Option<ObjectId>,
}

pub const EVENT_KIND_SINGLE_STEP: u8 = 1;
pub const EVENT_KIND_BREAKPOINT: u8 = 2;
pub const EVENT_KIND_CLASS_PREPARE: u8 = 8;
pub const EVENT_KIND_METHOD_ENTRY: u8 = 40;
pub const EVENT_KIND_METHOD_EXIT: u8 = 41;
pub const EVENT_KIND_METHOD_EXIT_WITH_RETURN_VALUE: u8 = 42;
pub const EVENT_KIND_VM_START: u8 = 90;
pub const EVENT_KIND_VM_DEATH: u8 = 99;

pub const SUSPEND_POLICY_NONE: u8 = 0;
pub const SUSPEND_POLICY_EVENT_THREAD: u8 = 1;
pub const SUSPEND_POLICY_ALL: u8 = 2;

pub const STEP_SIZE_LINE: u32 = 1;
pub const STEP_DEPTH_INTO: u32 = 0;
pub const STEP_DEPTH_OVER: u32 = 1;

/// `ObjectReference.InvokeMethod` option: resume only the invoking thread
/// while the method runs.
pub const INVOKE_SINGLE_THREADED: u32 = 1;

/// One runtime notification decoded from a composite event packet.
#[derive(Clone, Debug, PartialEq)]
pub enum JdwpEvent {
    VmStart {
        request_id: i32,
        thread: ThreadId,
    },
    ClassPrepare {
        request_id: i32,
        thread: ThreadId,
        ref_type_tag: u8,
        type_id: ReferenceTypeId,
        signature: String,
        status: u32,
    },
    SingleStep {
        request_id: i32,
        thread: ThreadId,
        location: Location,
    },
    Breakpoint {
        request_id: i32,
        thread: ThreadId,
        location: Location,
    },
    MethodEntry {
        request_id: i32,
        thread: ThreadId,
        location: Location,
    },
    MethodExit {
        request_id: i32,
        thread: ThreadId,
        location: Location,
        /// Present only for `MethodExitWithReturnValue` subscriptions.
        return_value: Option<JdwpValue>,
    },
    VmDeath,
}

/// A batch of events delivered together at one suspension point. The batch is
/// processed in delivery order and the target resumed once per batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventSet {
    pub suspend_policy: u8,
    pub events: Vec<JdwpEvent>,
}
