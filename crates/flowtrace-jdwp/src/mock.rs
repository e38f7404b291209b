//! A scripted JDWP server for testing the tracer without a JDK.
//!
//! The mock models a debuggee as static program metadata (classes, methods,
//! objects) plus a script of suspension points. Each `VirtualMachine.Resume`
//! advances the script by one entry and emits its composite event packet;
//! commands issued while suspended are answered from the metadata and from
//! the current script entry's frame state.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use tokio_util::sync::CancellationToken;

use crate::client::EventModifier;
use crate::codec::{encode_command, encode_reply, JdwpReader, JdwpWriter, HANDSHAKE, HEADER_LEN};
use crate::types::{
    EventSet, FrameId, FrameInfo, JdwpEvent, JdwpIdSizes, JdwpValue, LineTable, ObjectId,
    ReferenceTypeId, VariableInfo, EVENT_KIND_BREAKPOINT, EVENT_KIND_CLASS_PREPARE,
    EVENT_KIND_METHOD_ENTRY, EVENT_KIND_METHOD_EXIT, EVENT_KIND_METHOD_EXIT_WITH_RETURN_VALUE,
    EVENT_KIND_SINGLE_STEP, EVENT_KIND_VM_DEATH, EVENT_KIND_VM_START, ERROR_INVALID_OBJECT,
    SUSPEND_POLICY_NONE,
};

const ERROR_NOT_IMPLEMENTED: u16 = 99;
const ERROR_INTERNAL: u16 = 113;

/// Object id of the `java.lang.String` instances the mock mints when a
/// scripted `toString` invoke succeeds. Ids count up from here.
const DYNAMIC_STRING_BASE: u64 = 0xD000_0000_0000_0000;
const STRING_CLASS_ID: u64 = 0xE001;

#[derive(Clone, Debug)]
pub struct MockProgram {
    pub id_sizes: JdwpIdSizes,
    pub classes: Vec<MockClass>,
    pub objects: Vec<MockObject>,
    /// Suspension points in emission order. The first entry is delivered as
    /// soon as the handshake completes, mirroring a `suspend=y` VM queueing
    /// its `VMStart` event; each subsequent entry is delivered after one
    /// `VirtualMachine.Resume`. When the script runs out, the mock emits
    /// `VMDeath` and closes the socket.
    pub script: Vec<MockStop>,
    /// `(command_set, command)` pairs that fail with `INTERNAL` exactly
    /// once each before succeeding, modelling transient wire errors.
    pub fail_once: Vec<(u8, u8)>,
}

impl Default for MockProgram {
    fn default() -> Self {
        Self {
            id_sizes: JdwpIdSizes::default(),
            classes: Vec::new(),
            objects: Vec::new(),
            script: Vec::new(),
            fail_once: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MockClass {
    pub type_id: ReferenceTypeId,
    /// JNI signature, e.g. `Lcom/example/Main;`.
    pub signature: String,
    /// `None` models a class compiled without the SourceFile attribute;
    /// `ReferenceType.SourceFile` then reports `ABSENT_INFORMATION`.
    pub source_file: Option<String>,
    /// 0 when the superclass is `java.lang.Object` (or irrelevant).
    pub superclass: ReferenceTypeId,
    pub methods: Vec<MockMethod>,
}

#[derive(Clone, Debug)]
pub struct MockMethod {
    pub method_id: u64,
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
    pub line_table: LineTable,
    pub arg_slots: u32,
    pub variables: Vec<VariableInfo>,
}

#[derive(Clone, Debug)]
pub struct MockObject {
    pub object_id: ObjectId,
    pub kind: MockObjectKind,
}

#[derive(Clone, Debug)]
pub enum MockObjectKind {
    String(String),
    Array {
        element_tag: u8,
        values: Vec<JdwpValue>,
    },
    Instance {
        class_id: ReferenceTypeId,
        to_string: MockToString,
    },
}

/// Outcome of invoking `toString` on an instance.
#[derive(Clone, Debug)]
pub enum MockToString {
    Value(String),
    /// Successive invocations return successive entries; the last entry
    /// repeats once the list runs out. Models mutating objects.
    Sequence(Vec<String>),
    /// The invoke completes with this exception object instead of a value.
    Throw(ObjectId),
}

/// One scripted suspension: the event packet plus the call stack and local
/// slot values visible while the target sits at it.
#[derive(Clone, Debug, Default)]
pub struct MockStop {
    pub set: EventSet,
    pub frames: Vec<FrameInfo>,
    pub frame_values: Vec<(FrameId, u32, JdwpValue)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MockEventRequest {
    pub event_kind: u8,
    pub suspend_policy: u8,
    pub request_id: i32,
    pub modifiers: Vec<EventModifier>,
}

pub struct MockVm {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<State>,
}

impl MockVm {
    pub async fn spawn(program: MockProgram) -> std::io::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let state = Arc::new(State::new(program));
        let task_state = state.clone();
        let task_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = run(listener, task_state, task_shutdown).await;
        });

        Ok(Self {
            addr,
            shutdown,
            state,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Event requests currently registered, in arrival order. Cleared
    /// requests are removed.
    pub async fn event_requests(&self) -> Vec<MockEventRequest> {
        self.state.event_requests.lock().await.clone()
    }

    pub fn resume_calls(&self) -> u32 {
        self.state.resume_calls.load(Ordering::Relaxed) as u32
    }
}

impl Drop for MockVm {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct State {
    program: MockProgram,
    script_index: AtomicUsize,
    next_request_id: AtomicI32,
    next_packet_id: AtomicU64,
    next_dynamic_string: AtomicU64,
    resume_calls: AtomicUsize,
    dynamic_strings: tokio::sync::Mutex<HashMap<ObjectId, String>>,
    invoke_counts: tokio::sync::Mutex<HashMap<ObjectId, usize>>,
    event_requests: tokio::sync::Mutex<Vec<MockEventRequest>>,
    pending_failures: tokio::sync::Mutex<Vec<(u8, u8)>>,
}

impl State {
    fn new(program: MockProgram) -> Self {
        let pending_failures = tokio::sync::Mutex::new(program.fail_once.clone());
        Self {
            program,
            script_index: AtomicUsize::new(0),
            next_request_id: AtomicI32::new(0),
            next_packet_id: AtomicU64::new(0x1000),
            next_dynamic_string: AtomicU64::new(DYNAMIC_STRING_BASE),
            resume_calls: AtomicUsize::new(0),
            dynamic_strings: tokio::sync::Mutex::new(HashMap::new()),
            invoke_counts: tokio::sync::Mutex::new(HashMap::new()),
            event_requests: tokio::sync::Mutex::new(Vec::new()),
            pending_failures,
        }
    }

    fn class(&self, type_id: ReferenceTypeId) -> Option<&MockClass> {
        self.program.classes.iter().find(|c| c.type_id == type_id)
    }

    fn method(&self, type_id: ReferenceTypeId, method_id: u64) -> Option<&MockMethod> {
        self.class(type_id)?
            .methods
            .iter()
            .find(|m| m.method_id == method_id)
    }

    fn object(&self, object_id: ObjectId) -> Option<&MockObject> {
        self.program
            .objects
            .iter()
            .find(|o| o.object_id == object_id)
    }

    /// Script entry the target is currently suspended at (the last emitted).
    fn current_stop(&self) -> Option<&MockStop> {
        let index = self.script_index.load(Ordering::Relaxed);
        index.checked_sub(1).and_then(|i| self.program.script.get(i))
    }

    fn take_next_stop(&self) -> Option<&MockStop> {
        let index = self.script_index.fetch_add(1, Ordering::Relaxed);
        self.program.script.get(index)
    }
}

async fn run(
    listener: TcpListener,
    state: Arc<State>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        accept = listener.accept() => {
            let (mut socket, _) = accept?;

            let mut hs = [0u8; HANDSHAKE.len()];
            socket.read_exact(&mut hs).await?;
            if hs != *HANDSHAKE {
                return Ok(());
            }
            socket.write_all(HANDSHAKE).await?;

            let sizes = state.program.id_sizes;
            let (mut reader, writer) = socket.into_split();
            let writer = Arc::new(tokio::sync::Mutex::new(writer));

            // A `suspend=y` VM queues its VMStart event before the debugger
            // issues any command, so the first script entry goes out right
            // after the handshake.
            if let Some(stop) = state.take_next_stop() {
                send_event_set(&writer, &state, &sizes, &stop.set).await?;
            }

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    res = read_packet(&mut reader) => {
                        let Some(packet) = res? else {
                            return Ok(());
                        };
                        if !handle_packet(&writer, &state, &sizes, packet).await? {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

struct Packet {
    id: u32,
    command_set: u8,
    command: u8,
    payload: Vec<u8>,
}

async fn read_packet(
    socket: &mut tokio::net::tcp::OwnedReadHalf,
) -> std::io::Result<Option<Packet>> {
    let mut header = [0u8; HEADER_LEN];
    match socket.read_exact(&mut header).await {
        Ok(_n) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if length < HEADER_LEN {
        return Ok(None);
    }
    let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if header[8] != 0 {
        // Only commands from the debugger are expected.
        return Ok(None);
    }
    let mut payload = vec![0u8; length - HEADER_LEN];
    socket.read_exact(&mut payload).await?;
    Ok(Some(Packet {
        id,
        command_set: header[9],
        command: header[10],
        payload,
    }))
}

async fn send_event_set(
    writer: &Arc<tokio::sync::Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    state: &State,
    sizes: &JdwpIdSizes,
    set: &EventSet,
) -> std::io::Result<()> {
    let id = state.next_packet_id.fetch_add(1, Ordering::Relaxed) as u32;
    let packet = encode_command(id, 64, 100, &encode_event_set(set, sizes));
    writer.lock().await.write_all(&packet).await
}

fn encode_event_set(set: &EventSet, sizes: &JdwpIdSizes) -> Vec<u8> {
    let mut w = JdwpWriter::new();
    w.write_u8(set.suspend_policy);
    w.write_u32(set.events.len() as u32);
    for event in &set.events {
        match event {
            JdwpEvent::VmStart { request_id, thread } => {
                w.write_u8(EVENT_KIND_VM_START);
                w.write_i32(*request_id);
                w.write_object_id(*thread, sizes);
            }
            JdwpEvent::ClassPrepare {
                request_id,
                thread,
                ref_type_tag,
                type_id,
                signature,
                status,
            } => {
                w.write_u8(EVENT_KIND_CLASS_PREPARE);
                w.write_i32(*request_id);
                w.write_object_id(*thread, sizes);
                w.write_u8(*ref_type_tag);
                w.write_reference_type_id(*type_id, sizes);
                w.write_string(signature);
                w.write_u32(*status);
            }
            JdwpEvent::SingleStep {
                request_id,
                thread,
                location,
            } => {
                w.write_u8(EVENT_KIND_SINGLE_STEP);
                w.write_i32(*request_id);
                w.write_object_id(*thread, sizes);
                w.write_location(location, sizes);
            }
            JdwpEvent::Breakpoint {
                request_id,
                thread,
                location,
            } => {
                w.write_u8(EVENT_KIND_BREAKPOINT);
                w.write_i32(*request_id);
                w.write_object_id(*thread, sizes);
                w.write_location(location, sizes);
            }
            JdwpEvent::MethodEntry {
                request_id,
                thread,
                location,
            } => {
                w.write_u8(EVENT_KIND_METHOD_ENTRY);
                w.write_i32(*request_id);
                w.write_object_id(*thread, sizes);
                w.write_location(location, sizes);
            }
            JdwpEvent::MethodExit {
                request_id,
                thread,
                location,
                return_value,
            } => match return_value {
                Some(value) => {
                    w.write_u8(EVENT_KIND_METHOD_EXIT_WITH_RETURN_VALUE);
                    w.write_i32(*request_id);
                    w.write_object_id(*thread, sizes);
                    w.write_location(location, sizes);
                    w.write_tagged_value(value, sizes);
                }
                None => {
                    w.write_u8(EVENT_KIND_METHOD_EXIT);
                    w.write_i32(*request_id);
                    w.write_object_id(*thread, sizes);
                    w.write_location(location, sizes);
                }
            },
            JdwpEvent::VmDeath => {
                w.write_u8(EVENT_KIND_VM_DEATH);
                w.write_i32(0);
            }
        }
    }
    w.into_vec()
}

/// Handles one command packet. Returns `false` when the connection should
/// close (VM disposed or script exhausted).
async fn handle_packet(
    writer: &Arc<tokio::sync::Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    state: &State,
    sizes: &JdwpIdSizes,
    packet: Packet,
) -> std::io::Result<bool> {
    {
        let mut failures = state.pending_failures.lock().await;
        if let Some(pos) = failures
            .iter()
            .position(|&(set, cmd)| set == packet.command_set && cmd == packet.command)
        {
            failures.remove(pos);
            let reply = encode_reply(packet.id, ERROR_INTERNAL, &[]);
            writer.lock().await.write_all(&reply).await?;
            return Ok(true);
        }
    }

    let mut r = JdwpReader::new(&packet.payload);
    let mut keep_open = true;
    let mut emit_after_reply: Option<EventSet> = None;

    let (error_code, payload) = match (packet.command_set, packet.command) {
        // VirtualMachine.IDSizes
        (1, 7) => {
            let mut w = JdwpWriter::new();
            w.write_u32(sizes.field_id as u32);
            w.write_u32(sizes.method_id as u32);
            w.write_u32(sizes.object_id as u32);
            w.write_u32(sizes.reference_type_id as u32);
            w.write_u32(sizes.frame_id as u32);
            (0, w.into_vec())
        }
        // VirtualMachine.CapabilitiesNew
        (1, 17) => {
            let mut w = JdwpWriter::new();
            for _ in 0..32 {
                w.write_bool(true);
            }
            (0, w.into_vec())
        }
        // VirtualMachine.Resume
        (1, 9) => {
            state.resume_calls.fetch_add(1, Ordering::Relaxed);
            match state.take_next_stop() {
                Some(stop) => emit_after_reply = Some(stop.set.clone()),
                None => {
                    emit_after_reply = Some(EventSet {
                        suspend_policy: SUSPEND_POLICY_NONE,
                        events: vec![JdwpEvent::VmDeath],
                    });
                    keep_open = false;
                }
            }
            (0, Vec::new())
        }
        // VirtualMachine.Dispose
        (1, 6) => {
            keep_open = false;
            (0, Vec::new())
        }
        // ReferenceType.Signature
        (2, 1) => {
            let type_id = r.read_reference_type_id(sizes).unwrap_or(0);
            let mut w = JdwpWriter::new();
            if type_id == STRING_CLASS_ID {
                w.write_string("Ljava/lang/String;");
            } else if let Some(class) = state.class(type_id) {
                w.write_string(&class.signature);
            } else {
                w.write_string("Ljava/lang/Object;");
            }
            (0, w.into_vec())
        }
        // ReferenceType.SourceFile
        (2, 7) => {
            let type_id = r.read_reference_type_id(sizes).unwrap_or(0);
            match state.class(type_id).and_then(|c| c.source_file.as_deref()) {
                Some(source_file) => {
                    let mut w = JdwpWriter::new();
                    w.write_string(source_file);
                    (0, w.into_vec())
                }
                None => (crate::types::ERROR_ABSENT_INFORMATION, Vec::new()),
            }
        }
        // ReferenceType.Methods
        (2, 5) => {
            let type_id = r.read_reference_type_id(sizes).unwrap_or(0);
            let mut w = JdwpWriter::new();
            match state.class(type_id) {
                Some(class) => {
                    w.write_u32(class.methods.len() as u32);
                    for method in &class.methods {
                        w.write_id(method.method_id, sizes.method_id);
                        w.write_string(&method.name);
                        w.write_string(&method.signature);
                        w.write_u32(method.mod_bits);
                    }
                }
                None => w.write_u32(0),
            }
            (0, w.into_vec())
        }
        // ClassType.Superclass
        (3, 1) => {
            let type_id = r.read_reference_type_id(sizes).unwrap_or(0);
            let superclass = state.class(type_id).map(|c| c.superclass).unwrap_or(0);
            let mut w = JdwpWriter::new();
            w.write_reference_type_id(superclass, sizes);
            (0, w.into_vec())
        }
        // Method.LineTable
        (6, 1) => {
            let type_id = r.read_reference_type_id(sizes).unwrap_or(0);
            let method_id = r.read_id(sizes.method_id).unwrap_or(0);
            match state.method(type_id, method_id) {
                Some(method) => {
                    let mut w = JdwpWriter::new();
                    w.write_u64(method.line_table.start);
                    w.write_u64(method.line_table.end);
                    w.write_u32(method.line_table.lines.len() as u32);
                    for entry in &method.line_table.lines {
                        w.write_u64(entry.code_index);
                        w.write_i32(entry.line);
                    }
                    (0, w.into_vec())
                }
                None => (crate::types::ERROR_ABSENT_INFORMATION, Vec::new()),
            }
        }
        // Method.VariableTable
        (6, 2) => {
            let type_id = r.read_reference_type_id(sizes).unwrap_or(0);
            let method_id = r.read_id(sizes.method_id).unwrap_or(0);
            match state.method(type_id, method_id) {
                Some(method) => {
                    let mut w = JdwpWriter::new();
                    w.write_u32(method.arg_slots);
                    w.write_u32(method.variables.len() as u32);
                    for var in &method.variables {
                        w.write_u64(var.code_index);
                        w.write_string(&var.name);
                        w.write_string(&var.signature);
                        w.write_u32(var.length);
                        w.write_u32(var.slot);
                    }
                    (0, w.into_vec())
                }
                None => (crate::types::ERROR_ABSENT_INFORMATION, Vec::new()),
            }
        }
        // ThreadReference.Frames
        (11, 6) => {
            let _thread = r.read_object_id(sizes).unwrap_or(0);
            let start = r.read_i32().unwrap_or(0).max(0) as usize;
            let length = r.read_i32().unwrap_or(-1);
            let frames = state
                .current_stop()
                .map(|s| s.frames.as_slice())
                .unwrap_or(&[]);
            let end = if length < 0 {
                frames.len()
            } else {
                (start + length as usize).min(frames.len())
            };
            let slice = frames.get(start..end).unwrap_or(&[]);
            let mut w = JdwpWriter::new();
            w.write_u32(slice.len() as u32);
            for frame in slice {
                w.write_id(frame.frame_id, sizes.frame_id);
                w.write_location(&frame.location, sizes);
            }
            (0, w.into_vec())
        }
        // StackFrame.GetValues
        (16, 1) => {
            let _thread = r.read_object_id(sizes).unwrap_or(0);
            let frame_id = r.read_id(sizes.frame_id).unwrap_or(0);
            let count = r.read_u32().unwrap_or(0) as usize;
            let mut slots = Vec::with_capacity(count);
            for _ in 0..count {
                let slot = r.read_u32().unwrap_or(0);
                let _tag = r.read_u8().unwrap_or(0);
                slots.push(slot);
            }
            let values = state
                .current_stop()
                .map(|s| s.frame_values.as_slice())
                .unwrap_or(&[]);
            let mut w = JdwpWriter::new();
            w.write_u32(slots.len() as u32);
            for slot in slots {
                let value = values
                    .iter()
                    .find(|(f, s, _)| *f == frame_id && *s == slot)
                    .map(|(_, _, v)| v.clone())
                    .unwrap_or(JdwpValue::Void);
                w.write_tagged_value(&value, sizes);
            }
            (0, w.into_vec())
        }
        // ObjectReference.ReferenceType
        (9, 1) => {
            let object_id = r.read_object_id(sizes).unwrap_or(0);
            match state.object(object_id).map(|o| &o.kind) {
                Some(MockObjectKind::Instance { class_id, .. }) => {
                    let mut w = JdwpWriter::new();
                    w.write_u8(1);
                    w.write_reference_type_id(*class_id, sizes);
                    (0, w.into_vec())
                }
                Some(MockObjectKind::String(_)) => {
                    let mut w = JdwpWriter::new();
                    w.write_u8(1);
                    w.write_reference_type_id(STRING_CLASS_ID, sizes);
                    (0, w.into_vec())
                }
                Some(MockObjectKind::Array { .. }) | None => (ERROR_INVALID_OBJECT, Vec::new()),
            }
        }
        // ObjectReference.InvokeMethod (toString)
        (9, 6) => {
            let object_id = r.read_object_id(sizes).unwrap_or(0);
            match state.object(object_id).map(|o| &o.kind) {
                Some(MockObjectKind::Instance { to_string, .. }) => {
                    let outcome = match to_string {
                        MockToString::Value(text) => Ok(text.clone()),
                        MockToString::Sequence(texts) => {
                            let mut counts = state.invoke_counts.lock().await;
                            let call = counts.entry(object_id).or_insert(0);
                            let text = texts
                                .get(*call)
                                .or_else(|| texts.last())
                                .cloned()
                                .unwrap_or_default();
                            *call += 1;
                            Ok(text)
                        }
                        MockToString::Throw(exception_id) => Err(*exception_id),
                    };
                    let mut w = JdwpWriter::new();
                    match outcome {
                        Ok(text) => {
                            let string_id =
                                state.next_dynamic_string.fetch_add(1, Ordering::Relaxed);
                            state.dynamic_strings.lock().await.insert(string_id, text);
                            w.write_tagged_value(
                                &JdwpValue::Object {
                                    tag: crate::types::TAG_STRING,
                                    id: string_id,
                                },
                                sizes,
                            );
                            w.write_u8(crate::types::TAG_OBJECT);
                            w.write_object_id(0, sizes);
                        }
                        Err(exception_id) => {
                            w.write_tagged_value(&JdwpValue::Void, sizes);
                            w.write_u8(crate::types::TAG_OBJECT);
                            w.write_object_id(exception_id, sizes);
                        }
                    }
                    (0, w.into_vec())
                }
                _ => (ERROR_INVALID_OBJECT, Vec::new()),
            }
        }
        // StringReference.Value
        (10, 1) => {
            let object_id = r.read_object_id(sizes).unwrap_or(0);
            let dynamic = state.dynamic_strings.lock().await.get(&object_id).cloned();
            let text = dynamic.or_else(|| match state.object(object_id).map(|o| &o.kind) {
                Some(MockObjectKind::String(text)) => Some(text.clone()),
                _ => None,
            });
            match text {
                Some(text) => {
                    let mut w = JdwpWriter::new();
                    w.write_string(&text);
                    (0, w.into_vec())
                }
                None => (ERROR_INVALID_OBJECT, Vec::new()),
            }
        }
        // ArrayReference.Length
        (13, 1) => {
            let object_id = r.read_object_id(sizes).unwrap_or(0);
            match state.object(object_id).map(|o| &o.kind) {
                Some(MockObjectKind::Array { values, .. }) => {
                    let mut w = JdwpWriter::new();
                    w.write_i32(values.len() as i32);
                    (0, w.into_vec())
                }
                _ => (ERROR_INVALID_OBJECT, Vec::new()),
            }
        }
        // ArrayReference.GetValues
        (13, 2) => {
            let object_id = r.read_object_id(sizes).unwrap_or(0);
            let first_index = r.read_i32().unwrap_or(0).max(0) as usize;
            let length = r.read_i32().unwrap_or(0).max(0) as usize;
            match state.object(object_id).map(|o| &o.kind) {
                Some(MockObjectKind::Array {
                    element_tag,
                    values,
                }) => {
                    let end = first_index.saturating_add(length).min(values.len());
                    let slice = values.get(first_index..end).unwrap_or(&[]);
                    let mut w = JdwpWriter::new();
                    w.write_u8(*element_tag);
                    w.write_u32(slice.len() as u32);
                    let tagged = !element_tag.is_ascii_uppercase() || *element_tag == b'L';
                    for value in slice {
                        if tagged {
                            w.write_tagged_value(value, sizes);
                        } else {
                            w.write_value(value, sizes);
                        }
                    }
                    (0, w.into_vec())
                }
                _ => (ERROR_INVALID_OBJECT, Vec::new()),
            }
        }
        // EventRequest.Set
        (15, 1) => {
            let event_kind = r.read_u8().unwrap_or(0);
            let suspend_policy = r.read_u8().unwrap_or(0);
            let modifier_count = r.read_u32().unwrap_or(0) as usize;
            let mut modifiers = Vec::with_capacity(modifier_count);
            for _ in 0..modifier_count {
                match r.read_u8().unwrap_or(0) {
                    1 => modifiers.push(EventModifier::Count {
                        count: r.read_i32().unwrap_or(0),
                    }),
                    3 => modifiers.push(EventModifier::ThreadOnly {
                        thread: r.read_object_id(sizes).unwrap_or(0),
                    }),
                    5 => modifiers.push(EventModifier::ClassMatch {
                        pattern: r.read_string().unwrap_or_default(),
                    }),
                    10 => modifiers.push(EventModifier::Step {
                        thread: r.read_object_id(sizes).unwrap_or(0),
                        size: r.read_u32().unwrap_or(0),
                        depth: r.read_u32().unwrap_or(0),
                    }),
                    _ => break,
                }
            }
            let request_id = state.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
            state.event_requests.lock().await.push(MockEventRequest {
                event_kind,
                suspend_policy,
                request_id,
                modifiers,
            });
            let mut w = JdwpWriter::new();
            w.write_i32(request_id);
            (0, w.into_vec())
        }
        // EventRequest.Clear
        (15, 2) => {
            let event_kind = r.read_u8().unwrap_or(0);
            let request_id = r.read_i32().unwrap_or(0);
            state
                .event_requests
                .lock()
                .await
                .retain(|req| !(req.event_kind == event_kind && req.request_id == request_id));
            (0, Vec::new())
        }
        _ => (ERROR_NOT_IMPLEMENTED, Vec::new()),
    };

    let reply = encode_reply(packet.id, error_code, &payload);
    writer.lock().await.write_all(&reply).await?;

    if let Some(set) = emit_after_reply {
        send_event_set(writer, state, sizes, &set).await?;
    }

    Ok(keep_open)
}
