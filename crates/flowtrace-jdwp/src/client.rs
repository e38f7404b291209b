//! Asynchronous JDWP wire client.
//!
//! One background task owns the read half of the socket, correlates replies
//! to in-flight commands by packet id, and pushes composite event packets
//! into an ordered channel consumed by the debug session.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{mpsc, oneshot, Mutex},
};
use tokio_util::sync::CancellationToken;

use crate::codec::{
    encode_command, signature_to_tag, JdwpReader, JdwpWriter, FLAG_REPLY, HANDSHAKE, HEADER_LEN,
};
use crate::types::{
    EventSet, FrameId, FrameInfo, InvokeResult, JdwpError, JdwpEvent, JdwpIdSizes, JdwpValue,
    LineTable, LineTableEntry, MethodId, MethodInfo, ObjectId, ReferenceTypeId, Result, ThreadId,
    VariableInfo, EVENT_KIND_BREAKPOINT, EVENT_KIND_CLASS_PREPARE,
    EVENT_KIND_METHOD_ENTRY, EVENT_KIND_METHOD_EXIT, EVENT_KIND_METHOD_EXIT_WITH_RETURN_VALUE,
    EVENT_KIND_SINGLE_STEP, EVENT_KIND_VM_DEATH, EVENT_KIND_VM_START, INVOKE_SINGLE_THREADED,
};

#[derive(Debug, Clone)]
pub struct JdwpClientConfig {
    pub handshake_timeout: Duration,
    pub reply_timeout: Duration,
}

impl Default for JdwpClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
struct Reply {
    error_code: u16,
    payload: Vec<u8>,
}

struct Inner {
    writer: Mutex<tokio::net::tcp::OwnedWriteHalf>,
    pending: Mutex<HashMap<u32, oneshot::Sender<Result<Reply>>>>,
    next_id: AtomicU32,
    id_sizes: Mutex<JdwpIdSizes>,
    events: mpsc::UnboundedSender<EventSet>,
    shutdown: CancellationToken,
    config: JdwpClientConfig,
}

/// Cheaply cloneable handle to one JDWP connection.
#[derive(Clone)]
pub struct JdwpClient {
    inner: Arc<Inner>,
}

impl JdwpClient {
    pub async fn connect(addr: SocketAddr) -> Result<(Self, mpsc::UnboundedReceiver<EventSet>)> {
        Self::connect_with_config(addr, JdwpClientConfig::default()).await
    }

    pub async fn connect_with_config(
        addr: SocketAddr,
        config: JdwpClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EventSet>)> {
        let mut stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);

        tokio::time::timeout(config.handshake_timeout, stream.write_all(HANDSHAKE))
            .await
            .map_err(|_| JdwpError::Timeout)??;

        let mut reply = [0u8; HANDSHAKE.len()];
        tokio::time::timeout(config.handshake_timeout, stream.read_exact(&mut reply))
            .await
            .map_err(|_| JdwpError::Timeout)??;
        if reply != *HANDSHAKE {
            return Err(JdwpError::HandshakeFailed);
        }

        let (reader, writer) = stream.into_split();
        // Unbounded on purpose: the engine must observe every event set, in
        // order, and is the only consumer. The channel is drained after each
        // resume, so depth stays bounded by the target's suspend policy.
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            writer: Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            id_sizes: Mutex::new(JdwpIdSizes::default()),
            events: events_tx,
            shutdown: CancellationToken::new(),
            config,
        });

        tokio::spawn(read_loop(reader, inner.clone()));

        let client = Self { inner };
        // Id sizes gate the parsing of almost every reply and event.
        let _ = client.id_sizes().await?;
        // Fetched for connect-time sanity; the engine needs JDK 6+ semantics
        // (method-exit return values) which every supported VM provides.
        let _ = client.capabilities_new().await?;

        Ok((client, events_rx))
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    async fn command(&self, command_set: u8, command: u8, payload: Vec<u8>) -> Result<Vec<u8>> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        let packet = encode_command(id, command_set, command, &payload);
        {
            let mut writer = self.inner.writer.lock().await;
            writer.write_all(&packet).await?;
        }

        let reply = tokio::select! {
            _ = self.inner.shutdown.cancelled() => {
                self.inner.pending.lock().await.remove(&id);
                return Err(JdwpError::Cancelled);
            }
            res = tokio::time::timeout(self.inner.config.reply_timeout, rx) => match res {
                Ok(Ok(reply)) => reply?,
                Ok(Err(_closed)) => return Err(JdwpError::ConnectionClosed),
                Err(_elapsed) => {
                    self.inner.pending.lock().await.remove(&id);
                    return Err(JdwpError::Timeout);
                }
            },
        };

        if reply.error_code != 0 {
            return Err(JdwpError::VmError(reply.error_code));
        }
        Ok(reply.payload)
    }

    async fn sizes(&self) -> JdwpIdSizes {
        *self.inner.id_sizes.lock().await
    }

    /// VirtualMachine.IDSizes (1, 7)
    pub async fn id_sizes(&self) -> Result<JdwpIdSizes> {
        let payload = self.command(1, 7, Vec::new()).await?;
        let mut r = JdwpReader::new(&payload);
        let sizes = JdwpIdSizes {
            field_id: r.read_u32()? as usize,
            method_id: r.read_u32()? as usize,
            object_id: r.read_u32()? as usize,
            reference_type_id: r.read_u32()? as usize,
            frame_id: r.read_u32()? as usize,
        };
        *self.inner.id_sizes.lock().await = sizes;
        Ok(sizes)
    }

    /// VirtualMachine.CapabilitiesNew (1, 17)
    pub async fn capabilities_new(&self) -> Result<Vec<bool>> {
        let payload = self.command(1, 17, Vec::new()).await?;
        let mut r = JdwpReader::new(&payload);
        let mut caps = Vec::with_capacity(r.remaining());
        while r.remaining() > 0 {
            caps.push(r.read_bool()?);
        }
        Ok(caps)
    }

    /// VirtualMachine.Resume (1, 9)
    pub async fn vm_resume(&self) -> Result<()> {
        let _ = self.command(1, 9, Vec::new()).await?;
        Ok(())
    }

    /// VirtualMachine.Dispose (1, 6)
    pub async fn vm_dispose(&self) -> Result<()> {
        let _ = self.command(1, 6, Vec::new()).await?;
        Ok(())
    }

    /// ReferenceType.Signature (2, 1)
    pub async fn reference_type_signature(&self, class_id: ReferenceTypeId) -> Result<String> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        let payload = self.command(2, 1, w.into_vec()).await?;
        JdwpReader::new(&payload).read_string()
    }

    /// ReferenceType.SourceFile (2, 7)
    pub async fn reference_type_source_file(&self, class_id: ReferenceTypeId) -> Result<String> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        let payload = self.command(2, 7, w.into_vec()).await?;
        JdwpReader::new(&payload).read_string()
    }

    /// ReferenceType.Methods (2, 5)
    pub async fn reference_type_methods(
        &self,
        class_id: ReferenceTypeId,
    ) -> Result<Vec<MethodInfo>> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        let payload = self.command(2, 5, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let count = r.read_u32()? as usize;
        let mut methods = Vec::with_capacity(count);
        for _ in 0..count {
            methods.push(MethodInfo {
                method_id: r.read_id(sizes.method_id)?,
                name: r.read_string()?,
                signature: r.read_string()?,
                mod_bits: r.read_u32()?,
            });
        }
        Ok(methods)
    }

    /// ClassType.Superclass (3, 1); 0 when the class is `java.lang.Object`.
    pub async fn class_superclass(&self, class_id: ReferenceTypeId) -> Result<ReferenceTypeId> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        let payload = self.command(3, 1, w.into_vec()).await?;
        JdwpReader::new(&payload).read_reference_type_id(&sizes)
    }

    /// Method.LineTable (6, 1)
    pub async fn method_line_table(
        &self,
        class_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> Result<LineTable> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        w.write_id(method_id, sizes.method_id);
        let payload = self.command(6, 1, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let start = r.read_u64()?;
        let end = r.read_u64()?;
        let count = r.read_u32()? as usize;
        let mut lines = Vec::with_capacity(count);
        for _ in 0..count {
            lines.push(LineTableEntry {
                code_index: r.read_u64()?,
                line: r.read_i32()?,
            });
        }
        Ok(LineTable { start, end, lines })
    }

    /// Method.VariableTable (6, 2); returns (argument slot count, variables).
    pub async fn method_variable_table(
        &self,
        class_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> Result<(u32, Vec<VariableInfo>)> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        w.write_id(method_id, sizes.method_id);
        let payload = self.command(6, 2, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let arg_count = r.read_u32()?;
        let count = r.read_u32()? as usize;
        let mut vars = Vec::with_capacity(count);
        for _ in 0..count {
            vars.push(VariableInfo {
                code_index: r.read_u64()?,
                name: r.read_string()?,
                signature: r.read_string()?,
                length: r.read_u32()?,
                slot: r.read_u32()?,
            });
        }
        Ok((arg_count, vars))
    }

    /// ThreadReference.Frames (11, 6); `length = -1` requests all frames.
    pub async fn thread_frames(
        &self,
        thread: ThreadId,
        start: i32,
        length: i32,
    ) -> Result<Vec<FrameInfo>> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(thread, &sizes);
        w.write_i32(start);
        w.write_i32(length);
        let payload = self.command(11, 6, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let count = r.read_u32()? as usize;
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(FrameInfo {
                frame_id: r.read_id(sizes.frame_id)?,
                location: r.read_location(&sizes)?,
            });
        }
        Ok(frames)
    }

    /// StackFrame.GetValues (16, 1)
    pub async fn stack_frame_get_values(
        &self,
        thread: ThreadId,
        frame_id: FrameId,
        slots: &[(u32, String)],
    ) -> Result<Vec<JdwpValue>> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(thread, &sizes);
        w.write_id(frame_id, sizes.frame_id);
        w.write_u32(slots.len() as u32);
        for (slot, signature) in slots {
            w.write_u32(*slot);
            w.write_u8(signature_to_tag(signature));
        }
        let payload = self.command(16, 1, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let count = r.read_u32()? as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(r.read_tagged_value(&sizes)?);
        }
        Ok(values)
    }

    /// ObjectReference.ReferenceType (9, 1)
    pub async fn object_reference_type(&self, object_id: ObjectId) -> Result<ReferenceTypeId> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(object_id, &sizes);
        let payload = self.command(9, 1, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let _ref_type_tag = r.read_u8()?;
        r.read_reference_type_id(&sizes)
    }

    /// ObjectReference.InvokeMethod (9, 6), issued single-threaded.
    ///
    /// The calling thread must be suspended by an event; the VM runs the
    /// method on it and re-suspends before replying.
    pub async fn object_invoke_method(
        &self,
        object_id: ObjectId,
        thread: ThreadId,
        class_id: ReferenceTypeId,
        method_id: MethodId,
        args: &[JdwpValue],
    ) -> Result<InvokeResult> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(object_id, &sizes);
        w.write_object_id(thread, &sizes);
        w.write_reference_type_id(class_id, &sizes);
        w.write_id(method_id, sizes.method_id);
        w.write_u32(args.len() as u32);
        for arg in args {
            w.write_tagged_value(arg, &sizes);
        }
        w.write_u32(INVOKE_SINGLE_THREADED);
        let payload = self.command(9, 6, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let value = r.read_tagged_value(&sizes)?;
        let (_tag, exception) = {
            let tag = r.read_u8()?;
            (tag, r.read_object_id(&sizes)?)
        };
        Ok(InvokeResult {
            value,
            exception: (exception != 0).then_some(exception),
        })
    }

    /// StringReference.Value (10, 1)
    pub async fn string_value(&self, string_id: ObjectId) -> Result<String> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(string_id, &sizes);
        let payload = self.command(10, 1, w.into_vec()).await?;
        JdwpReader::new(&payload).read_string()
    }

    /// ArrayReference.Length (13, 1)
    pub async fn array_length(&self, array_id: ObjectId) -> Result<i32> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(array_id, &sizes);
        let payload = self.command(13, 1, w.into_vec()).await?;
        JdwpReader::new(&payload).read_i32()
    }

    /// ArrayReference.GetValues (13, 2)
    pub async fn array_get_values(
        &self,
        array_id: ObjectId,
        first_index: i32,
        length: i32,
    ) -> Result<Vec<JdwpValue>> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_object_id(array_id, &sizes);
        w.write_i32(first_index);
        w.write_i32(length);
        let payload = self.command(13, 2, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        // The reply carries one element tag followed by untagged values,
        // except for object element types which are tagged per value.
        let tag = r.read_u8()?;
        let count = r.read_u32()? as usize;
        let mut values = Vec::with_capacity(count);
        let object_elements = !tag.is_ascii_uppercase() || tag == b'L';
        for _ in 0..count {
            if object_elements {
                values.push(r.read_tagged_value(&sizes)?);
            } else {
                values.push(r.read_value(tag, &sizes)?);
            }
        }
        Ok(values)
    }

    /// EventRequest.Set (15, 1); returns the request id.
    pub async fn event_request_set(
        &self,
        event_kind: u8,
        suspend_policy: u8,
        modifiers: &[EventModifier],
    ) -> Result<i32> {
        let sizes = self.sizes().await;
        let mut w = JdwpWriter::new();
        w.write_u8(event_kind);
        w.write_u8(suspend_policy);
        w.write_u32(modifiers.len() as u32);
        for modifier in modifiers {
            modifier.encode(&mut w, &sizes);
        }
        let payload = self.command(15, 1, w.into_vec()).await?;
        JdwpReader::new(&payload).read_i32()
    }

    /// EventRequest.Clear (15, 2)
    pub async fn event_request_clear(&self, event_kind: u8, request_id: i32) -> Result<()> {
        let mut w = JdwpWriter::new();
        w.write_u8(event_kind);
        w.write_i32(request_id);
        let _ = self.command(15, 2, w.into_vec()).await?;
        Ok(())
    }
}

/// Event request filters. Only the modifiers the engine uses are modeled.
#[derive(Clone, Debug, PartialEq)]
pub enum EventModifier {
    /// Fire after `count` matches, then expire the request.
    Count { count: i32 },
    ThreadOnly { thread: ThreadId },
    ClassMatch { pattern: String },
    Step { thread: ThreadId, size: u32, depth: u32 },
}

impl EventModifier {
    fn encode(&self, w: &mut JdwpWriter, sizes: &JdwpIdSizes) {
        match self {
            EventModifier::Count { count } => {
                w.write_u8(1);
                w.write_i32(*count);
            }
            EventModifier::ThreadOnly { thread } => {
                w.write_u8(3);
                w.write_object_id(*thread, sizes);
            }
            EventModifier::ClassMatch { pattern } => {
                w.write_u8(5);
                w.write_string(pattern);
            }
            EventModifier::Step { thread, size, depth } => {
                w.write_u8(10);
                w.write_object_id(*thread, sizes);
                w.write_u32(*size);
                w.write_u32(*depth);
            }
        }
    }
}

async fn read_loop(mut reader: tokio::net::tcp::OwnedReadHalf, inner: Arc<Inner>) {
    loop {
        let mut header = [0u8; HEADER_LEN];
        let header_read = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = reader.read_exact(&mut header) => res,
        };
        if header_read.is_err() {
            break;
        }

        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if length < HEADER_LEN {
            tracing::warn!(length, "malformed JDWP packet length; closing connection");
            break;
        }
        let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let flags = header[8];

        let mut payload = vec![0u8; length - HEADER_LEN];
        let payload_read = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = reader.read_exact(&mut payload) => res,
        };
        if payload_read.is_err() {
            break;
        }

        if flags & FLAG_REPLY != 0 {
            let error_code = u16::from_be_bytes([header[9], header[10]]);
            let tx = inner.pending.lock().await.remove(&id);
            if let Some(tx) = tx {
                let _ = tx.send(Ok(Reply {
                    error_code,
                    payload,
                }));
            }
        } else if (header[9], header[10]) == (64, 100) {
            let sizes = *inner.id_sizes.lock().await;
            match decode_event_set(&payload, &sizes) {
                Ok(set) => {
                    let _ = inner.events.send(set);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to decode composite event packet");
                    break;
                }
            }
        } else {
            // The VM sends no other commands to the debugger; ignore.
            tracing::debug!(
                command_set = header[9],
                command = header[10],
                "ignoring unexpected command packet"
            );
        }
    }

    inner.shutdown.cancel();

    let pending = std::mem::take(&mut *inner.pending.lock().await);
    for (_id, tx) in pending {
        let _ = tx.send(Err(JdwpError::ConnectionClosed));
    }
}

fn decode_event_set(payload: &[u8], sizes: &JdwpIdSizes) -> Result<EventSet> {
    let mut r = JdwpReader::new(payload);
    let suspend_policy = r.read_u8()?;
    let count = r.read_u32()? as usize;
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        let kind = r.read_u8()?;
        let request_id = r.read_i32()?;
        let event = match kind {
            EVENT_KIND_SINGLE_STEP => JdwpEvent::SingleStep {
                request_id,
                thread: r.read_object_id(sizes)?,
                location: r.read_location(sizes)?,
            },
            EVENT_KIND_BREAKPOINT => JdwpEvent::Breakpoint {
                request_id,
                thread: r.read_object_id(sizes)?,
                location: r.read_location(sizes)?,
            },
            EVENT_KIND_CLASS_PREPARE => JdwpEvent::ClassPrepare {
                request_id,
                thread: r.read_object_id(sizes)?,
                ref_type_tag: r.read_u8()?,
                type_id: r.read_reference_type_id(sizes)?,
                signature: r.read_string()?,
                status: r.read_u32()?,
            },
            EVENT_KIND_METHOD_ENTRY => JdwpEvent::MethodEntry {
                request_id,
                thread: r.read_object_id(sizes)?,
                location: r.read_location(sizes)?,
            },
            EVENT_KIND_METHOD_EXIT => JdwpEvent::MethodExit {
                request_id,
                thread: r.read_object_id(sizes)?,
                location: r.read_location(sizes)?,
                return_value: None,
            },
            EVENT_KIND_METHOD_EXIT_WITH_RETURN_VALUE => JdwpEvent::MethodExit {
                request_id,
                thread: r.read_object_id(sizes)?,
                location: r.read_location(sizes)?,
                return_value: Some(r.read_tagged_value(sizes)?),
            },
            EVENT_KIND_VM_START => JdwpEvent::VmStart {
                request_id,
                thread: r.read_object_id(sizes)?,
            },
            EVENT_KIND_VM_DEATH => JdwpEvent::VmDeath,
            other => {
                // An event kind we never requested; the remainder of the
                // packet cannot be parsed past it.
                tracing::debug!(kind = other, "skipping unknown event kind");
                break;
            }
        };
        events.push(event);
    }
    Ok(EventSet {
        suspend_policy,
        events,
    })
}
