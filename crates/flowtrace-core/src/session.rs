//! The debug session: connection lifecycle plus the event loop that turns
//! raw JDWP events into the control-flow trace.
//!
//! One logical thread of control drives everything. The loop blocks on the
//! next event set, dispatches every event in it, resumes the target once,
//! and repeats until the target disconnects. Disconnect is the normal way a
//! session ends; whatever trace accumulated by then is the result.

use std::collections::HashMap;
use std::path::Path;

use tokio::sync::mpsc;

use flowtrace_jdwp::types::{
    JdwpValue, Location, MethodInfo, ReferenceTypeId, ThreadId, ERROR_ABSENT_INFORMATION,
};
use flowtrace_jdwp::{EventSet, JdwpClient, JdwpError, JdwpEvent, LaunchedVm};

use crate::correlator::CallStack;
use crate::error::{Result, SessionError};
use crate::render::{signature_to_type_name, ValueRenderer};
use crate::requests::RequestManager;
use crate::scope::InstrumentationScope;
use crate::trace::{ControlFlowEvent, LineRef, Trace, VisibleVars};

pub struct DebugSession {
    client: JdwpClient,
    events: mpsc::UnboundedReceiver<EventSet>,
    requests: RequestManager,
    renderer: ValueRenderer,
    scope: InstrumentationScope,
    trace: Trace,
    stack: CallStack,
    /// The thread being stepped, fixed at the first in-scope class prepare.
    thread: Option<ThreadId>,
    stepping: bool,
    // Launched target, kept alive (and killed on drop) for the session.
    vm: Option<LaunchedVm>,
    methods: HashMap<ReferenceTypeId, Vec<MethodInfo>>,
    source_files: HashMap<ReferenceTypeId, Option<String>>,
}

impl DebugSession {
    /// Launches `main_class` from `classpath` suspended, attaches, and arms
    /// the class-prepare subscription. Everything else is armed lazily as
    /// in-scope classes load.
    pub async fn launch(
        classpath: &Path,
        main_class: &str,
        scope: InstrumentationScope,
    ) -> Result<Self> {
        let mut vm = LaunchedVm::start(main_class, classpath)
            .map_err(|e| SessionError::Launch(e.to_string()))?;
        let (client, events) = vm
            .connect()
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;
        let mut session = Self::attach(client, events, scope).await?;
        session.vm = Some(vm);
        Ok(session)
    }

    /// Attaches to an already-connected target. Used directly by tests.
    pub async fn attach(
        client: JdwpClient,
        events: mpsc::UnboundedReceiver<EventSet>,
        scope: InstrumentationScope,
    ) -> Result<Self> {
        let mut requests = RequestManager::new(client.clone());
        requests.arm_class_prepare("*").await?;
        Ok(Self {
            client,
            events,
            requests,
            renderer: ValueRenderer::new(),
            scope,
            trace: Trace::new(),
            stack: CallStack::new(),
            thread: None,
            stepping: false,
            vm: None,
            methods: HashMap::new(),
            source_files: HashMap::new(),
        })
    }

    /// Drives the event loop to completion and returns the finished trace.
    /// Target termination is success; the only errors are wire failures on
    /// resume and the unmatched-return invariant.
    pub async fn run(mut self) -> Result<Trace> {
        let outcome = self.drive().await;
        if outcome.is_err() {
            // The target is suspended at the failing event; dispose releases
            // it instead of leaving it wedged until process teardown.
            if let Err(err) = self.client.vm_dispose().await {
                tracing::debug!(error = %err, "vm dispose after failure failed");
            }
        }
        self.client.shutdown();
        if let Some(mut vm) = self.vm.take() {
            // Reap the child; it has either exited or is about to.
            if let Err(err) = vm.wait().await {
                tracing::debug!(error = %err, "waiting for target process failed");
            }
        }
        outcome.map(|()| self.trace)
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            let Some(set) = self.events.recv().await else {
                tracing::info!("target disconnected");
                break;
            };
            tracing::debug!(events = set.events.len(), "received event set");
            let mut vm_dead = false;
            for event in set.events {
                match event {
                    JdwpEvent::VmStart { thread, .. } => {
                        tracing::debug!(thread, "target started");
                        self.thread.get_or_insert(thread);
                    }
                    JdwpEvent::ClassPrepare {
                        thread,
                        type_id,
                        signature,
                        ..
                    } => {
                        self.handle_class_prepare(thread, type_id, &signature)
                            .await;
                    }
                    JdwpEvent::SingleStep {
                        thread, location, ..
                    }
                    | JdwpEvent::Breakpoint {
                        thread, location, ..
                    } => {
                        self.handle_line_stop(thread, location).await;
                    }
                    JdwpEvent::MethodEntry {
                        thread, location, ..
                    } => {
                        self.handle_method_entry(thread, location).await;
                    }
                    JdwpEvent::MethodExit {
                        thread,
                        location,
                        return_value,
                        ..
                    } => {
                        self.handle_method_exit(thread, location, return_value)
                            .await?;
                    }
                    JdwpEvent::VmDeath => {
                        tracing::debug!("target reported VM death");
                        vm_dead = true;
                    }
                }
            }
            if vm_dead {
                break;
            }
            // One resume per batch, only after every event in it is handled.
            match self.client.vm_resume().await {
                Ok(()) => {}
                Err(err) if err.is_disconnect() => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Arms per-type method entry/exit subscriptions for in-scope types and
    /// starts stepping once the first such type loads.
    async fn handle_class_prepare(
        &mut self,
        thread: ThreadId,
        type_id: ReferenceTypeId,
        signature: &str,
    ) {
        let type_name = signature_to_type_name(signature);
        if !self.scope.contains_type(&type_name) || self.requests.instruments_type(&type_name) {
            return;
        }
        // Classes compiled without debug attributes cannot be line-tracked;
        // skip instrumenting just that type.
        match self.client.reference_type_source_file(type_id).await {
            Ok(_file) => {}
            Err(JdwpError::VmError(ERROR_ABSENT_INFORMATION)) => {
                tracing::warn!(type_name, "no debug metadata; type not instrumented");
                return;
            }
            Err(err) => {
                tracing::debug!(type_name, error = %err, "source file lookup failed");
                return;
            }
        }
        let thread = *self.thread.get_or_insert(thread);
        if let Err(err) = self.requests.arm_method_events(&type_name, thread).await {
            tracing::warn!(type_name, error = %err, "failed to arm method events");
            return;
        }
        tracing::info!(type_name, "instrumenting type");
        if !self.stepping {
            if let Err(err) = self.requests.rearm_step(thread).await {
                tracing::warn!(error = %err, "failed to arm step request");
                return;
            }
            self.stepping = true;
        }
    }

    /// Records a LineVisited event for an in-scope stop. Stops without line
    /// metadata or outside the scope are expected (library and synthetic
    /// code) and skipped silently.
    async fn handle_line_stop(&mut self, thread: ThreadId, location: Location) {
        let recorded = self.try_record_line(thread, location).await;
        if let Some(line) = recorded {
            tracing::debug!(%line, "line visited");
        }
        self.continue_stepping(thread).await;
    }

    async fn try_record_line(&mut self, thread: ThreadId, location: Location) -> Option<LineRef> {
        let filename = self.source_file(location.class_id).await?;
        if !self.scope.contains_file(&filename) {
            return None;
        }
        let line = self
            .client
            .method_line_table(location.class_id, location.method_id)
            .await
            .ok()?
            .line_at(location.index)?;
        let line = LineRef::new(filename, line);

        // Frame inspection failing at this instant degrades the variable
        // map to absent; the visit itself is still recorded.
        let visible_vars = self.read_visible_vars(thread, location).await;

        let parent = self.stack.current();
        let line_for_event = line.clone();
        self.trace.record(|uid| ControlFlowEvent::LineVisited {
            uid,
            parent,
            line: line_for_event,
            visible_vars,
        });
        Some(line)
    }

    /// Records a FunCall for a method entry in an instrumented type and
    /// pushes its uid so nested events attribute to it.
    async fn handle_method_entry(&mut self, thread: ThreadId, location: Location) {
        let Some(method) = self.method_info(location.class_id, location.method_id).await else {
            self.continue_stepping(thread).await;
            return;
        };
        let args = if method.signature.starts_with("()") {
            // No formals to evaluate. Asking the VM for values here anyway
            // is a known source of spurious failures on live targets.
            Some(Vec::new())
        } else {
            self.read_args(thread, location).await
        };
        let parent = self.stack.current();
        let fun_id = method.name.clone();
        let uid = self.trace.record(|uid| ControlFlowEvent::FunCall {
            uid,
            parent,
            fun_id,
            args,
        });
        // Push after append: the call's own uid is the parent of everything
        // nested inside it.
        self.stack.push(uid);
        tracing::debug!(fun = method.name, uid, "method entered");
        self.continue_stepping(thread).await;
    }

    /// Records a FunExit attributed to the caller of the returning method.
    async fn handle_method_exit(
        &mut self,
        thread: ThreadId,
        location: Location,
        return_value: Option<JdwpValue>,
    ) -> Result<()> {
        let Some(method) = self.method_info(location.class_id, location.method_id).await else {
            self.continue_stepping(thread).await;
            return Ok(());
        };
        let entry_uid = self.stack.pop(&method.name)?;
        let ret_val = match &return_value {
            Some(value) => self.renderer.render(&mut self.requests, thread, value).await,
            None => None,
        };
        let parent = self.stack.current();
        let fun_id = method.name.clone();
        self.trace.record(|uid| ControlFlowEvent::FunExit {
            uid,
            parent,
            fun_id,
            ret_val,
        });
        tracing::debug!(fun = method.name, entry_uid, "method exited");
        self.continue_stepping(thread).await;
        Ok(())
    }

    /// Re-arms the one-shot step after a handled stop so the session keeps
    /// following the thread. Without this the target would just run to the
    /// next method event.
    async fn continue_stepping(&mut self, thread: ThreadId) {
        if !self.stepping {
            return;
        }
        if let Err(err) = self.requests.rearm_step(thread).await {
            tracing::debug!(error = %err, "failed to re-arm step request");
        }
    }

    /// Local variables visible in the top frame, rendered. `None` when the
    /// frame or its values cannot be read at this instant.
    async fn read_visible_vars(
        &mut self,
        thread: ThreadId,
        location: Location,
    ) -> Option<VisibleVars> {
        let frame = self.top_frame(thread).await?;
        let (_arg_slots, variables) = self
            .client
            .method_variable_table(location.class_id, location.method_id)
            .await
            .ok()?;
        let visible: Vec<_> = variables
            .into_iter()
            .filter(|v| v.name != "this")
            .filter(|v| {
                v.code_index <= location.index
                    && location.index < v.code_index + u64::from(v.length)
            })
            .collect();
        let slots: Vec<(u32, String)> = visible
            .iter()
            .map(|v| (v.slot, v.signature.clone()))
            .collect();
        let values = self
            .client
            .stack_frame_get_values(thread, frame, &slots)
            .await
            .ok()?;
        let mut vars = VisibleVars::new();
        for (var, value) in visible.iter().zip(values.iter()) {
            let rendered = self.renderer.render(&mut self.requests, thread, value).await;
            vars.insert(var.name.clone(), rendered);
        }
        Some(vars)
    }

    /// Formal parameter values at method entry, in declaration order.
    async fn read_args(
        &mut self,
        thread: ThreadId,
        location: Location,
    ) -> Option<Vec<(String, Option<String>)>> {
        let frame = self.top_frame(thread).await?;
        let (_arg_slots, variables) = self
            .client
            .method_variable_table(location.class_id, location.method_id)
            .await
            .ok()?;
        // Parameters are the variables live from code index zero. Slot
        // order is declaration order.
        let mut params: Vec<_> = variables
            .into_iter()
            .filter(|v| v.code_index == 0 && v.name != "this")
            .collect();
        params.sort_by_key(|v| v.slot);
        let slots: Vec<(u32, String)> = params
            .iter()
            .map(|v| (v.slot, v.signature.clone()))
            .collect();
        let values = self
            .client
            .stack_frame_get_values(thread, frame, &slots)
            .await
            .ok()?;
        let mut args = Vec::with_capacity(params.len());
        for (param, value) in params.iter().zip(values.iter()) {
            let rendered = self.renderer.render(&mut self.requests, thread, value).await;
            args.push((param.name.clone(), rendered));
        }
        Some(args)
    }

    async fn top_frame(&mut self, thread: ThreadId) -> Option<u64> {
        self.client
            .thread_frames(thread, 0, 1)
            .await
            .ok()?
            .first()
            .map(|f| f.frame_id)
    }

    async fn source_file(&mut self, type_id: ReferenceTypeId) -> Option<String> {
        if let Some(cached) = self.source_files.get(&type_id) {
            return cached.clone();
        }
        let file = self.client.reference_type_source_file(type_id).await.ok();
        self.source_files.insert(type_id, file.clone());
        file
    }

    async fn method_info(
        &mut self,
        type_id: ReferenceTypeId,
        method_id: u64,
    ) -> Option<MethodInfo> {
        if !self.methods.contains_key(&type_id) {
            match self.client.reference_type_methods(type_id).await {
                Ok(methods) => {
                    self.methods.insert(type_id, methods);
                }
                // A failed lookup must not be cached as an empty method
                // list; the next event for this type retries it.
                Err(err) => {
                    tracing::debug!(type_id, error = %err, "method list lookup failed");
                    return None;
                }
            }
        }
        self.methods
            .get(&type_id)?
            .iter()
            .find(|m| m.method_id == method_id)
            .cloned()
    }
}
