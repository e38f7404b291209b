//! Event-request bookkeeping: the class-prepare subscription, per-type
//! method entry/exit subscriptions, the rolling one-shot line step, and the
//! pause/restore bracket used during nested remote invocations.

use flowtrace_jdwp::types::{
    ThreadId, EVENT_KIND_CLASS_PREPARE, EVENT_KIND_METHOD_ENTRY,
    EVENT_KIND_METHOD_EXIT_WITH_RETURN_VALUE, EVENT_KIND_SINGLE_STEP, STEP_DEPTH_OVER,
    STEP_SIZE_LINE, SUSPEND_POLICY_ALL,
};
use flowtrace_jdwp::{EventModifier, JdwpClient, JdwpError};

use crate::error::Result;

#[derive(Debug)]
struct MethodRequests {
    type_name: String,
    entry_id: i32,
    exit_id: i32,
}

/// Owns every event request the engine arms and remembers enough to re-arm
/// them after a pause. All requests suspend all threads, keeping the
/// single-thread-of-interest model sound.
pub struct RequestManager {
    client: JdwpClient,
    class_prepare_id: Option<i32>,
    method_requests: Vec<MethodRequests>,
    /// Thread the rolling one-shot step request targets, if armed.
    step: Option<(i32, ThreadId)>,
}

/// Token proving instrumentation was paused for a nested invocation. Must be
/// handed back to [`RequestManager::restore_instrumentation`] on every path.
#[must_use = "paused instrumentation must be restored"]
pub struct PausedInstrumentation {
    restored: bool,
}

impl Drop for PausedInstrumentation {
    fn drop(&mut self) {
        if !self.restored {
            tracing::warn!("instrumentation paused but never restored; subscriptions are lost");
        }
    }
}

impl RequestManager {
    pub fn new(client: JdwpClient) -> Self {
        Self {
            client,
            class_prepare_id: None,
            method_requests: Vec::new(),
            step: None,
        }
    }

    pub fn client(&self) -> &JdwpClient {
        &self.client
    }

    /// Arms the single class-prepare subscription. `pattern` is a JDWP class
    /// match pattern (`*` observes every load; the session filters by scope).
    pub async fn arm_class_prepare(&mut self, pattern: &str) -> Result<()> {
        let id = self
            .client
            .event_request_set(
                EVENT_KIND_CLASS_PREPARE,
                SUSPEND_POLICY_ALL,
                &[EventModifier::ClassMatch {
                    pattern: pattern.to_string(),
                }],
            )
            .await?;
        self.class_prepare_id = Some(id);
        Ok(())
    }

    /// Arms method entry and exit subscriptions scoped to one declared type
    /// and the thread of interest. Exit uses the return-value-carrying event
    /// kind so `FunExit` can record what the method returned.
    pub async fn arm_method_events(&mut self, type_name: &str, thread: ThreadId) -> Result<()> {
        let (entry_id, exit_id) = self.set_method_requests(type_name, thread).await?;
        self.method_requests.push(MethodRequests {
            type_name: type_name.to_string(),
            entry_id,
            exit_id,
        });
        Ok(())
    }

    pub fn instruments_type(&self, type_name: &str) -> bool {
        self.method_requests.iter().any(|r| r.type_name == type_name)
    }

    /// Arms (or re-arms) the one-shot line step for `thread`: one hit, line
    /// granularity, step-over depth. Re-armed at every handled stop, so
    /// stepping keeps following the thread into and out of frames while
    /// method events track calls independently.
    pub async fn rearm_step(&mut self, thread: ThreadId) -> Result<()> {
        self.clear_step().await;
        let id = self
            .client
            .event_request_set(
                EVENT_KIND_SINGLE_STEP,
                SUSPEND_POLICY_ALL,
                &[
                    EventModifier::Count { count: 1 },
                    EventModifier::Step {
                        thread,
                        size: STEP_SIZE_LINE,
                        depth: STEP_DEPTH_OVER,
                    },
                ],
            )
            .await?;
        self.step = Some((id, thread));
        Ok(())
    }

    /// Clears the step request if armed. A one-shot request that already
    /// fired is gone on the VM side, so a rejection here is expected.
    async fn clear_step(&mut self) {
        if let Some((id, _thread)) = self.step.take() {
            if let Err(err) = self
                .client
                .event_request_clear(EVENT_KIND_SINGLE_STEP, id)
                .await
            {
                if !matches!(err, JdwpError::VmError(_)) {
                    tracing::debug!(error = %err, "failed to clear step request");
                }
            }
        }
    }

    /// Clears method entry/exit and step subscriptions so a nested
    /// invocation on the target cannot generate events. Class-prepare stays
    /// armed; `toString` does not load user classes and a missed prepare
    /// would silently un-instrument a type.
    pub async fn pause_instrumentation(&mut self) -> Result<PausedInstrumentation> {
        for req in &self.method_requests {
            self.client
                .event_request_clear(EVENT_KIND_METHOD_ENTRY, req.entry_id)
                .await?;
            self.client
                .event_request_clear(EVENT_KIND_METHOD_EXIT_WITH_RETURN_VALUE, req.exit_id)
                .await?;
        }
        self.clear_step().await;
        Ok(PausedInstrumentation { restored: false })
    }

    /// Re-arms exactly the subscriptions `pause_instrumentation` cleared,
    /// from the retained configuration. Safe to call after a failed
    /// invocation; the request set ends up identical to the pre-pause set.
    pub async fn restore_instrumentation(
        &mut self,
        mut paused: PausedInstrumentation,
        thread: ThreadId,
    ) -> Result<()> {
        paused.restored = true;
        for i in 0..self.method_requests.len() {
            let type_name = self.method_requests[i].type_name.clone();
            let (entry_id, exit_id) = self.set_method_requests(&type_name, thread).await?;
            self.method_requests[i].entry_id = entry_id;
            self.method_requests[i].exit_id = exit_id;
        }
        self.rearm_step(thread).await?;
        Ok(())
    }

    async fn set_method_requests(
        &self,
        type_name: &str,
        thread: ThreadId,
    ) -> Result<(i32, i32)> {
        let modifiers = [
            EventModifier::ThreadOnly { thread },
            EventModifier::ClassMatch {
                pattern: type_name.to_string(),
            },
        ];
        let entry_id = self
            .client
            .event_request_set(EVENT_KIND_METHOD_ENTRY, SUSPEND_POLICY_ALL, &modifiers)
            .await?;
        let exit_id = self
            .client
            .event_request_set(
                EVENT_KIND_METHOD_EXIT_WITH_RETURN_VALUE,
                SUSPEND_POLICY_ALL,
                &modifiers,
            )
            .await?;
        Ok((entry_id, exit_id))
    }
}
