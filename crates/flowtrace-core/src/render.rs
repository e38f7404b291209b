//! Value rendering: turns raw JDWP values into the trace's display strings.
//!
//! Primitives render directly. Arrays render recursively. Other object
//! references render by invoking `toString()` on the target, which is the
//! engine's single largest reentrancy hazard: the nested invocation runs
//! real bytecode on the suspended thread, so every instrumentation
//! subscription is paused around it and restored on every path.

use std::collections::HashMap;

use flowtrace_jdwp::types::{
    JdwpValue, ObjectId, ReferenceTypeId, ThreadId, TAG_ARRAY, TAG_STRING,
};
use flowtrace_jdwp::{JdwpClient, JdwpError};

use crate::requests::RequestManager;

/// Hard bound on the superclass walk when looking for `toString`. Real
/// hierarchies reach `java.lang.Object` long before this.
const MAX_SUPERCLASS_WALK: usize = 8;

/// Stable small per-object identities (`@1`, `@2`, ...), assigned in first
/// render order and never reused, so equal-looking objects stay
/// distinguishable across the whole trace.
#[derive(Debug, Default)]
pub struct ObjectIdentities {
    next: u64,
    by_object: HashMap<ObjectId, u64>,
}

impl ObjectIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&mut self, object_id: ObjectId) -> u64 {
        *self.by_object.entry(object_id).or_insert_with(|| {
            self.next += 1;
            self.next
        })
    }
}

#[derive(Debug, Default)]
pub struct ValueRenderer {
    identities: ObjectIdentities,
}

impl ValueRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders `value` to display text, or `None` when inspection failed.
    /// Failures here are always absorbed; the trace records an absent value
    /// and the session continues.
    pub async fn render(
        &mut self,
        requests: &mut RequestManager,
        thread: ThreadId,
        value: &JdwpValue,
    ) -> Option<String> {
        if let Some(text) = render_scalar(value) {
            return Some(text);
        }
        match value {
            JdwpValue::Object { tag, id } => match *tag {
                TAG_STRING => self.render_string(requests.client(), *id).await,
                TAG_ARRAY => self.render_array(requests, thread, *id).await,
                _ => self.render_object(requests, thread, *id).await,
            },
            _ => None,
        }
    }

    async fn render_string(&mut self, client: &JdwpClient, id: ObjectId) -> Option<String> {
        match client.string_value(id).await {
            Ok(text) => Some(format!("\"{text}\"")),
            Err(err) => {
                tracing::debug!(object = id, error = %err, "string value unreadable");
                None
            }
        }
    }

    /// Bracketed comma-joined elements in array order. Any unrenderable
    /// element degrades the whole array; a partially rendered sequence would
    /// misrepresent the value.
    async fn render_array(
        &mut self,
        requests: &mut RequestManager,
        thread: ThreadId,
        id: ObjectId,
    ) -> Option<String> {
        let client = requests.client().clone();
        let length = client.array_length(id).await.ok()?;
        let values = if length > 0 {
            client.array_get_values(id, 0, length).await.ok()?
        } else {
            Vec::new()
        };
        let mut parts = Vec::with_capacity(values.len());
        for value in &values {
            let rendered = Box::pin(self.render(requests, thread, value)).await?;
            parts.push(rendered);
        }
        Some(format!("[{}]", parts.join(",")))
    }

    /// Renders a compound object as `TypeName@N: <toString() result>`. The
    /// remote invocation runs with instrumentation paused; the subscriptions
    /// are restored before this returns, success or not.
    async fn render_object(
        &mut self,
        requests: &mut RequestManager,
        thread: ThreadId,
        id: ObjectId,
    ) -> Option<String> {
        let client = requests.client().clone();
        let type_id = match client.object_reference_type(id).await {
            Ok(type_id) => type_id,
            Err(err) => {
                tracing::debug!(object = id, error = %err, "object type unresolvable");
                return None;
            }
        };
        let type_name = signature_to_type_name(
            &client.reference_type_signature(type_id).await.ok()?,
        );
        let to_string = find_to_string(&client, type_id).await?;

        let paused = match requests.pause_instrumentation().await {
            Ok(paused) => paused,
            Err(err) => {
                tracing::warn!(error = %err, "could not pause instrumentation; skipping value");
                return None;
            }
        };
        let invoked = invoke_to_string(&client, thread, id, to_string).await;
        if let Err(err) = requests.restore_instrumentation(paused, thread).await {
            tracing::warn!(error = %err, "failed to restore instrumentation after invoke");
        }

        let text = match invoked {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(object = id, error = %err, "toString invocation failed");
                return None;
            }
        };
        let identity = self.identities.identity(id);
        Some(format!("{type_name}@{identity}: {text}"))
    }
}

fn render_scalar(value: &JdwpValue) -> Option<String> {
    match value {
        JdwpValue::Void => Some("<void>".to_string()),
        JdwpValue::Boolean(v) => Some(v.to_string()),
        JdwpValue::Byte(v) => Some(v.to_string()),
        JdwpValue::Char(c) => Some(
            char::from_u32(u32::from(*c))
                .map(String::from)
                .unwrap_or_else(|| format!("\\u{c:04x}")),
        ),
        JdwpValue::Short(v) => Some(v.to_string()),
        JdwpValue::Int(v) => Some(v.to_string()),
        JdwpValue::Long(v) => Some(v.to_string()),
        JdwpValue::Float(v) => Some(v.to_string()),
        JdwpValue::Double(v) => Some(v.to_string()),
        JdwpValue::Object { id: 0, .. } => Some("null".to_string()),
        JdwpValue::Object { .. } => None,
    }
}

/// `Lcom/example/Foo;` -> `com.example.Foo`.
pub(crate) fn signature_to_type_name(signature: &str) -> String {
    signature
        .strip_prefix('L')
        .and_then(|s| s.strip_suffix(';'))
        .unwrap_or(signature)
        .replace('/', ".")
}

/// Finds the nearest `toString()` up the superclass chain.
async fn find_to_string(
    client: &JdwpClient,
    mut type_id: ReferenceTypeId,
) -> Option<(ReferenceTypeId, u64)> {
    for _ in 0..MAX_SUPERCLASS_WALK {
        let methods = client.reference_type_methods(type_id).await.ok()?;
        if let Some(method) = methods
            .iter()
            .find(|m| m.name == "toString" && m.signature == "()Ljava/lang/String;")
        {
            return Some((type_id, method.method_id));
        }
        type_id = client.class_superclass(type_id).await.ok()?;
        if type_id == 0 {
            break;
        }
    }
    None
}

async fn invoke_to_string(
    client: &JdwpClient,
    thread: ThreadId,
    object_id: ObjectId,
    (declaring, method_id): (ReferenceTypeId, u64),
) -> Result<String, JdwpError> {
    let result = client
        .object_invoke_method(object_id, thread, declaring, method_id, &[])
        .await?;
    if let Some(exception) = result.exception {
        return Err(JdwpError::Protocol(format!(
            "toString threw (exception object {exception})"
        )));
    }
    match result.value {
        JdwpValue::Object { id, .. } if id != 0 => client.string_value(id).await,
        other => Err(JdwpError::Protocol(format!(
            "toString returned a non-string value: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_rendering_is_direct_and_stable() {
        assert_eq!(render_scalar(&JdwpValue::Int(5)).as_deref(), Some("5"));
        assert_eq!(render_scalar(&JdwpValue::Int(5)).as_deref(), Some("5"));
        assert_eq!(
            render_scalar(&JdwpValue::Boolean(true)).as_deref(),
            Some("true")
        );
        assert_eq!(render_scalar(&JdwpValue::Void).as_deref(), Some("<void>"));
        assert_eq!(
            render_scalar(&JdwpValue::null()).as_deref(),
            Some("null")
        );
        assert_eq!(render_scalar(&JdwpValue::Char(u16::from(b'a'))).as_deref(), Some("a"));
    }

    #[test]
    fn identities_are_stable_and_distinct() {
        let mut identities = ObjectIdentities::new();
        let a = identities.identity(0x5001);
        let b = identities.identity(0x5002);
        assert_ne!(a, b);
        assert_eq!(identities.identity(0x5001), a);
        assert_eq!(identities.identity(0x5002), b);
    }

    #[test]
    fn type_names_from_signatures() {
        assert_eq!(signature_to_type_name("Lcom/example/Foo;"), "com.example.Foo");
        assert_eq!(signature_to_type_name("LMain;"), "Main");
    }
}
