//! Launching a debuggee JVM with the JDWP agent attached.

use std::{
    net::{SocketAddr, TcpListener},
    path::Path,
    process::Stdio,
    time::Duration,
};

use tokio::process::{Child, Command};

use crate::client::JdwpClient;
use crate::types::{EventSet, JdwpError, Result};

const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// A debuggee JVM started with `suspend=y`. The process is killed when the
/// handle is dropped, so a crashing tracer never leaves a suspended JVM
/// behind.
pub struct LaunchedVm {
    child: Child,
    addr: SocketAddr,
}

impl LaunchedVm {
    /// Starts `java <main_class>` with the JDWP agent listening on an
    /// ephemeral loopback port. The VM suspends before running any code,
    /// waiting for the debugger to attach.
    pub fn start(main_class: &str, classpath: &Path) -> Result<Self> {
        let addr = pick_loopback_port()?;
        let agent = format!(
            "-agentlib:jdwp=transport=dt_socket,server=y,suspend=y,address={addr}"
        );
        let child = Command::new("java")
            .arg(agent)
            .arg("-cp")
            .arg(classpath)
            .arg(main_class)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JdwpError::Launch(format!("failed to spawn java: {e}")))?;
        tracing::info!(%addr, main_class, "launched debuggee VM");
        Ok(Self { child, addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connects to the agent, retrying while the VM finishes binding its
    /// listen socket.
    pub async fn connect(
        &mut self,
    ) -> Result<(JdwpClient, tokio::sync::mpsc::UnboundedReceiver<EventSet>)> {
        let mut last_err = None;
        for attempt in 0..CONNECT_ATTEMPTS {
            if let Some(status) = self
                .child
                .try_wait()
                .map_err(|e| JdwpError::Launch(e.to_string()))?
            {
                return Err(JdwpError::Launch(format!(
                    "java exited before the debugger attached ({status})"
                )));
            }
            match JdwpClient::connect(self.addr).await {
                Ok(pair) => return Ok(pair),
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "debuggee not accepting yet");
                    last_err = Some(err);
                    tokio::time::sleep(CONNECT_BACKOFF).await;
                }
            }
        }
        Err(last_err.unwrap_or(JdwpError::Timeout))
    }

    /// Waits for the debuggee to exit after the trace is complete.
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        Ok(self.child.wait().await?)
    }
}

// Binding port 0 and releasing it races with the JVM re-binding, but the
// window is short and retried connects paper over the rare loss.
fn pick_loopback_port() -> Result<SocketAddr> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?)
}
