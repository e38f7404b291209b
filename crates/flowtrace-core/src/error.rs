use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The target process could not be started or attached to. Surfaced to
    /// the caller before the event loop runs; never raised afterwards.
    #[error("failed to launch target: {0}")]
    Launch(String),

    /// A method-exit event arrived with no unmatched method entry on the
    /// call stack. Entry/exit events are paired by the VM, so this means the
    /// engine missed an entry and the trace's parent links are unsound.
    #[error("method exit for {fun_id} with no matching entry on the call stack")]
    UnmatchedReturn { fun_id: String },

    #[error(transparent)]
    Jdwp(#[from] flowtrace_jdwp::JdwpError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
