use std::path::PathBuf;

/// Errors that can occur while building a [`crate::graph::Graph`] from a
/// parsed pipeline description.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read pipeline description {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    #[error("malformed pipeline description: {0}")]
    Json(#[from] serde_json::Error),

    #[error("node id {0:?} is used by more than one node")]
    DuplicateNodeId(String),

    #[error("edge id {0:?} is used by more than one edge")]
    DuplicateEdgeId(String),

    #[error("edge {edge:?} references unknown node {node:?}")]
    UnknownNode { edge: String, node: String },

    #[error("edge {0:?} connects a node to itself")]
    SelfLoop(String),

    #[error("pipeline graph contains a cycle")]
    Cyclic,
}

/// Errors surfaced while wiring pipes and launching child processes.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to create pipe for edge {edge:?}")]
    Pipe {
        edge: String,
        #[source]
        cause: nix::Error,
    },

    #[error("failed to create node output stream for node {node:?}")]
    OutputStream {
        node: String,
        #[source]
        cause: nix::Error,
    },

    #[error("fork() failed while launching node {node:?}")]
    Fork {
        node: String,
        #[source]
        cause: nix::Error,
    },
}

/// Errors that can occur once the reactor loop is running.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("syscall failed: {0}")]
    Syscall(#[from] nix::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fatal engine failure: {0}")]
    Fatal(String),
}

/// Reports an unrecoverable engine failure and aborts the process (§7:
/// acquiring the shared sink, blocking signals, or installing the signalfd
/// are all one-time startup preconditions the reactor cannot run without;
/// none of them has a meaningful "continue anyway" path). Never returns,
/// matching the teacher's `err_exit`.
pub(crate) fn fatal(cause: impl std::fmt::Display) -> ! {
    let err = EngineError::Fatal(cause.to_string());
    tracing::error!(error = %err, "fatal engine failure, aborting");
    std::process::abort()
}
