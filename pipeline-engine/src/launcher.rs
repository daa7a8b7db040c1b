//! Process launcher: turns each [`Node`] into a running child connected to
//! its pipes.
//!
//! Follows the teacher's `zygote::do_exec` shape (fork, then in the child:
//! mark everything else `CLOEXEC`, `dup2` stdio onto 0/1, `execve`), but the
//! equivalent here is a plain `fork` + `execv("/bin/sh", ["-c", cmd])` since
//! there is no sandboxing to set up — only stdio plumbing.

use crate::{
    error::LaunchError,
    graph::{Graph, NodeKind},
    pipe::PipeEnd,
};
use nix::unistd::ForkResult;
use std::{ffi::CString, os::unix::io::RawFd};

/// Resolves a node's `(kind, cmd)` into the actual shell command line to
/// execute. `read-file`/`write-file`/`sink` are convenience sugar over a
/// single coreutils invocation; unknown kinds degrade to `exec`.
pub(crate) fn resolve_command(kind: NodeKind, cmd: &str) -> String {
    match kind {
        NodeKind::Exec => cmd.to_string(),
        NodeKind::ReadFile => format!("cat {}", shell_quote(cmd)),
        NodeKind::WriteFile => format!("cat > {}", shell_quote(cmd)),
        NodeKind::Sink => "cat > /dev/null".to_string(),
    }
}

fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

/// Launches every node in the graph: forks a child wired to its stdin edge's
/// pipe (if any) and its node output stream (if any), and records the
/// child's pid back onto the node.
///
/// `Graph::wire_pipes` must have already run successfully.
pub(crate) fn launch_all(graph: &mut Graph) -> Result<(), LaunchError> {
    for idx in 0..graph.nodes.len() {
        launch_node(graph, idx)?;
    }
    Ok(())
}

fn launch_node(graph: &mut Graph, idx: usize) -> Result<(), LaunchError> {
    let stdin_edge = graph.nodes[idx].stdin_edge();
    let stdin_fd = stdin_edge.and_then(|e| graph.edge_pipes[e].as_ref()).map(|p| p.read_fd());
    let stdout_fd = graph.output_streams[idx].as_ref().map(|p| p.write_fd());
    let all_fds = collect_all_graph_fds(graph);

    let command = resolve_command(graph.nodes[idx].kind, &graph.nodes[idx].cmd);
    let node_id = graph.nodes[idx].id.clone();

    // SAFETY: the child immediately execs or exits via `_exit`; it never
    // runs Rust destructors or touches the parent's allocator state.
    match unsafe { nix::unistd::fork() }.map_err(|cause| LaunchError::Fork {
        node: node_id,
        cause,
    })? {
        ForkResult::Child => {
            child_exec(stdin_fd, stdout_fd, &all_fds, &command);
            unsafe { libc::_exit(127) }
        }
        ForkResult::Parent { child } => {
            if let Some(e) = stdin_edge {
                if let Some(pipe) = graph.edge_pipes[e].as_mut() {
                    pipe.close_in_parent(PipeEnd::Read);
                }
            }
            if let Some(pipe) = graph.output_streams[idx].as_mut() {
                pipe.close_in_parent(PipeEnd::Write);
            }
            graph.nodes[idx].pid = Some(child.as_raw());
            Ok(())
        }
    }
}

/// Every read/write fd belonging to any pipe in the graph: node output
/// streams and edge pipes. Used to close everything a child must not
/// inherit except the (at most) two it's handed via `dup2`.
fn collect_all_graph_fds(graph: &Graph) -> Vec<RawFd> {
    let mut fds = Vec::new();
    for stream in graph.output_streams.iter().flatten() {
        fds.push(stream.read_fd());
        fds.push(stream.write_fd());
    }
    for pipe in graph.edge_pipes.iter().flatten() {
        fds.push(pipe.read_fd());
        fds.push(pipe.write_fd());
    }
    fds
}

/// Runs in the forked child only. Never returns on success (`execv`
/// replaces the process image); on failure it writes a diagnostic and exits
/// non-zero, which the reaper later observes as ordinary child termination.
fn child_exec(stdin_fd: Option<RawFd>, stdout_fd: Option<RawFd>, all_fds: &[RawFd], command: &str) {
    unsafe {
        for &fd in all_fds {
            if Some(fd) != stdin_fd && Some(fd) != stdout_fd {
                libc::close(fd);
            }
        }
        if let Some(fd) = stdin_fd {
            libc::dup2(fd, libc::STDIN_FILENO);
            if fd != libc::STDIN_FILENO {
                libc::close(fd);
            }
        }
        if let Some(fd) = stdout_fd {
            libc::dup2(fd, libc::STDOUT_FILENO);
            if fd != libc::STDOUT_FILENO {
                libc::close(fd);
            }
        }

        // Stable Rust's runtime sets SIGPIPE to SIG_IGN at startup, and that
        // disposition survives both fork() and execve() per POSIX. Reset it
        // here so a node writing into a closed downstream pipe dies with
        // SIGPIPE (as the reaper's broken-pipe handling expects) instead of
        // getting EPIPE back from every write(2).
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);

        let shell = CString::new("/bin/sh").unwrap();
        let flag = CString::new("-c").unwrap();
        let cmd = CString::new(command).unwrap_or_else(|_| CString::new("false").unwrap());
        let argv = [shell.as_ptr(), flag.as_ptr(), cmd.as_ptr(), std::ptr::null()];
        libc::execv(shell.as_ptr(), argv.as_ptr());
        // execv only returns on error.
        let err = errno::errno();
        eprintln!("pipeline-engine: execv(/bin/sh) failed: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_kind_passes_cmd_through() {
        assert_eq!(resolve_command(NodeKind::Exec, "cat"), "cat");
    }

    #[test]
    fn read_file_kind_wraps_cat() {
        assert_eq!(
            resolve_command(NodeKind::ReadFile, "/tmp/in.txt"),
            "cat '/tmp/in.txt'"
        );
    }

    #[test]
    fn write_file_kind_wraps_redirect() {
        assert_eq!(
            resolve_command(NodeKind::WriteFile, "/tmp/out.txt"),
            "cat > '/tmp/out.txt'"
        );
    }

    #[test]
    fn sink_kind_ignores_cmd() {
        assert_eq!(resolve_command(NodeKind::Sink, "whatever"), "cat > /dev/null");
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
