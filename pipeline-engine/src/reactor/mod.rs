//! The event loop and its transport handlers: the hardest part of the
//! engine (§2, ~45% of budget). A single-threaded reactor built on
//! `select(2)`, matching the teacher's non-pidfd fallback loop
//! (`zygote::main_loop::run_loop_legacy`).

mod session;

use crate::{
    error::EngineError,
    graph::Graph,
    launcher,
    pipe::PipeEnd,
    stats::StatsWriter,
    supervisor::{SharedSink, SignalSource},
};
use nix::{
    fcntl::{splice, tee, SpliceFFlags},
    sys::{
        select::{select, FdSet},
        time::{TimeVal, TimeValLike},
        wait::{waitpid, WaitPidFlag, WaitStatus},
    },
};
use session::FanoutSession;
use std::{collections::HashMap, os::unix::io::RawFd, time::Duration};

/// Bounds every splice/tee call (§4.4), matching `MAX_BYTES_TO_SPLICE` in
/// the distilled C source.
const CHUNK_SIZE: usize = 64 * 1024;

/// `SIGPIPE`'s numeric value; termination by this signal is treated as
/// normal exit (§4.4 reaper, §6 signals).
const SIGPIPE_NUMBER: i32 = 13;

pub struct ReactorConfig {
    pub stats_path: std::path::PathBuf,
    pub stats_interval: Duration,
}

/// Drives the whole pipeline to completion (or until interrupted).
pub fn run(mut graph: Graph, config: ReactorConfig) -> Result<(), EngineError> {
    if let Err(cause) = graph.wire_pipes() {
        crate::error::fatal(cause);
    }
    launcher::launch_all(&mut graph)?;

    let sink = SharedSink::open();
    let mut signals = SignalSource::install();
    let stats = StatsWriter::new(config.stats_path, config.stats_interval);

    let mut reactor = Reactor {
        graph,
        sink,
        sessions: HashMap::new(),
        armed_writable: Vec::new(),
        armed_readable: Vec::new(),
        should_stop: false,
    };
    reactor.armed_writable = vec![false; reactor.graph.edges.len()];
    // A node's readable event starts armed so the first cycle can fire; it is
    // then disarmed by `handle_readable` and only re-armed where §4.4 steps
    // 5/6 say to, so an in-progress fan-out cycle's tee/visited bookkeeping
    // is never reset out from under it by a second readable firing.
    reactor.armed_readable = reactor
        .graph
        .output_streams
        .iter()
        .map(Option::is_some)
        .collect();
    reactor.run_loop(&mut signals, stats)
}

struct Reactor {
    graph: Graph,
    sink: SharedSink,
    /// Fan-out scratch state, keyed by source node index. Only present for
    /// nodes with more than one outbound edge (§9 design note).
    sessions: HashMap<usize, FanoutSession>,
    /// Parallel to `graph.edges`: whether this edge's writable event is
    /// currently armed.
    armed_writable: Vec<bool>,
    /// Parallel to `graph.nodes`: whether this node's output-stream readable
    /// event is currently armed. Disarmed for the duration of a fan-out
    /// cycle so a second readable firing can't reset `FanoutSession` state
    /// (and so re-derive `visited`/`bytes_written`) while consumers are
    /// still draining the first one.
    armed_readable: Vec<bool>,
    should_stop: bool,
}

impl Reactor {
    fn run_loop(
        &mut self,
        signals: &mut SignalSource,
        mut stats: StatsWriter,
    ) -> Result<(), EngineError> {
        loop {
            if self.should_stop || self.all_terminated() {
                break;
            }

            let mut read_set = FdSet::new();
            let mut write_set = FdSet::new();
            let sig_fd = signals.as_raw_fd();
            read_set.insert(sig_fd);

            for idx in 0..self.graph.nodes.len() {
                if !self.armed_readable[idx] {
                    continue;
                }
                if let Some(stream) = &self.graph.output_streams[idx] {
                    if stream.is_read_open() {
                        read_set.insert(stream.read_fd());
                    }
                }
            }
            for (edge_idx, armed) in self.armed_writable.iter().enumerate() {
                if !*armed {
                    continue;
                }
                if let Some(pipe) = &self.graph.edge_pipes[edge_idx] {
                    if pipe.is_write_open() {
                        write_set.insert(pipe.write_fd());
                    }
                }
            }

            let mut timeout = TimeVal::milliseconds(stats.millis_until_due() as i64);
            let ready = select(None, &mut read_set, &mut write_set, None, &mut timeout);
            let ready = match ready {
                Ok(n) => n,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(err) => return Err(EngineError::Syscall(err)),
            };

            if ready == 0 {
                stats.maybe_write(&self.graph);
                continue;
            }

            if read_set.contains(sig_fd) {
                let fired = signals.drain();
                if fired.child_exit {
                    self.reap_children();
                }
                if fired.interrupt {
                    self.handle_interrupt();
                }
            }

            for idx in 0..self.graph.nodes.len() {
                let readable = self.graph.output_streams[idx]
                    .as_ref()
                    .map(|p| p.is_read_open() && read_set.contains(p.read_fd()))
                    .unwrap_or(false);
                if readable {
                    self.handle_readable(idx);
                }
            }

            for edge_idx in 0..self.graph.edges.len() {
                let writable = self.graph.edge_pipes[edge_idx]
                    .as_ref()
                    .map(|p| p.is_write_open() && write_set.contains(p.write_fd()))
                    .unwrap_or(false);
                if writable {
                    self.handle_writable(edge_idx);
                }
            }

            stats.maybe_write(&self.graph);
        }
        Ok(())
    }

    fn all_terminated(&self) -> bool {
        !self.graph.nodes.is_empty() && self.graph.nodes.iter().all(|n| n.terminated)
    }

    /// §4.4 step 1: reset the session (for fan-out sources) and arm every
    /// outbound writable event. Disarms this source's own readable event
    /// until step 5/6 re-arms it, so the cycle just started can't be reset
    /// by another readable firing before it completes.
    fn handle_readable(&mut self, source_idx: usize) {
        let outbound = self.graph.nodes[source_idx].outbound_edges.clone();
        if outbound.len() > 1 {
            self.sessions
                .entry(source_idx)
                .or_insert_with(|| FanoutSession::new(outbound.len()))
                .reset();
        }
        for edge_idx in outbound {
            self.armed_writable[edge_idx] = true;
        }
        self.armed_readable[source_idx] = false;
    }

    fn handle_writable(&mut self, edge_idx: usize) {
        let source_idx = self.graph.edges[edge_idx].from_index;
        if self.graph.nodes[source_idx].outbound_edges.len() <= 1 {
            self.handle_writable_single(source_idx, edge_idx);
        } else {
            self.handle_writable_fanout(source_idx, edge_idx);
        }
    }

    /// Single-consumer transport (§4.4): a direct, consuming splice.
    fn handle_writable_single(&mut self, source_idx: usize, edge_idx: usize) {
        let src_fd = match &self.graph.output_streams[source_idx] {
            Some(p) if p.is_read_open() => p.read_fd(),
            _ => return,
        };
        let dst_fd = match &self.graph.edge_pipes[edge_idx] {
            Some(p) if p.is_write_open() => p.write_fd(),
            _ => return,
        };

        match do_splice(src_fd, dst_fd, CHUNK_SIZE) {
            Ok(0) => {
                tracing::debug!(edge = %self.graph.edges[edge_idx].id, "producer EOF, closing edge");
                self.close_output_stream(source_idx);
                self.close_edge_pipe(edge_idx);
                self.armed_writable[edge_idx] = false;
            }
            Ok(n) => {
                self.graph.edges[edge_idx].bytes_transported += n as u64;
                self.armed_readable[source_idx] = true;
            }
            Err(nix::errno::Errno::EAGAIN) => {
                self.armed_readable[source_idx] = true;
            }
            Err(err) => {
                tracing::error!(edge = %self.graph.edges[edge_idx].id, error = %err, "splice failed, abandoning edge");
                self.close_output_stream(source_idx);
                self.close_edge_pipe(edge_idx);
                self.armed_writable[edge_idx] = false;
            }
        }
    }

    /// Fan-out transport (§4.4): tee into this consumer, then reclaim the
    /// prefix every live consumer has already received.
    fn handle_writable_fanout(&mut self, source_idx: usize, edge_idx: usize) {
        let consumer_idx = match self.graph.nodes[source_idx]
            .outbound_edges
            .iter()
            .position(|&e| e == edge_idx)
        {
            Some(i) => i,
            None => return,
        };

        {
            let session = self.sessions.get(&source_idx);
            let already_visited = session
                .map(|s| s.consumers[consumer_idx].visited)
                .unwrap_or(false);
            if already_visited {
                return;
            }
        }

        let src_fd = match &self.graph.output_streams[source_idx] {
            Some(p) if p.is_read_open() => p.read_fd(),
            _ => return,
        };
        let dst_fd = match &self.graph.edge_pipes[edge_idx] {
            Some(p) if p.is_write_open() => p.write_fd(),
            _ => return,
        };

        match do_tee(src_fd, dst_fd, CHUNK_SIZE) {
            Ok(n) => {
                self.graph.edges[edge_idx].bytes_transported += n as u64;
                if let Some(session) = self.sessions.get_mut(&source_idx) {
                    session.record_tee(consumer_idx, n as u64);
                }
            }
            Err(nix::errno::Errno::EAGAIN) => return,
            Err(err) => {
                tracing::error!(edge = %self.graph.edges[edge_idx].id, error = %err, "tee failed, abandoning consumer");
                self.close_edge_pipe(edge_idx);
                self.armed_writable[edge_idx] = false;
                if let Some(session) = self.sessions.get_mut(&source_idx) {
                    session.mark_dead(consumer_idx);
                }
            }
        }

        self.maybe_reclaim(source_idx);
    }

    /// §4.4 step 4: once every live consumer has fired this cycle, splice
    /// the safely-written prefix into the shared sink.
    fn maybe_reclaim(&mut self, source_idx: usize) {
        let (all_visited, reclaimable, any_alive) = match self.sessions.get(&source_idx) {
            Some(s) => (s.all_visited(), s.reclaimable(), s.any_alive()),
            None => return,
        };
        if !all_visited {
            return;
        }
        if !any_alive {
            tracing::debug!(node = %self.graph.nodes[source_idx].id, "all consumers abandoned, closing source");
            self.close_output_stream(source_idx);
            self.sessions.remove(&source_idx);
            return;
        }
        if reclaimable == 0 {
            return;
        }

        let src_fd = match &self.graph.output_streams[source_idx] {
            Some(p) if p.is_read_open() => p.read_fd(),
            _ => return,
        };

        match do_splice_to_sink(src_fd, self.sink.fd(), reclaimable as usize) {
            Ok(0) => {
                tracing::debug!(node = %self.graph.nodes[source_idx].id, "producer EOF, closing fan-out group");
                self.close_output_stream(source_idx);
                let outbound = self.graph.nodes[source_idx].outbound_edges.clone();
                for edge_idx in outbound {
                    self.close_edge_pipe_write_only(edge_idx);
                    self.armed_writable[edge_idx] = false;
                }
                self.sessions.remove(&source_idx);
            }
            Ok(n) => {
                if let Some(session) = self.sessions.get_mut(&source_idx) {
                    session.apply_reclamation(n as u64);
                }
                self.armed_readable[source_idx] = true;
            }
            Err(nix::errno::Errno::EAGAIN) => {
                tracing::warn!(node = %self.graph.nodes[source_idx].id, "reclamation splice would block; retrying next cycle");
                self.armed_readable[source_idx] = true;
            }
            Err(err) => {
                tracing::error!(node = %self.graph.nodes[source_idx].id, error = %err, "reclamation splice failed");
                self.close_output_stream(source_idx);
                self.sessions.remove(&source_idx);
            }
        }
    }

    fn close_output_stream(&mut self, node_idx: usize) {
        if let Some(p) = self.graph.output_streams[node_idx].as_mut() {
            p.close_in_parent(PipeEnd::Read);
            p.close_in_parent(PipeEnd::Write);
        }
    }

    fn close_edge_pipe(&mut self, edge_idx: usize) {
        if let Some(p) = self.graph.edge_pipes[edge_idx].as_mut() {
            p.close_in_parent(PipeEnd::Read);
            p.close_in_parent(PipeEnd::Write);
        }
    }

    fn close_edge_pipe_write_only(&mut self, edge_idx: usize) {
        if let Some(p) = self.graph.edge_pipes[edge_idx].as_mut() {
            p.close_in_parent(PipeEnd::Write);
        }
    }

    /// Child-exit handler (§4.4 reaper): because signal delivery coalesces,
    /// drains `waitpid(-1, WNOHANG)` until nothing more is reapable.
    fn reap_children(&mut self) {
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(status) => self.reap_one(status),
                Err(nix::errno::Errno::ECHILD) => break,
                Err(err) => {
                    tracing::error!(error = %err, "waitpid failed");
                    break;
                }
            }
        }
    }

    fn reap_one(&mut self, status: WaitStatus) {
        let (pid, normal, detail): (libc::pid_t, bool, String) = match status {
            WaitStatus::Exited(pid, code) => (pid.as_raw(), true, format!("exit code {}", code)),
            WaitStatus::Signaled(pid, signal, _core) => {
                let sig = signal as i32;
                (
                    pid.as_raw(),
                    sig == SIGPIPE_NUMBER,
                    format!("signal {}", signal),
                )
            }
            _ => return,
        };

        let idx = match self.graph.node_index_by_pid(pid) {
            Some(idx) => idx,
            None => return,
        };

        if !normal {
            tracing::warn!(node = %self.graph.nodes[idx].id, %detail, "child terminated abnormally");
        } else {
            tracing::debug!(node = %self.graph.nodes[idx].id, %detail, "child terminated");
        }

        let inbound = self.graph.nodes[idx].inbound_edges.clone();
        for edge_idx in inbound {
            self.close_edge_pipe(edge_idx);
        }
        let outbound = self.graph.nodes[idx].outbound_edges.clone();
        for edge_idx in outbound {
            if self.graph.edge_pipes[edge_idx]
                .as_ref()
                .map(|p| p.is_write_open())
                .unwrap_or(false)
            {
                self.close_edge_pipe_write_only(edge_idx);
            }
        }

        self.graph.nodes[idx].terminated = true;

        for &edge_idx in &self.graph.nodes[idx].inbound_edges {
            let edge = &self.graph.edges[edge_idx];
            tracing::info!(edge = %edge.id, bytes = edge.bytes_transported, "edge closed");
        }
    }

    /// Interrupt handler (§4.4): request loop break on the next iteration.
    fn handle_interrupt(&mut self) {
        tracing::info!("interrupt received, requesting graceful shutdown");
        self.should_stop = true;
    }
}

fn do_splice(src: RawFd, dst: RawFd, len: usize) -> nix::Result<usize> {
    splice(src, None, dst, None, len, SpliceFFlags::SPLICE_F_NONBLOCK)
}

fn do_tee(src: RawFd, dst: RawFd, len: usize) -> nix::Result<usize> {
    tee(src, dst, len, SpliceFFlags::SPLICE_F_NONBLOCK)
}

fn do_splice_to_sink(src: RawFd, sink: RawFd, len: usize) -> nix::Result<usize> {
    splice(src, None, sink, None, len, SpliceFFlags::SPLICE_F_NONBLOCK)
}
