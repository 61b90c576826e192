//! Orchestrator: builds the worker topology from config, spawns reader
//! and writer threads, runs the control-plane proxy, and validates the
//! invariants the assignment algorithm must uphold.
//!
//! Rust's standard runtime already ignores `SIGPIPE` (a write to a
//! closed socket surfaces as an `EPIPE` I/O error rather than killing
//! the process), so there is nothing left to mask at startup.
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use logger::logger::Logger;
use resp::parser::{ParseOutcome, Parser};
use resp::value::RespValue;

use crate::config::{Config, SourceKind};
use crate::error::EngineError;
use crate::group::{Group, GroupKind};
use crate::ids::{IdGen, ReaderId, SourceId, TargetId, WriterId};
use crate::node::source::SourceNode;
use crate::node::target::TargetNode;
use crate::proxy::{aggregate_snapshot, Proxy};
use crate::reader::ReaderWorker;
use crate::stats::Stats;
use crate::thread_assign::assign_threads;
use crate::worker_loop::{Tick, WorkerLoop};
use crate::writer::WriterWorker;

/// One reader/writer pairing plus the source nodes it owns — the plain
/// data an orchestrator hands each thread, rather than pointer
/// cross-references.
pub struct WorkerAssignment {
    pub reader_id: ReaderId,
    pub writer_id: WriterId,
    pub source_ids: Vec<SourceId>,
}

/// Validates that every source is owned by exactly the reader/writer
/// pair its assignment claims, and that the assignment table covers
/// every configured source exactly once.
pub fn validate_assignment(
    sources: &HashMap<SourceId, SourceNode>,
    assignments: &[WorkerAssignment],
) -> Result<(), String> {
    let mut seen = 0usize;
    for a in assignments {
        for sid in &a.source_ids {
            let node = sources
                .get(sid)
                .ok_or_else(|| format!("assignment references unknown source {sid}"))?;
            if node.reader != a.reader_id || node.writer != a.writer_id {
                return Err(format!(
                    "source {sid} owner mismatch: node says ({}, {}), assignment says ({}, {})",
                    node.reader, node.writer, a.reader_id, a.writer_id
                ));
            }
        }
        seen += a.source_ids.len();
    }
    if seen != sources.len() {
        return Err(format!(
            "assignment covers {seen} sources but {} were configured",
            sources.len()
        ));
    }
    Ok(())
}

/// Builds a naive contiguous-run assignment: `source_addrs` split into
/// `reader_count` (resp. `writer_count`) roughly-even runs, remainder
/// going to the earliest workers.
fn naive_runs(total: usize, worker_count: usize) -> Vec<usize> {
    if worker_count == 0 {
        return Vec::new();
    }
    let base = total / worker_count;
    let remainder = total % worker_count;
    (0..worker_count)
        .map(|i| base + if i < remainder { 1 } else { 0 })
        .collect()
}

pub struct Orchestrator {
    config: Config,
    logger: Logger,
}

impl Orchestrator {
    pub fn new(config: Config, logger: Logger) -> Self {
        Orchestrator { config, logger }
    }

    /// Builds source nodes per `source_kind`: live replication links get a
    /// full reader/writer assignment (`compute_assignment`); file-backed
    /// sources never get a reader at all (genuinely `R=0` — no
    /// `ReplicationTick` thread is ever spawned for them, see
    /// `run_migrate`), only a writer to read the file into.
    fn build_sources(&self, ids: &IdGen) -> HashMap<SourceId, SourceNode> {
        match self.config.get_source_kind() {
            SourceKind::Socket => {
                let assignment = self.compute_assignment();
                let mut sources = HashMap::new();
                for (addr, reader_id, writer_id) in assignment {
                    let id = SourceId(ids.next());
                    sources.insert(id, SourceNode::new(id, addr, reader_id, writer_id));
                }
                sources
            }
            SourceKind::RdbFile => {
                let paths = self.config.get_source_paths();
                let writer_count = self.config.get_thread_count().max(1).min(paths.len().max(1));
                let writer_of = Self::run_owners(paths.len(), &naive_runs(paths.len(), writer_count));
                let mut sources = HashMap::new();
                for (i, path) in paths.iter().enumerate() {
                    let id = SourceId(ids.next());
                    let writer_id = WriterId(writer_of.get(i).copied().unwrap_or(0) as u64);
                    sources.insert(id, SourceNode::new_file(id, path.clone(), ReaderId(0), writer_id));
                }
                sources
            }
        }
    }

    /// Computes `(addr, reader, writer)` triples for live replication
    /// sources. Uses the host-affine variant when `source_safe` is set,
    /// naive contiguous runs otherwise.
    fn compute_assignment(&self) -> Vec<(SocketAddr, ReaderId, WriterId)> {
        let source_addrs = self.config.get_source_addrs();
        let node_count = source_addrs.len().max(1);
        let host_affine = self.config.get_source_safe();

        let assignment = assign_threads(node_count, self.config.get_thread_count())
            .unwrap_or(crate::thread_assign::ThreadAssignment {
                read_threads: 1,
                write_threads: 1,
            });
        let (reader_of, writer_of) = if host_affine {
            (
                Self::host_affine_owners(source_addrs, assignment.read_threads),
                Self::host_affine_owners(source_addrs, assignment.write_threads),
            )
        } else {
            (
                Self::run_owners(source_addrs.len(), &naive_runs(source_addrs.len(), assignment.read_threads)),
                Self::run_owners(source_addrs.len(), &naive_runs(source_addrs.len(), assignment.write_threads)),
            )
        };
        Self::distribute(source_addrs, &reader_of, &writer_of)
    }

    fn distribute(
        addrs: &[SocketAddr],
        reader_of: &[usize],
        writer_of: &[usize],
    ) -> Vec<(SocketAddr, ReaderId, WriterId)> {
        addrs
            .iter()
            .enumerate()
            .map(|(i, addr)| {
                (
                    *addr,
                    ReaderId(reader_of.get(i).copied().unwrap_or(0) as u64),
                    WriterId(writer_of.get(i).copied().unwrap_or(0) as u64),
                )
            })
            .collect()
    }

    fn run_owners(total: usize, runs: &[usize]) -> Vec<usize> {
        let mut owners = Vec::with_capacity(total);
        for (worker, &run_len) in runs.iter().enumerate() {
            owners.extend(std::iter::repeat(worker).take(run_len));
        }
        owners
    }

    /// Groups source addresses by hostname (the substring before `:`),
    /// sorts buckets by descending instance count, and assigns one
    /// bucket per worker up to `worker_count`; any remaining buckets
    /// attach to whichever worker currently holds the fewest nodes
    /// (ties broken by lowest worker id). Returns the worker index
    /// owning each address, by position.
    fn host_affine_owners(addrs: &[SocketAddr], worker_count: usize) -> Vec<usize> {
        if worker_count == 0 || addrs.is_empty() {
            return vec![0; addrs.len()];
        }
        let mut host_order: Vec<String> = Vec::new();
        let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, addr) in addrs.iter().enumerate() {
            let host = addr.ip().to_string();
            if !buckets.contains_key(&host) {
                host_order.push(host.clone());
            }
            buckets.entry(host).or_default().push(i);
        }
        let mut ordered_buckets: Vec<Vec<usize>> = host_order
            .into_iter()
            .map(|h| buckets.remove(&h).expect("just inserted"))
            .collect();
        ordered_buckets.sort_by_key(|b| std::cmp::Reverse(b.len()));

        let mut owner = vec![0usize; addrs.len()];
        let mut worker_node_count = vec![0usize; worker_count];
        for (bucket_idx, bucket) in ordered_buckets.iter().enumerate() {
            let worker = if bucket_idx < worker_count {
                bucket_idx
            } else {
                worker_node_count
                    .iter()
                    .enumerate()
                    .min_by_key(|&(id, &count)| (count, id))
                    .map(|(id, _)| id)
                    .expect("worker_count > 0")
            };
            for &idx in bucket {
                owner[idx] = worker;
            }
            worker_node_count[worker] += bucket.len();
        }
        owner
    }

    fn build_group(&self, ids: &IdGen) -> Result<(Group, Vec<TargetNode>), EngineError> {
        let noreply = self.config.get_noreply();
        let nodes: Vec<TargetNode> = if self.config.get_target_kind() == GroupKind::RdbFile {
            let paths = self.config.get_target_paths();
            if paths.is_empty() {
                return Err(EngineError::setup("ORCHESTRATOR", "no target file configured"));
            }
            paths
                .iter()
                .map(|path| TargetNode::new_file(TargetId(ids.next()), path.clone(), noreply))
                .collect()
        } else {
            let addrs = self.config.get_target_addrs();
            if addrs.is_empty() {
                return Err(EngineError::setup("ORCHESTRATOR", "no target addresses configured"));
            }
            addrs
                .iter()
                .map(|addr| TargetNode::new(TargetId(ids.next()), *addr, noreply))
                .collect()
        };
        let target_ids: Vec<TargetId> = nodes.iter().map(|n| n.id).collect();
        let group = match self.config.get_target_kind() {
            GroupKind::Single => Group::single(target_ids[0]),
            GroupKind::RdbFile => Group::rdb_file(target_ids[0]),
            GroupKind::Cluster => Group::cluster_even(&target_ids)
                .map_err(|e| EngineError::setup("ORCHESTRATOR", e))?,
        };
        Ok((group, nodes))
    }

    /// Starts the reader, writer, and proxy threads and blocks until
    /// `shutdown` is observed by every loop. Returns the per-writer stats
    /// handles so a caller (or the CLI) can inspect final counters.
    pub fn run_migrate(&self, shutdown: Arc<AtomicBool>) -> Result<Vec<Arc<Stats>>, EngineError> {
        let ids = IdGen::new();
        let sources = self.build_sources(&ids);
        let (group, targets) = self.build_group(&ids)?;

        validate_assignment(
            &sources,
            &Self::assignments_from(&sources),
        )
        .map_err(|e| EngineError::setup("ORCHESTRATOR", e))?;

        let sources = Arc::new(Mutex::new(sources));
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let mut stats_handles = Vec::new();

        let (wake_tx, _wake_rx) = channel::<()>();
        let segments = Arc::new(crate::buffer::pool::SegmentPool::new(
            self.config.get_mbuf_size(),
            self.config.get_segment_pool_size(),
        ));
        let reader = Arc::new(ReaderWorker::new(0, wake_tx, self.logger.clone(), segments));

        let writer = Arc::new(Mutex::new(WriterWorker::new(
            group,
            targets,
            self.config.get_noreply(),
            self.logger.clone(),
        )));
        stats_handles.push(writer.lock().unwrap().stats());

        {
            let sources = sources.clone();
            let writer = writer.clone();
            let reader = reader.clone();
            let shutdown = shutdown.clone();
            let logger = self.logger.clone();
            handles.push(thread::spawn(move || {
                let loop_ = WorkerLoop::new(Duration::from_millis(20), Duration::from_secs(1), shutdown);
                loop_.run(PipelineTick {
                    sources,
                    writer,
                    reader,
                    logger,
                });
            }));
        }

        // File-backed sources have no replication link to dial — the
        // writer reads them directly in `process_source`, so no
        // `ReplicationTick` thread is spawned at all for this run (a
        // genuine R=0, not merely a reader assigned id 0).
        if self.config.get_source_kind() == SourceKind::Socket {
            for reader_id in Self::reader_ids(&sources) {
                let sources = sources.clone();
                let reader = reader.clone();
                let shutdown = shutdown.clone();
                handles.push(thread::spawn(move || {
                    let loop_ = WorkerLoop::new(Duration::from_millis(20), Duration::from_secs(1), shutdown);
                    loop_.run(ReplicationTick {
                        reader_id,
                        sources,
                        reader,
                        streams: HashMap::new(),
                    });
                }));
            }
        }

        if let Some(listen) = self.config.get_listen_proxy() {
            let logger = self.logger.clone();
            let stats_list: Arc<Vec<Arc<Stats>>> = Arc::new(stats_handles.clone());
            let shutdown = shutdown.clone();
            match Proxy::bind(listen, logger.clone()) {
                Ok(proxy) => {
                    handles.push(thread::spawn(move || {
                        while !shutdown.load(Ordering::Relaxed) {
                            proxy.poll_once(|| aggregate_snapshot(&stats_list));
                            thread::sleep(Duration::from_millis(50));
                        }
                    }));
                }
                Err(e) => self.logger.warn(&format!("proxy bind failed: {e}"), "PROXY"),
            }
        }

        for h in handles {
            let _ = h.join();
        }
        Ok(stats_handles)
    }

    fn reader_ids(sources: &Arc<Mutex<HashMap<SourceId, SourceNode>>>) -> Vec<ReaderId> {
        let mut ids: Vec<ReaderId> = sources
            .lock()
            .expect("sources mutex poisoned")
            .values()
            .map(|n| n.reader)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn assignments_from(sources: &HashMap<SourceId, SourceNode>) -> Vec<WorkerAssignment> {
        let mut by_pair: HashMap<(ReaderId, WriterId), Vec<SourceId>> = HashMap::new();
        for (id, node) in sources {
            by_pair.entry((node.reader, node.writer)).or_default().push(*id);
        }
        by_pair
            .into_iter()
            .map(|((reader_id, writer_id), source_ids)| WorkerAssignment {
                reader_id,
                writer_id,
                source_ids,
            })
            .collect()
    }

    /// Fetches the full key set of one node via a one-off `KEYS *` call,
    /// blocking until a complete reply parses. Kept deliberately small:
    /// this is a diagnostic pass over a presumably modest keyspace, not
    /// the high-throughput path `reader`/`writer` implement.
    fn fetch_keys(addr: SocketAddr) -> Result<HashSet<Vec<u8>>, EngineError> {
        let mut stream = TcpStream::connect_timeout(&addr, Duration::from_millis(500))
            .map_err(|e| EngineError::source_recoverable("ORCHESTRATOR", format!("connect failed: {e}")))?;
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .map_err(|e| EngineError::setup("ORCHESTRATOR", format!("set_read_timeout failed: {e}")))?;
        stream
            .write_all(&RespValue::command(&[b"KEYS".to_vec(), b"*".to_vec()]).encode())
            .map_err(|e| EngineError::source_recoverable("ORCHESTRATOR", format!("KEYS write failed: {e}")))?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match Parser::parse(&buf) {
                ParseOutcome::Complete { value, .. } => {
                    let keys = value.as_command_args().ok_or_else(|| {
                        EngineError::parse("ORCHESTRATOR", "KEYS reply was not a bulk-string array")
                    })?;
                    return Ok(keys.into_iter().collect());
                }
                ParseOutcome::Error(e) => {
                    return Err(EngineError::parse("ORCHESTRATOR", format!("KEYS reply parse error: {e}")));
                }
                ParseOutcome::NeedHeader | ParseOutcome::NeedPayload { .. } => {}
            }
            let n = stream
                .read(&mut chunk)
                .map_err(|e| EngineError::source_recoverable("ORCHESTRATOR", format!("KEYS read failed: {e}")))?;
            if n == 0 {
                return Err(EngineError::source_recoverable(
                    "ORCHESTRATOR",
                    "connection closed before KEYS reply completed",
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Diffs the source and target key sets by issuing `KEYS *` against
    /// every configured node and reports whether they match — a
    /// correctness check run after a migration, not the migration path
    /// itself, so it reuses none of `run_migrate`'s worker plumbing.
    pub fn run_compare(&self, _shutdown: Arc<AtomicBool>) -> Result<(), EngineError> {
        let mut source_keys = HashSet::new();
        for addr in self.config.get_source_addrs() {
            source_keys.extend(Self::fetch_keys(*addr)?);
        }
        let mut target_keys = HashSet::new();
        for addr in self.config.get_target_addrs() {
            target_keys.extend(Self::fetch_keys(*addr)?);
        }

        let missing_on_target = source_keys.difference(&target_keys).count();
        let missing_on_source = target_keys.difference(&source_keys).count();
        if missing_on_target == 0 && missing_on_source == 0 {
            self.logger.info(
                &format!("key sets match: {} keys", source_keys.len()),
                "ORCHESTRATOR",
            );
            return Ok(());
        }
        self.logger.warn(
            &format!(
                "key sets diverge: {missing_on_target} missing on target, {missing_on_source} missing on source"
            ),
            "ORCHESTRATOR",
        );
        Err(EngineError::routing("ORCHESTRATOR", "source and target key sets diverge"))
    }

    pub fn run_group_state(&self) -> Result<String, EngineError> {
        let (group, _targets) = self.build_group(&IdGen::new())?;
        Ok(format!("{:?} with {} target(s)", group.kind(), group.targets().len()))
    }
}

/// Drives replication ingest for every source node owned by one reader:
/// dials sources still in `None`, and polls already-connected sockets
/// for new bytes.
struct ReplicationTick {
    reader_id: ReaderId,
    sources: Arc<Mutex<HashMap<SourceId, SourceNode>>>,
    reader: Arc<ReaderWorker>,
    streams: HashMap<SourceId, std::net::TcpStream>,
}

impl Tick for ReplicationTick {
    fn tick(&mut self) {
        let mut sources = self.sources.lock().expect("sources mutex poisoned");
        let owned: Vec<SourceId> = sources
            .iter()
            .filter(|(_, n)| n.reader == self.reader_id)
            .map(|(id, _)| *id)
            .collect();
        for id in owned {
            let node = sources.get_mut(&id).expect("id came from this same map");
            if node.state == crate::node::source::ReplicationState::None {
                match self.reader.connect_master(node) {
                    Ok(stream) => {
                        self.streams.insert(id, stream);
                    }
                    Err(_) => continue,
                }
            }
            if let Some(stream) = self.streams.get_mut(&id) {
                if self.reader.poll_once(node, stream).is_err() {
                    self.streams.remove(&id);
                }
            }
        }
    }

    fn cron(&mut self) {
        let mut sources = self.sources.lock().expect("sources mutex poisoned");
        for (id, node) in sources.iter_mut().filter(|(_, n)| n.reader == self.reader_id) {
            self.reader.cron(node);
            if node.state == crate::node::source::ReplicationState::None {
                self.streams.remove(id);
            }
        }
    }
}

struct PipelineTick {
    sources: Arc<Mutex<HashMap<SourceId, SourceNode>>>,
    writer: Arc<Mutex<WriterWorker>>,
    reader: Arc<ReaderWorker>,
    logger: Logger,
}

impl Tick for PipelineTick {
    fn tick(&mut self) {
        let mut sources = self.sources.lock().expect("sources mutex poisoned");
        let mut writer = self.writer.lock().expect("writer mutex poisoned");
        for node in sources.values_mut() {
            writer.process_source(node);
        }
        for target_id in writer.target_ids() {
            writer.pump_send(target_id);
            writer.pump_recv(target_id);
        }
    }

    fn cron(&mut self) {
        let mut sources = self.sources.lock().expect("sources mutex poisoned");
        for node in sources.values_mut() {
            self.reader.cron(node);
        }
        self.writer.lock().expect("writer mutex poisoned").cron_reconnect();
        self.logger.debug("tick", "ORCHESTRATOR", sources.len());
    }
}
