//! Async (Tokio) transport for the harvest collector and agent.
//!
//! One connection carries one session:
//!
//! 1. collector -> agent: the pattern set, once, right after accept
//! 2. agent -> collector: file records in discovery order, until the agent
//!    shuts down its write half
//!
//! There are no per-record acknowledgements.

use anyhow::{Context, Result};
use std::sync::Arc;

pub mod server {
    use super::*;
    use crate::codec::{recv_record, send_patterns, with_timeout, FileRecord};
    use crate::error::ProtocolError;
    use crate::logger::AuditLog;
    use crate::protocol::timeouts::RECORD_IDLE_MS;
    use crate::storage::{SaveOutcome, SessionIdentity, Storage};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::{JoinError, JoinSet};
    use tokio::time::Duration;
    use tracing::{debug, error, info, warn};

    /// Read-only state shared by every handling unit.
    pub struct CollectorContext {
        pub patterns: Vec<String>,
        pub storage: Storage,
        pub audit: Arc<dyn AuditLog>,
        sessions: AtomicU64,
    }

    impl CollectorContext {
        pub fn new(patterns: Vec<String>, storage: Storage, audit: Arc<dyn AuditLog>) -> Self {
            Self {
                patterns,
                storage,
                audit,
                sessions: AtomicU64::new(0),
            }
        }

        /// Fresh identity for a just-accepted connection.
        pub fn next_identity(&self, peer: SocketAddr) -> SessionIdentity {
            let seq = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
            SessionIdentity::new(peer, seq)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum CollectorState {
        Accepted,
        PatternsSent,
        Receiving,
        ClosedClean,
        ClosedError,
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct SessionSummary {
        pub records: u64,
        pub files: u64,
        pub folders: u64,
        pub bytes: u64,
        pub rejected: u64,
        pub failed: u64,
    }

    /// Terminal report of one handling unit.
    #[derive(Debug)]
    pub struct SessionOutcome {
        pub identity: SessionIdentity,
        pub state: CollectorState,
        pub summary: SessionSummary,
        pub error: Option<ProtocolError>,
    }

    pub async fn serve(bind: &str, ctx: Arc<CollectorContext>) -> Result<()> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("bind {}", bind))?;
        serve_listener(listener, ctx).await
    }

    /// Accept forever, one spawned unit per connection. Finished units are
    /// reaped and their terminal state logged without blocking new accepts.
    pub async fn serve_listener(listener: TcpListener, ctx: Arc<CollectorContext>) -> Result<()> {
        info!(
            "harvest collector listening on {} base={} patterns={:?}",
            listener.local_addr()?,
            ctx.storage.base().display(),
            ctx.patterns
        );
        let mut units: JoinSet<SessionOutcome> = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((mut stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let identity = ctx.next_identity(peer);
                        info!("new connection from {} (session {})", peer, identity.stamp());
                        let ctx = ctx.clone();
                        units.spawn(async move { handle_session(&mut stream, identity, &ctx).await });
                    }
                    Err(e) => {
                        // Usually descriptor exhaustion; back off briefly
                        warn!("accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = units.join_next(), if !units.is_empty() => report_unit(joined),
            }
        }
    }

    fn report_unit(joined: std::result::Result<SessionOutcome, JoinError>) {
        match joined {
            Ok(outcome) => {
                let s = outcome.summary;
                match (&outcome.state, &outcome.error) {
                    (CollectorState::ClosedClean, _) => info!(
                        "session {} from {} closed: {} files, {} folders, {} bytes, {} rejected, {} failed",
                        outcome.identity.stamp(),
                        outcome.identity.peer,
                        s.files,
                        s.folders,
                        s.bytes,
                        s.rejected,
                        s.failed
                    ),
                    (state, err) => warn!(
                        "session {} from {} ended in {:?} after {} records: {}",
                        outcome.identity.stamp(),
                        outcome.identity.peer,
                        state,
                        s.records,
                        err.as_ref().map(|e| e.to_string()).unwrap_or_default()
                    ),
                }
            }
            Err(e) => error!("session handler aborted: {}", e),
        }
    }

    /// Run both protocol phases on one connection. Never returns early
    /// without a terminal state.
    pub async fn handle_session<S>(
        stream: &mut S,
        mut identity: SessionIdentity,
        ctx: &CollectorContext,
    ) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let session = identity.stamp();
        let peer = identity.peer.to_string();
        ctx.audit.session_start(&session, &peer);

        let mut summary = SessionSummary::default();
        let mut state = CollectorState::Accepted;
        let mut error = None;

        match send_patterns(stream, &ctx.patterns).await {
            Ok(()) => {
                state = CollectorState::PatternsSent;
                debug!("session {}: patterns sent to {}", session, peer);
            }
            Err(e) => {
                warn!("error sending patterns to client {}: {}", peer, e);
                error = Some(e);
            }
        }

        if state == CollectorState::PatternsSent {
            state = CollectorState::Receiving;
            loop {
                match with_timeout("record read", RECORD_IDLE_MS, recv_record(stream)).await {
                    Ok(Some(record)) => {
                        summary.records += 1;
                        identity.adopt_origin(&record);
                        store_record(record, &identity, ctx, &mut summary).await;
                    }
                    Ok(None) => {
                        state = CollectorState::ClosedClean;
                        break;
                    }
                    Err(e) => {
                        warn!("error receiving file from {}: {}", peer, e);
                        error = Some(e);
                        break;
                    }
                }
            }
        }
        if state != CollectorState::ClosedClean {
            state = CollectorState::ClosedError;
        }

        let _ = stream.shutdown().await;
        let err_text = error.as_ref().map(|e| e.to_string());
        ctx.audit.session_end(
            &session,
            summary.files + summary.folders,
            summary.rejected,
            summary.failed,
            err_text.as_deref(),
        );

        SessionOutcome {
            identity,
            state,
            summary,
            error,
        }
    }

    async fn store_record(
        record: FileRecord,
        identity: &SessionIdentity,
        ctx: &CollectorContext,
        summary: &mut SessionSummary,
    ) {
        let session = identity.stamp();
        let host = identity.host_for(&record);
        let address = identity.address_for(&record);
        let rel = record.relative_path.clone();

        let storage = ctx.storage.clone();
        let id = identity.clone();
        let result = tokio::task::spawn_blocking(move || storage.save(&record, &id)).await;

        match result {
            Ok(Ok(SaveOutcome::Folder(path))) => {
                summary.folders += 1;
                info!("created folder from {} ({}): {} -> {}", host, address, rel, path.display());
                ctx.audit.saved(&session, &host, &address, &rel, 0);
            }
            Ok(Ok(SaveOutcome::File { path, bytes })) => {
                summary.files += 1;
                summary.bytes += bytes as u64;
                info!(
                    "received file from {} ({}): {} -> {} ({} bytes)",
                    host,
                    address,
                    rel,
                    path.display(),
                    bytes
                );
                ctx.audit.saved(&session, &host, &address, &rel, bytes);
            }
            Ok(Err(e)) if e.is_rejection() => {
                summary.rejected += 1;
                warn!("rejected record from {} ({}): {}: {}", host, address, rel, e);
                ctx.audit.rejected(&session, &host, &address, &rel, &e.to_string());
            }
            Ok(Err(e)) => {
                summary.failed += 1;
                error!("error saving file from {} ({}): {}: {}", host, address, rel, e);
                ctx.audit.failed(&session, &host, &address, &rel, &e.to_string());
            }
            Err(e) => {
                summary.failed += 1;
                error!("save task for {} from {} aborted: {}", rel, host, e);
                ctx.audit.failed(&session, &host, &address, &rel, &e.to_string());
            }
        }
    }
}

pub mod client {
    use super::*;
    use crate::codec::{recv_patterns, send_record, with_timeout, FileRecord};
    use crate::config::{AgentConfig, RetryPolicy};
    use crate::fs_enum::{discover, Discovered, DiscoveryOptions, DiscoveryStats};
    use crate::pattern::PatternSet;
    use crate::protocol::session::RECORD_QUEUE;
    use crate::protocol::timeouts::{CONNECT_MS, PATTERNS_MS};
    use crate::url::CollectorAddr;
    use std::path::Path;
    use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout, Duration};
    use tracing::{debug, info, warn};

    /// Identity stamped on every record this agent sends.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Origin {
        pub address: String,
        pub host: String,
    }

    impl Origin {
        /// Local IP of the connection and this machine's hostname.
        pub fn for_connection(stream: &TcpStream) -> Self {
            Self {
                address: stream
                    .local_addr()
                    .map(|a| a.ip().to_string())
                    .unwrap_or_default(),
                host: local_hostname(),
            }
        }

        pub fn stamp(&self, found: Discovered) -> FileRecord {
            FileRecord {
                relative_path: found.relative_path,
                content: found.content,
                origin_address: self.address.clone(),
                origin_host: self.host.clone(),
            }
        }
    }

    pub fn local_hostname() -> String {
        match hostname::get() {
            Ok(h) => h.to_string_lossy().into_owned(),
            Err(e) => {
                warn!("error getting hostname: {}", e);
                String::new()
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum AgentState {
        Connected,
        PatternsReceived,
        Sending,
        Done,
        Failed,
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct SessionReport {
        pub files_sent: u64,
        pub folders_sent: u64,
        pub bytes_sent: u64,
        pub discovery: DiscoveryStats,
    }

    impl SessionReport {
        pub fn records_sent(&self) -> u64 {
            self.files_sent + self.folders_sent
        }
    }

    pub async fn connect(addr: &CollectorAddr) -> Result<TcpStream> {
        let authority = addr.authority();
        let stream = match timeout(
            Duration::from_millis(CONNECT_MS),
            TcpStream::connect(&authority),
        )
        .await
        {
            Ok(res) => res.with_context(|| format!("connect {}", authority))?,
            Err(_) => anyhow::bail!("connect {} timed out ({} ms)", authority, CONNECT_MS),
        };
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    /// One retry burst: up to `policy.attempts` tries, `policy.delay` apart.
    pub async fn connect_with_retry(addr: &CollectorAddr, policy: &RetryPolicy) -> Result<TcpStream> {
        for attempt in 1..=policy.attempts {
            match connect(addr).await {
                Ok(stream) => {
                    info!("connected to collector {}", addr);
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(
                        "connection attempt {}/{} failed: {:#}",
                        attempt, policy.attempts, e
                    );
                    if attempt < policy.attempts {
                        sleep(policy.delay).await;
                    }
                }
            }
        }
        anyhow::bail!(
            "failed to connect to {} after {} attempts",
            addr,
            policy.attempts
        )
    }

    fn enter(state: &mut AgentState, next: AgentState) {
        debug!("agent session {:?} -> {:?}", state, next);
        *state = next;
    }

    /// Receive the pattern set, run one discovery pass, stream every record,
    /// then close the write half. The walk runs on the blocking pool and hands
    /// records over a bounded queue, so wire order equals discovery order.
    pub async fn run_session<S>(
        stream: &mut S,
        origin: &Origin,
        root: &Path,
        options: &DiscoveryOptions,
    ) -> Result<SessionReport>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut state = AgentState::Connected;
        let result = drive_session(stream, origin, root, options, &mut state).await;
        match &result {
            Ok(_) => enter(&mut state, AgentState::Done),
            Err(_) => enter(&mut state, AgentState::Failed),
        }
        result
    }

    async fn drive_session<S>(
        stream: &mut S,
        origin: &Origin,
        root: &Path,
        options: &DiscoveryOptions,
        state: &mut AgentState,
    ) -> Result<SessionReport>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let patterns = with_timeout("pattern set", PATTERNS_MS, recv_patterns(stream))
            .await
            .context("error receiving patterns from collector")?;
        enter(state, AgentState::PatternsReceived);
        info!("processing patterns: {:?}", patterns);

        let patterns = PatternSet::new(patterns);
        let (tx, mut rx) = mpsc::channel::<Discovered>(RECORD_QUEUE);
        let walk_root = root.to_path_buf();
        let walk_options = options.clone();
        let walker = tokio::task::spawn_blocking(move || {
            let mut pass = discover(&walk_root, &patterns, &walk_options);
            for found in pass.by_ref() {
                if tx.blocking_send(found).is_err() {
                    // Sender side gave up; connection is gone
                    break;
                }
            }
            pass.stats()
        });

        enter(state, AgentState::Sending);
        let mut report = SessionReport::default();
        let mut send_error = None;
        while let Some(found) = rx.recv().await {
            let record = origin.stamp(found);
            if let Err(e) = send_record(stream, &record).await {
                send_error = Some(e);
                break;
            }
            if record.is_folder_marker() {
                report.folders_sent += 1;
                debug!("sent folder: {}", record.relative_path);
            } else {
                report.files_sent += 1;
                report.bytes_sent += record.content_len() as u64;
                debug!("sent file: {}", record.relative_path);
            }
        }
        drop(rx);
        report.discovery = walker.await.context("discovery task aborted")?;

        if let Some(e) = send_error {
            return Err(anyhow::Error::new(e).context(format!(
                "error sending records after {} were sent",
                report.records_sent()
            )));
        }

        stream
            .shutdown()
            .await
            .context("error closing record stream")?;

        if report.records_sent() == 0 {
            info!("no matching files found");
        }
        Ok(report)
    }

    /// The agent's control loop. Each iteration is an independent session
    /// with a fresh discovery pass; nothing is remembered between sessions.
    /// Returns only when `cfg.once` is set.
    pub async fn run(cfg: &AgentConfig) -> Result<()> {
        info!(
            "harvest agent: collector={} root={}",
            cfg.collector,
            cfg.search_root.display()
        );
        loop {
            info!("waiting for collector connection...");
            let mut stream = match connect_with_retry(&cfg.collector, &cfg.retry).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("{:#}", e);
                    if cfg.once {
                        return Err(e);
                    }
                    sleep(cfg.retry.burst_pause).await;
                    continue;
                }
            };

            let origin = Origin::for_connection(&stream);
            let result = run_session(&mut stream, &origin, &cfg.search_root, &cfg.discovery).await;
            drop(stream);

            match &result {
                Ok(report) => info!(
                    "session complete: {} files ({} bytes), {} folders sent; {} unreadable, {} filtered, {} too large",
                    report.files_sent,
                    report.bytes_sent,
                    report.folders_sent,
                    report.discovery.skipped_unreadable,
                    report.discovery.skipped_extension,
                    report.discovery.skipped_too_large
                ),
                Err(e) => warn!("session failed: {:#}", e),
            }
            if cfg.once {
                return result.map(|_| ());
            }

            info!(
                "collector connection closed, next session in {}s",
                cfg.idle.as_secs()
            );
            sleep(cfg.idle).await;
        }
    }
}
