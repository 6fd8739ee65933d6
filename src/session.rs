use crate::{
    connector::{connect_peer_with_stop, ConnectorConfig},
    handshake::{parse_info_hash, InfoHashError},
    signal::StopSignal,
};
use futures::FutureExt;
use log::{debug, error, info, warn};
use std::{
    collections::HashMap,
    fmt::Display,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
    },
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};

/// What happens to sessions that are no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryPolicy {
    /// Sessions live as long as the registry.
    #[default]
    Never,
    /// Sessions stopped for longer than this are dropped by `evict_expired`.
    AfterStopped(Duration),
}

#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    pub connector: ConnectorConfig,
    pub expiry: ExpiryPolicy,
}

#[derive(Debug)]
pub enum StartError {
    AlreadyRunning,
    InvalidInfoHash(InfoHashError),
    MissingPeerAddr,
}

impl Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "session is already running"),
            Self::InvalidInfoHash(e) => write!(f, "invalid info hash: {e}"),
            Self::MissingPeerAddr => write!(f, "peer address is empty"),
        }
    }
}

impl std::error::Error for StartError {}

impl From<InfoHashError> for StartError {
    fn from(value: InfoHashError) -> Self {
        StartError::InvalidInfoHash(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

impl Display for StopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                StopOutcome::Stopped => "Stopped",
                StopOutcome::NotRunning => "No active session found",
            }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub running: bool,
    pub peer_addr: String,
    pub info_hash: String,
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub status: SessionStatus,
    pub speed: u64,
}

#[derive(Debug)]
struct SessionState {
    running: bool,
    peer_addr: String,
    info_hash: String,
    signal: StopSignal,
    // bumped on every start so a finished run can tell whether it is stale
    generation: u64,
    worker: Option<JoinHandle<()>>,
    stopped_at: Option<Instant>,
}

/// One caller's connection: its lifecycle state and live throughput.
#[derive(Debug)]
pub struct Session {
    id: String,
    speed: AtomicU64,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(id: String) -> Self {
        let signal = StopSignal::new();
        // a stopped session holds an already fired signal
        signal.cancel();
        Session {
            id,
            speed: AtomicU64::new(0),
            state: Mutex::new(SessionState {
                running: false,
                peer_addr: String::new(),
                info_hash: String::new(),
                signal,
                generation: 0,
                worker: None,
                stopped_at: Some(Instant::now()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.lock_state();
        SessionStatus {
            running: state.running,
            peer_addr: state.peer_addr.clone(),
            info_hash: state.info_hash.clone(),
        }
    }

    pub fn speed(&self) -> u64 {
        let state = self.lock_state();
        if state.running {
            self.speed.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    fn stop(&self) -> StopOutcome {
        let mut state = self.lock_state();
        if !state.running {
            return StopOutcome::NotRunning;
        }
        state.signal.cancel();
        state.running = false;
        state.stopped_at = Some(Instant::now());
        self.speed.store(0, Ordering::Relaxed);
        StopOutcome::Stopped
    }

    /// Called by a run when it ends on its own. Only the current run may mark the
    /// session stopped.
    fn finish_run(&self, generation: u64) {
        let mut state = self.lock_state();
        if state.generation == generation && state.running {
            state.running = false;
            state.stopped_at = Some(Instant::now());
            state.signal.cancel();
            self.speed.store(0, Ordering::Relaxed);
        }
    }

    fn expired(&self, ttl: Duration, now: Instant) -> bool {
        let state = self.lock_state();
        // a cancelled run may still hold its socket until its task winds down
        !state.running
            && state.worker.as_ref().map_or(true, |w| w.is_finished())
            && state
                .stopped_at
                .is_some_and(|at| now.saturating_duration_since(at) > ttl)
    }
}

/// Maps caller identities to their sessions. Build one at start-up and share it.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    config: RegistryConfig,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Registry {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn get_or_create(&self, id: &str) -> Arc<Session> {
        if let Some(session) = self.lookup(id) {
            return session;
        }
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            sessions
                .entry(id.to_owned())
                .or_insert_with(|| Arc::new(Session::new(id.to_owned()))),
        )
    }

    /// Starts a connector run for `id` and returns straight away; how the run
    /// goes is only visible through `status` and `speed`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, id: &str, peer_addr: &str, info_hash: &str) -> Result<(), StartError> {
        parse_info_hash(info_hash)?;
        if peer_addr.is_empty() {
            return Err(StartError::MissingPeerAddr);
        }

        // the map stays read-locked until the session is marked running, so
        // eviction cannot detach it in between
        let (session, map_guard) = loop {
            let session = self.get_or_create(id);
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            if sessions.get(id).is_some_and(|s| Arc::ptr_eq(s, &session)) {
                break (session, sessions);
            }
        };
        let mut state = session.lock_state();
        if state.running {
            return Err(StartError::AlreadyRunning);
        }

        state.running = true;
        state.peer_addr = peer_addr.to_owned();
        state.info_hash = info_hash.to_owned();
        state.signal = StopSignal::new();
        state.generation += 1;
        state.stopped_at = None;
        session.speed.store(0, Ordering::Relaxed);

        let run = run_session(
            Arc::clone(&session),
            state.generation,
            state.worker.take(),
            state.signal.clone(),
            self.config.connector.clone(),
        );
        state.worker = Some(tokio::spawn(run));
        drop(state);
        drop(map_guard);

        info!("Started session: {id}");
        Ok(())
    }

    pub fn stop(&self, id: &str) -> StopOutcome {
        let outcome = match self.lookup(id) {
            Some(session) => session.stop(),
            None => StopOutcome::NotRunning,
        };
        match outcome {
            StopOutcome::Stopped => info!("Stopped session: {id}"),
            StopOutcome::NotRunning => debug!("Attempted to stop a session that is not running: {id}"),
        }
        outcome
    }

    pub fn status(&self, id: &str) -> SessionStatus {
        self.lookup(id)
            .map(|s| s.status())
            .unwrap_or_default()
    }

    pub fn speed(&self, id: &str) -> u64 {
        self.lookup(id).map_or(0, |s| s.speed())
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut infos: Vec<SessionInfo> = sessions
            .iter()
            .map(|s| SessionInfo {
                id: s.id.clone(),
                status: s.status(),
                speed: s.speed(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Returns how many sessions were running.
    pub fn stop_all(&self) -> usize {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sessions
            .iter()
            .filter(|s| s.stop() == StopOutcome::Stopped)
            .count()
    }

    /// Drops sessions that have been stopped for longer than the configured
    /// expiry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let ExpiryPolicy::AfterStopped(ttl) = self.config.expiry else {
            return 0;
        };
        let now = Instant::now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|id, session| {
            let expired = session.expired(ttl, now);
            if expired {
                debug!("Evicting expired session: {id}");
            }
            !expired
        });
        before - sessions.len()
    }

    /// Periodically applies the expiry policy. Returns `None` under
    /// `ExpiryPolicy::Never`.
    pub fn spawn_reaper(self: &Arc<Self>, period: Duration) -> Option<JoinHandle<()>> {
        if self.config.expiry == ExpiryPolicy::Never {
            return None;
        }
        let registry = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.evict_expired();
                if evicted > 0 {
                    info!("Evicted {evicted} expired sessions");
                }
            }
        }))
    }
}

/// Body of the task spawned by `Registry::start`.
async fn run_session(
    session: Arc<Session>,
    generation: u64,
    previous: Option<JoinHandle<()>>,
    signal: StopSignal,
    config: ConnectorConfig,
) {
    // one live connection per session: let the last run close its socket first
    if let Some(previous) = previous {
        let _ = previous.await;
    }
    if signal.is_cancelled() {
        debug!("Session {} stopped before connecting", session.id);
        return;
    }

    let (peer_addr, info_hash) = {
        let state = session.lock_state();
        (state.peer_addr.clone(), state.info_hash.clone())
    };

    let run = connect_peer_with_stop(&peer_addr, &info_hash, &signal, &session.speed, &config);
    match AssertUnwindSafe(run).catch_unwind().await {
        Ok(Ok(())) => info!("Session {} connection ended", session.id),
        Ok(Err(e)) => warn!("Session {} connection ended: {e}", session.id),
        Err(_) => error!("Session {} connector panicked", session.id),
    }

    session.finish_run(generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        messages::{Message, Piece, BLOCK_LEN},
        seeder, HANDSHAKE_LEN,
    };
    use std::{io::Read, sync::atomic::AtomicBool};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    const HASH_HEX: &str = "98f09643766d5d561e986efeb5bba4f6be98517e";
    const OTHER_HASH_HEX: &str = "0123456789abcdef0123456789abcdef01234567";

    async fn wait_until<F: Fn() -> bool>(what: &str, timeout: Duration, f: F) {
        let deadline = Instant::now() + timeout;
        while !f() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Accepts connections without ever answering them. Returns how many were
    /// accepted and the most that the connecting side held open at once.
    fn spawn_connection_counter(
        done: Arc<AtomicBool>,
    ) -> (String, std::thread::JoinHandle<(usize, usize)>) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = std::thread::spawn(move || {
            let mut open: Vec<std::net::TcpStream> = Vec::new();
            let (mut accepted, mut most) = (0, 0);
            let mut buf = [0u8; 256];
            while !done.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nonblocking(true).unwrap();
                        accepted += 1;
                        open.push(stream);
                        open.retain_mut(|s| still_open(s, &mut buf));
                        most = most.max(open.len());
                    }
                    Err(_) => std::thread::sleep(Duration::from_millis(1)),
                }
            }
            (accepted, most)
        });
        (addr, handle)
    }

    fn still_open(stream: &mut std::net::TcpStream, buf: &mut [u8]) -> bool {
        loop {
            match stream.read(buf) {
                Ok(0) => return false,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return true,
                Err(_) => return false,
            }
        }
    }

    /// Answers the handshake, then sends a full 16KB piece for each of the
    /// first `blocks` requests and ignores the rest.
    async fn serve_blocks(listener: TcpListener, blocks: u64, served: Arc<AtomicU64>) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut handshake = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut handshake).await.unwrap();
        stream.write_all(&handshake).await.unwrap();
        let mut interested = [0u8; 5];
        stream.read_exact(&mut interested).await.unwrap();

        let block = vec![0u8; BLOCK_LEN as usize];
        let piece = Message::Piece(Piece {
            index: 0,
            begin: 0,
            block: &block,
        });
        let mut reply = vec![0u8; piece.encoded_len()];
        piece.create(&mut reply).unwrap();

        let mut request = [0u8; 17];
        while stream.read_exact(&mut request).await.is_ok() {
            if served.load(Ordering::Relaxed) < blocks {
                stream.write_all(&reply).await.unwrap();
                served.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[test]
    fn stop_before_start_is_not_running() {
        let registry = Registry::default();
        assert_eq!(registry.stop("nobody"), StopOutcome::NotRunning);
        registry.get_or_create("somebody");
        assert_eq!(registry.stop("somebody"), StopOutcome::NotRunning);
        assert_eq!(registry.stop("somebody"), StopOutcome::NotRunning);
    }

    #[test]
    fn unknown_session_reads_as_stopped() {
        let registry = Registry::default();
        assert_eq!(registry.speed("nobody"), 0);
        assert_eq!(registry.status("nobody"), SessionStatus::default());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn get_or_create_returns_the_same_session() {
        let registry = Registry::default();
        let a = registry.get_or_create("a");
        let again = registry.get_or_create("a");
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(a.id(), "a");
        assert!(!a.status().running);
    }

    #[test]
    fn start_rejects_bad_arguments_without_a_runtime() {
        // no tokio runtime here: nothing may be spawned for invalid input
        let registry = Registry::default();
        let not_hex = "g".repeat(40);
        let too_long = format!("{HASH_HEX}0");
        for bad in ["", "abc", &HASH_HEX[..39], not_hex.as_str(), too_long.as_str()] {
            assert!(matches!(
                registry.start("a", "127.0.0.1:1", bad),
                Err(StartError::InvalidInfoHash(_))
            ));
        }
        assert!(matches!(
            registry.start("a", "", HASH_HEX),
            Err(StartError::MissingPeerAddr)
        ));
        assert!(!registry.status("a").running);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        // accepts into the backlog but never answers, so the run stays in handshake
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let registry = Registry::default();
        registry.start("a", &addr, HASH_HEX).unwrap();
        assert!(matches!(
            registry.start("a", "10.0.0.1:6881", OTHER_HASH_HEX),
            Err(StartError::AlreadyRunning)
        ));

        let status = registry.status("a");
        assert!(status.running);
        assert_eq!(status.peer_addr, addr);
        assert_eq!(status.info_hash, HASH_HEX);

        assert_eq!(registry.stop("a"), StopOutcome::Stopped);
        assert_eq!(registry.stop("a"), StopOutcome::NotRunning);
        assert_eq!(registry.speed("a"), 0);
        assert!(!registry.status("a").running);
    }

    #[tokio::test]
    async fn failed_run_marks_session_stopped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let registry = Registry::default();
        registry.start("a", &addr, HASH_HEX).unwrap();
        wait_until("refused run to stop", Duration::from_secs(5), || {
            !registry.status("a").running
        })
        .await;
        assert_eq!(registry.speed("a"), 0);
        // the record survives so the last peer can still be shown
        assert_eq!(registry.status("a").peer_addr, addr);
        assert_eq!(registry.stop("a"), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn session_is_reused_across_restarts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let registry = Registry::default();
        let session = registry.get_or_create("a");
        registry.start("a", &addr, HASH_HEX).unwrap();
        registry.stop("a");
        registry.start("a", &addr, OTHER_HASH_HEX).unwrap();

        assert!(Arc::ptr_eq(&session, &registry.get_or_create("a")));
        assert_eq!(registry.status("a").info_hash, OTHER_HASH_HEX);
        assert!(registry.status("a").running);
        assert_eq!(registry.stop_all(), 1);
        assert!(!registry.status("a").running);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_keep_session_consistent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let registry = Arc::new(Registry::default());

        let mut tasks = Vec::new();
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            let addr = addr.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    match i % 4 {
                        0 => {
                            let _ = registry.start("shared", &addr, HASH_HEX);
                        }
                        1 => {
                            registry.stop("shared");
                        }
                        2 => {
                            registry.speed("shared");
                        }
                        _ => {
                            registry.status("shared");
                        }
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.list().len(), 1);
        registry.stop("shared");
        let status = registry.status("shared");
        assert!(!status.running);
        assert_eq!(status.info_hash, HASH_HEX);
        assert_eq!(registry.speed("shared"), 0);
        assert!(matches!(registry.start("shared", &addr, HASH_HEX), Ok(())));
        assert_eq!(registry.stop("shared"), StopOutcome::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reports_speed_against_seeder() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let seeder_signal = StopSignal::new();
        let seeder = tokio::spawn(seeder::serve(listener, seeder_signal.clone()));

        let registry = Registry::default();
        registry.start("a", &addr, HASH_HEX).unwrap();
        wait_until("a throughput sample", Duration::from_secs(5), || {
            registry.speed("a") > 0
        })
        .await;
        assert!(registry.status("a").running);

        // at least one 16KB block per second made it through
        assert!(registry.speed("a") >= 16);

        assert_eq!(registry.stop("a"), StopOutcome::Stopped);
        assert_eq!(registry.speed("a"), 0);
        assert!(!registry.status("a").running);

        seeder_signal.cancel();
        seeder.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn speed_matches_blocks_served_per_second() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let served = Arc::new(AtomicU64::new(0));
        // all of these go out well inside the first sampling window
        let peer = tokio::spawn(serve_blocks(listener, 40, Arc::clone(&served)));

        let registry = Registry::default();
        registry.start("a", &addr, HASH_HEX).unwrap();
        wait_until("a throughput sample", Duration::from_secs(5), || {
            registry.speed("a") > 0
        })
        .await;
        let kbps = registry.speed("a");

        let requests_per_second = served.load(Ordering::Relaxed);
        assert_eq!(requests_per_second, 40);
        let expected = u64::from(BLOCK_LEN) * requests_per_second / 1024;
        // piece headers add 13 bytes per block on top of the payload
        assert!(
            (expected..=expected + 1).contains(&kbps),
            "expected about {expected} KB/s, sampled {kbps}"
        );

        assert_eq!(registry.stop("a"), StopOutcome::Stopped);
        tokio::time::timeout(Duration::from_secs(2), peer)
            .await
            .expect("peer should see the connection close")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_hold_at_most_one_connection() {
        let done = Arc::new(AtomicBool::new(false));
        let (addr, counter) = spawn_connection_counter(Arc::clone(&done));
        let registry = Arc::new(Registry::default());

        let mut tasks = Vec::new();
        for i in 0..8 {
            let registry = Arc::clone(&registry);
            let addr = addr.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    if i % 2 == 0 {
                        let _ = registry.start("shared", &addr, HASH_HEX);
                    } else {
                        registry.stop("shared");
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        registry.stop("shared");
        tokio::time::sleep(Duration::from_millis(100)).await;

        done.store(true, Ordering::Relaxed);
        let (accepted, most) = counter.join().unwrap();
        assert!(accepted > 0, "no run ever reached the listener");
        assert_eq!(most, 1, "more than one connection open at once");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_survives_concurrent_eviction() {
        // accepts into the backlog but never answers, so runs stay in handshake
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let registry = Arc::new(Registry::new(RegistryConfig {
            expiry: ExpiryPolicy::AfterStopped(Duration::ZERO),
            ..RegistryConfig::default()
        }));

        let done = Arc::new(AtomicBool::new(false));
        let evictors: Vec<_> = (0..2)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    while !done.load(Ordering::Relaxed) {
                        registry.evict_expired();
                    }
                })
            })
            .collect();

        for _ in 0..2_000 {
            registry.start("a", &addr, HASH_HEX).unwrap();
            // the run must still be reachable through the registry
            assert!(registry.status("a").running);
            assert_eq!(registry.stop("a"), StopOutcome::Stopped);
        }

        // once its run has wound down the stopped session goes away
        wait_until("the stopped session to be evicted", Duration::from_secs(5), || {
            registry.list().is_empty()
        })
        .await;
        done.store(true, Ordering::Relaxed);
        for evictor in evictors {
            evictor.join().unwrap();
        }
    }

    #[tokio::test]
    async fn expiry_evicts_only_old_stopped_sessions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let registry = Registry::new(RegistryConfig {
            expiry: ExpiryPolicy::AfterStopped(Duration::from_millis(50)),
            ..RegistryConfig::default()
        });
        registry.get_or_create("idle");
        registry.start("busy", &addr, HASH_HEX).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.evict_expired(), 1);
        let ids: Vec<String> = registry.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["busy".to_owned()]);
        registry.stop("busy");
    }

    #[tokio::test]
    async fn never_policy_keeps_everything() {
        let registry = Arc::new(Registry::default());
        registry.get_or_create("idle");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.evict_expired(), 0);
        assert!(registry.spawn_reaper(Duration::from_millis(10)).is_none());
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn reaper_runs_expiry() {
        let registry = Arc::new(Registry::new(RegistryConfig {
            expiry: ExpiryPolicy::AfterStopped(Duration::from_millis(20)),
            ..RegistryConfig::default()
        }));
        registry.get_or_create("idle");
        let reaper = registry.spawn_reaper(Duration::from_millis(10)).unwrap();
        wait_until("reaper to evict", Duration::from_secs(2), || {
            registry.list().is_empty()
        })
        .await;
        reaper.abort();
    }
}
