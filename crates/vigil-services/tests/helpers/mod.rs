//! Test helpers: a scripted clamd on a local TCP port plus service wiring over the
//! in-memory stores.
//!
//! Run with `cargo test -p vigil-services`.

#![allow(dead_code)]

pub mod fixtures;

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use vigil_core::{AntivirusConfig, PoolEndpoint};
use vigil_db::test_helpers::InMemoryStore;
use vigil_services::{
    BackgroundScanService, ClamAvServicesPool, QuarantineService, StaticResolver, VersionTracker,
};
use vigil_storage::MemoryStorage;

pub const DEFAULT_VERSION: &str = "ClamAV 1.3.1/27380/Tue Aug 27 08:40:39 2024";
pub const CLEAN_REPLY: &str = "stream: OK";
pub const EICAR_REPLY: &str = "stream: Win.Test.EICAR_HDB-1 FOUND";
pub const SIZE_LIMIT_REPLY: &str = "INSTREAM size limit exceeded. ERROR";

/// How the fake daemon answers.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub version: String,
    pub scan_reply: String,
    /// Reply with `scan_reply` right after the first chunk instead of after the last frame.
    pub reply_early: bool,
    /// Accept and read, never answer.
    pub silent: bool,
    /// After INSTREAM (and the early reply, if any) stop reading but keep the
    /// connection open.
    pub stop_reading: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            scan_reply: CLEAN_REPLY.to_string(),
            reply_early: false,
            silent: false,
            stop_reading: false,
        }
    }
}

/// What the fake daemon saw on one connection.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub commands: Vec<String>,
    pub chunk_lens: Vec<u32>,
    pub payload: Vec<u8>,
    pub zero_frame: bool,
    pub ended: bool,
    pub finished: bool,
}

pub struct FakeClamd {
    port: u16,
    behavior: Arc<Mutex<Behavior>>,
    sessions: Arc<Mutex<Vec<Session>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl FakeClamd {
    pub async fn start() -> Self {
        Self::start_with(Behavior::default()).await
    }

    pub async fn start_with(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let behavior = Arc::new(Mutex::new(behavior));
        let sessions: Arc<Mutex<Vec<Session>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_behavior = behavior.clone();
        let accept_sessions = sessions.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let index = {
                    let mut sessions = accept_sessions.lock().unwrap();
                    sessions.push(Session::default());
                    sessions.len() - 1
                };
                let behavior = accept_behavior.lock().unwrap().clone();
                let sessions = accept_sessions.clone();
                tokio::spawn(async move {
                    handle_session(stream, behavior, sessions.clone(), index).await;
                    sessions.lock().unwrap()[index].finished = true;
                });
            }
        });

        Self {
            port,
            behavior,
            sessions,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> PoolEndpoint {
        PoolEndpoint::new("127.0.0.1", self.port)
    }

    /// Changes the behavior for connections accepted from now on.
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Waits until every accepted connection has been closed, then returns the sessions.
    pub async fn finished_sessions(&self) -> Vec<Session> {
        for _ in 0..500 {
            {
                let sessions = self.sessions.lock().unwrap();
                if sessions.iter().all(|s| s.finished) {
                    return sessions.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("fake clamd sessions did not finish");
    }

    /// Sessions that issued an INSTREAM command.
    pub async fn scan_sessions(&self) -> Vec<Session> {
        self.finished_sessions()
            .await
            .into_iter()
            .filter(|s| s.commands.iter().any(|c| c == "zINSTREAM"))
            .collect()
    }
}

impl Drop for FakeClamd {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_session(
    stream: TcpStream,
    behavior: Behavior,
    sessions: Arc<Mutex<Vec<Session>>>,
    index: usize,
) {
    let mut reader = BufReader::new(stream);
    let record = |f: &dyn Fn(&mut Session)| f(&mut sessions.lock().unwrap()[index]);

    loop {
        let mut raw = Vec::new();
        match reader.read_until(0, &mut raw).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let command = String::from_utf8_lossy(raw.strip_suffix(&[0]).unwrap_or(&raw)).to_string();
        record(&|s| s.commands.push(command.clone()));

        let reply = match command.as_str() {
            "zIDSESSION" => None,
            "zPING" => Some("PONG".to_string()),
            "zVERSION" => Some(behavior.version.clone()),
            "zINSTREAM" => {
                if behavior.stop_reading && !behavior.reply_early {
                    hold_open(reader).await;
                    return;
                }
                let early = read_frames(&mut reader, &behavior, &record).await;
                if early && behavior.stop_reading {
                    hold_open(reader).await;
                    return;
                }
                if early {
                    // Keep reading so the client sees the reply rather than a reset.
                    let mut sink = Vec::new();
                    let _ = reader.read_to_end(&mut sink).await;
                    return;
                }
                Some(behavior.scan_reply.clone())
            }
            "zEND" => {
                record(&|s| s.ended = true);
                return;
            }
            _ => Some("UNKNOWN COMMAND".to_string()),
        };

        if let Some(reply) = reply {
            if behavior.silent {
                continue;
            }
            let line = format!("1: {reply}\0");
            if reader.get_mut().write_all(line.as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

/// Reads INSTREAM frames. Returns true when the early reply was sent.
async fn read_frames(
    reader: &mut BufReader<TcpStream>,
    behavior: &Behavior,
    record: &(dyn Fn(&dyn Fn(&mut Session)) + Sync),
) -> bool {
    loop {
        let Ok(len) = reader.read_u32().await else {
            return false;
        };
        if len == 0 {
            record(&|s| s.zero_frame = true);
            return false;
        }
        let mut chunk = vec![0u8; len as usize];
        if reader.read_exact(&mut chunk).await.is_err() {
            return false;
        }
        record(&|s| {
            s.chunk_lens.push(len);
            s.payload.extend_from_slice(&chunk);
        });

        if behavior.reply_early && !behavior.silent {
            let line = format!("1: {}\0", behavior.scan_reply);
            let _ = reader.get_mut().write_all(line.as_bytes()).await;
            return true;
        }
    }
}

/// Keeps the socket open without reading so the client's send buffer fills.
async fn hold_open(reader: BufReader<TcpStream>) {
    tokio::time::sleep(Duration::from_secs(30)).await;
    drop(reader);
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn test_config(ports: &[u16]) -> AntivirusConfig {
    AntivirusConfig {
        enabled: true,
        clamav_hosts: vec!["127.0.0.1".to_string()],
        clamav_port: ports.first().copied().unwrap_or(3310),
        system_user_id: -1,
        ..Default::default()
    }
}

pub fn pool_for(endpoints: Vec<PoolEndpoint>, status: &InMemoryStore) -> ClamAvServicesPool {
    ClamAvServicesPool::new(
        Arc::new(StaticResolver::new(endpoints)),
        Arc::new(status.clone()),
        Duration::from_secs(1),
        Duration::from_millis(500),
    )
}

/// Services wired over one in-memory store and one memory storage.
pub struct TestServices {
    pub store: InMemoryStore,
    pub storage: MemoryStorage,
    pub pool: Arc<ClamAvServicesPool>,
    pub versions: Arc<VersionTracker>,
    pub quarantine: Arc<QuarantineService>,
    pub scanner: BackgroundScanService,
}

pub fn services(endpoints: Vec<PoolEndpoint>, config: AntivirusConfig) -> TestServices {
    let store = InMemoryStore::new();
    let storage = MemoryStorage::new();
    let pool = Arc::new(pool_for(endpoints, &store));
    let versions = Arc::new(VersionTracker::new(
        pool.clone(),
        Arc::new(store.clone()),
        config.version_ttl(),
    ));
    let quarantine = Arc::new(QuarantineService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        config.clone(),
    ));
    let scanner = BackgroundScanService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(storage.clone()),
        pool.clone(),
        versions.clone(),
        quarantine.clone(),
        config,
    );

    TestServices {
        store,
        storage,
        pool,
        versions,
        quarantine,
        scanner,
    }
}
