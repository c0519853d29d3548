//! Local server agent: register once, then sync the registry and rank peers forever

use anyhow::Result;
use futures::future::join_all;
use router_api::{MeshSnapshot, Role, Scores, ServerRecord};
use router_probe::{EmptyRankingPolicy, RegistryApi, RetryPolicy, RouteRanker};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Agent tuning
#[derive(Clone, Debug)]
pub struct AgentSettings {
    pub cycle_interval: Duration,
    pub register_policy: RetryPolicy,
    pub snapshot_policy: RetryPolicy,
    pub empty_ranking: EmptyRankingPolicy,
    /// Port the status endpoints are bound to, checked against the registry's
    pub listen_port: Option<u16>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(60),
            register_policy: RetryPolicy::with_attempts(5),
            snapshot_policy: RetryPolicy::with_attempts(3),
            empty_ranking: EmptyRankingPolicy::Overwrite,
            listen_port: None,
        }
    }
}

/// Owns this server's record and its cached view of the registry
#[derive(Clone)]
pub struct Agent {
    record: Arc<RwLock<ServerRecord>>,
    snapshot: Arc<RwLock<Option<MeshSnapshot>>>,
    registry: Arc<dyn RegistryApi>,
    ranker: RouteRanker,
    settings: AgentSettings,
}

impl Agent {
    pub fn new(
        record: ServerRecord,
        registry: Arc<dyn RegistryApi>,
        ranker: RouteRanker,
        settings: AgentSettings,
    ) -> Self {
        Self {
            record: Arc::new(RwLock::new(record)),
            snapshot: Arc::new(RwLock::new(None)),
            registry,
            ranker,
            settings,
        }
    }

    pub async fn record(&self) -> ServerRecord {
        self.record.read().await.clone()
    }

    pub async fn scores(&self) -> Scores {
        self.record.read().await.scores()
    }

    pub async fn cached_snapshot(&self) -> Option<MeshSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Register, then run a sync and rank cycle every interval, the first one
    /// right away. Returns only when registration fails.
    pub async fn run(self) -> Result<()> {
        self.register().await?;

        let mut ticker = tokio::time::interval(self.settings.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            info!("LocalRouter: periodic routes calculation");
            self.run_cycle().await;
        }
    }

    /// Push this server's record to the registry, retrying with backoff
    pub async fn register(&self) -> Result<()> {
        let record = self.record().await;
        let registry = self.registry.clone();
        let what = format!("registering {}/{}", record.role, record.place);

        match self
            .settings
            .register_policy
            .run(&what, || registry.register(&record))
            .await
        {
            Ok(()) => {
                info!("Server {}@{} registered as {}", record.ip, record.place, record.role);
                Ok(())
            }
            Err(e) => {
                error!("Server {}@{} could not register: {:#}", record.ip, record.place, e);
                Err(e)
            }
        }
    }

    /// One sync phase followed by one rank phase
    pub async fn run_cycle(&self) {
        self.sync().await;
        self.rank_all().await;
    }

    /// Refresh the cached registry snapshot. Returns false when the pull
    /// failed and the previous snapshot was kept.
    pub async fn sync(&self) -> bool {
        let registry = self.registry.clone();
        let pulled = self
            .settings
            .snapshot_policy
            .run("fetching meta router", || registry.snapshot())
            .await;

        let snapshot = match pulled {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let record = self.record.read().await;
                warn!(
                    "Server {}@{} keeps its cached registry: {:#}",
                    record.ip, record.place, e
                );
                return false;
            }
        };

        let record = self.record().await;
        let registered = snapshot.contains(record.role, &record.place);
        debug!("Synced registry with {} servers", snapshot.server_count());
        if let Some(advertised) = port_mismatch(self.settings.listen_port, &snapshot, &record) {
            warn!(
                "Registry sends {} traffic to port {} but this agent listens on {:?}",
                record.role, advertised, self.settings.listen_port
            );
        }
        *self.snapshot.write().await = Some(snapshot);

        if !registered {
            // The registry lost us, most likely to a restart
            warn!("Server {}/{} missing from registry, pushing it again", record.role, record.place);
            if let Err(e) = self.registry.register(&record).await {
                warn!("Re-registration of {}/{} failed: {:#}", record.role, record.place, e);
            }
        }
        true
    }

    /// Rank every role concurrently from the cached snapshot.
    ///
    /// Each role's ranking is stored as soon as it is computed; the call
    /// returns once all roles are done.
    pub async fn rank_all(&self) {
        let snapshot = self.cached_snapshot().await.unwrap_or_default();
        join_all(Role::ALL.iter().map(|role| self.rank_role(&snapshot, *role))).await;
    }

    async fn rank_role(&self, snapshot: &MeshSnapshot, role: Role) {
        let (own_role, own_place) = {
            let record = self.record.read().await;
            (record.role, record.place.clone())
        };
        let exclude = (role == own_role).then_some(own_place.as_str());
        let peers = snapshot.peers(role, exclude);
        let peer_count = peers.len();

        info!("LocalRouter: calculating {} routes over {} peers", role, peer_count);
        let fresh = self.ranker.rank(peers).await;

        let mut record = self.record.write().await;
        let ranking = self
            .settings
            .empty_ranking
            .resolve(peer_count, record.ranking(role), fresh);
        debug!("{} ranking: {:?}", role, ranking);
        record.set_ranking(role, ranking);
    }
}

/// The port peers are told to reach `record` on, when it differs from `listen_port`
pub fn port_mismatch(
    listen_port: Option<u16>,
    snapshot: &MeshSnapshot,
    record: &ServerRecord,
) -> Option<u16> {
    let listen_port = listen_port?;
    let advertised = match record.ip.parse::<SocketAddr>() {
        Ok(addr) => addr.port(),
        Err(_) => snapshot.table(record.role)?.port,
    };
    (advertised != listen_port).then_some(advertised)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use router_api::{Peer, RoleCatalog};
    use router_core::RegistryStore;
    use router_probe::{ProbeResult, Prober, UnreachableReason};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-process registry with switchable failures
    struct FakeRegistry {
        store: RegistryStore,
        fail_register: AtomicBool,
        fail_snapshot: AtomicBool,
        registrations: AtomicUsize,
    }

    impl FakeRegistry {
        fn new(store: RegistryStore) -> Arc<Self> {
            Arc::new(Self {
                store,
                fail_register: AtomicBool::new(false),
                fail_snapshot: AtomicBool::new(false),
                registrations: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RegistryApi for FakeRegistry {
        async fn register(&self, record: &ServerRecord) -> Result<()> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            if self.fail_register.load(Ordering::SeqCst) {
                anyhow::bail!("connection refused");
            }
            self.store.register(record.clone()).await?;
            Ok(())
        }

        async fn snapshot(&self) -> Result<MeshSnapshot> {
            if self.fail_snapshot.load(Ordering::SeqCst) {
                anyhow::bail!("connection refused");
            }
            Ok(self.store.snapshot().await)
        }
    }

    /// Fixed latency per address; unknown addresses are unreachable
    struct FakeProber {
        latencies: Mutex<HashMap<String, Duration>>,
    }

    impl FakeProber {
        fn new(latencies: &[(&str, u64)]) -> Arc<Self> {
            Arc::new(Self {
                latencies: Mutex::new(
                    latencies
                        .iter()
                        .map(|(addr, ms)| (addr.to_string(), Duration::from_millis(*ms)))
                        .collect(),
                ),
            })
        }

        fn set_unreachable(&self, address: &str) {
            self.latencies.lock().unwrap().remove(address);
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, peer: &Peer, _timeout: Duration) -> ProbeResult {
            let latency = self.latencies.lock().unwrap().get(&peer.address).copied();
            match latency {
                Some(latency) => {
                    tokio::time::sleep(latency).await;
                    ProbeResult::reachable(peer.id.clone(), latency)
                }
                None => ProbeResult::unreachable(peer.id.clone(), UnreachableReason::Timeout),
            }
        }
    }

    fn fast_settings() -> AgentSettings {
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        };
        AgentSettings {
            cycle_interval: Duration::from_millis(50),
            register_policy: policy.clone(),
            snapshot_policy: policy,
            empty_ranking: EmptyRankingPolicy::Overwrite,
            listen_port: None,
        }
    }

    async fn chat_mesh() -> RegistryStore {
        let store = RegistryStore::default();
        for (place, ip) in [("2", "10.0.0.2"), ("3", "10.0.0.3")] {
            store
                .register(ServerRecord::new(Role::Chat, place, ip))
                .await
                .unwrap();
        }
        store
    }

    fn chat_agent(
        registry: Arc<FakeRegistry>,
        prober: Arc<FakeProber>,
        settings: AgentSettings,
    ) -> Agent {
        Agent::new(
            ServerRecord::new(Role::Chat, "1", "10.0.0.1"),
            registry,
            RouteRanker::new(prober, Duration::from_secs(1)),
            settings,
        )
    }

    #[tokio::test]
    async fn test_chat_ranking_by_latency() {
        let registry = FakeRegistry::new(chat_mesh().await);
        let prober = FakeProber::new(&[("10.0.0.2:8082", 50), ("10.0.0.3:8082", 20)]);
        let agent = chat_agent(registry.clone(), prober, fast_settings());

        agent.register().await.unwrap();
        agent.run_cycle().await;

        assert_eq!(agent.record().await.rel_chats, vec!["3", "2"]);
        assert!(agent.record().await.rel_nodes.is_empty());
        assert_eq!(agent.scores().await.chat_places, vec!["3", "2"]);
        assert_eq!(registry.store.server_count().await, 3);
    }

    #[tokio::test]
    async fn test_port_mismatch_against_registry() {
        let registry = RegistryStore::new(RoleCatalog::new(vec![(Role::Chat, 9182)]));
        let snapshot = registry.snapshot().await;
        let record = ServerRecord::new(Role::Chat, "1", "10.0.0.1");

        assert_eq!(port_mismatch(Some(8082), &snapshot, &record), Some(9182));
        assert_eq!(port_mismatch(Some(9182), &snapshot, &record), None);
        assert_eq!(port_mismatch(None, &snapshot, &record), None);

        let pinned = ServerRecord::new(Role::Chat, "1", "10.0.0.1:8082");
        assert_eq!(port_mismatch(Some(8082), &snapshot, &pinned), None);
        assert_eq!(port_mismatch(Some(9000), &snapshot, &pinned), Some(8082));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_dropped() {
        let registry = FakeRegistry::new(chat_mesh().await);
        let prober = FakeProber::new(&[("10.0.0.3:8082", 20)]);
        let agent = chat_agent(registry, prober, fast_settings());

        agent.register().await.unwrap();
        agent.run_cycle().await;

        assert_eq!(agent.record().await.rel_chats, vec!["3"]);
    }

    #[tokio::test]
    async fn test_ranks_every_role_excluding_self_only_in_own_role() {
        let store = chat_mesh().await;
        store
            .register(ServerRecord::new(Role::Node, "1", "10.0.1.1"))
            .await
            .unwrap();
        store
            .register(ServerRecord::new(Role::Media, "7", "10.0.2.7"))
            .await
            .unwrap();
        let registry = FakeRegistry::new(store);
        let prober = FakeProber::new(&[
            ("10.0.0.2:8082", 5),
            ("10.0.0.3:8082", 5),
            ("10.0.1.1:8083", 5),
            ("10.0.2.7:8081", 5),
        ]);
        let agent = chat_agent(registry, prober, fast_settings());

        agent.register().await.unwrap();
        agent.run_cycle().await;

        let record = agent.record().await;
        // Node "1" is another server that happens to share our place id
        assert_eq!(record.rel_nodes, vec!["1"]);
        assert_eq!(record.rel_medias, vec!["7"]);
        assert_eq!(record.rel_chats.len(), 2);
        assert!(!record.rel_chats.contains(&"1".to_string()));
    }

    #[tokio::test]
    async fn test_register_failure_is_fatal() {
        let registry = FakeRegistry::new(RegistryStore::default());
        registry.fail_register.store(true, Ordering::SeqCst);
        let agent = chat_agent(registry.clone(), FakeProber::new(&[]), fast_settings());

        let result = tokio::time::timeout(Duration::from_secs(2), agent.run()).await;
        assert!(result.expect("run should stop").is_err());
        assert_eq!(registry.registrations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sync_failure_keeps_cached_snapshot() {
        let registry = FakeRegistry::new(chat_mesh().await);
        let prober = FakeProber::new(&[("10.0.0.2:8082", 10), ("10.0.0.3:8082", 30)]);
        let agent = chat_agent(registry.clone(), prober, fast_settings());

        agent.register().await.unwrap();
        assert!(agent.sync().await);
        let cached = agent.cached_snapshot().await.unwrap();

        registry.fail_snapshot.store(true, Ordering::SeqCst);
        registry
            .store
            .register(ServerRecord::new(Role::Chat, "4", "10.0.0.4"))
            .await
            .unwrap();

        agent.run_cycle().await;
        assert_eq!(agent.cached_snapshot().await.unwrap(), cached);
        // Ranked from the stale snapshot, which does not know server 4
        assert_eq!(agent.record().await.rel_chats, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_sync_failure_before_first_snapshot_ranks_nothing() {
        let registry = FakeRegistry::new(chat_mesh().await);
        registry.fail_snapshot.store(true, Ordering::SeqCst);
        let agent = chat_agent(registry, FakeProber::new(&[]), fast_settings());

        agent.run_cycle().await;
        assert!(agent.cached_snapshot().await.is_none());
        assert!(agent.record().await.rel_chats.is_empty());
    }

    #[tokio::test]
    async fn test_reregisters_when_missing_from_registry() {
        let registry = FakeRegistry::new(chat_mesh().await);
        let agent = chat_agent(registry.clone(), FakeProber::new(&[]), fast_settings());

        // Never registered: the registry behaves as if it had restarted
        assert!(agent.sync().await);
        assert_eq!(registry.registrations.load(Ordering::SeqCst), 1);
        assert!(registry.store.snapshot().await.contains(Role::Chat, "1"));

        assert!(agent.sync().await);
        assert_eq!(registry.registrations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_unreachable_overwrites_by_default() {
        let registry = FakeRegistry::new(chat_mesh().await);
        let prober = FakeProber::new(&[("10.0.0.2:8082", 10), ("10.0.0.3:8082", 20)]);
        let agent = chat_agent(registry, prober.clone(), fast_settings());

        agent.register().await.unwrap();
        agent.run_cycle().await;
        assert_eq!(agent.record().await.rel_chats, vec!["2", "3"]);

        prober.set_unreachable("10.0.0.2:8082");
        prober.set_unreachable("10.0.0.3:8082");
        agent.run_cycle().await;
        assert!(agent.record().await.rel_chats.is_empty());
    }

    #[tokio::test]
    async fn test_all_unreachable_keeps_previous_when_configured() {
        let registry = FakeRegistry::new(chat_mesh().await);
        let prober = FakeProber::new(&[("10.0.0.2:8082", 10), ("10.0.0.3:8082", 20)]);
        let settings = AgentSettings {
            empty_ranking: EmptyRankingPolicy::KeepPrevious,
            ..fast_settings()
        };
        let agent = chat_agent(registry, prober.clone(), settings);

        agent.register().await.unwrap();
        agent.run_cycle().await;

        prober.set_unreachable("10.0.0.2:8082");
        prober.set_unreachable("10.0.0.3:8082");
        agent.run_cycle().await;
        assert_eq!(agent.record().await.rel_chats, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_run_keeps_cycling() {
        let registry = FakeRegistry::new(chat_mesh().await);
        let prober = FakeProber::new(&[("10.0.0.3:8082", 1)]);
        let agent = chat_agent(registry.clone(), prober.clone(), fast_settings());

        let handle = tokio::spawn(agent.clone().run());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(agent.record().await.rel_chats, vec!["3"]);

        prober
            .latencies
            .lock()
            .unwrap()
            .insert("10.0.0.2:8082".to_string(), Duration::from_millis(0));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(agent.record().await.rel_chats, vec!["2", "3"]);

        handle.abort();
        assert_eq!(registry.registrations.load(Ordering::SeqCst), 1);
    }

    mod loopback {
        use super::super::*;
        use hyper::{body::Bytes, Method, StatusCode};
        use router_core::RegistryStore;
        use router_probe::http::{
            json_response, not_found_response, ok_response, pong_response, serve, text_response,
        };
        use router_probe::{HttpProber, RegistryClient};
        use tokio::net::TcpListener;

        /// Registry API over HTTP backed by a real store
        async fn registry_server(store: RegistryStore) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(serve(listener, move |method: Method, path: String, body: Bytes| {
                let store = store.clone();
                async move {
                    match (method, path.as_str()) {
                        (Method::POST, "/new-server") => match store.register_json(&body).await {
                            Ok(_) => ok_response(),
                            Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                        },
                        (Method::GET, "/full-router") => json_response(&store.snapshot().await, false),
                        (_, path) => not_found_response(path),
                    }
                }
            }));
            format!("http://{}", addr)
        }

        /// A peer answering `/ping` after `delay`
        async fn peer_server(delay: Duration) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(serve(listener, move |_method: Method, _path: String, _body: Bytes| async move {
                tokio::time::sleep(delay).await;
                pong_response()
            }));
            addr.to_string()
        }

        async fn dead_address() -> String {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        }

        async fn ranked_chats(two: String, three: String) -> Vec<String> {
            let store = RegistryStore::default();
            store.register(ServerRecord::new(Role::Chat, "2", two)).await.unwrap();
            store.register(ServerRecord::new(Role::Chat, "3", three)).await.unwrap();
            let url = registry_server(store.clone()).await;

            let agent = Agent::new(
                ServerRecord::new(Role::Chat, "1", dead_address().await),
                Arc::new(RegistryClient::new(url, Duration::from_secs(2)).unwrap()),
                RouteRanker::new(Arc::new(HttpProber::new()), Duration::from_secs(1)),
                AgentSettings::default(),
            );
            agent.register().await.unwrap();
            assert!(store.snapshot().await.contains(Role::Chat, "1"));

            agent.run_cycle().await;
            agent.record().await.rel_chats
        }

        #[tokio::test]
        async fn test_end_to_end_ranking_over_http() {
            let two = peer_server(Duration::from_millis(150)).await;
            let three = peer_server(Duration::from_millis(20)).await;
            assert_eq!(ranked_chats(two, three).await, vec!["3", "2"]);
        }

        #[tokio::test]
        async fn test_end_to_end_unreachable_peer_over_http() {
            let two = dead_address().await;
            let three = peer_server(Duration::from_millis(20)).await;
            assert_eq!(ranked_chats(two, three).await, vec!["3"]);
        }
    }
}
