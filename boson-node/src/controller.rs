//! The Node Controller (spec.md §4.9 / C9): owns the lifecycle of one Boson
//! node — binds its transports, wires storage/routing/RPC/dispatch together,
//! and drives bootstrap, bucket refresh, and republish as background tasks.
//!
//! Grounded in the teacher's `DhtNodeManager` (`lib-network::dht::node`):
//! the same "construct components, `start()` spawns the maintenance tasks,
//! `stop()` cancels them and drains in-flight work" shape, with the
//! callback-list status notifications replaced by [`crate::StatusBroadcast`].

use std::net::SocketAddr;
use std::sync::Arc;

use boson_crypto::{Id, Keypair};
use boson_lookup::{lookup_node, CancelToken, ALPHA, DEFAULT_WANT};
use boson_proto::{DhtError, NodeInfo, PeerInfo, Query, Response, Value, WANT_TOKEN};
use boson_routing::{now, RoutingTable, K};
use boson_rpc::{RpcEngine, TokenManager, UdpTransport};
use boson_store::Storage;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::config::NodeControllerConfig;
use crate::constants::{ANNOUNCE_INTERVAL, BOOTSTRAP_CONCURRENCY, MAINTENANCE_TICK, MAINTENANCE_TICK_DEVELOPER, SHUTDOWN_DRAIN_DEADLINE};
use crate::dispatcher::Dispatcher;
use crate::status::{NodeStatus, StatusBroadcast};

/// One bound transport plus the engine/dispatcher pair listening on it.
struct Endpoint {
    engine: Arc<RpcEngine>,
    dispatch_task: JoinHandle<()>,
}

pub struct NodeController {
    config: NodeControllerConfig,
    keypair: Arc<Keypair>,
    storage: Arc<Storage>,
    table: Arc<Mutex<RoutingTable>>,
    tokens: Arc<Mutex<TokenManager>>,
    status: Arc<StatusBroadcast>,
    state: Mutex<NodeStatus>,
    endpoints: Mutex<Vec<Endpoint>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeController {
    pub fn new(config: NodeControllerConfig) -> Self {
        let keypair = Arc::new(match config.key_seed {
            Some(seed) => Keypair::from_seed(seed),
            None => Keypair::generate(),
        });
        let storage = Arc::new(match config.snapshot_path() {
            Some(path) => Storage::with_snapshot_path(path),
            None => Storage::new(),
        });
        let table = Arc::new(Mutex::new(RoutingTable::new(keypair.id())));

        NodeController {
            config,
            keypair,
            storage,
            table,
            tokens: Arc::new(Mutex::new(TokenManager::new())),
            status: Arc::new(StatusBroadcast::new()),
            state: Mutex::new(NodeStatus::Created),
            endpoints: Mutex::new(Vec::new()),
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> Id {
        self.keypair.id()
    }

    pub async fn status(&self) -> NodeStatus {
        *self.state.lock().await
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<NodeStatus> {
        self.status.subscribe()
    }

    async fn transition(&self, next: NodeStatus) {
        let mut state = self.state.lock().await;
        debug_assert!(state.can_transition_to(next), "illegal lifecycle transition {:?} -> {:?}", *state, next);
        *state = next;
        drop(state);
        self.status.publish(next);
    }

    /// Bind the configured transports, start dispatching inbound requests,
    /// and kick off the background maintenance tasks (spec.md §4.9).
    pub async fn start(self: &Arc<Self>) -> Result<(), DhtError> {
        self.transition(NodeStatus::Initializing).await;

        self.storage
            .load()
            .await
            .map_err(|e| DhtError::generic(e.to_string()))?;
        self.background.lock().await.push(self.storage.clone().spawn_expiration_task());

        for addr in [self.config.address4, self.config.address6].into_iter().flatten() {
            self.bind_endpoint(addr).await?;
        }
        if self.endpoints.lock().await.is_empty() {
            return Err(DhtError::generic("no bind address configured"));
        }

        self.transition(NodeStatus::Running).await;
        info!(id = %self.id(), "node running");

        let this = self.clone();
        self.background.lock().await.push(tokio::spawn(async move { this.bootstrap().await }));

        let this = self.clone();
        self.background.lock().await.push(tokio::spawn(async move { this.maintenance_loop().await }));

        Ok(())
    }

    async fn bind_endpoint(&self, addr: SocketAddr) -> Result<(), DhtError> {
        let transport = UdpTransport::bind(addr)
            .await
            .map_err(|e| DhtError::generic(format!("bind {addr}: {e}")))?;
        let (engine, inbound) = RpcEngine::start(Arc::new(transport), self.id(), self.table.clone());
        let dispatcher = Arc::new(Dispatcher::new(self.storage.clone(), self.table.clone(), self.tokens.clone()));
        let dispatch_task = tokio::spawn(dispatcher.run(inbound));
        self.endpoints.lock().await.push(Endpoint { engine, dispatch_task });
        Ok(())
    }

    /// Any bound engine can originate a query; which socket it goes out on
    /// doesn't matter to the remote.
    async fn any_engine(&self) -> Option<Arc<RpcEngine>> {
        self.endpoints.lock().await.first().map(|e| e.engine.clone())
    }

    /// Self `FIND_NODE` against the configured seed nodes, feeding every
    /// discovered node back into the routing table (spec.md §4.9).
    async fn bootstrap(self: Arc<Self>) {
        if self.config.bootstrap.is_empty() {
            return;
        }
        let Some(engine) = self.any_engine().await else { return };
        let seed: Vec<_> = self.config.bootstrap.iter().take(ALPHA * K).cloned().collect();
        let result = lookup_node(engine, seed, self.id(), DEFAULT_WANT, CancelToken::new()).await;

        let mut table = self.table.lock().await;
        let discovered = result.closest.len();
        for node in result.closest {
            table.add(node);
        }
        drop(table);
        info!(discovered, "bootstrap complete");
    }

    fn tick_interval(&self) -> std::time::Duration {
        if self.config.developer_mode {
            MAINTENANCE_TICK_DEVELOPER
        } else {
            MAINTENANCE_TICK
        }
    }

    async fn maintenance_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick_interval());
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            self.tokens.lock().await.maybe_rotate();
            self.refresh_stale_buckets().await;
            self.republish_values().await;
            self.republish_peers().await;
        }
    }

    async fn refresh_stale_buckets(self: &Arc<Self>) {
        let Some(engine) = self.any_engine().await else { return };
        let due = {
            let table = self.table.lock().await;
            table.buckets_needing_refresh()
        };
        for (bidx, target) in due {
            let seed = {
                let table = self.table.lock().await;
                table.closest(&target, ALPHA * K)
            };
            if seed.is_empty() {
                continue;
            }
            let result = lookup_node(engine.clone(), seed, target, DEFAULT_WANT, CancelToken::new()).await;
            let mut table = self.table.lock().await;
            for node in result.closest {
                table.add(node);
            }
            table.mark_bucket_refreshed(bidx);
        }
    }

    /// Token acquisition piggybacks on a `FIND_NODE { want: WANT_TOKEN }`
    /// round-trip to the target itself, since a token's validity only
    /// depends on `(remoteAddr, targetId)`, not the method that requested it.
    async fn acquire_token(&self, engine: &Arc<RpcEngine>, node: &NodeInfo, target: Id) -> Result<u32, DhtError> {
        let response = engine
            .call(node, Query::FindNode { target, want: DEFAULT_WANT | WANT_TOKEN })
            .await
            .map_err(|e| DhtError::generic(e.to_string()))?;
        match response {
            Response::FindNode { token: Some(token), .. } => Ok(token),
            _ => Err(DhtError::generic("peer did not issue a write token")),
        }
    }

    async fn republish_values(self: &Arc<Self>) {
        let Some(engine) = self.any_engine().await else { return };
        let cutoff = now() - ANNOUNCE_INTERVAL.as_secs() as i64;
        for value in self.storage.get_persistent_values(cutoff).await {
            let id = value.id();
            let targets = {
                let table = self.table.lock().await;
                table.closest(&id, K)
            };
            let mut announced = false;
            for node in &targets {
                if self.store_value_at(&engine, node, value.clone()).await.is_ok() {
                    announced = true;
                }
            }
            if announced {
                self.storage.update_value_last_announce(&id).await;
            }
        }
    }

    async fn store_value_at(&self, engine: &Arc<RpcEngine>, node: &NodeInfo, value: Value) -> Result<(), DhtError> {
        let id = value.id();
        let token = self.acquire_token(engine, node, id).await?;
        engine
            .call(
                node,
                Query::StoreValue {
                    value,
                    expected_sequence: None,
                    token,
                    persistent: true,
                },
            )
            .await
            .map_err(|e| DhtError::generic(e.to_string()))?;
        Ok(())
    }

    async fn republish_peers(self: &Arc<Self>) {
        let Some(engine) = self.any_engine().await else { return };
        let cutoff = now() - ANNOUNCE_INTERVAL.as_secs() as i64;
        for (service_id, peer) in self.storage.get_persistent_peers(cutoff).await {
            let targets = {
                let table = self.table.lock().await;
                table.closest(&service_id, K)
            };
            let node_id = peer.id;
            let mut announced = false;
            for node in &targets {
                if self
                    .announce_peer_at(&engine, node, service_id, peer.clone())
                    .await
                    .is_ok()
                {
                    announced = true;
                }
            }
            if announced {
                self.storage.update_peer_last_announce(&service_id, &node_id).await;
            }
        }
    }

    async fn announce_peer_at(&self, engine: &Arc<RpcEngine>, node: &NodeInfo, target: Id, peer: PeerInfo) -> Result<(), DhtError> {
        let token = self.acquire_token(engine, node, target).await?;
        let peer_id = peer.id;
        engine
            .call(
                node,
                Query::AnnouncePeer {
                    target,
                    peer,
                    peer_id: Some(peer_id),
                    token,
                    persistent: true,
                },
            )
            .await
            .map_err(|e| DhtError::generic(e.to_string()))?;
        Ok(())
    }

    /// Stop background tasks, give in-flight RPCs up to
    /// `SHUTDOWN_DRAIN_DEADLINE` to settle, persist storage, and close
    /// (spec.md §4.9).
    pub async fn stop(&self) -> Result<(), DhtError> {
        self.transition(NodeStatus::Stopping).await;

        for task in self.background.lock().await.drain(..) {
            task.abort();
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_DEADLINE;
        loop {
            let total: usize = {
                let mut sum = 0;
                for endpoint in self.endpoints.lock().await.iter() {
                    sum += endpoint.engine.in_flight_count().await;
                }
                sum
            };
            if total == 0 || tokio::time::Instant::now() >= deadline {
                if total > 0 {
                    warn!(in_flight = total, "shutdown deadline hit with calls still outstanding");
                }
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        for endpoint in self.endpoints.lock().await.drain(..) {
            endpoint.dispatch_task.abort();
        }

        self.storage
            .save()
            .await
            .map_err(|e| DhtError::generic(e.to_string()))?;

        self.transition(NodeStatus::Stopped).await;
        trace!(id = %self.id(), "node stopped");
        Ok(())
    }
}
