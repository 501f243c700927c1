//! Shared test harness for Tidepool integration tests.
//!
//! Provides [`TestNode`], a node serving join requests over real TCP on a
//! loopback port, plus [`ScriptedDiscovery`] (a discovery source whose
//! answers change from poll to poll) and [`RecordingTransport`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tidepool_cluster::{
    AbortSignal, AddressSource, ClusterError, ClusterState, DiscoveryError, DiscoveryPort,
    JoinConfig, JoinCoordinator, JoinHandshake, JoinOutcome, JoinResponder, StaticAddressSource,
};
use tidepool_net::{Channel, JoinListener, NetError, TcpTransport, Transport};
use tidepool_types::{Address, DiscoveredPeer, Member, MemberView, NodeId};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// Cluster name every harness node uses unless told otherwise.
pub const CLUSTER_NAME: &str = "dev";

/// Join settings sized for loopback tests.
pub fn join_config() -> JoinConfig {
    JoinConfig {
        max_wait: Duration::from_secs(2),
        ..JoinConfig::test_config()
    }
}

/// Address of a loopback port nothing listens on.
///
/// Binds an ephemeral port and drops the listener, closing it again.
pub async fn dead_address() -> Address {
    let listener = JoinListener::bind(&Address::new("127.0.0.1", 0))
        .await
        .unwrap();
    listener.local_addr().unwrap()
}

// =========================================================================
// Scripted discovery
// =========================================================================

/// Discovery source returning one scripted round per poll, then repeating
/// its fallback forever.
pub struct ScriptedDiscovery {
    rounds: Mutex<VecDeque<Vec<DiscoveredPeer>>>,
    then: Vec<DiscoveredPeer>,
    calls: AtomicUsize,
}

impl ScriptedDiscovery {
    pub fn new(rounds: Vec<Vec<DiscoveredPeer>>, then: Vec<DiscoveredPeer>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
            then,
            calls: AtomicUsize::new(0),
        })
    }

    /// `empty_polls` empty answers, then `addresses` forever.
    pub fn after_empty(empty_polls: usize, addresses: &[Address]) -> Arc<Self> {
        let peers = addresses.iter().cloned().map(DiscoveredPeer::single).collect();
        Self::new(vec![Vec::new(); empty_polls], peers)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryPort for ScriptedDiscovery {
    async fn discover_peers(&self) -> Result<Vec<DiscoveredPeer>, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let round = self.rounds.lock().await.pop_front();
        Ok(round.unwrap_or_else(|| self.then.clone()))
    }
}

// =========================================================================
// Recording transport
// =========================================================================

/// TCP transport that records every address it is asked to connect to.
#[derive(Default)]
pub struct RecordingTransport {
    inner: TcpTransport,
    connects: std::sync::Mutex<Vec<Address>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Addresses connected to so far, in call order.
    pub fn connects(&self) -> Vec<Address> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn connect(&self, addr: &Address) -> Result<Box<dyn Channel>, NetError> {
        self.connects.lock().unwrap().push(addr.clone());
        self.inner.connect(addr).await
    }
}

// =========================================================================
// Test node
// =========================================================================

/// A node bound to a loopback port.
///
/// The node answers join requests from the moment it is bound: with
/// `Pending` while it is still looking for a cluster, then as a member.
pub struct TestNode {
    pub member: Member,
    state: Arc<ClusterState>,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<()>,
}

impl TestNode {
    /// Bind a fresh node identified by `seed`.
    pub async fn bind(seed: &str) -> Self {
        Self::bind_named(seed, CLUSTER_NAME).await
    }

    /// Bind a fresh node that belongs to `cluster_name`.
    pub async fn bind_named(seed: &str, cluster_name: &str) -> Self {
        let listener = JoinListener::bind(&Address::new("127.0.0.1", 0))
            .await
            .unwrap();
        let address = listener.local_addr().unwrap();
        Self::serve(seed, listener, address, cluster_name)
    }

    /// Bind on a specific address (e.g. to restart a node on its old port).
    pub async fn bind_at(seed: &str, address: &Address) -> Self {
        let listener = JoinListener::bind(address).await.unwrap();
        Self::serve(seed, listener, address.clone(), CLUSTER_NAME)
    }

    fn serve(seed: &str, listener: JoinListener, address: Address, cluster_name: &str) -> Self {
        let member = Member {
            node_id: NodeId::from_data(seed.as_bytes()),
            address,
            generation: 1,
        };
        let state = ClusterState::new(member.clone());
        let responder = JoinResponder::new(state.clone(), cluster_name);
        let (shutdown, rx) = watch::channel(false);
        let server = tokio::spawn(listener.serve(
            move |message, _remote| {
                let responder = responder.clone();
                async move { responder.handle(message).await }
            },
            rx,
        ));
        Self {
            member,
            state,
            shutdown,
            server,
        }
    }

    /// Start a bound node as the founder of a new cluster.
    pub async fn founder(seed: &str) -> Self {
        let node = Self::bind(seed).await;
        node.state.found().await;
        node
    }

    pub fn address(&self) -> &Address {
        &self.member.address
    }

    pub fn state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    pub async fn view(&self) -> MemberView {
        self.state.view().await.expect("node has no view")
    }

    /// Handshake for this node over plain TCP.
    pub fn handshake(&self, config: &JoinConfig) -> JoinHandshake {
        self.handshake_via(config, Arc::new(TcpTransport::new()))
    }

    /// Handshake for this node over `transport`.
    pub fn handshake_via(
        &self,
        config: &JoinConfig,
        transport: Arc<dyn Transport>,
    ) -> JoinHandshake {
        JoinHandshake::new(config, transport, &self.member, None)
    }

    /// Coordinator trying the given member addresses.
    pub fn coordinator_for(&self, config: JoinConfig, members: &[Address]) -> JoinCoordinator {
        let source = StaticAddressSource::new(self.member.address.clone(), members.to_vec());
        self.coordinator_with_source(config, Arc::new(source))
    }

    /// Coordinator polling `source`.
    pub fn coordinator_with_source(
        &self,
        config: JoinConfig,
        source: Arc<dyn AddressSource>,
    ) -> JoinCoordinator {
        let handshake = self.handshake(&config);
        JoinCoordinator::new(config, source, handshake).unwrap()
    }

    /// Coordinator resolving candidates from `discovery`.
    pub fn coordinator_with_discovery(
        &self,
        config: JoinConfig,
        discovery: Arc<dyn DiscoveryPort>,
    ) -> JoinCoordinator {
        let handshake = self.handshake(&config);
        JoinCoordinator::with_discovery(
            config,
            discovery,
            self.member.address.clone(),
            handshake,
        )
        .unwrap()
    }

    /// Run one join attempt and apply its outcome to the node's state.
    pub async fn run_join(
        &self,
        coordinator: &JoinCoordinator,
        abort: &AbortSignal,
    ) -> Result<JoinOutcome, ClusterError> {
        let outcome = coordinator.find_cluster_or_found(abort).await?;
        match &outcome {
            JoinOutcome::Joined(view) => self.state.install(view.clone()).await,
            JoinOutcome::BecomeFounder => {
                self.state.found().await;
            }
            JoinOutcome::Aborted(_) => {}
        }
        Ok(outcome)
    }

    /// Join through `members` with the harness settings.
    pub async fn join(&self, members: &[Address]) -> JoinOutcome {
        let coordinator = self.coordinator_for(join_config(), members);
        self.run_join(&coordinator, &AbortSignal::never())
            .await
            .unwrap()
    }

    /// Stop answering and release the port.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.server.await;
    }
}
