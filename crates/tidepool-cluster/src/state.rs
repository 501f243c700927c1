//! Cluster state: the local member and the membership view it belongs to.
//!
//! [`ClusterState`] starts without a view. A join attempt ends by either
//! installing the view the master handed back or founding a one-member
//! cluster; only then does the node answer join requests itself.

use std::sync::Arc;

use tidepool_types::{Address, Member, MemberView};
use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};

/// Shared membership state of one node.
pub struct ClusterState {
    /// This node.
    local: Member,
    /// Current view, `None` until the join attempt has an outcome.
    view: RwLock<Option<MemberView>>,
    /// Every installed or updated view.
    view_tx: broadcast::Sender<MemberView>,
}

impl ClusterState {
    /// Create the state for the given local member.
    pub fn new(local: Member) -> Arc<Self> {
        let (view_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            local,
            view: RwLock::new(None),
            view_tx,
        })
    }

    /// Subscribe to view changes.
    pub fn subscribe(&self) -> broadcast::Receiver<MemberView> {
        self.view_tx.subscribe()
    }

    pub fn local_member(&self) -> &Member {
        &self.local
    }

    pub fn local_address(&self) -> &Address {
        &self.local.address
    }

    /// Become the founding master of a new cluster.
    pub async fn found(&self) -> MemberView {
        let view = MemberView::founding(self.local.clone());
        info!(address = %self.local.address, "founded new cluster");
        self.set_view(view.clone()).await;
        view
    }

    /// Adopt a view received from the master.
    pub async fn install(&self, view: MemberView) {
        if !view.contains(&self.local.address) {
            warn!(
                address = %self.local.address,
                version = view.version,
                "installed view does not list the local member"
            );
        }
        info!(
            master = %view.master,
            members = view.len(),
            version = view.version,
            "installed membership view"
        );
        self.set_view(view).await;
    }

    /// Add a member to the view of a master.
    ///
    /// An existing entry with the same address or node id is replaced (a
    /// restarted node rejoining). Bumps the view version. Returns `None`
    /// while no view is installed.
    pub async fn admit(&self, member: Member) -> Option<MemberView> {
        let view = {
            let mut guard = self.view.write().await;
            let view = guard.as_mut()?;
            view.members.retain(|m| {
                m.node_id == self.local.node_id
                    || (m.address != member.address && m.node_id != member.node_id)
            });
            info!(
                node_id = %member.node_id,
                address = %member.address,
                generation = member.generation,
                "member admitted"
            );
            view.members.push(member);
            view.version += 1;
            view.clone()
        };
        let _ = self.view_tx.send(view.clone());
        Some(view)
    }

    /// Snapshot of the current view.
    pub async fn view(&self) -> Option<MemberView> {
        self.view.read().await.clone()
    }

    /// Address of the current master, if a view is installed.
    pub async fn master(&self) -> Option<Address> {
        self.view.read().await.as_ref().map(|v| v.master.clone())
    }

    pub async fn is_master(&self) -> bool {
        self.master().await.as_ref() == Some(&self.local.address)
    }

    async fn set_view(&self, view: MemberView) {
        *self.view.write().await = Some(view.clone());
        let _ = self.view_tx.send(view);
    }
}

impl std::fmt::Debug for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterState")
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}
