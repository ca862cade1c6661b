use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

use crate::message::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};

/// Delivery failures below the consensus layer. All of them mean "no reply
/// this round"; the caller retries on its next tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    #[error("peer unreachable")]
    Unreachable,
    #[error("request timed out")]
    Timeout,
}

/// Client side of the symmetric peer-to-peer RPC surface. One stub per
/// cluster member, owned by the transport.
#[async_trait]
pub trait RaftTransport: Send + Sync {
    async fn request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply, RpcError>;
    async fn append_entries(&self, args: AppendEntriesArgs)
        -> Result<AppendEntriesReply, RpcError>;
}

/// Server side: what a peer exposes to the transport.
#[async_trait]
pub trait RaftService: Send + Sync {
    async fn request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply;
    async fn append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply;
}

/// In-process transport fabric wiring N peers living in one process.
///
/// Links are tracked pairwise so tests can cut individual nodes or split the
/// cluster into partitions. A request whose link goes down mid-flight loses
/// its reply, like a dropped packet on a real network.
#[derive(Clone)]
pub struct LocalMesh {
    inner: Arc<MeshInner>,
}

struct MeshInner {
    size: usize,
    services: RwLock<Vec<Option<Arc<dyn RaftService>>>>,
    links: Mutex<Vec<Vec<bool>>>,
    rpc_timeout: Duration,
}

impl LocalMesh {
    pub fn new(n: usize) -> Self {
        LocalMesh {
            inner: Arc::new(MeshInner {
                size: n,
                services: RwLock::new(vec![None; n]),
                links: Mutex::new(vec![vec![true; n]; n]),
                rpc_timeout: Duration::from_secs(1),
            }),
        }
    }

    /// Transport stubs for peer `me`, one per cluster member in table order.
    /// The stub at index `me` loops back to the local peer and is never used
    /// by the consensus core.
    pub fn endpoints(&self, me: usize) -> Vec<Arc<dyn RaftTransport>> {
        (0..self.inner.size)
            .map(|to| {
                Arc::new(LocalLink {
                    mesh: self.inner.clone(),
                    from: me,
                    to,
                }) as Arc<dyn RaftTransport>
            })
            .collect()
    }

    /// Attach (or replace, after a restart) the peer serving slot `id`.
    pub async fn register(&self, id: usize, service: Arc<dyn RaftService>) {
        self.inner.services.write().await[id] = Some(service);
    }

    /// Cut every link touching `id`.
    pub async fn disconnect(&self, id: usize) {
        let mut links = self.inner.links.lock().await;
        for other in 0..self.inner.size {
            links[id][other] = false;
            links[other][id] = false;
        }
    }

    /// Restore every link touching `id`.
    pub async fn connect(&self, id: usize) {
        let mut links = self.inner.links.lock().await;
        for other in 0..self.inner.size {
            links[id][other] = true;
            links[other][id] = true;
        }
    }

    /// Split the cluster: only links inside the same group stay up.
    pub async fn partition(&self, groups: &[&[usize]]) {
        let mut links = self.inner.links.lock().await;
        for row in links.iter_mut() {
            for cell in row.iter_mut() {
                *cell = false;
            }
        }
        for group in groups {
            for &a in *group {
                for &b in *group {
                    links[a][b] = true;
                }
            }
        }
        for i in 0..self.inner.size {
            links[i][i] = true;
        }
    }

    /// Restore full connectivity.
    pub async fn heal(&self) {
        let mut links = self.inner.links.lock().await;
        for row in links.iter_mut() {
            for cell in row.iter_mut() {
                *cell = true;
            }
        }
    }

    pub async fn is_connected(&self, id: usize) -> bool {
        self.inner.links.lock().await[id][id]
    }
}

impl MeshInner {
    async fn link_up(&self, from: usize, to: usize) -> bool {
        let links = self.links.lock().await;
        links[from][to] && links[to][from]
    }

    async fn route(&self, from: usize, to: usize) -> Result<Arc<dyn RaftService>, RpcError> {
        if !self.link_up(from, to).await {
            return Err(RpcError::Unreachable);
        }
        let services = self.services.read().await;
        services
            .get(to)
            .and_then(|slot| slot.clone())
            .ok_or(RpcError::Unreachable)
    }
}

struct LocalLink {
    mesh: Arc<MeshInner>,
    from: usize,
    to: usize,
}

#[async_trait]
impl RaftTransport for LocalLink {
    async fn request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply, RpcError> {
        let service = self.mesh.route(self.from, self.to).await?;
        let reply = match timeout(self.mesh.rpc_timeout, service.request_vote(args)).await {
            Ok(reply) => reply,
            Err(_) => return Err(RpcError::Timeout),
        };
        if !self.mesh.link_up(self.from, self.to).await {
            return Err(RpcError::Unreachable);
        }
        Ok(reply)
    }

    async fn append_entries(
        &self,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesReply, RpcError> {
        let service = self.mesh.route(self.from, self.to).await?;
        let reply = match timeout(self.mesh.rpc_timeout, service.append_entries(args)).await {
            Ok(reply) => reply,
            Err(_) => return Err(RpcError::Timeout),
        };
        if !self.mesh.link_up(self.from, self.to).await {
            return Err(RpcError::Unreachable);
        }
        Ok(reply)
    }
}
