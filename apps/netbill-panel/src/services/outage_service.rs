use std::collections::{HashMap, HashSet, VecDeque};

use netbill_db::models::topology::{NodeKind, NodeRef, OutageEvent, TopologyLink};
use netbill_db::repositories::topology_repo::TopologyRepository;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct OutageInput {
    pub node: NodeRef,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkInput {
    pub from: NodeRef,
    pub to: NodeRef,
}

/// Every node reachable from `origin` over directed links, breadth first,
/// excluding the origin itself. Cycles are tolerated.
pub fn propagate(origin: NodeRef, links: &[TopologyLink]) -> Vec<NodeRef> {
    let mut edges: HashMap<NodeRef, Vec<NodeRef>> = HashMap::new();
    for link in links {
        edges.entry(link.from_ref()).or_default().push(link.to_ref());
    }

    let mut seen = HashSet::from([origin]);
    let mut queue = VecDeque::from([origin]);
    let mut affected = Vec::new();
    while let Some(node) = queue.pop_front() {
        for next in edges.get(&node).into_iter().flatten() {
            if seen.insert(*next) {
                affected.push(*next);
                queue.push_back(*next);
            }
        }
    }
    affected
}

pub struct OutageService {
    topology: TopologyRepository,
}

impl OutageService {
    pub fn new(topology: TopologyRepository) -> Self {
        Self { topology }
    }

    pub async fn create_odc(&self, tenant_id: Uuid, name: &str) -> AppResult<Uuid> {
        if name.trim().is_empty() {
            return Err(AppError::InputInvalid("name is required".into()));
        }
        Ok(self.topology.create_odc(tenant_id, name.trim()).await?)
    }

    pub async fn create_odp(&self, tenant_id: Uuid, odc_id: Option<Uuid>, name: &str) -> AppResult<Uuid> {
        if name.trim().is_empty() {
            return Err(AppError::InputInvalid("name is required".into()));
        }
        if let Some(odc) = odc_id {
            self.require_node(tenant_id, NodeRef { kind: NodeKind::Odc, id: odc }).await?;
        }
        Ok(self.topology.create_odp(tenant_id, odc_id, name.trim()).await?)
    }

    pub async fn link(&self, tenant_id: Uuid, input: LinkInput) -> AppResult<TopologyLink> {
        if input.from == input.to {
            return Err(AppError::InputInvalid("a node cannot link to itself".into()));
        }
        if input.from.kind == NodeKind::Client {
            return Err(AppError::InputInvalid("client locations are leaf nodes".into()));
        }
        self.require_node(tenant_id, input.from).await?;
        self.require_node(tenant_id, input.to).await?;
        Ok(self.topology.create_link(tenant_id, input.from, input.to).await?)
    }

    async fn require_node(&self, tenant_id: Uuid, node: NodeRef) -> AppResult<()> {
        if !self.topology.node_exists(tenant_id, node).await? {
            return Err(AppError::NotFound(format!("{} {} not found", node.kind, node.id)));
        }
        Ok(())
    }

    /// Opens an outage and snapshots the nodes cut off behind it.
    pub async fn open(&self, tenant_id: Uuid, input: OutageInput) -> AppResult<OutageEvent> {
        if input.reason.trim().is_empty() {
            return Err(AppError::InputInvalid("reason is required".into()));
        }
        if input.node.kind == NodeKind::Client {
            return Err(AppError::InputInvalid("outages start at an ODC or ODP".into()));
        }
        self.require_node(tenant_id, input.node).await?;

        let links = self.topology.links(tenant_id).await?;
        let affected = propagate(input.node, &links);
        let event = self
            .topology
            .create_outage(tenant_id, input.node, input.reason.trim(), &affected)
            .await?;
        info!(
            "⚠️ Outage on {} {} affects {} nodes",
            input.node.kind,
            input.node.id,
            event.affected.len()
        );
        Ok(event)
    }

    pub async fn resolve(&self, tenant_id: Uuid, outage_id: Uuid) -> AppResult<OutageEvent> {
        self.topology
            .resolve_outage(tenant_id, outage_id)
            .await?
            .ok_or_else(|| AppError::NotFound("open outage not found".into()))
    }

    pub async fn list(&self, tenant_id: Uuid, only_open: bool) -> AppResult<Vec<OutageEvent>> {
        Ok(self.topology.list_outages(tenant_id, only_open).await?)
    }
}
