//! Node resolution.

use tracing::debug;

use pvekeep_core::{NodeInfo, NodeSelector};
use pvekeep_gateway::ActionGateway;

use crate::error::{ControlError, ControlResult};

/// Resolve `selector` against the nodes the gateway currently reports.
///
/// `FirstListed` takes whichever node the hypervisor lists first; on a
/// multi-node cluster that ordering is not guaranteed to be stable, so
/// deployments with more than one node should configure a name.
pub async fn select_node(
    gateway: &dyn ActionGateway,
    selector: &NodeSelector,
) -> ControlResult<NodeInfo> {
    let nodes = gateway.list_nodes().await?;

    match selector {
        NodeSelector::FirstListed => {
            if nodes.len() > 1 {
                debug!(
                    count = nodes.len(),
                    chosen = %nodes[0].node,
                    "multiple nodes listed, using the first"
                );
            }
            nodes.into_iter().next().ok_or(ControlError::NoNodes)
        }
        NodeSelector::Named(name) => {
            if nodes.is_empty() {
                return Err(ControlError::NoNodes);
            }
            nodes
                .into_iter()
                .find(|n| &n.node == name)
                .ok_or_else(|| ControlError::NodeNotFound(name.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvekeep_gateway::InMemoryGateway;

    #[tokio::test]
    async fn first_listed_picks_first() {
        let gw = InMemoryGateway::new().with_node("pve1").with_node("pve2");
        let node = select_node(&gw, &NodeSelector::FirstListed).await.unwrap();
        assert_eq!(node.node, "pve1");
    }

    #[tokio::test]
    async fn named_picks_match() {
        let gw = InMemoryGateway::new().with_node("pve1").with_node("pve2");
        let node = select_node(&gw, &NodeSelector::Named("pve2".into()))
            .await
            .unwrap();
        assert_eq!(node.node, "pve2");
    }

    #[tokio::test]
    async fn named_missing_is_not_found() {
        let gw = InMemoryGateway::new().with_node("pve1");
        let err = select_node(&gw, &NodeSelector::Named("pve9".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::NodeNotFound(ref n) if n == "pve9"));
    }

    #[tokio::test]
    async fn empty_cluster_has_no_nodes() {
        let gw = InMemoryGateway::new();
        assert!(matches!(
            select_node(&gw, &NodeSelector::FirstListed).await,
            Err(ControlError::NoNodes)
        ));
        assert!(matches!(
            select_node(&gw, &NodeSelector::Named("pve1".into())).await,
            Err(ControlError::NoNodes)
        ));
    }

    #[tokio::test]
    async fn gateway_failure_propagates() {
        let gw = InMemoryGateway::new().with_node("pve1");
        gw.set_unreachable(true);
        assert!(matches!(
            select_node(&gw, &NodeSelector::FirstListed).await,
            Err(ControlError::Gateway(_))
        ));
    }
}
