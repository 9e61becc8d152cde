//! # Discovery Across a Seed
//!
//! Three loopback nodes: a seed with no bootstrap peers, and two peers that
//! bootstrap from it. One advertises a namespace, the other finds it.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use futures::StreamExt;
    use libp2p::PeerId;
    use overlay_p2p::{DiscoveryApi, Node};
    use tokio::time::timeout;

    use crate::integration::fixtures::*;

    struct Cluster {
        seed: Node,
        a: Node,
        b: Node,
    }

    impl Cluster {
        async fn start() -> Option<Self> {
            let seed = try_node(&fresh_key(), seed_config())?;
            let seed_addr = dialable_tcp_addr(&seed).await;
            let a = try_node(&fresh_key(), peer_config(&seed_addr))?;
            let b = try_node(&fresh_key(), peer_config(&seed_addr))?;
            Some(Self { seed, a, b })
        }

        async fn shutdown(mut self) {
            self.b.shutdown().await;
            self.a.shutdown().await;
            self.seed.shutdown().await;
        }
    }

    async fn find_all(node: &Node, namespace: &str) -> HashSet<PeerId> {
        let discovery = node.discovery().expect("routing enabled");
        match discovery.find_peers(namespace).await {
            Ok(stream) => stream.map(|peer| peer.peer_id).collect().await,
            Err(_) => HashSet::new(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_peer_finds_advertiser_through_seed() {
        let Some(cluster) = Cluster::start().await else {
            return;
        };
        let namespace = "overlay-test-namespace";
        let a_id = cluster.a.peer_id();

        let found = timeout(NETWORK_TIMEOUT, async {
            loop {
                let advertised = cluster
                    .a
                    .discovery()
                    .expect("routing enabled")
                    .advertise(namespace)
                    .await;
                if let Ok(ttl) = advertised {
                    assert!(!ttl.is_zero());
                    let peers = find_all(&cluster.b, namespace).await;
                    if peers.contains(&a_id) {
                        return peers;
                    }
                }
                tokio::time::sleep(RETRY_DELAY).await;
            }
        })
        .await
        .expect("b finds a within the timeout");

        assert!(!found.contains(&cluster.b.peer_id()));
        cluster.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_find_never_yields_self() {
        let Some(cluster) = Cluster::start().await else {
            return;
        };
        let namespace = "overlay-self-lookup";
        let a = cluster.a.discovery().expect("routing enabled").clone();

        timeout(NETWORK_TIMEOUT, async {
            while a.advertise(namespace).await.is_err() {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        })
        .await
        .expect("advertise succeeds");

        let found = find_all(&cluster.a, namespace).await;
        assert!(!found.contains(&cluster.a.peer_id()));
        cluster.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_discovery_closed_after_shutdown() {
        let Some(mut node) = try_node(&fresh_key(), seed_config()) else {
            return;
        };
        let discovery = node.discovery().expect("routing enabled").clone();
        let table = node.routing_table().expect("routing enabled").clone();

        node.shutdown().await;

        assert!(discovery.is_closed());
        assert!(table.is_closed());
        assert!(discovery.advertise("anything").await.is_err());
        assert!(discovery.find_peers("anything").await.is_err());
    }
}
