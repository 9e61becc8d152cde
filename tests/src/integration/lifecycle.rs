//! # Construction and Release
//!
//! A failed construction must leave no listener behind: the same port set
//! can be bound again straight away.

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, UdpSocket};

    use overlay_p2p::{Node, NodeConfig, NodeError, ShutdownStage, Step};

    use crate::integration::fixtures::*;

    // =============================================================================
    // FAILURES BEFORE I/O
    // =============================================================================

    #[tokio::test]
    async fn test_malformed_key_opens_no_listener() {
        let port = free_port();
        let result = Node::create(&[0x08, 0x01, 0x12, 0x03, 0xff], NodeConfig::local(port));

        let err = result.err().expect("malformed key rejected");
        assert!(matches!(err, NodeError::InvalidKeyEncoding(_)));
        assert_eq!(err.step(), Step::Identity);

        TcpListener::bind(("127.0.0.1", port)).expect("tcp port untouched");
        UdpSocket::bind(("127.0.0.1", port)).expect("udp port untouched");
    }

    #[tokio::test]
    async fn test_invalid_policy_opens_no_listener() {
        let port = free_port();
        let mut config = NodeConfig::local(port);
        config.connection.low_watermark = 10;
        config.connection.high_watermark = 10;

        let err = Node::create(&fresh_key(), config).err().expect("rejected");
        assert_eq!(err, NodeError::InvalidPolicyBounds { low: 10, high: 10 });

        TcpListener::bind(("127.0.0.1", port)).expect("tcp port untouched");
    }

    // =============================================================================
    // FAILURES AFTER I/O
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bind_failure_releases_earlier_listeners() {
        let blocker = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let key = fresh_key();

        let err = Node::create(&key, NodeConfig::local(port))
            .err()
            .expect("ipv4 tcp port is taken");
        if binds_ipv6(&err) {
            eprintln!("skipping: {err}");
            return;
        }
        match &err {
            NodeError::TransportBindFailed { address, .. } => {
                assert_eq!(address, &format!("/ip4/127.0.0.1/tcp/{port}"));
            }
            other => panic!("expected TransportBindFailed, got {other}"),
        }

        drop(blocker);
        let mut node = create_when_released(&key, NodeConfig::local(port))
            .await
            .expect("port set released");
        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pubsub_failure_releases_port_set() {
        let port = free_port();
        let key = fresh_key();
        let mut config = NodeConfig::local(port);
        config.gossip.mesh_n_low = 8;
        config.gossip.mesh_n = 4;

        let err = Node::create(&key, config).err().expect("bad mesh bounds");
        if binds_ipv6(&err) {
            eprintln!("skipping: {err}");
            return;
        }
        assert!(matches!(err, NodeError::PubSubInitFailed(_)), "{err}");
        assert_eq!(err.step(), Step::PubSub);

        let mut node = create_when_released(&key, NodeConfig::local(port))
            .await
            .expect("port set released");
        node.shutdown().await;
    }

    // =============================================================================
    // SHUTDOWN
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_frees_port_set() {
        let port = free_port();
        let key = fresh_key();
        let Some(mut node) = try_node(&key, NodeConfig::local(port)) else {
            return;
        };

        let stages = node.shutdown().await;
        assert_eq!(stages.first(), Some(&ShutdownStage::PubSub));
        assert_eq!(stages.last(), Some(&ShutdownStage::Transport));
        assert!(node.shutdown().await.is_empty());

        let mut again = create_when_released(&key, NodeConfig::local(port))
            .await
            .expect("port set released after shutdown");
        assert_eq!(again.peer_id(), node.peer_id());
        again.shutdown().await;
    }
}
