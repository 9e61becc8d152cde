//! # Gossip Delivery
//!
//! Loopback nodes joined to the same topic. Messages published by one
//! surface on the other's event bus, whether the members were dialed
//! directly or only found each other through topic discovery.

#[cfg(test)]
mod tests {
    use overlay_p2p::Node;
    use shared_bus::{EventFilter, EventTopic, NetworkEvent, Subscription};
    use tokio::time::timeout;

    use crate::integration::fixtures::*;

    async fn connected_pair() -> Option<(Node, Node)> {
        let a = try_node(&fresh_key(), seed_config())?;
        let b = try_node(&fresh_key(), seed_config())?;
        let a_addr = dialable_tcp_addr(&a).await;
        b.host().dial(a_addr).await.expect("dial queued");
        Some((a, b))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_message_delivered_to_topic_member() {
        let Some((mut a, mut b)) = connected_pair().await else {
            return;
        };
        let topic = "overlay-news";
        let mut inbox = b
            .events()
            .try_subscribe(EventFilter::topics(vec![EventTopic::PubSub]))
            .unwrap();

        assert!(a.pubsub().unwrap().join(topic).await.unwrap());
        assert!(b.pubsub().unwrap().join(topic).await.unwrap());
        assert!(!b.pubsub().unwrap().join(topic).await.unwrap());

        let a_id = a.peer_id();
        match publish_until_received(&a, &mut inbox, topic, b"hello").await {
            NetworkEvent::GossipMessage {
                topic: got,
                source,
                data,
            } => {
                assert_eq!(got, topic);
                assert_eq!(source, Some(a_id));
                assert_eq!(data, b"hello");
            }
            other => panic!("unexpected event {other:?}"),
        }

        b.shutdown().await;
        a.shutdown().await;
    }

    /// Publish from `from` until `inbox` sees a message on `topic`.
    async fn publish_until_received(
        from: &Node,
        inbox: &mut Subscription,
        topic: &str,
        data: &[u8],
    ) -> NetworkEvent {
        timeout(NETWORK_TIMEOUT, async {
            loop {
                // Publishing fails until the mesh has formed.
                let _ = from.pubsub().unwrap().publish(topic, data.to_vec()).await;
                if let Ok(Some(event)) = timeout(RETRY_DELAY * 2, inbox.recv()).await {
                    return event;
                }
            }
        })
        .await
        .expect("message delivered within the timeout")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_topic_members_meet_through_discovery() {
        let Some(mut seed) = try_node(&fresh_key(), seed_config()) else {
            return;
        };
        let seed_addr = dialable_tcp_addr(&seed).await;
        let mut config = peer_config(&seed_addr);
        config.gossip.discovery_interval_secs = 1;

        let Some(mut a) = try_node(&fresh_key(), config.clone()) else {
            return;
        };
        let Some(mut b) = try_node(&fresh_key(), config) else {
            return;
        };
        let topic = "overlay-discovered";
        let mut inbox = b
            .events()
            .try_subscribe(EventFilter::topics(vec![EventTopic::PubSub]))
            .unwrap();

        // Neither member dials the other; only the seed is shared.
        assert!(a.pubsub().unwrap().join(topic).await.unwrap());
        assert!(b.pubsub().unwrap().join(topic).await.unwrap());

        let a_id = a.peer_id();
        match publish_until_received(&a, &mut inbox, topic, b"found you").await {
            NetworkEvent::GossipMessage { source, data, .. } => {
                assert_eq!(source, Some(a_id));
                assert_eq!(data, b"found you");
            }
            other => panic!("unexpected event {other:?}"),
        }
        let peers = b.host().connected_peers().await.unwrap();
        assert!(peers.contains(&a_id));

        b.shutdown().await;
        a.shutdown().await;
        seed.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_publish_without_peers_fails() {
        let Some(mut node) = try_node(&fresh_key(), seed_config()) else {
            return;
        };
        let pubsub = node.pubsub().unwrap().clone();
        pubsub.join("lonely").await.unwrap();

        assert!(pubsub.publish("lonely", b"anyone?".to_vec()).await.is_err());
        assert_eq!(pubsub.topics(), vec!["lonely".to_string()]);

        assert!(pubsub.leave("lonely").await.unwrap());
        assert!(!pubsub.leave("lonely").await.unwrap());
        assert!(pubsub.topics().is_empty());

        node.shutdown().await;
        assert!(pubsub.is_closed());
        assert!(pubsub.join("lonely").await.is_err());
    }
}
