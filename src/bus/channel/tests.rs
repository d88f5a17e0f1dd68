use super::*;
use std::time::Duration;

const EXCHANGE: &str = "Viewed";

fn message(body: &str) -> OutboundMessage {
    OutboundMessage {
        payload: body.as_bytes().to_vec(),
        content_type: "application/json",
    }
}

async fn broker_with_queues(queues: &[&str]) -> ChannelBroker {
    let broker = ChannelBroker::new();
    broker
        .declare_exchange(&Exchange::fanout(EXCHANGE))
        .await
        .unwrap();
    for queue in queues {
        broker
            .declare_binding(&Binding::durable(EXCHANGE, *queue))
            .await
            .unwrap();
    }
    broker
}

async fn next(sub: &mut Box<dyn Subscription>) -> DeliveryHandle {
    tokio::time::timeout(Duration::from_secs(1), sub.next_delivery())
        .await
        .expect("timed out waiting for delivery")
        .expect("subscription ended")
        .expect("delivery error")
}

#[tokio::test]
async fn test_fanout_copies_into_every_bound_queue() {
    let broker = broker_with_queues(&["history", "recommendations"]).await;

    broker.publish(EXCHANGE, message("a")).await.unwrap();

    assert_eq!(broker.queue_stats("history").unwrap().ready, 1);
    assert_eq!(broker.queue_stats("recommendations").unwrap().ready, 1);
}

#[tokio::test]
async fn test_queue_bound_after_publish_gets_no_replay() {
    let broker = broker_with_queues(&["history"]).await;
    broker.publish(EXCHANGE, message("early")).await.unwrap();

    broker
        .declare_binding(&Binding::durable(EXCHANGE, "late"))
        .await
        .unwrap();
    broker.publish(EXCHANGE, message("later")).await.unwrap();

    assert_eq!(broker.queue_stats("history").unwrap().ready, 2);
    assert_eq!(broker.queue_stats("late").unwrap().ready, 1);
}

#[tokio::test]
async fn test_redeclaration_is_idempotent() {
    let broker = broker_with_queues(&["history"]).await;

    broker
        .declare_exchange(&Exchange::fanout(EXCHANGE))
        .await
        .unwrap();
    broker
        .declare_binding(&Binding::durable(EXCHANGE, "history"))
        .await
        .unwrap();

    broker.publish(EXCHANGE, message("once")).await.unwrap();
    // A duplicated binding would have produced two copies.
    assert_eq!(broker.queue_stats("history").unwrap().ready, 1);
}

#[tokio::test]
async fn test_conflicting_redeclaration_fails() {
    let broker = broker_with_queues(&["history"]).await;

    let mut transient = Binding::durable(EXCHANGE, "history");
    transient.durable = false;

    let result = broker.declare_binding(&transient).await;
    assert!(matches!(result, Err(BusError::Topology(_))));
}

#[tokio::test]
async fn test_binding_requires_exchange() {
    let broker = ChannelBroker::new();
    let result = broker
        .declare_binding(&Binding::durable("Missing", "history"))
        .await;
    assert!(matches!(result, Err(BusError::Topology(_))));
}

#[tokio::test]
async fn test_publish_to_unknown_exchange_fails() {
    let broker = ChannelBroker::new();
    let result = broker.publish("Missing", message("x")).await;
    assert!(matches!(result, Err(BusError::Publish(_))));
}

#[tokio::test]
async fn test_publish_without_bound_queues_is_dropped() {
    let broker = broker_with_queues(&[]).await;
    assert!(broker.publish(EXCHANGE, message("x")).await.is_ok());
}

#[tokio::test]
async fn test_ack_removes_message() {
    let broker = broker_with_queues(&["history"]).await;
    broker.publish(EXCHANGE, message("a")).await.unwrap();

    let mut sub = broker.subscribe("history", 1).await.unwrap();
    let delivery = next(&mut sub).await;
    assert_eq!(delivery.payload, b"a");
    assert!(!delivery.redelivered);
    assert_eq!(
        broker.queue_stats("history").unwrap(),
        QueueStats {
            ready: 0,
            unacked: 1
        }
    );

    delivery.ack().await.unwrap();
    assert_eq!(broker.queue_stats("history").unwrap(), QueueStats::default());
}

#[tokio::test]
async fn test_closed_subscription_requeues_unacked_as_redelivered() {
    let broker = broker_with_queues(&["history"]).await;
    broker.publish(EXCHANGE, message("a")).await.unwrap();

    let mut sub = broker.subscribe("history", 1).await.unwrap();
    let abandoned = next(&mut sub).await;
    drop(abandoned);
    sub.close().await;

    let mut sub = broker.subscribe("history", 1).await.unwrap();
    let delivery = next(&mut sub).await;
    assert_eq!(delivery.payload, b"a");
    assert!(delivery.redelivered);
}

#[tokio::test]
async fn test_ack_after_subscription_closed_fails() {
    let broker = broker_with_queues(&["history"]).await;
    broker.publish(EXCHANGE, message("a")).await.unwrap();

    let mut sub = broker.subscribe("history", 1).await.unwrap();
    let delivery = next(&mut sub).await;
    sub.close().await;

    assert!(matches!(delivery.ack().await, Err(BusError::Ack(_))));
    assert_eq!(broker.queue_stats("history").unwrap().ready, 1);
}

#[tokio::test]
async fn test_reject_discards_message() {
    let broker = broker_with_queues(&["history"]).await;
    broker.publish(EXCHANGE, message("poison")).await.unwrap();

    let mut sub = broker.subscribe("history", 1).await.unwrap();
    next(&mut sub).await.reject().await.unwrap();
    sub.close().await;

    assert_eq!(broker.queue_stats("history").unwrap(), QueueStats::default());
}

#[tokio::test]
async fn test_prefetch_limits_in_flight_deliveries() {
    let broker = broker_with_queues(&["history"]).await;
    broker.publish(EXCHANGE, message("a")).await.unwrap();
    broker.publish(EXCHANGE, message("b")).await.unwrap();

    let mut sub = broker.subscribe("history", 1).await.unwrap();
    let first = next(&mut sub).await;

    let blocked = tokio::time::timeout(Duration::from_millis(50), sub.next_delivery()).await;
    assert!(blocked.is_err(), "second delivery must wait for the first ack");

    first.ack().await.unwrap();
    let second = next(&mut sub).await;
    assert_eq!(second.payload, b"b");
}

#[tokio::test]
async fn test_subscriber_wakes_on_publish() {
    let broker = broker_with_queues(&["history"]).await;
    let mut sub = broker.subscribe("history", 1).await.unwrap();

    let publisher = broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.publish(EXCHANGE, message("late")).await.unwrap();
    });

    assert_eq!(next(&mut sub).await.payload, b"late");
}

#[tokio::test]
async fn test_interrupt_ends_subscriptions_and_requeues() {
    let broker = broker_with_queues(&["history"]).await;
    broker.publish(EXCHANGE, message("a")).await.unwrap();

    let mut sub = broker.subscribe("history", 1).await.unwrap();
    let _in_flight = next(&mut sub).await;

    broker.interrupt_consumers();
    assert!(sub.next_delivery().await.is_none());
    assert_eq!(broker.queue_stats("history").unwrap().ready, 1);

    let mut sub = broker.subscribe("history", 1).await.unwrap();
    assert!(next(&mut sub).await.redelivered);
}

#[tokio::test]
async fn test_closed_broker_refuses_operations() {
    let broker = broker_with_queues(&["history"]).await;
    broker.close().await;

    assert!(matches!(
        broker.publish(EXCHANGE, message("x")).await,
        Err(BusError::Closed)
    ));
    assert!(broker.subscribe("history", 1).await.is_err());
}
