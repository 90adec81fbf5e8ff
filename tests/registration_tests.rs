//! Integration tests for handler registration lists
//!
//! The registration list is the bulk intake path: every entry resolves its
//! decoder when the list is consumed, and a bad entry is skipped without
//! taking the rest of the list down.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;

use mombus::client::MomClient;
use mombus::codec::{DecodedArg, FieldBinding, PayloadFormat};
use mombus::handler::{HandlerDescriptor, HandlerFn, Registration};
use mombus::testing::{MockTransport, MockTransportController};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

async fn connected_client() -> (MomClient<MockTransport>, MockTransportController) {
    let transport = MockTransport::new();
    let controller = transport.controller();
    let client = MomClient::connect_new(transport)
        .await
        .expect("mock connect should succeed");
    (client, controller)
}

/// Registration whose handler forwards its decoded arguments to the test
fn capturing_registration(
    topic: &str,
    name: &str,
    format: PayloadFormat,
    params: Vec<Option<FieldBinding>>,
) -> (Registration, mpsc::UnboundedReceiver<Vec<DecodedArg>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let target: Arc<HandlerFn> = Arc::new(move |args| {
        let _ = tx.send(args.to_vec());
        Ok(())
    });
    let registration = Registration {
        topic: topic.to_string(),
        name: name.to_string(),
        format,
        params,
        target,
    };
    (registration, rx)
}

fn bind(field: &str) -> Option<FieldBinding> {
    Some(FieldBinding::new(field))
}

#[tokio::test]
async fn test_register_consumes_whole_list() {
    let (client, controller) = connected_client().await;
    let (text_reg, _rx1) =
        capturing_registration("alerts", "alert-log", PayloadFormat::Text, vec![None]);
    let (fields_reg, _rx2) = capturing_registration(
        "orders",
        "order-intake",
        PayloadFormat::JsonFields,
        vec![bind("id"), bind("total")],
    );

    let registered = client.register(vec![text_reg, fields_reg]).await;

    assert_eq!(registered, 2);
    assert_eq!(client.topic_count(), 2);
    let mut wire = controller.get_wire_subscribes().await;
    wire.sort();
    assert_eq!(wire, vec!["alerts", "orders"]);
}

#[tokio::test]
async fn test_register_skips_partially_bound_entry() {
    let (client, controller) = connected_client().await;

    // Arrange: Middle entry binds one of two parameters, which is invalid.
    let (good_before, mut rx_before) =
        capturing_registration("before", "good-before", PayloadFormat::Text, vec![None]);
    let (bad, _rx_bad) = capturing_registration(
        "broken",
        "half-bound",
        PayloadFormat::JsonFields,
        vec![bind("id"), None],
    );
    let (good_after, mut rx_after) =
        capturing_registration("after", "good-after", PayloadFormat::Text, vec![None]);

    // Act
    let registered = client.register(vec![good_before, bad, good_after]).await;

    // Assert: The invalid entry is dropped, its neighbors still work.
    assert_eq!(registered, 2);
    assert_eq!(client.topic_count(), 2);

    controller.inject_message("broken", &br#"{"id": 1}"#[..]).await;
    controller.inject_message("before", &b"b"[..]).await;
    controller.inject_message("after", &b"a"[..]).await;

    let before = timeout(DELIVERY_TIMEOUT, rx_before.recv()).await.expect("before").unwrap();
    let after = timeout(DELIVERY_TIMEOUT, rx_after.recv()).await.expect("after").unwrap();
    assert_eq!(before, vec![DecodedArg::Text("b".to_string())]);
    assert_eq!(after, vec![DecodedArg::Text("a".to_string())]);
}

#[tokio::test]
async fn test_register_skips_json_whole_with_bindings() {
    let (client, _controller) = connected_client().await;
    let (bad, _rx) = capturing_registration(
        "events",
        "whole-with-binding",
        PayloadFormat::JsonWhole,
        vec![bind("id")],
    );

    let registered = client.register(vec![bad]).await;

    assert_eq!(registered, 0);
    assert_eq!(client.topic_count(), 0);
}

#[tokio::test]
async fn test_register_unbound_json_fields_falls_back_to_text() {
    let (client, controller) = connected_client().await;

    // json_fields with no bindings degrades to text decoding.
    let (reg, mut rx) = capturing_registration(
        "raw",
        "unbound",
        PayloadFormat::JsonFields,
        vec![None, None],
    );

    let registered = client.register(vec![reg]).await;
    assert_eq!(registered, 1);

    controller.inject_message("raw", &br#"{"not": "projected"}"#[..]).await;

    let args = timeout(DELIVERY_TIMEOUT, rx.recv()).await.expect("delivery").unwrap();
    assert_eq!(
        args,
        vec![DecodedArg::Text(r#"{"not": "projected"}"#.to_string())]
    );
}

#[tokio::test]
async fn test_registered_entries_share_topics_with_direct_subscriptions() {
    let (client, controller) = connected_client().await;
    let (reg, mut rx_list) =
        capturing_registration("shared", "from-list", PayloadFormat::Text, vec![None]);
    client.register(vec![reg]).await;

    let (tx, mut rx_direct) = mpsc::unbounded_channel();
    let direct = HandlerDescriptor::text("direct", move |text| {
        let _ = tx.send(text.to_string());
        Ok(())
    });
    client.subscribe("shared", direct).await;

    controller.inject_message("shared", &b"fan-out"[..]).await;

    let from_list = timeout(DELIVERY_TIMEOUT, rx_list.recv()).await.expect("list").unwrap();
    let from_direct = timeout(DELIVERY_TIMEOUT, rx_direct.recv()).await.expect("direct").unwrap();
    assert_eq!(from_list, vec![DecodedArg::Text("fan-out".to_string())]);
    assert_eq!(from_direct, "fan-out");

    // One topic, one wire subscribe, two handlers.
    assert_eq!(client.topic_count(), 1);
    assert_eq!(controller.get_wire_subscribes().await, vec!["shared"]);
}

#[tokio::test]
async fn test_typed_json_handler_through_client() {
    #[derive(Debug, PartialEq, Deserialize)]
    struct Order {
        id: u64,
        total: f64,
    }

    let (client, controller) = connected_client().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let descriptor = HandlerDescriptor::json("order-typed", move |order: Order| {
        let _ = tx.send(order);
        Ok(())
    });
    client.subscribe("orders/typed", descriptor).await;

    controller
        .inject_message("orders/typed", &br#"{"id": 7, "total": 12.5}"#[..])
        .await;

    let order = timeout(DELIVERY_TIMEOUT, rx.recv()).await.expect("delivery").unwrap();
    assert_eq!(order, Order { id: 7, total: 12.5 });
}

#[tokio::test]
async fn test_typed_json_handler_shape_mismatch_is_isolated() {
    #[derive(Debug, PartialEq, Deserialize)]
    struct Order {
        id: u64,
    }

    let (client, controller) = connected_client().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let descriptor = HandlerDescriptor::json("order-typed", move |order: Order| {
        let _ = tx.send(order);
        Ok(())
    });
    client.subscribe("orders/typed", descriptor).await;

    // First document does not fit the target type; the handler reports the
    // failure for that message and keeps receiving later ones.
    controller
        .inject_message("orders/typed", &br#"{"id": "not-a-number"}"#[..])
        .await;
    controller.inject_message("orders/typed", &br#"{"id": 9}"#[..]).await;

    let order = timeout(DELIVERY_TIMEOUT, rx.recv()).await.expect("delivery").unwrap();
    assert_eq!(order, Order { id: 9 });
}
