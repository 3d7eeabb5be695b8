use std::io;
use std::sync::Arc;

use crate::error::RpcError;
use crate::value::Value;
use crate::{Api, Channel, HttpClientAdapter, HttpServerBridge};

fn paired_channels() -> (Channel, Channel, Arc<HttpServerBridge>) {
    let bridge = Arc::new(HttpServerBridge::new());
    let server = Channel::builder(bridge.adapter())
        .expose(
            Api::new()
                .method("add", |args| async move {
                    Ok(Value::from(
                        args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0),
                    ))
                })
                .property("counter", 7i64),
        )
        .build();

    let round_trip_bridge = Arc::clone(&bridge);
    let client_adapter = HttpClientAdapter::new(move |body| {
        let bridge = Arc::clone(&round_trip_bridge);
        async move {
            bridge
                .handle_request(&body)
                .await
                .map_err(io::Error::other)
        }
    });
    let client = Channel::new(client_adapter);
    (client, server, bridge)
}

#[tokio::test]
async fn request_response_round_trips_without_push() {
    let (client, _server, _bridge) = paired_channels();

    let got = client
        .api()
        .at("add")
        .call(vec![Value::Int(2), Value::Int(3)])
        .await
        .unwrap();
    assert_eq!(got, Value::Int(5));

    assert_eq!(client.api().at("counter").get().await.unwrap(), Value::Int(7));
    client.api().at("counter").set(9i64).await.unwrap();
    assert_eq!(client.api().at("counter").get().await.unwrap(), Value::Int(9));
}

#[tokio::test]
async fn remote_errors_surface_through_the_bridge() {
    let (client, server, _bridge) = paired_channels();
    server.expose(Api::new().method("boom", |_args| async {
        Err(crate::ErrorRecord::new("nope").with_extra("code", "E_BAD"))
    }));

    let err = client.api().at("boom").call(Vec::new()).await.unwrap_err();
    let RpcError::Remote(record) = err else {
        panic!("expected remote error, got {err:?}");
    };
    assert_eq!(record.message, "nope");
    assert_eq!(record.extra("code"), Some(&Value::String("E_BAD".into())));
}

#[tokio::test]
async fn callback_arguments_are_rejected_not_dropped() {
    let (client, _server, _bridge) = paired_channels();

    let err = client
        .api()
        .at("add")
        .call(vec![Value::Int(1), Value::callback(|_| {})])
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::CallbacksUnsupported { .. }));
}

#[tokio::test]
async fn non_request_bodies_are_rejected() {
    let (_client, _server, bridge) = paired_channels();

    let err = bridge.handle_request("not a frame").await.unwrap_err();
    assert!(matches!(err, RpcError::Protocol { .. }));

    let response_body = r#"{"version":2,"type":"response","id":"x","result":null}"#;
    let err = bridge.handle_request(response_body).await.unwrap_err();
    assert!(matches!(err, RpcError::Protocol { .. }));
}
