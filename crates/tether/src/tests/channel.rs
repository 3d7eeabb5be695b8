use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{byte_channels, port_channels};
use crate::adapter::AdapterMessage;
use crate::error::{ErrorRecord, RpcError};
use crate::message::{RpcMessage, WireEnvelope};
use crate::value::{BytesKind, Value};
use crate::{port_pair, Adapter, Api, Channel};

fn calculator() -> Api {
    Api::new()
        .method("add", |args| async move {
            Ok(Value::from(
                args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0),
            ))
        })
        .method("math.grade1.add", |args| async move {
            Ok(Value::from(
                args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0),
            ))
        })
        .method("echo", |mut args| async move {
            Ok(if args.is_empty() {
                Value::Undefined
            } else {
                args.swap_remove(0)
            })
        })
        .property("counter", 7i64)
}

#[tokio::test]
async fn add_resolves_with_the_sum() {
    let (caller, callee) = port_channels();
    callee.expose(calculator());

    let got = caller
        .api()
        .at("add")
        .call(vec![Value::Int(2), Value::Int(3)])
        .await
        .unwrap();
    assert_eq!(got, Value::Int(5));
}

#[tokio::test]
async fn nested_paths_resolve_over_byte_streams() {
    let (caller, callee) = byte_channels();
    callee.expose(calculator());

    let got = caller
        .api()
        .at("math.grade1.add")
        .call(vec![Value::Int(40), Value::Int(2)])
        .await
        .unwrap();
    assert_eq!(got, Value::Int(42));

    // field() chaining addresses the same leaf.
    let got = caller
        .api()
        .field("math")
        .field("grade1")
        .field("add")
        .call(vec![Value::Int(1), Value::Int(1)])
        .await
        .unwrap();
    assert_eq!(got, Value::Int(2));
}

#[tokio::test]
async fn callback_is_invoked_exactly_once_with_the_sum() {
    let (caller, callee) = port_channels();
    callee.expose(Api::new().method("sumAsync", |args| async move {
        let a = args[0].as_i64().unwrap_or(0);
        let b = args[1].as_i64().unwrap_or(0);
        if let Some(cb) = args[2].as_function() {
            cb.invoke(vec![Value::from(a + b)]);
        }
        Ok(Value::from(a + b))
    }));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer = Value::callback(move |args| {
        let _ = tx.send(args);
    });

    let got = caller
        .api()
        .at("sumAsync")
        .call(vec![Value::Int(2), Value::Int(3), observer])
        .await
        .unwrap();
    assert_eq!(got, Value::Int(5));

    // Callback traffic precedes the response in FIFO order, so it has
    // already landed by the time the call resolves.
    assert_eq!(rx.recv().await.unwrap(), vec![Value::Int(5)]);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn callback_invocation_counts_match_over_text_frames() {
    let (caller, callee) = byte_channels();
    callee.expose(Api::new().method("burst", |args| async move {
        if let Some(cb) = args[0].as_function() {
            for i in 0..3 {
                cb.invoke(vec![Value::Int(i)]);
            }
        }
        Ok(Value::Undefined)
    }));

    let (tx, mut rx) = mpsc::unbounded_channel();
    caller
        .api()
        .at("burst")
        .call(vec![Value::callback(move |args| {
            let _ = tx.send(args);
        })])
        .await
        .unwrap();

    for expected in 0..3 {
        assert_eq!(rx.recv().await.unwrap(), vec![Value::Int(expected)]);
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn thrown_errors_keep_name_message_and_extras() {
    let (caller, callee) = port_channels();
    callee.expose(Api::new().method("boom", |_args| async {
        Err(ErrorRecord::new("nope").with_extra("code", "E_BAD"))
    }));

    let err = caller.api().at("boom").call(Vec::new()).await.unwrap_err();
    let RpcError::Remote(record) = err else {
        panic!("expected remote error, got {err:?}");
    };
    assert_eq!(record.name, "Error");
    assert_eq!(record.message, "nope");
    assert_eq!(record.extra("code"), Some(&Value::String("E_BAD".into())));
}

#[tokio::test]
async fn error_causes_travel_recursively() {
    let (caller, callee) = byte_channels();
    callee.expose(Api::new().method("boom", |_args| async {
        Err(ErrorRecord::named("X", "Y")
            .with_extra("code", Value::Int(42))
            .with_cause(ErrorRecord::named("Inner", "root")))
    }));

    let err = caller.api().at("boom").call(Vec::new()).await.unwrap_err();
    let record = err.remote().expect("remote error");
    assert_eq!(record.name, "X");
    assert_eq!(record.message, "Y");
    assert_eq!(record.extra("code"), Some(&Value::Int(42)));
    let cause = record.cause.as_deref().expect("cause");
    assert_eq!(cause.name, "Inner");
    assert_eq!(cause.message, "root");
}

fn typed_payload() -> Value {
    Value::object([
        ("d", Value::Date(0)),
        (
            "m",
            Value::map(vec![(Value::Int(1), Value::String("a".into()))]),
        ),
        ("s", Value::set(vec![Value::Int(1), Value::Int(2)])),
        ("n", Value::Undefined),
        ("u", Value::bytes(BytesKind::U8, vec![1, 2, 3])),
    ])
}

#[tokio::test]
async fn typed_values_round_trip_in_envelope_mode() {
    let (caller, callee) = port_channels();
    callee.expose(calculator());

    let payload = typed_payload();
    let got = caller
        .api()
        .at("echo")
        .call(vec![payload.clone()])
        .await
        .unwrap();
    assert_eq!(got, payload);
}

#[tokio::test]
async fn typed_values_round_trip_in_text_mode() {
    let (caller, callee) = byte_channels();
    callee.expose(calculator());

    let payload = typed_payload();
    let got = caller
        .api()
        .at("echo")
        .call(vec![payload.clone()])
        .await
        .unwrap();
    assert_eq!(got, payload);
    assert_eq!(got.get("n"), Some(&Value::Undefined));
}

#[tokio::test]
async fn shared_subgraphs_survive_the_text_wire() {
    let (caller, callee) = byte_channels();
    callee.expose(calculator());

    let shared = Value::array(vec![Value::Int(1), Value::Int(2)]);
    let payload = Value::object([("a", shared.clone()), ("b", shared)]);
    let got = caller.api().at("echo").call(vec![payload]).await.unwrap();

    let (Some(Value::Array(a)), Some(Value::Array(b))) = (got.get("a"), got.get("b")) else {
        panic!("expected arrays");
    };
    assert!(Arc::ptr_eq(a, b));
}

#[tokio::test]
async fn properties_read_and_write() {
    let (caller, callee) = port_channels();
    callee.expose(calculator());

    assert_eq!(caller.api().at("counter").get().await.unwrap(), Value::Int(7));

    caller.api().at("counter").set(9i64).await.unwrap();
    assert_eq!(caller.api().at("counter").get().await.unwrap(), Value::Int(9));
}

#[tokio::test]
async fn set_requires_an_existing_parent() {
    let (caller, callee) = port_channels();
    callee.expose(calculator());

    let err = caller
        .api()
        .at("missing.leaf")
        .set(Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::MethodNotFound { path } if path == "missing.leaf"));
}

#[tokio::test]
async fn unknown_paths_reject_with_method_not_found() {
    let (caller, callee) = byte_channels();
    callee.expose(calculator());

    let err = caller
        .api()
        .at("math.grade2.add")
        .call(vec![Value::Int(1)])
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::MethodNotFound { path } if path == "math.grade2.add"));

    // Reading a method is not a property access.
    let err = caller.api().at("add").get().await.unwrap_err();
    assert!(matches!(err, RpcError::MethodNotFound { .. }));
}

#[tokio::test]
async fn bidirectional_nested_dispatch_completes() {
    let (a, b) = port_channels();

    a.expose(Api::new().method("triple", |args| async move {
        Ok(Value::from(args[0].as_i64().unwrap_or(0) * 3))
    }));

    let back = b.clone();
    b.expose(Api::new().method("forward", move |args| {
        let back = back.clone();
        async move {
            let tripled = back
                .api()
                .at("triple")
                .call(args)
                .await
                .map_err(|err| ErrorRecord::new(err.to_string()))?;
            Ok(Value::from(tripled.as_i64().unwrap_or(0) + 1))
        }
    }));

    let got = a
        .api()
        .at("forward")
        .call(vec![Value::Int(7)])
        .await
        .unwrap();
    assert_eq!(got, Value::Int(22));
}

#[tokio::test]
async fn destroy_rejects_local_pending_calls() {
    let (caller, callee) = port_channels();
    callee.expose(Api::new().method("hang", |_args| {
        std::future::pending::<Result<Value, ErrorRecord>>()
    }));

    let pending_call = tokio::spawn({
        let caller = caller.clone();
        async move { caller.api().at("hang").call(Vec::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    caller.destroy().await;
    let outcome = pending_call.await.unwrap();
    assert!(matches!(outcome, Err(RpcError::ChannelTerminated)));
    assert!(caller.is_terminated());

    // No further traffic is accepted.
    let err = caller.api().at("hang").call(Vec::new()).await.unwrap_err();
    assert!(matches!(err, RpcError::ChannelTerminated));
}

#[tokio::test]
async fn peer_destroy_rejects_the_callers_pending_calls() {
    let (caller, callee) = byte_channels();
    callee.expose(Api::new().method("hang", |_args| {
        std::future::pending::<Result<Value, ErrorRecord>>()
    }));

    let pending_call = tokio::spawn({
        let caller = caller.clone();
        async move { caller.api().at("hang").call(Vec::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    callee.destroy().await;
    let outcome = pending_call.await.unwrap();
    assert!(matches!(outcome, Err(RpcError::ChannelTerminated)));
}

#[tokio::test]
async fn functions_in_results_become_remote_callbacks() {
    let (caller, callee) = port_channels();
    let (tx, mut rx) = mpsc::unbounded_channel();
    callee.expose(Api::new().method("subscribe", move |_args| {
        let tx = tx.clone();
        async move {
            Ok(Value::object([(
                "emit",
                Value::callback(move |args| {
                    let _ = tx.send(args);
                }),
            )]))
        }
    }));

    let handle = caller.api().at("subscribe").call(Vec::new()).await.unwrap();
    let emit = handle
        .get("emit")
        .and_then(Value::as_function)
        .expect("synthesized callback")
        .clone();
    emit.invoke(vec![Value::Int(1)]);
    emit.invoke(vec![Value::Int(2)]);

    assert_eq!(rx.recv().await.unwrap(), vec![Value::Int(1)]);
    assert_eq!(rx.recv().await.unwrap(), vec![Value::Int(2)]);
}

#[tokio::test]
async fn orphaned_responses_and_callbacks_are_dropped_without_terminating() {
    let (port_a, port_b) = port_pair();
    let rogue = Arc::clone(&port_b);
    let caller = Channel::new(port_a);
    let callee = Channel::new(port_b);
    callee.expose(calculator());

    rogue
        .write(AdapterMessage::Envelope(WireEnvelope::new(
            RpcMessage::Response {
                id: "ghost".into(),
                outcome: Ok(Value::Null),
            },
        )))
        .await
        .unwrap();
    rogue
        .write(AdapterMessage::Envelope(WireEnvelope::new(
            RpcMessage::Callback {
                callback_id: "__callback__ghost".into(),
                args: Vec::new(),
            },
        )))
        .await
        .unwrap();

    // The channel shrugged both off and keeps serving.
    let got = caller
        .api()
        .at("add")
        .call(vec![Value::Int(1), Value::Int(1)])
        .await
        .unwrap();
    assert_eq!(got, Value::Int(2));
}

#[tokio::test]
async fn unparseable_frames_are_dropped_without_terminating() {
    let (one, two) = tokio::io::duplex(64 * 1024);
    let (read_one, write_one) = tokio::io::split(one);
    let (read_two, write_two) = tokio::io::split(two);
    let caller_adapter = crate::StreamAdapter::named("caller", read_one, write_one);
    let injector: Arc<dyn Adapter> = caller_adapter.clone();
    let caller = Channel::new(caller_adapter);
    let callee = Channel::new(crate::StreamAdapter::named("callee", read_two, write_two));
    callee.expose(calculator());

    injector
        .write(AdapterMessage::Text("this is not json".into()))
        .await
        .unwrap();

    // Garbage on the wire never kills the loop.
    let got = caller
        .api()
        .at("add")
        .call(vec![Value::Int(2), Value::Int(2)])
        .await
        .unwrap();
    assert_eq!(got, Value::Int(4));
}

#[tokio::test]
async fn re_exposure_is_resolved_by_current_lookup() {
    let (caller, callee) = byte_channels();
    callee.expose(calculator());

    let got = caller
        .api()
        .at("add")
        .call(vec![Value::Int(2), Value::Int(2)])
        .await
        .unwrap();
    assert_eq!(got, Value::Int(4));

    callee.expose(Api::new().method("only", |_args| async { Ok(Value::Bool(true)) }));
    let err = caller
        .api()
        .at("add")
        .call(vec![Value::Int(2), Value::Int(2)])
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::MethodNotFound { .. }));
}

#[tokio::test]
async fn undefined_and_null_arguments_stay_distinct() {
    let (caller, callee) = byte_channels();
    callee.expose(calculator());

    let got = caller
        .api()
        .at("echo")
        .call(vec![Value::Undefined])
        .await
        .unwrap();
    assert_eq!(got, Value::Undefined);

    let got = caller.api().at("echo").call(vec![Value::Null]).await.unwrap();
    assert_eq!(got, Value::Null);
}

#[tokio::test]
async fn namespace_get_materializes_property_leaves() {
    let (caller, callee) = port_channels();
    callee.expose(
        Api::new()
            .property("settings.theme", "dark")
            .property("settings.fontSize", 14i64)
            .method("settings.reset", |_args| async { Ok(Value::Undefined) }),
    );

    let settings = caller.api().at("settings").get().await.unwrap();
    assert_eq!(settings.get("theme"), Some(&Value::String("dark".into())));
    assert_eq!(settings.get("fontSize"), Some(&Value::Int(14)));
    assert_eq!(settings.get("reset"), None);
}
