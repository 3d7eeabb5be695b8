use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{ErrorRecord, RpcError};
use crate::value::Value;
use crate::{port_pair, relay, Adapter, Api, Channel};

#[tokio::test]
async fn relayed_peers_behave_like_a_direct_channel() {
    let (peer_a, splice_a) = port_pair();
    let (splice_b, peer_b) = port_pair();
    let link = relay(splice_a, splice_b).unwrap();

    let caller = Channel::new(peer_a);
    let callee = Channel::new(peer_b);
    callee.expose(Api::new().method("add", |args| async move {
        Ok(Value::from(
            args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0),
        ))
    }));

    let got = caller
        .api()
        .at("add")
        .call(vec![Value::Int(20), Value::Int(22)])
        .await
        .unwrap();
    assert_eq!(got, Value::Int(42));

    link.destroy().await;
}

#[tokio::test]
async fn callbacks_pass_through_a_relay() {
    let (peer_a, splice_a) = port_pair();
    let (splice_b, peer_b) = port_pair();
    let link = relay(splice_a, splice_b).unwrap();

    let caller = Channel::new(peer_a);
    let callee = Channel::new(peer_b);
    callee.expose(Api::new().method("notify", |args| async move {
        if let Some(cb) = args[0].as_function() {
            cb.invoke(vec![Value::String("hello".into())]);
        }
        Ok(Value::Undefined)
    }));

    let (tx, mut rx) = mpsc::unbounded_channel();
    caller
        .api()
        .at("notify")
        .call(vec![Value::callback(move |args| {
            let _ = tx.send(args);
        })])
        .await
        .unwrap();
    assert_eq!(rx.recv().await.unwrap(), vec![Value::String("hello".into())]);

    link.destroy().await;
}

#[tokio::test]
async fn destroy_sentinel_propagates_through_a_relay() {
    let (peer_a, splice_a) = port_pair();
    let (splice_b, peer_b) = port_pair();
    let _link = relay(splice_a, splice_b).unwrap();

    let caller = Channel::new(peer_a);
    let callee = Channel::new(peer_b);
    caller.expose(Api::new().method("hang", |_args| {
        std::future::pending::<Result<Value, ErrorRecord>>()
    }));

    let pending_call = tokio::spawn({
        let callee = callee.clone();
        async move { callee.api().at("hang").call(Vec::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    caller.destroy().await;
    let outcome = pending_call.await.unwrap();
    assert!(matches!(outcome, Err(RpcError::ChannelTerminated)));
}

#[tokio::test]
async fn relay_wraps_and_restores_pre_existing_hooks() {
    let (peer_a, splice_a) = port_pair();
    let (splice_b, peer_b) = port_pair();

    let observed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&observed);
    assert!(splice_a.set_hook(Some(Arc::new(move |_message| {
        counter.fetch_add(1, Ordering::SeqCst);
    }))));

    let link = relay(splice_a.clone(), splice_b).unwrap();

    let caller = Channel::new(peer_a);
    let callee = Channel::new(peer_b);
    callee.expose(Api::new().method("ping", |_args| async { Ok(Value::Bool(true)) }));
    caller.api().at("ping").call(Vec::new()).await.unwrap();

    // The wrapped hook kept observing the caller's request traffic.
    assert!(observed.load(Ordering::SeqCst) > 0);

    link.destroy().await;
}
