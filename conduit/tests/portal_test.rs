mod test_helpers;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;

use conduit::context::{channel_pair, spawn_worker, ChannelContext};
use conduit::portal::ContextPortal;
use conduit_api::context::{Context, ContextRef};
use conduit_api::errors::ConduitError;
use conduit_api::message::{CallData, ContextMessage, LogLevel};

use test_helpers::*;

const PORTAL_ID: &str = "bridge-under-test";

async fn double(n: i64) -> anyhow::Result<i64> {
    Ok(n * 2)
}

async fn greet((greeting, name): (String, String)) -> anyhow::Result<String> {
    Ok(format!("{greeting}, {name}!"))
}

/// A child portal over `child`, not yet initialized.
fn child_portal(child: &Arc<ChannelContext>) -> Arc<ContextPortal> {
    let context: ContextRef = child.clone();
    ContextPortal::child(PORTAL_ID, context)
}

#[tokio::test]
async fn test_portal_to_child_proxies_through_the_pool() {
    let (pool, _) = recording_pool();
    let (main, child) = channel_pair("proxy");

    let remote = child_portal(&child);
    let local_double = remote.portal_to_child(double);
    remote.init();

    let portal = ContextPortal::main(PORTAL_ID, Arc::clone(&pool));
    let proxy_double = portal.portal_to_child(double);
    portal.init();
    within(pool.add_context(main)).await.unwrap();

    assert_eq!(proxy_double.name(), "fn0");
    assert!(proxy_double.is_proxy());
    assert!(!local_double.is_proxy());
    assert_eq!(remote.child_function_names(), vec!["fn0".to_string()]);
    assert!(portal.child_function_names().is_empty());

    assert_eq!(within(proxy_double.call(21)).await.unwrap(), 42);
    assert_eq!(within(local_double.call(4)).await.unwrap(), 8);
}

#[tokio::test]
async fn test_proxy_posts_named_call_envelope() {
    let (pool, _) = recording_pool();
    let (main, child) = channel_pair("envelope");

    let portal = ContextPortal::main(PORTAL_ID, Arc::clone(&pool));
    let proxy_double = portal.portal_to_child(double);
    portal.init();
    let (_metadata, mut inbox) = connect_manual(&pool, main, &child).await;

    let call = tokio::spawn(async move { proxy_double.call(21).await });
    let (call_id, data) = next_start(&mut inbox).await;
    assert_eq!(data, json!({"fn": "fn0", "args": [21], "bridgeId": PORTAL_ID}));

    child
        .post_message(ContextMessage::Result {
            call_id,
            result: json!(42),
        })
        .unwrap();
    assert_eq!(within(call).await.unwrap().unwrap(), 42);
}

#[tokio::test]
async fn test_tuple_arguments_cross_the_boundary() {
    let (pool, _) = recording_pool();
    let (main, child) = channel_pair("tuple");

    let remote = child_portal(&child);
    remote.portal_to_child(greet);
    remote.init();

    let portal = ContextPortal::main(PORTAL_ID, Arc::clone(&pool));
    let greet = portal.portal_to_child(greet);
    portal.init();
    within(pool.add_context(main)).await.unwrap();

    let greeting = within(greet.call(("Hello".to_string(), "conduit".to_string()))).await;
    assert_eq!(greeting.unwrap(), "Hello, conduit!");
}

#[tokio::test]
async fn test_unregistered_function_fails_only_that_call() {
    let (pool, _) = recording_pool();
    let (main, child) = channel_pair("missing");

    let remote = child_portal(&child);
    remote.portal_to_child(double);
    remote.init();

    let portal = ContextPortal::main(PORTAL_ID, Arc::clone(&pool));
    let known = portal.portal_to_child(double);
    let unknown = portal.portal_to_child(double);
    portal.init();
    within(pool.add_context(main)).await.unwrap();

    match within(unknown.call(1)).await {
        Err(ConduitError::RemoteCall(message)) => assert_eq!(message, "Function fn1 not found in API"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(pool.free_contexts_count(), 1);
    assert_eq!(within(known.call(5)).await.unwrap(), 10);
}

#[tokio::test]
async fn test_remote_function_error_is_reported_to_the_caller() {
    let (pool, _) = recording_pool();
    let (main, child) = channel_pair("error");
    let refuse = |n: i64| async move {
        if n < 0 {
            anyhow::bail!("negative input {n}");
        }
        Ok(n)
    };

    let remote = child_portal(&child);
    remote.portal_to_child(refuse);
    remote.init();

    let portal = ContextPortal::main(PORTAL_ID, Arc::clone(&pool));
    let refuse = portal.portal_to_child(refuse);
    portal.init();
    within(pool.add_context(main)).await.unwrap();

    match within(refuse.call(-3)).await {
        Err(ConduitError::RemoteCall(message)) => assert_eq!(message, "negative input -3"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(within(refuse.call(3)).await.unwrap(), 3);
}

#[tokio::test]
async fn test_portal_to_main_proxies_through_the_parent() {
    let (pool, _) = recording_pool();
    let (main, child) = channel_pair("to-main");

    let portal = ContextPortal::main(PORTAL_ID, Arc::clone(&pool));
    let local = portal.portal_to_main(double);
    portal.init();

    let remote = child_portal(&child);
    let proxy = remote.portal_to_main(double);
    remote.init();
    within(pool.add_context(main)).await.unwrap();

    assert!(!local.is_proxy());
    assert!(proxy.is_proxy());
    assert_eq!(portal.main_function_names(), vec!["fn0".to_string()]);
    assert_eq!(within(proxy.call(50)).await.unwrap(), 100);
    // The child calling main does not reserve the child's pool slot.
    assert_eq!(pool.free_contexts_count(), 1);
}

#[tokio::test]
async fn test_calls_for_another_portal_are_ignored() {
    let (main, child) = channel_pair("foreign");
    let remote = child_portal(&child);
    remote.portal_to_child(double);
    remote.init();

    let main_ref: ContextRef = main.clone();
    let mut replies = capture_messages(&main_ref);

    let foreign = CallData::new("fn0", vec![json!(1)], "some-other-portal");
    main.post_message(ContextMessage::Start {
        call_id: "c-1".to_string(),
        data: foreign.to_value(),
    })
    .unwrap();
    assert!(tokio::time::timeout(QUIET_PERIOD, replies.recv()).await.is_err());

    let ours = CallData::new("fn0", vec![json!(1)], PORTAL_ID);
    main.post_message(ContextMessage::Start {
        call_id: "c-2".to_string(),
        data: ours.to_value(),
    })
    .unwrap();
    assert_eq!(
        within(replies.recv()).await,
        Some(ContextMessage::Result {
            call_id: "c-2".to_string(),
            result: json!(2),
        })
    );
}

#[tokio::test]
async fn test_child_answers_connect_with_ready() {
    let (main, child) = channel_pair("handshake");
    child_portal(&child).init();

    let main_ref: ContextRef = main.clone();
    let mut replies = capture_messages(&main_ref);
    main.post_message(ContextMessage::Connect).unwrap();

    assert_eq!(within(replies.recv()).await, Some(ContextMessage::Ready));
}

#[tokio::test]
async fn test_child_portal_serves_until_stop_without_a_held_handle() {
    let (main, child) = channel_pair("unheld");
    let remote = child_portal(&child);
    remote.portal_to_child(double);
    remote.init();
    let weak = Arc::downgrade(&remote);
    drop(remote);

    let main_ref: ContextRef = main.clone();
    let mut replies = capture_messages(&main_ref);
    main.post_message(ContextMessage::Connect).unwrap();
    assert_eq!(within(replies.recv()).await, Some(ContextMessage::Ready));

    let call = CallData::new("fn0", vec![json!(8)], PORTAL_ID);
    main.post_message(ContextMessage::Start {
        call_id: "c-1".to_string(),
        data: call.to_value(),
    })
    .unwrap();
    assert_eq!(
        within(replies.recv()).await,
        Some(ContextMessage::Result {
            call_id: "c-1".to_string(),
            result: json!(16),
        })
    );

    main.post_message(ContextMessage::Stop).unwrap();
    wait_until(|| weak.upgrade().is_none()).await;

    // Dispatch has ended: a later connect goes unanswered.
    main.post_message(ContextMessage::Connect).unwrap();
    assert!(tokio::time::timeout(QUIET_PERIOD, replies.recv()).await.is_err());
}

#[tokio::test]
async fn test_entry_point_runs_only_on_main() {
    let (pool, _) = recording_pool();
    let (_main, child) = channel_pair("entry");

    let portal = ContextPortal::main(PORTAL_ID, pool);
    let remote = child_portal(&child);

    assert_eq!(portal.entry_point(|| "started"), Some("started"));
    assert_eq!(remote.entry_point(|| "started"), None);
    assert!(portal.is_main());
    assert!(!remote.is_main());
}

#[tokio::test]
async fn test_assert_on_main_guards_the_child_side() {
    let (pool, _) = recording_pool();
    let (_main, child) = channel_pair("guard");

    let portal = ContextPortal::main(PORTAL_ID, pool);
    let remote = child_portal(&child);
    let on_main = portal.assert_on_main(|n: i64| async move { Ok::<_, ConduitError>(n + 1) });
    let on_child = remote.assert_on_main(|n: i64| async move { Ok::<_, ConduitError>(n + 1) });

    assert_eq!(within(on_main(1)).await.unwrap(), 2);
    assert!(matches!(within(on_child(1)).await, Err(ConduitError::NotMainContext)));
}

#[tokio::test]
async fn test_map_keeps_input_order() {
    let (pool, _) = recording_pool();
    let portal = ContextPortal::main(PORTAL_ID, Arc::clone(&pool));
    let remote_double = portal.portal_to_child(double);
    portal.init();

    for name in ["w0", "w1"] {
        let (main, child) = channel_pair(name);
        let remote = child_portal(&child);
        remote.portal_to_child(double);
        remote.init();
        within(pool.add_context(main)).await.unwrap();
    }

    let items: Vec<i64> = (1..=6).collect();
    let doubled = within(portal.map(items, |n, _index| {
        let remote_double = remote_double.clone();
        async move { remote_double.call(n).await }
    }))
    .await
    .unwrap();

    assert_eq!(doubled, vec![2, 4, 6, 8, 10, 12]);
    assert_eq!(pool.free_contexts_count(), 2);
}

#[tokio::test]
async fn test_map_passes_indices_and_stops_on_error() {
    let (pool, _) = recording_pool();
    let portal = ContextPortal::main(PORTAL_ID, pool);

    let indices = within(portal.map(vec!["a", "b", "c"], |_item, index| async move { Ok::<_, ConduitError>(index) }))
        .await
        .unwrap();
    assert_eq!(indices, vec![0, 1, 2]);

    let failed = within(portal.map(vec![1, 2, 3], |n, _| async move {
        if n == 2 {
            Err(ConduitError::NoFreeContexts)
        } else {
            Ok(n)
        }
    }))
    .await;
    assert!(matches!(failed, Err(ConduitError::NoFreeContexts)));
}

#[tokio::test]
async fn test_stop_runs_the_handler_and_wakes_stopped() {
    let (main, child) = channel_pair("stop");
    let remote = child_portal(&child);
    let flag = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&flag);
    remote.on_stop(move || seen.store(true, Ordering::SeqCst));
    remote.init();

    assert!(!remote.is_stop_requested());
    main.post_message(ContextMessage::Stop).unwrap();

    within(remote.stopped()).await;
    assert!(flag.load(Ordering::SeqCst));
    assert!(remote.is_stop_requested());
}

#[tokio::test]
async fn test_child_log_is_posted_to_main() {
    let (main, child) = channel_pair("log");
    let remote = child_portal(&child);
    let main_ref: ContextRef = main.clone();
    let mut inbox = capture_messages(&main_ref);

    remote.log(LogLevel::Warn, "disk almost full").unwrap();

    assert_eq!(
        within(inbox.recv()).await,
        Some(ContextMessage::Log {
            level: LogLevel::Warn,
            text: "disk almost full".to_string(),
        })
    );
}

#[tokio::test]
async fn test_worker_thread_end_to_end() {
    let (pool, fatal) = recording_pool();
    let worker = spawn_worker("e2e", |context| async move {
        let portal = ContextPortal::child(PORTAL_ID, context);
        portal.portal_to_child(double);
        portal.portal_to_child(greet);
        portal.init();
        portal.log(LogLevel::Info, "worker ready")?;
        portal.stopped().await;
        anyhow::Ok(())
    })
    .unwrap();

    let portal = ContextPortal::main(PORTAL_ID, Arc::clone(&pool));
    let double = portal.portal_to_child(double);
    let greet = portal.portal_to_child(greet);
    portal.init();
    within(pool.add_context(worker.context())).await.unwrap();
    assert_eq!(portal.contexts_count(), 1);

    assert_eq!(within(double.call(21)).await.unwrap(), 42);
    let greeting = within(greet.call(("Hi".to_string(), "worker".to_string()))).await;
    assert_eq!(greeting.unwrap(), "Hi, worker!");

    within(portal.cleanup()).await.unwrap();
    wait_until(|| pool.contexts_count() == 0).await;
    assert!(fatal.lock().unwrap().is_empty());
    worker.join().unwrap();
}

#[tokio::test]
async fn test_failing_worker_exit_is_fatal() {
    let (pool, fatal) = recording_pool();
    let worker = spawn_worker("doomed", |context| async move {
        let portal = ContextPortal::child(PORTAL_ID, context);
        portal.init();
        portal.stopped().await;
        Err::<(), _>(anyhow::anyhow!("shutting down badly"))
    })
    .unwrap();

    within(pool.add_context(worker.context())).await.unwrap();
    within(pool.cleanup()).await.unwrap();

    wait_until(|| pool.contexts_count() == 0).await;
    assert_eq!(*fatal.lock().unwrap(), vec!["Context exited with code 1".to_string()]);
    worker.join().unwrap();
}
