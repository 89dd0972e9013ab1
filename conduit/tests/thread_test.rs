mod test_helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;

use conduit::thread::{create_thread_with_id, Task, Thread, ThreadEvent, ThreadTask};
use conduit_api::errors::ConduitError;

use test_helpers::*;

fn live_thread(id: &str) -> Arc<Thread<u32>> {
    let thread = create_thread_with_id(id);
    thread.init();
    thread
}

/// A task that finishes only when the returned sender fires.
fn gated_task(value: u32) -> (oneshot::Sender<()>, ThreadTask<u32>) {
    let (open, gate) = oneshot::channel::<()>();
    let task = Task::new(move |_ctx| async move {
        gate.await?;
        anyhow::Ok(value)
    });
    (open, task)
}

#[test]
fn test_thread_state_transitions() {
    let thread: Arc<Thread<u32>> = create_thread_with_id("t-state");
    assert!(!thread.is_initialized());
    assert!(!thread.is_alive());
    assert!(!thread.can_run());

    thread.init();
    assert!(thread.is_initialized());
    assert!(thread.is_alive());
    assert!(thread.can_run());

    thread.kill();
    assert!(thread.is_initialized());
    assert!(!thread.is_alive());
    assert!(!thread.can_run());
}

#[tokio::test]
async fn test_run_returns_task_result_and_exposes_thread() {
    let thread = live_thread("t-run");
    let task = Task::with_id("task-1", |ctx: conduit::thread::ThreadExecutionContext<u32>| async move {
        assert_eq!(ctx.thread.current_task_id().as_deref(), Some("task-1"));
        anyhow::Ok(ctx.thread.id().len() as u32)
    });

    assert_eq!(within(thread.run(task)).await.unwrap(), 5);
    assert!(!thread.is_running());
    assert_eq!(thread.current_task_id(), None);
}

#[tokio::test]
async fn test_second_run_is_rejected_while_first_is_running() {
    let thread = live_thread("t-exclusive");
    let (open, first_task) = gated_task(7);

    let first = thread.run(first_task);
    assert!(thread.is_running());
    assert!(!thread.can_run());

    let second = thread.run(Task::from_sync(|_ctx| Ok(8)));
    match within(second).await {
        Err(ConduitError::ThreadNotRunnable(id)) => assert_eq!(id, "t-exclusive"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(matches!(
        thread.try_run(Task::from_sync(|_ctx| Ok(9))),
        Err(ConduitError::ThreadNotRunnable(_))
    ));

    open.send(()).unwrap();
    assert_eq!(within(first).await.unwrap(), 7);
    assert!(thread.can_run());
}

#[tokio::test]
async fn test_running_flag_resets_after_error() {
    let thread = live_thread("t-error");
    let failing: ThreadTask<u32> = Task::new(|_ctx| async { Err::<u32, _>(anyhow::anyhow!("delegate failed")) });

    let err = within(thread.run(failing)).await.unwrap_err();
    assert_eq!(err.to_string(), "delegate failed");
    assert!(thread.can_run());
}

#[tokio::test]
async fn test_library_errors_from_the_delegate_pass_through() {
    let thread = live_thread("t-passthrough");
    let failing: ThreadTask<u32> = Task::new(|_ctx| async { Err::<u32, anyhow::Error>(ConduitError::NoFreeContexts.into()) });

    assert!(matches!(within(thread.run(failing)).await, Err(ConduitError::NoFreeContexts)));
}

#[tokio::test]
async fn test_running_flag_resets_when_run_is_dropped() {
    let thread = live_thread("t-drop");
    let (_open, task) = gated_task(1);

    let running = thread.run(task);
    assert!(thread.is_running());
    drop(running);

    assert!(!thread.is_running());
    assert!(thread.can_run());
}

#[tokio::test]
async fn test_killed_or_uninitialized_thread_cannot_run() {
    let fresh: Arc<Thread<u32>> = create_thread_with_id("t-fresh");
    assert!(matches!(
        within(fresh.run(Task::from_sync(|_ctx| Ok(1)))).await,
        Err(ConduitError::ThreadNotRunnable(_))
    ));

    let killed = live_thread("t-killed");
    killed.kill();
    assert!(matches!(
        within(killed.run(Task::from_sync(|_ctx| Ok(1)))).await,
        Err(ConduitError::ThreadNotRunnable(_))
    ));
}

#[tokio::test]
async fn test_kill_does_not_interrupt_running_task() {
    let thread = live_thread("t-kill-running");
    let (open, task) = gated_task(3);

    let running = thread.run(task);
    thread.kill();
    assert!(thread.is_running());
    assert!(!thread.is_alive());

    open.send(()).unwrap();
    assert_eq!(within(running).await.unwrap(), 3);
    assert!(!thread.is_running());
    assert!(!thread.can_run());
}

#[test]
fn test_first_lock_wins() {
    let thread = live_thread("t-lock");
    let events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&events);
    thread.on_lock_status_update(move |event| {
        let ThreadEvent::LockStatusUpdate { thread_id, .. } = event;
        assert_eq!(thread_id, "t-lock");
        counter.fetch_add(1, Ordering::SeqCst);
    });

    thread.lock("data-a".to_string());
    thread.lock("data-b".to_string());
    assert!(thread.is_locked());
    assert_eq!(thread.get_lock_handle::<String>().as_deref().map(String::as_str), Some("data-a"));
    assert_eq!(events.load(Ordering::SeqCst), 1);

    thread.unlock();
    thread.unlock();
    assert!(!thread.is_locked());
    assert!(thread.get_lock_handle::<String>().is_none());
    assert_eq!(events.load(Ordering::SeqCst), 2);
}

#[test]
fn test_lock_does_not_affect_aliveness() {
    let thread = live_thread("t-lock-alive");
    thread.lock_empty();
    assert!(thread.is_locked());
    assert!(thread.is_alive());
    assert!(thread.can_run());
    assert!(thread.get_lock_handle::<u8>().is_none());
}

#[test]
fn test_lock_listener_can_be_removed() {
    let thread = live_thread("t-lock-off");
    let events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&events);
    let handle = thread.on_lock_status_update(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(thread.off_lock_status_update(handle));
    thread.lock(1u8);
    assert_eq!(events.load(Ordering::SeqCst), 0);
}

#[test]
fn test_metadata_is_typed() {
    #[derive(Debug, PartialEq)]
    struct Owner {
        name: &'static str,
    }

    let thread = live_thread("t-meta");
    assert!(thread.get_metadata::<Owner>().is_none());

    thread.set_metadata(Owner { name: "scheduler-a" });
    assert_eq!(thread.get_metadata::<Owner>().as_deref(), Some(&Owner { name: "scheduler-a" }));
    assert!(thread.get_metadata::<String>().is_none());

    thread.clear_metadata();
    assert!(thread.get_metadata::<Owner>().is_none());
}
