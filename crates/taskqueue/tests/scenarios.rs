//! End-to-end scenarios S1-S6, built against the `fakes` feature.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use taskqueue::async_provider::{AsyncOperation, IdentityToken, Opcode};
use taskqueue::config::TaskQueueConfig;
use taskqueue::error::{Error, Result};
use taskqueue::net_lifecycle::{FakeHttpProvider, FakeWebSocketProvider, NetworkLifecycleTracker};
use taskqueue::port::DispatchPolicy;
use taskqueue::task_queue::{PortKind, TaskQueue};

fn threadpool_queue() -> TaskQueue {
    TaskQueue::create(TaskQueueConfig::default(), true, true).unwrap()
}

/// S1: factorial async — 5 successive 100ms DoWork reschedules culminating in 120, `get_result`
/// yields 120, and `Cleanup` fires exactly once.
///
/// Built directly on [`AsyncOperation`] rather than the `run` convenience launcher so the test
/// can observe the `Cleanup` opcode, which `run`'s own provider never exposes.
#[test]
fn s1_factorial_async() {
    let queue = threadpool_queue();
    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    let n = Mutex::new(1usize);
    let remaining = Mutex::new(5u32);
    let cleanup_count = Arc::new(AtomicUsize::new(0));
    let cleanup_count_for_provider = Arc::clone(&cleanup_count);

    let op = AsyncOperation::new(queue);
    let provider = move |opcode: Opcode, op: &Arc<AsyncOperation>| -> Result<()> {
        match opcode {
            Opcode::Begin => Ok(()),
            Opcode::DoWork => {
                let mut n = n.lock().unwrap();
                let mut remaining = remaining.lock().unwrap();
                *n *= (6 - *remaining) as usize;
                *remaining -= 1;
                if *remaining == 0 {
                    op.complete(Ok(*n));
                    Ok(())
                } else {
                    op.schedule(100)
                }
            }
            Opcode::Cancel => {
                op.complete(Err(Error::Aborted));
                Ok(())
            }
            Opcode::GetResult => Ok(()),
            Opcode::Cleanup => {
                cleanup_count_for_provider.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    };

    let identity = IdentityToken::new("s1-factorial");
    let identity_for_result = identity.clone();
    op.begin(identity, provider, move |result| tx.send(result).unwrap()).unwrap();
    op.schedule(0).unwrap();

    let result = rx.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(result, Ok(120));
    assert!(started.elapsed() >= Duration::from_millis(450));

    assert_eq!(op.get_result(&identity_for_result).unwrap(), 120);
    assert_eq!(cleanup_count.load(Ordering::SeqCst), 1);
}

/// S2: cancel mid-reschedule — 500ms per iteration, canceled after 100ms; the `Cancel` opcode
/// is observed and `Cleanup` fires exactly once.
#[test]
fn s2_cancel_during_do_work() {
    let queue = threadpool_queue();
    let (tx, rx) = mpsc::channel();
    let cancel_count = Arc::new(AtomicUsize::new(0));
    let cancel_count_for_provider = Arc::clone(&cancel_count);
    let cleanup_count = Arc::new(AtomicUsize::new(0));
    let cleanup_count_for_provider = Arc::clone(&cleanup_count);

    let op = AsyncOperation::new(queue);
    let provider = move |opcode: Opcode, op: &Arc<AsyncOperation>| -> Result<()> {
        match opcode {
            Opcode::Begin => Ok(()),
            Opcode::DoWork => op.schedule(500),
            Opcode::Cancel => {
                cancel_count_for_provider.fetch_add(1, Ordering::SeqCst);
                op.complete(Err(Error::Aborted));
                Ok(())
            }
            Opcode::GetResult => Ok(()),
            Opcode::Cleanup => {
                cleanup_count_for_provider.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    };

    let identity = IdentityToken::new("s2-cancel");
    let identity_for_result = identity.clone();
    op.begin(identity, provider, move |result| tx.send(result).unwrap()).unwrap();
    op.schedule(0).unwrap();

    std::thread::sleep(Duration::from_millis(100));
    op.cancel();

    let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(result, Err(Error::Aborted));
    assert_eq!(op.get_status(true), Err(Error::Aborted));
    assert_eq!(cancel_count.load(Ordering::SeqCst), 1);

    assert_eq!(op.get_result(&identity_for_result).unwrap_err(), Error::Aborted);
    assert_eq!(cleanup_count.load(Ordering::SeqCst), 1);
}

/// S3: waiter auto-reset — a registered waiter fires exactly 5 times in order.
///
/// Waitable handles only exist on platforms exposing them (see
/// `taskqueue::util::wait_handle`); elsewhere `register_waiter` is contractually
/// `NotSupported`, which is exercised directly instead.
#[cfg(windows)]
#[test]
fn s3_waiter_auto_reset_fires_in_order() {
    use taskqueue::port::Port;
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Threading::{CreateEventW, SetEvent};

    let event = unsafe { CreateEventW(None, false, false, None) }.unwrap();
    let handle = unsafe { taskqueue::util::WaitHandle::from_raw(event) };

    let port = Port::new("s3", DispatchPolicy::Immediate, None).unwrap();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);
    let fired = Arc::new(AtomicUsize::new(0));
    let fired2 = Arc::clone(&fired);

    let _token = port
        .register_waiter(handle, move |canceled| {
            assert!(!canceled);
            let n = fired2.fetch_add(1, Ordering::SeqCst) + 1;
            seen2.lock().unwrap().push(n);
        })
        .unwrap();

    for _ in 0..5 {
        unsafe {
            let _ = SetEvent(event);
        }
        let deadline = Instant::now() + Duration::from_secs(1);
        while fired.load(Ordering::SeqCst) < seen.lock().unwrap().len().max(1)
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[cfg(not(windows))]
#[test]
fn s3_waiter_registration_is_not_supported_on_this_platform() {
    use taskqueue::port::Port;

    let port = Port::new("s3", DispatchPolicy::Immediate, None).unwrap();
    let handle = unsafe { taskqueue::util::WaitHandle::from_raw(0) };
    let err = port.register_waiter(handle, |_canceled| {}).unwrap_err();
    assert_eq!(err, Error::NotSupported);
}

/// S4: composite termination isolation.
#[test]
fn s4_composite_termination_isolation() {
    let q = threadpool_queue();
    let work = q.get_port(PortKind::Work);
    let completion = q.get_port(PortKind::Completion);

    let c1 = TaskQueue::create_composite(&work, &completion);
    let c2 = TaskQueue::create_composite(&work, &completion);

    let c1_canceled = Arc::new(AtomicBool::new(false));
    let c1_flag = Arc::clone(&c1_canceled);
    c1.submit(PortKind::Work, move |canceled| {
        c1_flag.store(canceled, Ordering::SeqCst);
    })
    .unwrap();

    let c2_pending = Arc::new(AtomicBool::new(false));
    let c2_flag = Arc::clone(&c2_pending);
    c2.submit_delayed(PortKind::Work, 60_000, move |canceled| {
        assert!(!canceled);
        c2_flag.store(true, Ordering::SeqCst);
    })
    .unwrap();

    c1.terminate(true, || {}).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(c1_canceled.load(Ordering::SeqCst));
    assert!(!c2_pending.load(Ordering::SeqCst));

    let (tx, rx) = mpsc::channel();
    q.submit(PortKind::Work, move |_canceled| tx.send(()).unwrap())
        .unwrap();
    rx.recv_timeout(Duration::from_secs(1)).unwrap();
}

/// S5: process-queue non-closability.
#[test]
fn s5_process_queue_non_closability() {
    let queue = TaskQueue::current_process_queue();
    for _ in 0..5 {
        assert!(queue.close().is_ok());
    }

    let (tx, rx) = mpsc::channel();
    queue
        .submit(PortKind::Work, move |canceled| {
            assert!(!canceled);
            tx.send(()).unwrap();
        })
        .unwrap();
    rx.recv_timeout(Duration::from_secs(1)).unwrap();

    assert_eq!(queue.terminate(false, || {}).unwrap_err(), Error::AccessDenied);
}

/// S6: tracker cleanup drains 3 HTTP calls and 2 websocket connects before the underlying
/// provider's cleanup runs.
#[test]
fn s6_tracker_cleanup_drains() {
    let http = Arc::new(FakeHttpProvider::delayed(200, 2_000));
    let ws = Arc::new(FakeWebSocketProvider::with_connect_delay(2_000));
    let tracker = NetworkLifecycleTracker::new(http.clone(), Some(ws));
    let queue = threadpool_queue();

    let mut http_results = Vec::new();
    for i in 0..3 {
        let (tx, rx) = mpsc::channel();
        tracker
            .http_call_perform(&queue, i, move |result| tx.send(result).unwrap())
            .unwrap();
        http_results.push(rx);
    }

    let mut ws_results = Vec::new();
    for i in 0..2 {
        let (tx, rx) = mpsc::channel();
        tracker
            .websocket_connect(&queue, "wss://example.test", None, 100 + i, move |result| {
                tx.send(result).unwrap()
            })
            .unwrap();
        ws_results.push(rx);
    }

    let (cleanup_tx, cleanup_rx) = mpsc::channel();
    tracker.cleanup(&queue, move |result| cleanup_tx.send(result).unwrap()).unwrap();

    for rx in http_results {
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Err(Error::Aborted));
    }
    for rx in ws_results {
        rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
    }

    cleanup_rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
    assert!(http.cleanup_called());
}
