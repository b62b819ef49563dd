use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use pingate::{
    EdgeDetect, GpioError, InterruptController, KernelOp, LineState, MockInterruptBackend,
    SysfsCall,
};

type Controller = InterruptController<MockInterruptBackend>;

fn controller() -> (Arc<MockInterruptBackend>, Controller) {
    let backend = Arc::new(MockInterruptBackend::default());
    (backend.clone(), InterruptController::new(backend, None))
}

fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let hits = count.clone();
    (count, move || {
        hits.fetch_add(1, Ordering::SeqCst);
    })
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn settle() {
    thread::sleep(Duration::from_millis(50));
}

#[test]
fn one_edge_one_callback() {
    let (backend, controller) = controller();
    let (count, callback) = counter();

    controller.attach(17, EdgeDetect::Rising, callback).unwrap();
    assert_eq!(controller.line_state(17).unwrap(), LineState::Watching);
    assert_eq!(
        backend.calls(),
        vec![
            SysfsCall::Export(17),
            SysfsCall::Direction(17),
            SysfsCall::Edge(17, EdgeDetect::Rising),
            SysfsCall::Open(17),
        ]
    );

    backend.trigger(17).unwrap();
    assert!(wait_until(|| count.load(Ordering::SeqCst) == 1));
    settle();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(backend.acknowledged(17), 1);

    let slot = controller.registry().get(17).unwrap().unwrap();
    let entry = slot.lock();
    assert_eq!(entry.edge(), Some(EdgeDetect::Rising));
    assert!(entry.is_exported());
}

#[test]
fn edges_are_delivered_in_sequence() {
    let (backend, controller) = controller();
    let (count, callback) = counter();
    controller.attach(22, EdgeDetect::Both, callback).unwrap();

    for _ in 0..5 {
        backend.trigger(22).unwrap();
    }
    assert!(wait_until(|| count.load(Ordering::SeqCst) == 5));
    settle();
    assert_eq!(count.load(Ordering::SeqCst), 5);
}

#[test]
fn reattach_replaces_watcher() {
    let (backend, controller) = controller();
    let (first, first_cb) = counter();
    let (second, second_cb) = counter();

    controller.attach(17, EdgeDetect::Rising, first_cb).unwrap();
    controller.attach(17, EdgeDetect::Falling, second_cb).unwrap();
    assert_eq!(controller.active_watchers(), 1);

    backend.trigger(17).unwrap();
    assert!(wait_until(|| second.load(Ordering::SeqCst) == 1));
    settle();
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);

    let opens = backend
        .calls()
        .into_iter()
        .filter(|c| *c == SysfsCall::Open(17))
        .count();
    assert_eq!(opens, 1, "event handle is reused on re-attach");
    assert!(backend.calls().contains(&SysfsCall::Edge(17, EdgeDetect::Falling)));
}

#[test]
fn detach_twice_is_noop() {
    let (backend, controller) = controller();
    let (_, callback) = counter();
    controller.attach(17, EdgeDetect::Rising, callback).unwrap();

    controller.detach(17).unwrap();
    controller.detach(17).unwrap();
    assert_eq!(controller.line_state(17).unwrap(), LineState::Detached);
    assert_eq!(controller.active_watchers(), 0);

    let unexports = backend
        .calls()
        .into_iter()
        .filter(|c| *c == SysfsCall::Unexport(17))
        .count();
    assert_eq!(unexports, 1);
}

#[test]
fn detach_never_attached_line() {
    let (backend, controller) = controller();
    controller.detach(4).unwrap();
    assert!(backend.calls().is_empty());
    assert_eq!(controller.line_state(4).unwrap(), LineState::Detached);
}

#[test]
fn detach_closes_event_handle() {
    let (backend, controller) = controller();
    let (count, callback) = counter();
    controller.attach(17, EdgeDetect::Rising, callback).unwrap();

    // an open, idle handle accepts an edge
    backend.trigger(17).unwrap();
    assert!(wait_until(|| count.load(Ordering::SeqCst) == 1));

    controller.detach(17).unwrap();
    let slot = controller.registry().get(17).unwrap().unwrap();
    assert!(!slot.lock().is_exported());
    assert_eq!(slot.lock().edge(), None);

    let err = backend.trigger(17).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    settle();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn pending_events_are_drained_on_attach() {
    let (backend, controller) = controller();
    let (count, callback) = counter();
    backend.preload(17, 3);

    controller.attach(17, EdgeDetect::Rising, callback).unwrap();
    settle();
    assert_eq!(count.load(Ordering::SeqCst), 0);

    backend.trigger(17).unwrap();
    assert!(wait_until(|| count.load(Ordering::SeqCst) == 1));
}

#[test]
fn kernel_failure_is_recoverable() {
    let (backend, controller) = controller();
    backend.fail(KernelOp::Export);

    let (_, callback) = counter();
    let err = controller.attach(17, EdgeDetect::Rising, callback).unwrap_err();
    assert!(matches!(
        err,
        GpioError::Kernel { op: KernelOp::Export, line: 17, .. }
    ));
    assert_eq!(controller.line_state(17).unwrap(), LineState::Detached);
    assert_eq!(controller.active_watchers(), 0);

    backend.recover(KernelOp::Export);
    let (count, callback) = counter();
    controller.attach(22, EdgeDetect::Falling, callback).unwrap();
    backend.trigger(22).unwrap();
    assert!(wait_until(|| count.load(Ordering::SeqCst) == 1));
}

#[test]
fn failed_attach_after_export_still_unexports() {
    let (backend, controller) = controller();
    backend.fail(KernelOp::Edge);

    let (_, callback) = counter();
    assert!(controller.attach(17, EdgeDetect::Rising, callback).is_err());
    assert!(!backend.calls().contains(&SysfsCall::Open(17)));

    controller.detach(17).unwrap();
    assert_eq!(backend.calls().last(), Some(&SysfsCall::Unexport(17)));
}

#[test]
fn watcher_failure_is_isolated() {
    let (backend, controller) = controller();
    let (_, broken_cb) = counter();
    let (healthy, healthy_cb) = counter();
    controller.attach(17, EdgeDetect::Rising, broken_cb).unwrap();
    controller.attach(22, EdgeDetect::Rising, healthy_cb).unwrap();

    backend.disconnect(17);
    assert!(wait_until(|| {
        controller.line_state(17).unwrap() == LineState::Detached
    }));
    let slot = controller.registry().get(17).unwrap().unwrap();
    assert!(!slot.lock().events_open());

    backend.trigger(22).unwrap();
    assert!(wait_until(|| healthy.load(Ordering::SeqCst) == 1));
    assert_eq!(controller.active_watchers(), 1);

    // a fresh attach reopens the closed handle
    let (count, callback) = counter();
    controller.attach(17, EdgeDetect::Rising, callback).unwrap();
    backend.trigger(17).unwrap();
    assert!(wait_until(|| count.load(Ordering::SeqCst) == 1));
}

#[test]
fn callback_may_detach_its_own_line() {
    let (backend, controller) = controller();
    let controller = Arc::new(controller);
    let (count, mut bump) = counter();

    let inner = controller.clone();
    controller
        .attach(17, EdgeDetect::Rising, move || {
            bump();
            inner.detach(17).unwrap();
        })
        .unwrap();

    backend.trigger(17).unwrap();
    assert!(wait_until(|| {
        backend.calls().last() == Some(&SysfsCall::Unexport(17))
    }));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(wait_until(|| controller.active_watchers() == 0));
}

/// Fires one edge on line 17 whose callback waits `linger` and then detaches
/// the line itself. Returns once the callback has started.
fn attach_lingering_detach(
    backend: &MockInterruptBackend,
    controller: &Arc<Controller>,
    linger: Duration,
) {
    let started = Arc::new(AtomicBool::new(false));
    let flag = started.clone();
    let inner = controller.clone();
    controller
        .attach(17, EdgeDetect::Rising, move || {
            flag.store(true, Ordering::SeqCst);
            thread::sleep(linger);
            inner.detach(17).unwrap();
        })
        .unwrap();

    backend.trigger(17).unwrap();
    assert!(wait_until(|| started.load(Ordering::SeqCst)));
}

#[test]
fn detach_while_callback_detaches_same_line() {
    let (backend, controller) = controller();
    let controller = Arc::new(controller);
    attach_lingering_detach(&backend, &controller, Duration::from_millis(100));

    let (done_tx, done_rx) = mpsc::channel();
    let outer = controller.clone();
    thread::spawn(move || {
        let _ = done_tx.send(outer.detach(17));
    });

    let result = done_rx.recv_timeout(Duration::from_secs(3));
    assert!(matches!(result, Ok(Ok(()))), "detach blocked: {result:?}");
    assert_eq!(controller.line_state(17).unwrap(), LineState::Detached);
    let unexports = backend
        .calls()
        .into_iter()
        .filter(|c| *c == SysfsCall::Unexport(17))
        .count();
    assert_eq!(unexports, 1);
}

#[test]
fn shutdown_while_callback_detaches_same_line() {
    let (backend, controller) = controller();
    let controller = Arc::new(controller);
    attach_lingering_detach(&backend, &controller, Duration::from_millis(100));

    let (done_tx, done_rx) = mpsc::channel();
    let outer = controller.clone();
    thread::spawn(move || {
        let _ = done_tx.send(outer.shutdown());
    });

    let result = done_rx.recv_timeout(Duration::from_secs(3));
    assert!(matches!(result, Ok(Ok(()))), "shutdown blocked: {result:?}");
    assert_eq!(controller.active_watchers(), 0);
    assert_eq!(backend.calls().last(), Some(&SysfsCall::Unexport(17)));
}

#[test]
fn reattach_while_callback_reattaches_same_line() {
    let (backend, controller) = controller();
    let controller = Arc::new(controller);
    let started = Arc::new(AtomicBool::new(false));
    let flag = started.clone();
    let inner = controller.clone();
    controller
        .attach(17, EdgeDetect::Rising, move || {
            flag.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            inner.attach(17, EdgeDetect::Falling, || {}).unwrap();
        })
        .unwrap();
    backend.trigger(17).unwrap();
    assert!(wait_until(|| started.load(Ordering::SeqCst)));

    let (count, callback) = counter();
    let (done_tx, done_rx) = mpsc::channel();
    let outer = controller.clone();
    thread::spawn(move || {
        let _ = done_tx.send(outer.attach(17, EdgeDetect::Both, callback));
    });

    let result = done_rx.recv_timeout(Duration::from_secs(3));
    assert!(matches!(result, Ok(Ok(()))), "attach blocked: {result:?}");
    assert_eq!(controller.active_watchers(), 1);

    // the outer attach ran last, so its callback owns the line
    backend.trigger(17).unwrap();
    assert!(wait_until(|| count.load(Ordering::SeqCst) == 1));
}

#[test]
fn concurrent_attach_leaves_one_watcher() {
    let (backend, controller) = controller();
    let controller = Arc::new(controller);
    let (count, _) = counter();
    let barrier = Arc::new(Barrier::new(8));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let controller = controller.clone();
            let barrier = barrier.clone();
            let hits = count.clone();
            thread::spawn(move || {
                barrier.wait();
                controller
                    .attach(17, EdgeDetect::Rising, move || {
                        hits.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(controller.active_watchers(), 1);
    backend.trigger(17).unwrap();
    assert!(wait_until(|| count.load(Ordering::SeqCst) == 1));
    settle();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_attach_and_detach_stay_consistent() {
    let (backend, controller) = controller();
    let controller = Arc::new(controller);
    let barrier = Arc::new(Barrier::new(6));

    let workers: Vec<_> = (0..6)
        .map(|i| {
            let controller = controller.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..20 {
                    if i % 2 == 0 {
                        controller.attach(17, EdgeDetect::Both, || {}).unwrap();
                    } else {
                        controller.detach(17).unwrap();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert!(controller.active_watchers() <= 1);

    let (count, callback) = counter();
    controller.attach(17, EdgeDetect::Rising, callback).unwrap();
    assert_eq!(controller.active_watchers(), 1);
    backend.trigger(17).unwrap();
    assert!(wait_until(|| count.load(Ordering::SeqCst) == 1));
    settle();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    controller.detach(17).unwrap();
    assert_eq!(controller.active_watchers(), 0);
    assert_eq!(backend.calls().last(), Some(&SysfsCall::Unexport(17)));
}

#[test]
fn out_of_range_line() {
    let (backend, controller) = controller();
    let (_, callback) = counter();
    assert!(matches!(
        controller.attach(64, EdgeDetect::Rising, callback),
        Err(GpioError::InvalidLine(64))
    ));
    assert!(matches!(controller.detach(200), Err(GpioError::InvalidLine(200))));
    assert!(backend.calls().is_empty());
}

#[test]
fn shutdown_detaches_everything() {
    let (backend, controller) = controller();
    for line in [4, 17, 22] {
        let (_, callback) = counter();
        controller.attach(line, EdgeDetect::Both, callback).unwrap();
    }
    assert_eq!(controller.active_watchers(), 3);

    controller.shutdown().unwrap();
    assert_eq!(controller.active_watchers(), 0);
    for line in [4, 17, 22] {
        assert!(backend.calls().contains(&SysfsCall::Unexport(line)));
    }
}

#[test]
fn drop_releases_lines() {
    let (backend, controller) = controller();
    let (_, callback) = counter();
    controller.attach(27, EdgeDetect::Falling, callback).unwrap();
    drop(controller);
    assert_eq!(backend.calls().last(), Some(&SysfsCall::Unexport(27)));
    assert_eq!(
        backend.trigger(27).unwrap_err().kind(),
        io::ErrorKind::BrokenPipe
    );
}
