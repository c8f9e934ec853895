use dispatch_pool::*;

use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn strand_preserves_submission_order() {
    let (dispatcher, pool) = DispatchPool::fixed_size(4);
    let guard = dispatcher.work_guard();
    pool.start();

    let strand = dispatcher.strand();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..50 {
        let order = order.clone();
        strand
            .submit(move || {
                order.lock().unwrap().push(i);
            })
            .unwrap();
    }

    drop(guard);
    pool.join();

    assert_eq!((0..50).collect::<Vec<_>>(), *order.lock().unwrap());
}

#[test]
fn strand_tasks_never_overlap() {
    let (dispatcher, pool) = DispatchPool::fixed_size(4);
    let guard = dispatcher.work_guard();
    pool.start();

    let strand = dispatcher.strand();
    let active = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..20 {
        let active = active.clone();
        let overlapped = overlapped.clone();
        let order = order.clone();

        strand
            .submit(move || {
                if active.swap(true, SeqCst) {
                    overlapped.store(true, SeqCst);
                }

                thread::sleep(Duration::from_millis(2));
                order.lock().unwrap().push(i);

                active.store(false, SeqCst);
            })
            .unwrap();
    }

    drop(guard);
    pool.join();

    assert!(!overlapped.load(SeqCst));
    assert_eq!((0..20).collect::<Vec<_>>(), *order.lock().unwrap());
}

#[test]
fn order_holds_across_submitting_threads() {
    // Three threads submit in a relayed sequence, so the submission order
    // is known even though the submitters are distinct threads.
    let (dispatcher, pool) = DispatchPool::fixed_size(4);
    let guard = dispatcher.work_guard();
    pool.start();

    let strand = dispatcher.strand();
    let order = Arc::new(Mutex::new(Vec::new()));

    let (first_tx, first_rx) = mpsc::channel::<()>();
    let mut turn_rx = first_rx;
    let mut handles = Vec::new();

    for i in 0..3 {
        let (next_tx, next_rx) = mpsc::channel::<()>();
        let my_turn = turn_rx;
        turn_rx = next_rx;

        let strand = strand.clone();
        let order = order.clone();

        handles.push(thread::spawn(move || {
            my_turn.recv().unwrap();

            strand
                .submit(move || {
                    thread::sleep(Duration::from_millis(10));
                    order.lock().unwrap().push(i);
                })
                .unwrap();

            next_tx.send(()).unwrap();
        }));
    }

    first_tx.send(()).unwrap();
    turn_rx.recv().unwrap();

    for handle in handles {
        handle.join().unwrap();
    }

    drop(guard);
    pool.join();

    assert_eq!(vec![0, 1, 2], *order.lock().unwrap());
}

#[test]
fn strands_run_concurrently_with_each_other() {
    // One task on each of two strands blocks on a shared barrier; the
    // test only completes if the strands do not serialize against each
    // other.
    let (dispatcher, pool) = DispatchPool::fixed_size(2);
    let guard = dispatcher.work_guard();
    pool.start();

    let barrier = Arc::new(Barrier::new(2));
    let (tx, rx) = mpsc::channel();

    for _ in 0..2 {
        let strand = dispatcher.strand();
        let barrier = barrier.clone();
        let tx = tx.clone();

        strand
            .submit(move || {
                barrier.wait();
                tx.send(()).unwrap();
            })
            .unwrap();
    }

    rx.recv().unwrap();
    rx.recv().unwrap();

    drop(guard);
    pool.join();
}

#[test]
fn seven_strands_drain_in_parallel() {
    let (dispatcher, pool) = DispatchPool::fixed_size(4);
    let guard = dispatcher.work_guard();
    pool.start();

    let done = Arc::new(AtomicUsize::new(0));
    let orders: Vec<_> = (0..7)
        .map(|_| Arc::new(Mutex::new(Vec::new())))
        .collect();

    let started = Instant::now();

    for order in &orders {
        let strand = dispatcher.strand();

        for i in 0..3 {
            let order = order.clone();
            let done = done.clone();

            strand
                .submit(move || {
                    thread::sleep(Duration::from_millis(50));
                    order.lock().unwrap().push(i);
                    done.fetch_add(1, SeqCst);
                })
                .unwrap();
        }
    }

    drop(guard);
    pool.join();

    assert_eq!(21, done.load(SeqCst));

    for order in &orders {
        assert_eq!(vec![0, 1, 2], *order.lock().unwrap());
    }

    // Twenty-one 50ms tasks across four workers; running them serially
    // would take over a second.
    assert!(started.elapsed() < Duration::from_millis(900));
}

#[test]
fn panicking_task_does_not_stall_strand() {
    let (dispatcher, pool) = DispatchPool::single_thread();
    let guard = dispatcher.work_guard();
    pool.start();

    let strand = dispatcher.strand();
    let (tx, rx) = mpsc::channel();

    {
        let tx = tx.clone();
        strand
            .submit(move || {
                tx.send(1).unwrap();
                panic!("strand task failure");
            })
            .unwrap();
    }

    strand
        .submit(move || {
            tx.send(2).unwrap();
        })
        .unwrap();

    assert_eq!(1, rx.recv().unwrap());
    assert_eq!(2, rx.recv().unwrap());

    drop(guard);
    pool.join();
}

#[test]
fn strand_submit_after_stop_fails() {
    let (dispatcher, pool) = DispatchPool::single_thread();
    let strand = dispatcher.strand();
    let guard = dispatcher.work_guard();
    pool.start();

    drop(guard);
    pool.join();

    assert_eq!(Err(SubmitError), strand.submit(|| {}));
}

#[test]
fn strand_holds_pool_open_for_pending_tasks() {
    let (dispatcher, pool) = DispatchPool::fixed_size(2);
    let guard = dispatcher.work_guard();
    pool.start();

    let strand = dispatcher.strand();
    let cnt = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let cnt = cnt.clone();
        strand
            .submit(move || {
                thread::sleep(Duration::from_millis(30));
                cnt.fetch_add(1, SeqCst);
            })
            .unwrap();
    }

    // The strand still has queued tasks; releasing the only external
    // guard must not stop the pool under it.
    drop(guard);
    pool.join();

    assert_eq!(5, cnt.load(SeqCst));
}

#[test]
fn shutdown_drops_pending_strand_tasks() {
    let (dispatcher, pool) = DispatchPool::single_thread();
    let _guard = dispatcher.work_guard();
    pool.start();

    let strand = dispatcher.strand();
    let ran = Arc::new(AtomicUsize::new(0));

    let (entered_tx, entered_rx) = mpsc::channel();
    let (closed_tx, closed_rx) = mpsc::channel::<()>();

    // The first task holds its worker until the queue has been closed
    // under it.
    {
        let ran = ran.clone();
        strand
            .submit(move || {
                entered_tx.send(()).unwrap();
                closed_rx.recv().unwrap();
                ran.fetch_add(1, SeqCst);
            })
            .unwrap();
    }

    for _ in 0..4 {
        let ran = ran.clone();
        strand
            .submit(move || {
                ran.fetch_add(1, SeqCst);
            })
            .unwrap();
    }

    entered_rx.recv().unwrap();
    pool.shutdown();
    closed_tx.send(()).unwrap();

    // The in-flight task finishes; its completion finds the queue closed
    // and drops the pending four rather than stalling the drain.
    let started = Instant::now();
    pool.join();

    assert_eq!(1, ran.load(SeqCst));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn cloned_strand_shares_ordering_domain() {
    let (dispatcher, pool) = DispatchPool::fixed_size(4);
    let guard = dispatcher.work_guard();
    pool.start();

    let strand = dispatcher.strand();
    let other = strand.clone();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..10 {
        let order = order.clone();
        let task = move || {
            order.lock().unwrap().push(i);
        };

        if i % 2 == 0 {
            strand.submit(task).unwrap();
        } else {
            other.submit(task).unwrap();
        }
    }

    drop(guard);
    pool.join();

    assert_eq!((0..10).collect::<Vec<_>>(), *order.lock().unwrap());
}
