use std::thread;
use std::time::{Duration, Instant};
use system_mutex as sm;

fn options(dir: &std::path::Path) -> sm::AcquireOptions {
    sm::AcquireOptions::default()
        .with_lock_dir(dir)
        .with_poll_interval(Duration::from_millis(50))
}

#[test]
fn test_timed_acquire_waits_for_release_then_rejects_reentry() {
    let td = tempfile::tempdir().expect("tmpdir");
    let dir = td.path().to_path_buf();
    let name = "timed_acquire_wait_release";
    let time_to_release = Duration::from_millis(1500);

    let mut held = sm::SystemMutex::new_in(&dir, name).expect("holder");
    assert!(held.get_mutex_acquired());
    let releaser = thread::spawn(move || {
        thread::sleep(time_to_release);
        held.release_mutex();
    });

    let started = Instant::now();
    // The direct handle is released from another thread, so skip the reentrancy check.
    let opts = options(&dir)
        .with_timeout(Duration::from_secs(20))
        .with_check_reentrant(false);
    let guard = sm::timed_acquire_mutex_with(name, &opts).expect("acquire after release");
    let acquired_after = started.elapsed();

    let nested = sm::timed_acquire_mutex_with(
        name,
        &options(&dir).with_timeout(Duration::from_secs(1)),
    );
    match nested {
        Err(e @ sm::MutexError::NotReentrant(_)) => {
            assert!(e.to_string().contains("not a reentrant mutex"), "{e}");
        }
        other => panic!("expected reentrancy error, got {other:?}"),
    }

    drop(guard);
    releaser.join().expect("releaser");
    assert!(
        acquired_after > time_to_release,
        "acquired after {acquired_after:?}, before the holder released"
    );
    assert!(!sm::is_held_locally(&dir, name));
}

#[test]
fn test_timed_acquire_times_out_after_budget() {
    let td = tempfile::tempdir().expect("tmpdir");
    let name = "timed_acquire_timeout";
    let _held = sm::SystemMutex::new_in(td.path(), name).expect("holder");
    let budget = Duration::from_millis(700);

    let started = Instant::now();
    let err = sm::timed_acquire_mutex_with(name, &options(td.path()).with_timeout(budget))
        .expect_err("must time out");
    let waited = started.elapsed();
    assert!(waited > budget, "returned after {waited:?}");
    match &err {
        sm::MutexError::Timeout { name: n, elapsed } => {
            assert_eq!(n, name);
            assert!(*elapsed > budget);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(err.to_string().contains(name));
}

#[test]
fn test_reentrancy_check_can_be_disabled() {
    let td = tempfile::tempdir().expect("tmpdir");
    let name = "timed_acquire_no_reentry_check";
    let _outer = sm::timed_acquire_mutex_with(name, &options(td.path())).expect("outer");
    // Without the local check the inner attempt contends on the lock itself and times out.
    let inner = sm::timed_acquire_mutex_with(
        name,
        &options(td.path())
            .with_check_reentrant(false)
            .with_timeout(Duration::from_millis(200)),
    );
    assert!(matches!(inner, Err(sm::MutexError::Timeout { .. })), "{inner:?}");
}

#[test]
fn test_scoped_closure_serializes_threads() {
    use std::sync::{Arc, Mutex};

    let td = tempfile::tempdir().expect("tmpdir");
    let dir = td.path().to_path_buf();
    let log = Arc::new(Mutex::new(Vec::new()));

    let workers: Vec<_> = (0..3)
        .map(|i| {
            let dir = dir.clone();
            let log = Arc::clone(&log);
            thread::spawn(move || {
                // The reentrancy registry is process-wide, so sibling threads must opt out.
                let opts = options(&dir)
                    .with_timeout(Duration::from_secs(20))
                    .with_poll_interval(Duration::from_millis(10))
                    .with_check_reentrant(false);
                sm::with_timed_mutex("timed_scoped_closure", &opts, || {
                    log.lock().unwrap().push(("enter", i));
                    thread::sleep(Duration::from_millis(30));
                    log.lock().unwrap().push(("exit", i));
                })
                .expect("scoped acquisition");
            })
        })
        .collect();
    for w in workers {
        w.join().expect("worker");
    }

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 6);
    for pair in log.chunks(2) {
        assert_eq!(pair[0].0, "enter");
        assert_eq!(pair[1].0, "exit");
        assert_eq!(pair[0].1, pair[1].1, "critical sections interleaved: {log:?}");
    }
}
