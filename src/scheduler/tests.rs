use super::*;
use crate::engine::EngineApi;
use crate::testing::{EngineCall, MockEngine};
use std::sync::atomic::AtomicUsize;
use test_log::test;

const POLL: Duration = Duration::from_millis(120);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

fn scheduler_with(engine: &Arc<MockEngine>) -> (RenderScheduler, ManualRefreshSource) {
    let source = ManualRefreshSource::new();
    let engine: Arc<dyn EngineApi> = engine.clone();
    let scheduler = RenderScheduler::new(engine, Box::new(source.clone()), POLL);
    scheduler.view_bound();
    (scheduler, source)
}

fn polls(engine: &MockEngine) -> usize {
    engine.count(|call| matches!(call, EngineCall::IsAvailable))
}

#[test]
fn polls_while_unavailable_then_starts_ticking() {
    let engine = Arc::new(MockEngine::new());
    let (scheduler, source) = scheduler_with(&engine);
    let t0 = Instant::now();

    assert_eq!(scheduler.start(t0), SchedulerState::Polling);
    assert_eq!(polls(&engine), 1);
    assert_eq!(scheduler.next_deadline(), Some(t0 + POLL));
    assert!(!source.is_attached());

    // Not due yet.
    scheduler.service(t0 + POLL / 2);
    assert_eq!(polls(&engine), 1);

    scheduler.service(t0 + POLL);
    assert_eq!(polls(&engine), 2);
    scheduler.service(t0 + POLL * 2);
    assert_eq!(polls(&engine), 3);
    assert_eq!(scheduler.state(), SchedulerState::Polling);
    assert_eq!(engine.frames(), 0);

    engine.set_available(true);
    assert_eq!(scheduler.service(t0 + POLL * 3), SchedulerState::Running);
    assert_eq!(scheduler.next_deadline(), None);

    // Polling has stopped.
    scheduler.service(t0 + POLL * 10);
    assert_eq!(polls(&engine), 4);

    assert!(source.fire());
    assert!(scheduler.flush(FLUSH_TIMEOUT));
    assert_eq!(engine.frames(), 1);
    assert_eq!(engine.count(|c| matches!(c, EngineCall::SwapBuffers)), 1);
}

#[test]
fn available_engine_runs_immediately() {
    let engine = Arc::new(MockEngine::available());
    let (scheduler, source) = scheduler_with(&engine);

    assert_eq!(scheduler.start(Instant::now()), SchedulerState::Running);
    assert!(source.is_attached());
    assert_eq!(scheduler.next_deadline(), None);

    // Redundant start is a no-op.
    let probes = polls(&engine);
    assert_eq!(scheduler.start(Instant::now()), SchedulerState::Running);
    assert_eq!(polls(&engine), probes);
}

#[test]
fn refresh_during_slow_tick_is_queued_not_dropped() {
    let engine = Arc::new(MockEngine::available());
    engine.set_frame_delay(Duration::from_millis(40));
    let (scheduler, source) = scheduler_with(&engine);
    scheduler.start(Instant::now());

    let fires = 3;
    for _ in 0..fires {
        assert!(source.fire());
    }
    assert!(scheduler.flush(FLUSH_TIMEOUT));

    assert_eq!(engine.frames(), fires);
    assert_eq!(scheduler.stats().dispatched(), fires as u64);
    assert_eq!(scheduler.stats().completed(), fires as u64);
    assert_eq!(engine.max_concurrent_frames(), 1);

    let spans = engine.frame_spans();
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "ticks overlapped: {:?}", pair);
    }
}

#[test]
fn ticks_from_concurrent_refresh_threads_never_overlap() {
    let engine = Arc::new(MockEngine::available());
    engine.set_frame_delay(Duration::from_millis(2));
    let (scheduler, source) = scheduler_with(&engine);
    scheduler.start(Instant::now());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let source = source.clone();
            std::thread::spawn(move || {
                for _ in 0..5 {
                    source.fire();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(scheduler.flush(FLUSH_TIMEOUT));
    assert_eq!(engine.frames(), 20);
    assert_eq!(engine.max_concurrent_frames(), 1);
}

#[test]
fn stop_detaches_and_is_idempotent() {
    let engine = Arc::new(MockEngine::available());
    let (scheduler, source) = scheduler_with(&engine);
    scheduler.start(Instant::now());

    scheduler.stop();
    scheduler.stop();

    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert!(!source.is_attached());
    assert!(!source.fire());
    assert!(scheduler.flush(FLUSH_TIMEOUT));
    assert_eq!(engine.frames(), 0);
}

#[test]
fn stop_while_polling_cancels_the_poll() {
    let engine = Arc::new(MockEngine::new());
    let (scheduler, _source) = scheduler_with(&engine);
    let t0 = Instant::now();
    scheduler.start(t0);

    scheduler.stop();
    assert_eq!(scheduler.next_deadline(), None);

    engine.set_available(true);
    assert_eq!(scheduler.service(t0 + POLL * 5), SchedulerState::Idle);
    assert_eq!(polls(&engine), 1);
}

#[test]
fn last_release_stops_the_loop() {
    let engine = Arc::new(MockEngine::available());
    let (scheduler, source) = scheduler_with(&engine);
    let now = Instant::now();

    scheduler.acquire(now);
    scheduler.acquire(now);
    scheduler.release();
    assert_eq!(scheduler.state(), SchedulerState::Running);
    assert!(source.is_attached());

    scheduler.release();
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert!(!source.is_attached());

    // Restartable after a full stop.
    assert_eq!(scheduler.acquire(now), SchedulerState::Running);
    assert!(source.fire());
    assert!(scheduler.flush(FLUSH_TIMEOUT));
    assert_eq!(engine.frames(), 1);
}

#[test]
fn refreshes_are_ignored_until_a_view_is_bound() {
    let engine = Arc::new(MockEngine::available());
    let (scheduler, source) = scheduler_with(&engine);
    scheduler.view_unbound();
    scheduler.start(Instant::now());

    assert!(source.fire());
    assert!(scheduler.flush(FLUSH_TIMEOUT));
    assert_eq!(engine.frames(), 0);

    scheduler.view_bound();
    assert!(source.fire());
    assert!(scheduler.flush(FLUSH_TIMEOUT));
    assert_eq!(engine.frames(), 1);

    // Never underflows.
    scheduler.view_unbound();
    scheduler.view_unbound();
    assert_eq!(scheduler.bound_views(), 0);
}

#[test]
fn ticks_queued_before_unbinding_are_discarded() {
    let engine = Arc::new(MockEngine::available());
    engine.set_frame_delay(Duration::from_millis(30));
    let (scheduler, source) = scheduler_with(&engine);
    scheduler.start(Instant::now());

    for _ in 0..3 {
        assert!(source.fire());
    }
    scheduler.view_unbound();
    let frames_at_unbind = engine.frames();

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(engine.frames(), frames_at_unbind);
    assert!(frames_at_unbind <= 1);
    assert_eq!(scheduler.stats().dispatched(), 3);
    assert_eq!(
        scheduler.stats().completed() + scheduler.stats().skipped(),
        3
    );
}

#[test]
fn recheck_needs_an_attached_view() {
    let engine = Arc::new(MockEngine::available());
    let (scheduler, source) = scheduler_with(&engine);
    let now = Instant::now();

    assert_eq!(scheduler.recheck(now), SchedulerState::Idle);
    assert!(!source.is_attached());

    scheduler.acquire(now);
    scheduler.stop();
    assert_eq!(scheduler.recheck(now), SchedulerState::Running);
}

#[test]
fn thread_source_ticks_until_stopped() {
    let count = Arc::new(AtomicUsize::new(0));
    let mut source = ThreadRefreshSource::new(200.0);
    assert_eq!(source.interval(), Duration::from_secs_f64(1.0 / 200.0));

    let counter = Arc::clone(&count);
    source
        .start(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    std::thread::sleep(Duration::from_millis(100));
    source.stop();

    let after_stop = count.load(Ordering::SeqCst);
    assert!(after_stop > 0);
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(count.load(Ordering::SeqCst), after_stop);
}

#[test]
fn thread_source_clamps_rate() {
    assert_eq!(
        ThreadRefreshSource::new(0.0).interval(),
        Duration::from_secs(1)
    );
    assert_eq!(
        ThreadRefreshSource::new(1_000.0).interval(),
        Duration::from_secs_f64(1.0 / 240.0)
    );
}

#[test]
fn thread_source_agrees_with_configured_rate() {
    let mut config = crate::config::SchedulerConfig::default();
    for hz in [f64::NAN, -5.0, 0.5, 144.0, 10_000.0] {
        config.refresh_rate_hz = hz;
        assert_eq!(
            ThreadRefreshSource::new(hz).interval(),
            Duration::from_secs_f64(1.0 / config.refresh_rate()),
            "rate {}",
            hz
        );
    }
}
