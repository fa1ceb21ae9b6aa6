use super::*;
use crate::binder::BindingState;
use crate::scheduler::{ManualRefreshSource, SchedulerState};
use crate::symbols::EntryPoint;
use crate::testing::{EngineCall, MockEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use test_log::test;

const TITLE: &str = "Test View";

struct Fixture {
    engine: Arc<MockEngine>,
    source: ManualRefreshSource,
    factory: HeadlessSurfaceFactory,
    context: BridgeContext,
}

impl Fixture {
    fn new(engine: MockEngine) -> Self {
        let engine = Arc::new(engine);
        let config = Arc::new(Config::default());
        let source = ManualRefreshSource::new();
        let dyn_engine: Arc<dyn EngineApi> = engine.clone();
        let scheduler = Arc::new(RenderScheduler::new(
            Arc::clone(&dyn_engine),
            Box::new(source.clone()),
            config.scheduler.poll_interval(),
        ));
        Self {
            engine,
            source,
            factory: HeadlessSurfaceFactory::new(),
            context: BridgeContext {
                engine: dyn_engine,
                scheduler,
                config,
            },
        }
    }

    fn view(&self, id: i64) -> HostViewBridge {
        HostViewBridge::new(
            id,
            self.context.clone(),
            Arc::new(self.factory.clone()),
            TITLE,
        )
    }

    fn retry(&self) -> Duration {
        self.context.config.binder.retry_interval()
    }

    fn resizes(&self) -> Vec<(i32, i32)> {
        self.engine
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::ResizeWindow { width, height, .. } => Some((width, height)),
                _ => None,
            })
            .collect()
    }
}

fn geometry(width: f64, height: f64, scale: f64) -> ViewGeometry {
    ViewGeometry::new(width, height, scale)
}

#[test]
fn attach_binds_and_applies_initial_geometry() {
    let fx = Fixture::new(MockEngine::available());
    let mut view = fx.view(1);

    view.attach(geometry(400.0, 300.0, 2.0), Instant::now())
        .unwrap();

    assert_eq!(view.binding_state(), BindingState::Bound);
    assert_eq!(view.window(), Some(EngineWindowId(1)));
    assert_eq!(fx.context.scheduler.state(), SchedulerState::Running);

    let calls = fx.engine.control_calls();
    assert!(calls.contains(&EngineCall::WindowSetTitle(
        TITLE.to_string(),
        EngineWindowId(1)
    )));
    assert!(calls.contains(&EngineCall::SetContentScale(2.0)));
    assert_eq!(
        fx.engine
            .count(|c| matches!(c, EngineCall::ResizeWindow { .. })),
        1
    );
    assert!(calls.contains(&EngineCall::ResizeWindow {
        width: 800,
        height: 600,
        window: EngineWindowId(1),
    }));
}

#[test]
fn geometry_is_deferred_until_bound() {
    let fx = Fixture::new(MockEngine::new());
    let mut view = fx.view(1);
    let t0 = Instant::now();

    view.attach(geometry(100.0, 100.0, 1.0), t0).unwrap();
    view.set_geometry(geometry(320.0, 240.0, 1.0), t0);
    view.set_scale(2.0, t0);

    assert_eq!(view.binding_state(), BindingState::AwaitingEngine);
    assert!(fx.resizes().is_empty());
    assert_eq!(
        fx.engine
            .count(|c| matches!(c, EngineCall::SetContentScale(_))),
        0
    );

    fx.engine.set_available(true);
    view.service(t0 + fx.retry());

    assert_eq!(view.binding_state(), BindingState::Bound);
    assert_eq!(fx.resizes(), vec![(640, 480)]);
    assert_eq!(
        fx.engine
            .count(|c| matches!(c, EngineCall::SetContentScale(_))),
        1
    );
}

#[test]
fn unchanged_pixel_size_is_not_resent() {
    let fx = Fixture::new(MockEngine::available());
    let mut view = fx.view(1);
    let now = Instant::now();
    view.attach(geometry(400.0, 300.0, 1.0), now).unwrap();

    // Rounds to the same pixel size.
    view.set_geometry(geometry(400.2, 299.8, 1.0), now);
    assert_eq!(fx.resizes(), vec![(400, 300)]);

    view.set_geometry(geometry(500.0, 300.0, 1.0), now);
    assert_eq!(fx.resizes(), vec![(400, 300), (500, 300)]);
}

#[test]
fn rejected_resize_is_retried_on_the_next_change() {
    let engine = MockEngine::available();
    engine.fail_next_resizes(1);
    let fx = Fixture::new(engine);
    let mut view = fx.view(1);
    let now = Instant::now();

    view.attach(geometry(400.0, 300.0, 1.0), now).unwrap();
    assert_eq!(fx.resizes(), vec![(400, 300)]);

    view.set_geometry(geometry(400.0, 300.0, 1.0), now);
    view.set_geometry(geometry(400.0, 300.0, 1.0), now);
    assert_eq!(fx.resizes(), vec![(400, 300), (400, 300)]);
}

#[test]
fn scale_change_updates_engine_and_surface() {
    let fx = Fixture::new(MockEngine::available());
    let mut view = fx.view(1);
    let now = Instant::now();
    view.attach(geometry(200.0, 100.0, 1.0), now).unwrap();
    fx.engine.clear_calls();

    view.set_scale(2.0, now);

    assert_eq!(
        fx.engine.control_calls(),
        vec![
            EngineCall::SetContentScale(2.0),
            EngineCall::ResizeWindow {
                width: 400,
                height: 200,
                window: EngineWindowId(1),
            },
        ]
    );
    let events = fx.factory.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, SurfaceEvent::Rescaled { scale, .. } if *scale == 2.0)));
    assert!(events.iter().any(|e| matches!(
        e,
        SurfaceEvent::Resized { size, .. } if *size == PixelSize::new(400, 200)
    )));
}

#[test]
fn invalid_scale_falls_back_to_default() {
    let fx = Fixture::new(MockEngine::available());
    let mut view = fx.view(1);

    view.attach(geometry(10.0, 10.0, f64::NAN), Instant::now())
        .unwrap();

    assert_eq!(view.geometry().scale, 1.0);
    assert_eq!(fx.resizes(), vec![(10, 10)]);
}

#[test]
fn input_is_forwarded_to_bound_window() {
    let fx = Fixture::new(MockEngine::available());
    let mut view = fx.view(1);
    view.attach(geometry(100.0, 100.0, 2.0), Instant::now())
        .unwrap();

    let key = KeyEvent {
        keycode: 65,
        text: Some('a'),
        unshifted: 0,
        physical: 0,
        modifiers: Modifiers::CONTROL,
        pressed: true,
    };
    assert!(view.key_event(&key));
    assert!(view.pointer_event(&PointerEvent::Down {
        index: 0,
        x: 5.0,
        y: 7.5,
        double_click: false,
    }));

    let calls = fx.engine.control_calls();
    assert!(calls.contains(&EngineCall::Key(key.to_engine(), EngineWindowId(1))));
    assert!(calls.iter().any(|c| matches!(
        c,
        EngineCall::TouchPress(press, EngineWindowId(1)) if (press.x, press.y) == (10, 15)
    )));
}

#[test]
fn missing_input_entry_points_drop_events() {
    let fx = Fixture::new(
        MockEngine::available().without(&[EntryPoint::Key, EntryPoint::MouseSetMode]),
    );
    let mut view = fx.view(1);
    view.attach(geometry(100.0, 100.0, 1.0), Instant::now())
        .unwrap();

    let key = KeyEvent {
        keycode: 32,
        text: Some(' '),
        unshifted: 0,
        physical: 49,
        modifiers: Modifiers::empty(),
        pressed: false,
    };
    assert!(!view.key_event(&key));
    assert!(!view.set_pointer_mode(PointerMode::Captured));
    assert_eq!(view.binding_state(), BindingState::Bound);
}

#[test]
fn title_and_window_size_use_the_bound_window() {
    let fx = Fixture::new(MockEngine::available());
    let mut view = fx.view(1);
    assert_eq!(view.window_size(), None);

    view.attach(geometry(64.0, 32.0, 1.0), Instant::now())
        .unwrap();
    view.set_title("Renamed");

    assert_eq!(view.title(), "Renamed");
    assert!(fx.engine.control_calls().contains(&EngineCall::WindowSetTitle(
        "Renamed".to_string(),
        EngineWindowId(1)
    )));
    assert_eq!(view.window_size(), Some(PixelSize::new(64, 32)));
}

struct CheckingSurface {
    engine: Arc<MockEngine>,
    released_first: Arc<AtomicBool>,
}

impl PresentableSurface for CheckingSurface {
    fn layer_address(&self) -> u64 {
        0xFEED
    }
    fn set_drawable_size(&mut self, _size: PixelSize) {}
    fn set_contents_scale(&mut self, _scale: f64) {}
}

impl Drop for CheckingSurface {
    fn drop(&mut self) {
        let calls = self.engine.control_calls();
        let window = calls
            .iter()
            .position(|c| matches!(c, EngineCall::DeleteWindow(_)));
        let surface = calls
            .iter()
            .position(|c| matches!(c, EngineCall::DestroySurface { .. }));
        let ordered = matches!((window, surface), (Some(w), Some(s)) if w < s);
        self.released_first.store(ordered, Ordering::SeqCst);
    }
}

struct CheckingFactory {
    engine: Arc<MockEngine>,
    released_first: Arc<AtomicBool>,
}

impl SurfaceFactory for CheckingFactory {
    fn create_surface(&self, _size: PixelSize, _scale: f64) -> Result<Box<dyn PresentableSurface>> {
        Ok(Box::new(CheckingSurface {
            engine: Arc::clone(&self.engine),
            released_first: Arc::clone(&self.released_first),
        }))
    }
}

#[test]
fn detach_releases_engine_side_before_surface() {
    let fx = Fixture::new(MockEngine::available());
    let released_first = Arc::new(AtomicBool::new(false));
    let factory = CheckingFactory {
        engine: Arc::clone(&fx.engine),
        released_first: Arc::clone(&released_first),
    };
    let mut view = HostViewBridge::new(7, fx.context.clone(), Arc::new(factory), TITLE);
    view.attach(geometry(10.0, 10.0, 1.0), Instant::now())
        .unwrap();

    view.detach();

    assert!(released_first.load(Ordering::SeqCst));
    assert!(!view.is_attached());
    assert_eq!(view.binding_state(), BindingState::Unbound);
}

#[test]
fn detach_waits_for_queued_ticks_before_releasing() {
    let fx = Fixture::new(MockEngine::available());
    fx.engine.set_frame_delay(Duration::from_millis(30));
    let mut view = fx.view(1);
    view.attach(geometry(10.0, 10.0, 1.0), Instant::now())
        .unwrap();

    for _ in 0..3 {
        assert!(fx.source.fire());
    }
    view.detach();
    std::thread::sleep(Duration::from_millis(150));

    let calls = fx.engine.calls();
    let destroyed = calls
        .iter()
        .position(|c| matches!(c, EngineCall::DestroySurface { .. }))
        .unwrap();
    assert!(
        !calls[destroyed..]
            .iter()
            .any(|c| matches!(c, EngineCall::ProcessEvents | EngineCall::SwapBuffers)),
        "engine ticked after teardown: {:?}",
        &calls[destroyed..]
    );
    let stats = fx.context.scheduler.stats();
    assert!(stats.skipped() >= 2);
    assert_eq!(stats.completed() + stats.skipped(), 3);
}

#[test]
fn dropping_a_view_detaches_it() {
    let fx = Fixture::new(MockEngine::available());
    let mut view = fx.view(1);
    view.attach(geometry(10.0, 10.0, 1.0), Instant::now())
        .unwrap();

    drop(view);

    assert!(fx
        .engine
        .control_calls()
        .contains(&EngineCall::DestroySurface { handle: 0x1000 }));
    assert!(matches!(
        fx.factory.events().last(),
        Some(SurfaceEvent::Dropped { .. })
    ));
    assert_eq!(fx.context.scheduler.state(), SchedulerState::Idle);
}

#[test]
fn render_loop_runs_while_any_view_is_attached() {
    let fx = Fixture::new(MockEngine::available());
    let now = Instant::now();
    let mut first = fx.view(1);
    let mut second = fx.view(2);
    first.attach(geometry(10.0, 10.0, 1.0), now).unwrap();
    second.attach(geometry(20.0, 20.0, 1.0), now).unwrap();

    assert_eq!(first.window(), Some(EngineWindowId(1)));
    assert_eq!(second.window(), Some(EngineWindowId(2)));

    first.detach();
    assert_eq!(fx.context.scheduler.state(), SchedulerState::Running);
    assert!(fx.source.fire());

    second.detach();
    assert_eq!(fx.context.scheduler.state(), SchedulerState::Idle);
    assert!(!fx.source.fire());
}

#[test]
fn reattach_gets_a_fresh_window() {
    let fx = Fixture::new(MockEngine::available());
    let mut view = fx.view(1);
    let now = Instant::now();

    view.attach(geometry(10.0, 10.0, 1.0), now).unwrap();
    view.detach();
    view.attach(geometry(10.0, 10.0, 1.0), now).unwrap();

    assert_eq!(view.window(), Some(EngineWindowId(2)));
    assert_eq!(fx.resizes(), vec![(10, 10), (10, 10)]);
}
