//! Engine Surface Bridge.
//!
//! Connects a host application's views to an externally loaded rendering
//! engine that exposes a C function table: resolves the table at runtime,
//! binds host surfaces to engine windows once the engine is ready, drives the
//! engine's frame tick from a refresh signal, and forwards view input.

pub mod binder;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod plugin;
pub mod scheduler;
pub mod symbols;
pub mod testing;
pub mod timer;
pub mod view;

pub use binder::{BindOutcome, BindingState, SurfaceBinder};
pub use channel::{CommandChannel, MethodCall, MethodResponse};
pub use config::Config;
pub use engine::{EngineApi, EngineResult, EngineSurfaceHandle, EngineWindowId, SerializedEngine};
pub use error::{CommandError, EngineCallError};
pub use host::{HostHandle, HostLoop, HostMessage, ViewEvent};
pub use plugin::{EnginePlugin, VIEW_TYPE};
pub use scheduler::{RenderScheduler, SchedulerState};
pub use symbols::{EntryPoint, EntryPointTable};
pub use view::{BridgeContext, HostViewBridge, ViewGeometry};
