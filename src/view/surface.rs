//! Presentable surfaces owned by host views.

use anyhow::Result;
use log::{debug, trace};
use std::sync::{Arc, Mutex, PoisonError};

/// Drawable size in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelSize {
    pub width: i32,
    pub height: i32,
}

impl PixelSize {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

/// View bounds in logical points plus the display scale they are shown at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewGeometry {
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

impl ViewGeometry {
    pub fn new(width: f64, height: f64, scale: f64) -> Self {
        Self {
            width,
            height,
            scale,
        }
    }

    /// `bounds x scale`, rounded to the nearest pixel and never negative.
    pub fn pixel_size(&self) -> PixelSize {
        let to_px = |points: f64| {
            let px = (points * self.scale).round();
            if px.is_finite() && px > 0.0 {
                px.min(i32::MAX as f64) as i32
            } else {
                0
            }
        };
        PixelSize::new(to_px(self.width), to_px(self.height))
    }
}

/// A GPU-compositable drawable owned by exactly one host view.
///
/// The engine only ever sees [`layer_address`](PresentableSurface::layer_address),
/// a borrowed reference that must be unregistered before the surface drops.
pub trait PresentableSurface: Send {
    fn layer_address(&self) -> u64;
    fn set_drawable_size(&mut self, size: PixelSize);
    fn set_contents_scale(&mut self, scale: f64);
}

/// Creates surfaces for newly attached views.
pub trait SurfaceFactory: Send + Sync {
    fn create_surface(&self, size: PixelSize, scale: f64) -> Result<Box<dyn PresentableSurface>>;
}

/// What happened to a headless surface, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Created { layer: u64, size: PixelSize },
    Resized { layer: u64, size: PixelSize },
    Rescaled { layer: u64, scale: f64 },
    Dropped { layer: u64 },
}

pub type SurfaceLog = Arc<Mutex<Vec<SurfaceEvent>>>;

/// Backing storage whose heap address stands in for a compositor layer.
#[derive(Debug)]
struct HeadlessLayer {
    size: PixelSize,
    scale: f64,
}

/// Surface without a compositor, for headless hosts and tests.
pub struct HeadlessSurface {
    layer: Box<HeadlessLayer>,
    log: SurfaceLog,
}

impl HeadlessSurface {
    pub fn size(&self) -> PixelSize {
        self.layer.size
    }

    pub fn scale(&self) -> f64 {
        self.layer.scale
    }

    fn record(&self, event: SurfaceEvent) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl PresentableSurface for HeadlessSurface {
    fn layer_address(&self) -> u64 {
        &*self.layer as *const HeadlessLayer as u64
    }

    fn set_drawable_size(&mut self, size: PixelSize) {
        trace!("HeadlessSurface: drawable {}x{}", size.width, size.height);
        self.layer.size = size;
        self.record(SurfaceEvent::Resized {
            layer: self.layer_address(),
            size,
        });
    }

    fn set_contents_scale(&mut self, scale: f64) {
        self.layer.scale = scale;
        self.record(SurfaceEvent::Rescaled {
            layer: self.layer_address(),
            scale,
        });
    }
}

impl Drop for HeadlessSurface {
    fn drop(&mut self) {
        debug!("HeadlessSurface: Releasing layer {:#x}", self.layer_address());
        self.record(SurfaceEvent::Dropped {
            layer: self.layer_address(),
        });
    }
}

#[derive(Default, Clone)]
pub struct HeadlessSurfaceFactory {
    log: SurfaceLog,
}

impl HeadlessSurfaceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events from every surface this factory created.
    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SurfaceFactory for HeadlessSurfaceFactory {
    fn create_surface(&self, size: PixelSize, scale: f64) -> Result<Box<dyn PresentableSurface>> {
        let surface = HeadlessSurface {
            layer: Box::new(HeadlessLayer { size, scale }),
            log: Arc::clone(&self.log),
        };
        surface.record(SurfaceEvent::Created {
            layer: surface.layer_address(),
            size,
        });
        Ok(Box::new(surface))
    }
}
