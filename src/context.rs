use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::{fmt, fmt::Display};

use log::debug;

use crate::{Accelerator, DecodeError, Profile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

impl Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextInfo {
    pub profile: Profile,
    pub width: u32,
    pub height: u32,
    pub surface_count: usize,
}

impl ContextInfo {
    fn validate(&self) -> Result<(), DecodeError> {
        if self.width == 0 || self.height == 0 {
            return Err(DecodeError::InvalidParameter(format!(
                "picture size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.surface_count == 0 || u32::try_from(self.surface_count).is_err() {
            return Err(DecodeError::InvalidParameter(format!(
                "surface count {} is out of range",
                self.surface_count
            )));
        }
        Ok(())
    }
}

impl Display for ContextInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ContextInfo(profile={}, size={}x{}, surface_count={})",
            self.profile, self.width, self.height, self.surface_count
        )
    }
}

#[derive(Debug)]
struct PoolShared {
    free: Mutex<Vec<SurfaceId>>,
}

impl PoolShared {
    fn free(&self) -> MutexGuard<'_, Vec<SurfaceId>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed set of decode surfaces belonging to one context generation.
#[derive(Debug)]
pub struct SurfacePool {
    shared: Arc<PoolShared>,
    capacity: usize,
    generation: u64,
}

impl SurfacePool {
    fn new(capacity: usize, generation: u64) -> Self {
        let free = (0..capacity as u32).rev().map(SurfaceId).collect();
        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(free),
            }),
            capacity,
            generation,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.shared.free().len()
    }

    pub fn try_acquire(&self) -> Option<SurfaceProxy> {
        let id = self.shared.free().pop()?;
        Some(SurfaceProxy {
            id,
            generation: self.generation,
            pool: Arc::downgrade(&self.shared),
        })
    }
}

/// A decoded picture's surface, handed out to the consumer.
///
/// Dropping the proxy returns the surface to the pool it came from. The
/// proxy only holds a weak link: once the context is reset, surfaces of the
/// old generation are simply forgotten.
#[derive(Debug)]
pub struct SurfaceProxy {
    id: SurfaceId,
    generation: u64,
    pool: Weak<PoolShared>,
}

impl SurfaceProxy {
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        self.pool.strong_count() == 0
    }
}

impl Drop for SurfaceProxy {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.free().push(self.id);
        }
    }
}

#[derive(Debug)]
pub struct HwContext {
    info: ContextInfo,
    pool: SurfacePool,
}

impl HwContext {
    pub fn info(&self) -> &ContextInfo {
        &self.info
    }

    pub fn generation(&self) -> u64 {
        self.pool.generation
    }

    pub fn surface_count(&self) -> usize {
        self.pool.capacity()
    }

    pub fn free_surfaces(&self) -> usize {
        self.pool.free_count()
    }

    pub fn acquire_surface(&self) -> Result<SurfaceProxy, DecodeError> {
        self.pool.try_acquire().ok_or(DecodeError::NoSurface)
    }
}

pub struct ContextManager {
    device: Box<dyn Accelerator>,
    context: Option<HwContext>,
    next_generation: u64,
}

impl ContextManager {
    pub fn new(device: Box<dyn Accelerator>) -> Self {
        Self {
            device,
            context: None,
            next_generation: 1,
        }
    }

    pub fn context(&self) -> Option<&HwContext> {
        self.context.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn Accelerator {
        self.device.as_mut()
    }

    /// Creates the context on first use, or resets it in place when `info`
    /// differs from the active one. A reset allocates a new surface pool.
    pub fn ensure_context(&mut self, info: &ContextInfo) -> Result<&HwContext, DecodeError> {
        info.validate()?;
        let unchanged = self
            .context
            .as_ref()
            .is_some_and(|context| context.info == *info);
        if !unchanged {
            let pool = SurfacePool::new(info.surface_count, self.next_generation);
            if let Some(context) = self.context.as_mut() {
                self.device.reset_context(info)?;
                debug!("reset decode context: {} -> {}", context.info, info);
                context.info = *info;
                context.pool = pool;
            } else {
                self.device.create_context(info)?;
                debug!("created decode context: {info}");
                self.context = Some(HwContext { info: *info, pool });
            }
            self.next_generation += 1;
        }
        self.context
            .as_ref()
            .ok_or_else(|| DecodeError::Context("decode context is missing".to_string()))
    }

    /// Backpressure check: a context with no free surface cannot accept
    /// another frame.
    pub fn check_status(&self) -> Result<(), DecodeError> {
        match &self.context {
            Some(context) if context.free_surfaces() < 1 => Err(DecodeError::NoSurface),
            _ => Ok(()),
        }
    }
}
