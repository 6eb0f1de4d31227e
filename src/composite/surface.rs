use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::foundation::error::{ImgseqError, ImgseqResult};

/// Byte layout of an encoder input surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    #[default]
    #[serde(rename = "rgba", alias = "rgba8")]
    Rgba8,
    #[serde(rename = "bgra", alias = "bgra8")]
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        4
    }

    /// Name of this layout in ffmpeg's `-pix_fmt` vocabulary.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::Rgba8 => "rgba",
            Self::Bgra8 => "bgra",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl SurfaceDesc {
    pub fn stride(self) -> usize {
        (self.width as usize).saturating_mul(self.format.bytes_per_pixel())
    }

    pub fn byte_len(self) -> usize {
        self.stride().saturating_mul(self.height as usize)
    }
}

/// CPU pixel buffer in the encoder's input format.
#[derive(Debug)]
pub struct Surface {
    desc: SurfaceDesc,
    data: Vec<u8>,
}

impl Surface {
    pub fn new(desc: SurfaceDesc) -> Self {
        Self {
            desc,
            data: vec![0u8; desc.byte_len()],
        }
    }

    pub fn desc(&self) -> SurfaceDesc {
        self.desc
    }

    /// Read-only view of the pixels. Only reachable while no [`SurfaceLock`] is alive.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Lock the surface for writing. The lock is released when the guard drops; a surface can only
    /// be handed to the encoder by value, so a live lock makes submission a compile error.
    pub fn lock(&mut self) -> SurfaceLock<'_> {
        SurfaceLock {
            desc: self.desc,
            data: &mut self.data,
        }
    }
}

/// Exclusive write access to a [`Surface`].
pub struct SurfaceLock<'a> {
    desc: SurfaceDesc,
    data: &'a mut [u8],
}

impl SurfaceLock<'_> {
    pub fn desc(&self) -> SurfaceDesc {
        self.desc
    }

    pub fn stride(&self) -> usize {
        self.desc.stride()
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    allocated: AtomicUsize,
    reused: AtomicU64,
    dropped_on_release: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SurfacePoolStats {
    pub capacity: usize,
    pub allocated: usize,
    pub reused: u64,
    pub available: usize,
    pub dropped_on_release: u64,
}

/// Bounded pool of same-sized surfaces.
///
/// At most `capacity` surfaces exist at once. Surfaces are allocated lazily and come back to the
/// pool when their [`PooledSurface`] handle drops, wherever that happens (usually on the encoder's
/// input thread once the pixels have been consumed). When every surface is in flight,
/// [`SurfacePool::acquire`] blocks, which is what bounds the frame backlog.
pub struct SurfacePool {
    desc: SurfaceDesc,
    capacity: usize,
    free_tx: Sender<Surface>,
    free_rx: Receiver<Surface>,
    counters: Arc<PoolCounters>,
}

impl SurfacePool {
    pub fn new(desc: SurfaceDesc, capacity: usize) -> ImgseqResult<Self> {
        if capacity == 0 {
            return Err(ImgseqError::configuration(
                "surface pool capacity must be > 0",
            ));
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(ImgseqError::configuration(
                "surface width/height must be non-zero",
            ));
        }
        let (free_tx, free_rx) = crossbeam_channel::bounded(capacity);
        Ok(Self {
            desc,
            capacity,
            free_tx,
            free_rx,
            counters: Arc::new(PoolCounters::default()),
        })
    }

    pub fn desc(&self) -> SurfaceDesc {
        self.desc
    }

    pub fn stats(&self) -> SurfacePoolStats {
        SurfacePoolStats {
            capacity: self.capacity,
            allocated: self.counters.allocated.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            available: self.free_rx.len(),
            dropped_on_release: self.counters.dropped_on_release.load(Ordering::Relaxed),
        }
    }

    /// Take a free surface, allocating one if the pool has not reached capacity, otherwise waiting
    /// up to `timeout` for one to be returned.
    pub fn acquire(&self, timeout: Duration) -> ImgseqResult<PooledSurface> {
        if let Ok(surface) = self.free_rx.try_recv() {
            self.counters.reused.fetch_add(1, Ordering::Relaxed);
            return Ok(self.wrap(surface));
        }

        let grew = self
            .counters
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok();
        if grew {
            return Ok(self.wrap(Surface::new(self.desc)));
        }

        match self.free_rx.recv_timeout(timeout) {
            Ok(surface) => {
                self.counters.reused.fetch_add(1, Ordering::Relaxed);
                Ok(self.wrap(surface))
            }
            Err(RecvTimeoutError::Timeout) => Err(ImgseqError::protocol(format!(
                "surface pool exhausted: no surface returned within {timeout:?}"
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ImgseqError::protocol("surface pool disconnected"))
            }
        }
    }

    fn wrap(&self, surface: Surface) -> PooledSurface {
        PooledSurface {
            surface: Some(surface),
            home: self.free_tx.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

/// A surface on loan from a [`SurfacePool`]. Returns itself to the pool on drop.
pub struct PooledSurface {
    surface: Option<Surface>,
    home: Sender<Surface>,
    counters: Arc<PoolCounters>,
}

impl PooledSurface {
    /// Detach from the pool, e.g. for a one-off surface in tests.
    pub fn detached(desc: SurfaceDesc) -> Self {
        let (home, _) = crossbeam_channel::bounded(1);
        Self {
            surface: Some(Surface::new(desc)),
            home,
            counters: Arc::new(PoolCounters::default()),
        }
    }
}

impl std::ops::Deref for PooledSurface {
    type Target = Surface;

    fn deref(&self) -> &Surface {
        self.surface
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled surface accessed after release"))
    }
}

impl std::ops::DerefMut for PooledSurface {
    fn deref_mut(&mut self) -> &mut Surface {
        self.surface
            .as_mut()
            .unwrap_or_else(|| unreachable!("pooled surface accessed after release"))
    }
}

impl Drop for PooledSurface {
    fn drop(&mut self) {
        if let Some(surface) = self.surface.take()
            && self.home.try_send(surface).is_err()
        {
            // Pool already gone (session teardown) or a detached surface.
            self.counters
                .dropped_on_release
                .fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for PooledSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSurface")
            .field("desc", &self.surface.as_ref().map(Surface::desc))
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/composite/surface.rs"]
mod tests;
