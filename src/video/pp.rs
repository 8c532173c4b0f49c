// SPDX-License-Identifier: GPL-3.0-only

//! Post-processing support for the video path: a small round-robin pool of
//! scratch surfaces the converter writes into.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::backend::buffer::{BufferRef, BufferRegistry};
use crate::backend::{DeviceError, DisplayDevice, PixelFormat, PostProcessor, PpId};
use crate::utils::geometry::{Buffer as BufferCoords, Size};

/// Upper bound of conversion scratch buffers cycled per surface.
pub const PP_POOL_SIZE: usize = 5;

fn gcd(a: i32, b: i32) -> i32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: i32, b: i32) -> i32 {
    a / gcd(a, b) * b
}

/// Width of a pool buffer honoring both the output's and the converter's
/// alignment. The driver either reports both alignments or neither; exactly
/// one being zero is a driver bug we refuse to guess around.
pub fn pool_buffer_size(
    requested: Size<BufferCoords>,
    output_align: i32,
    pp_align: i32,
) -> Result<Size<BufferCoords>, DeviceError> {
    let align = match (output_align, pp_align) {
        (0, 0) => 1,
        (a, b) if a > 0 && b > 0 => lcm(a, b),
        _ => return Err(DeviceError::InvalidAlign),
    };
    let w = (requested.w + align - 1) / align * align;
    Ok(Size::new(w, requested.h))
}

pub struct PpPool {
    pp: Arc<dyn PostProcessor>,
    device: Arc<dyn DisplayDevice>,
    buffers: SmallVec<[BufferRef; PP_POOL_SIZE]>,
    next: usize,
    size: Size<BufferCoords>,
    format: PixelFormat,
}

impl PpPool {
    pub fn new(
        device: Arc<dyn DisplayDevice>,
        pp: Arc<dyn PostProcessor>,
    ) -> PpPool {
        PpPool {
            pp,
            device,
            buffers: SmallVec::new(),
            next: 0,
            size: Size::default(),
            format: PixelFormat::Argb8888,
        }
    }

    pub fn pp(&self) -> &Arc<dyn PostProcessor> {
        &self.pp
    }

    pub fn pp_id(&self) -> PpId {
        self.pp.id()
    }

    /// (Re)allocate the whole pool for the given destination size. A size or
    /// format change throws every scratch buffer away; in-flight ones are
    /// kept alive by their outstanding references and freed on release.
    pub fn ensure(
        &mut self,
        registry: &BufferRegistry,
        requested: Size<BufferCoords>,
        format: PixelFormat,
        output_align: i32,
    ) -> Result<(), DeviceError> {
        let constraints = self.pp.size_constraints();
        let size = pool_buffer_size(requested, output_align, constraints.align)?;
        if size == self.size && format == self.format && !self.buffers.is_empty() {
            return Ok(());
        }
        trace!(?size, ?format, "Reallocating pp pool");
        self.buffers.clear();
        self.next = 0;
        for _ in 0..PP_POOL_SIZE {
            let surface = self.device.allocate_surface(size, format)?;
            let buffer = registry.acquire(surface);
            let device = self.device.clone();
            buffer.register_free_callback(move |surface| {
                device.destroy_surface(surface.id);
            });
            self.buffers.push(buffer);
        }
        self.size = size;
        self.format = format;
        Ok(())
    }

    /// Next scratch buffer not currently referenced outside the pool,
    /// starting at the round-robin cursor.
    pub fn acquire_free(&mut self) -> Option<BufferRef> {
        if self.buffers.is_empty() {
            return None;
        }
        for offset in 0..self.buffers.len() {
            let index = (self.next + offset) % self.buffers.len();
            let buffer = &self.buffers[index];
            if buffer.ref_count() == 1 && !buffer.in_use() {
                self.next = (index + 1) % self.buffers.len();
                return Some(buffer.clone());
            }
        }
        warn!("No free conversion buffer, dropping frame");
        None
    }
}
