// SPDX-License-Identifier: GPL-3.0-only

//! Mirror pixel path of an external output: a post-processing object
//! continuously samples whatever the primary output is scanning out into a
//! small ring of converted surfaces, letterboxed to best fit the external
//! mode.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::backend::buffer::{BufferRef, BufferRegistry};
use crate::backend::{
    DeviceError, DisplayDevice, HwOutput, PixelFormat, PostProcessor, PpId, PpInfo, SurfaceId,
};
use crate::utils::geometry::{Buffer as BufferCoords, Physical, Rectangle, Size, Transform};
use crate::viewport::fit_aspect;

/// Number of converted destination surfaces cycled through the pipeline.
pub const MIRROR_QUEUE_SLOTS: usize = 3;

pub struct MirrorPath {
    pp: Arc<dyn PostProcessor>,
    source: Arc<dyn HwOutput>,
    slots: SmallVec<[BufferRef; MIRROR_QUEUE_SLOTS]>,
    active: bool,
}

impl MirrorPath {
    /// Set up conversion from the primary output into `dst_size` surfaces
    /// and kick off one conversion per slot.
    pub fn start(
        device: &Arc<dyn DisplayDevice>,
        registry: &BufferRegistry,
        source: Arc<dyn HwOutput>,
        dst_size: Size<Physical>,
    ) -> Result<MirrorPath, DeviceError> {
        let src_size = source
            .current_mode()
            .ok_or(DeviceError::InvalidParameter("mirror source has no mode"))?
            .size;
        let dst_bounds: Rectangle<BufferCoords> = Rectangle::from_size(dst_size.retag());
        let letterboxed = fit_aspect(src_size, dst_bounds);

        let pp = device.create_pp()?;
        pp.set_info(&PpInfo {
            src: Rectangle::from_size(src_size.retag()),
            src_format: PixelFormat::Argb8888,
            dst: letterboxed,
            dst_format: PixelFormat::Argb8888,
            transform: Transform::Normal,
        })?;

        let mut slots = SmallVec::new();
        for _ in 0..MIRROR_QUEUE_SLOTS {
            let surface = device.allocate_surface(dst_size.retag(), PixelFormat::Argb8888)?;
            let buffer = registry.acquire(surface);
            let device = device.clone();
            buffer.register_free_callback(move |surface| {
                device.destroy_surface(surface.id);
            });
            slots.push(buffer);
        }

        let mut mirror = MirrorPath {
            pp,
            source,
            slots,
            active: true,
        };
        for index in 0..MIRROR_QUEUE_SLOTS {
            mirror.convert_into_index(index);
        }
        Ok(mirror)
    }

    pub fn pp_id(&self) -> PpId {
        self.pp.id()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn convert_into_index(&mut self, index: usize) {
        let Some(source_surface) = self.source.displaying_surface() else {
            // nothing on the primary plane yet, the slot is re-fed on the
            // next release
            trace!("Mirror source empty, skipping frame");
            return;
        };
        let dst = self.slots[index].id();
        if let Err(err) = self.pp.convert(source_surface, dst) {
            warn!(?err, "Mirror conversion failed, skipping frame");
        }
    }

    /// A conversion finished; hand the slot out for display.
    pub fn slot_for(&self, dst: SurfaceId) -> Option<BufferRef> {
        if !self.active {
            return None;
        }
        self.slots.iter().find(|slot| slot.id() == dst).cloned()
    }

    /// The display pipeline released a converted buffer; sample the primary
    /// again into the same slot while mirroring is still on.
    pub fn requeue(&mut self, released: &BufferRef) {
        if !self.active {
            return;
        }
        if let Some(index) = self.slots.iter().position(|slot| slot == released) {
            self.convert_into_index(index);
        }
    }

    /// Re-feed every slot that is not currently referenced elsewhere.
    pub fn resume(&mut self) {
        if !self.active {
            return;
        }
        for index in 0..self.slots.len() {
            if self.slots[index].ref_count() == 1 && !self.slots[index].in_use() {
                self.convert_into_index(index);
            }
        }
    }

    /// Stop sourcing new frames. Slots drop here; ones still referenced by
    /// the pipeline die on their release.
    pub fn stop(&mut self) {
        self.active = false;
        self.slots.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::testing::FakeDevice;
    use crate::backend::OutputId;

    #[test]
    fn starts_one_conversion_per_slot() {
        let device = FakeDevice::new_dual_output();
        device.set_primary_displaying(OutputId(0), Some(SurfaceId(42)));
        let registry = BufferRegistry::new();
        let device: Arc<dyn DisplayDevice> = Arc::new(device.clone());
        let source = device.output(OutputId(0)).unwrap();
        let mirror =
            MirrorPath::start(&device, &registry, source, Size::new(1920, 1080)).unwrap();
        assert!(mirror.is_active());
        assert_eq!(registry.len(), MIRROR_QUEUE_SLOTS);
    }

    #[test]
    fn stop_releases_unreferenced_slots() {
        let fake = FakeDevice::new_dual_output();
        fake.set_primary_displaying(OutputId(0), Some(SurfaceId(42)));
        let registry = BufferRegistry::new();
        let device: Arc<dyn DisplayDevice> = Arc::new(fake.clone());
        let source = device.output(OutputId(0)).unwrap();
        let mut mirror =
            MirrorPath::start(&device, &registry, source, Size::new(1920, 1080)).unwrap();
        mirror.stop();
        assert_eq!(registry.len(), 0);
        assert_eq!(fake.destroyed_surfaces().len(), MIRROR_QUEUE_SLOTS);
    }
}
