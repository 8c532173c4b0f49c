// SPDX-License-Identifier: GPL-3.0-only

//! Per-output buffer pipeline for external outputs.
//!
//! Three stages: a pending FIFO, one "wait" slot (committed to hardware,
//! completion outstanding) and one "show" slot (on screen). At most one
//! commit is ever in flight per output; producers throttle themselves
//! through their own pacing, not here.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::backend::buffer::BufferRef;
use crate::backend::{DeviceError, HwLayer, HwOutput};

pub struct OutputPipeline {
    output: Arc<dyn HwOutput>,
    layer: Arc<dyn HwLayer>,
    pending: VecDeque<BufferRef>,
    wait: Option<BufferRef>,
    show: Option<BufferRef>,
}

impl OutputPipeline {
    pub fn new(output: Arc<dyn HwOutput>, layer: Arc<dyn HwLayer>) -> OutputPipeline {
        OutputPipeline {
            output,
            layer,
            pending: VecDeque::new(),
            wait: None,
            show: None,
        }
    }

    pub fn layer(&self) -> &Arc<dyn HwLayer> {
        &self.layer
    }

    /// Display a buffer: commit immediately if nothing is in flight,
    /// otherwise append to the pending FIFO.
    pub fn show(&mut self, buffer: BufferRef) -> Result<(), DeviceError> {
        if self.wait.is_none() {
            self.commit(buffer)
        } else {
            self.pending.push_back(buffer);
            Ok(())
        }
    }

    fn commit(&mut self, buffer: BufferRef) -> Result<(), DeviceError> {
        self.layer.set_surface(Some(buffer.id()))?;
        self.output.commit()?;
        buffer.mark_in_use(true);
        self.wait = Some(buffer);
        Ok(())
    }

    /// Hardware reported the in-flight commit as done: the previous "show"
    /// buffer is now fully superseded and handed back to the caller, the
    /// completed buffer takes its place, and the next pending buffer (if
    /// any) goes out.
    pub fn on_commit_done(&mut self) -> Option<BufferRef> {
        let Some(done) = self.wait.take() else {
            // commit was cancelled under us, nothing to promote
            trace!("Commit completion for cleared pipeline");
            return None;
        };
        let retired = self.show.replace(done);
        if let Some(retired) = retired.as_ref() {
            retired.mark_in_use(false);
        }
        while let Some(next) = self.pending.pop_front() {
            match self.commit(next) {
                Ok(()) => break,
                Err(err) => {
                    warn!(?err, "Pipeline commit failed, dropping buffer");
                }
            }
        }
        retired
    }

    /// Drop every tracked buffer. Buffers a client may still be waiting on
    /// are released on the spot, which is exactly what a forced release is.
    pub fn clear(&mut self) {
        for buffer in self.pending.drain(..) {
            drop(buffer);
        }
        if let Some(buffer) = self.wait.take() {
            buffer.mark_in_use(false);
        }
        if let Some(buffer) = self.show.take() {
            buffer.mark_in_use(false);
        }
    }

    pub fn in_flight(&self) -> usize {
        usize::from(self.wait.is_some())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn showing(&self) -> Option<&BufferRef> {
        self.show.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::buffer::BufferRegistry;
    use crate::backend::testing::FakeDevice;
    use crate::backend::{DisplayDevice, HwSurface, OutputId, PixelFormat, SurfaceId};
    use crate::utils::geometry::Size;

    fn pipeline_fixture() -> (FakeDevice, BufferRegistry, OutputPipeline) {
        let device = FakeDevice::new_dual_output();
        device.connect(OutputId(1));
        let registry = BufferRegistry::new();
        let output = device.output(OutputId(1)).unwrap();
        let layer = output.layers().into_iter().next().unwrap();
        let pipeline = OutputPipeline::new(output, layer);
        (device, registry, pipeline)
    }

    fn hw_surface(id: u64) -> HwSurface {
        HwSurface {
            id: SurfaceId(id),
            size: Size::new(1920, 1080),
            pitch: 1920 * 4,
            format: PixelFormat::Argb8888,
        }
    }

    #[test]
    fn one_in_flight_rest_pending_in_fifo_order() {
        let (device, registry, mut pipeline) = pipeline_fixture();
        for id in 1..=4 {
            pipeline.show(registry.acquire(hw_surface(id))).unwrap();
        }
        assert_eq!(pipeline.in_flight(), 1);
        assert_eq!(pipeline.pending_len(), 3);
        assert_eq!(device.pending_output_commits(OutputId(1)), 1);

        for expected_shown in 1..=4u64 {
            device.complete_output_commit(OutputId(1)).unwrap();
            pipeline.on_commit_done();
            assert!(pipeline.in_flight() <= 1);
            assert_eq!(
                pipeline.showing().unwrap().id(),
                SurfaceId(expected_shown),
                "FIFO order violated"
            );
        }
        assert_eq!(pipeline.pending_len(), 0);
        assert_eq!(pipeline.in_flight(), 0);
    }

    #[test]
    fn retired_buffer_handed_back_and_released() {
        let (device, registry, mut pipeline) = pipeline_fixture();
        let first = registry.acquire(hw_surface(1));
        let first_watch = first.buffer().clone();
        pipeline.show(first).unwrap();
        pipeline.show(registry.acquire(hw_surface(2))).unwrap();

        device.complete_output_commit(OutputId(1)).unwrap();
        assert!(pipeline.on_commit_done().is_none());
        device.complete_output_commit(OutputId(1)).unwrap();
        let retired = pipeline.on_commit_done().expect("first buffer retired");
        assert_eq!(retired.id(), SurfaceId(1));
        assert!(!first_watch.in_use());
        drop(retired);
        assert!(first_watch.is_destroyed());
    }

    #[test]
    fn clear_flushes_without_dangling_in_use() {
        let (_device, registry, mut pipeline) = pipeline_fixture();
        let watches: Vec<_> = (1..=3)
            .map(|id| {
                let buffer = registry.acquire(hw_surface(id));
                let watch = buffer.buffer().clone();
                pipeline.show(buffer).unwrap();
                watch
            })
            .collect();
        pipeline.clear();
        for watch in watches {
            assert!(watch.is_destroyed());
        }
        // a completion arriving after the clear is a no-op
        assert!(pipeline.on_commit_done().is_none());
    }
}
