// SPDX-License-Identifier: GPL-3.0-only

//! Hardware video-plane renderer.
//!
//! Each video-capable surface runs a small state machine around three buffer
//! queues: `waiting` (attached, not yet committed), `committed` (commit
//! issued, completion pending) and `current` (what the hardware reports as
//! displaying). Commit completion and vblank advance the queues; when a
//! commit cannot be issued the same advancement runs synthetically so no
//! reference is left behind.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::backend::buffer::{BufferRef, BufferRegistry};
use crate::backend::layers::LayerDirectory;
use crate::backend::{
    DisplayDevice, Dpms, HwLayer, HwSurface, LayerCaps, LayerGeometry, LayerId, OutputId,
    PixelFormat, PpId, SurfaceId,
};
use crate::shell::{ShellProxy, WindowHandle};
use crate::utils::geometry::{Buffer as BufferCoords, Physical, Rectangle, Transform};
use crate::utils::id_gen;
use crate::wayland::protocols::video::{VideoEvent, VideoHandler, VideoObjectId, VideoRequest};
use crate::wayland::protocols::{ClientId, ClientSink};

pub mod pp;

use pp::PpPool;

id_gen!(next_video_id);

/// Resolved placement of a video surface, in the coordinate spaces the
/// hardware wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoGeometry {
    pub src: Rectangle<BufferCoords>,
    pub dst: Rectangle<Physical>,
    pub transform: Transform,
}

/// Whether showing `format` at `geometry` on `layer` needs a conversion
/// pass first. A layer with the VIDEO capability handles everything itself.
pub fn needs_post_processing(
    layer: &dyn HwLayer,
    geometry: &VideoGeometry,
    format: PixelFormat,
) -> bool {
    let caps = layer.caps();
    if caps.contains(LayerCaps::VIDEO) {
        return false;
    }
    let format_ok = layer.formats().contains(&format);
    let size_ok = geometry.src.size == geometry.dst.size.retag() || caps.contains(LayerCaps::SCALE);
    let transform_ok =
        geometry.transform == Transform::Normal || caps.contains(LayerCaps::TRANSFORM);
    !(format_ok && size_ok && transform_ok)
}

struct VideoSurface {
    id: VideoObjectId,
    #[allow(dead_code)]
    client: ClientId,
    window: WindowHandle,
    output: OutputId,
    sink: ClientSink<VideoEvent>,

    layer: Option<Arc<dyn HwLayer>>,
    geometry: Option<VideoGeometry>,

    waiting: VecDeque<BufferRef>,
    committed: VecDeque<BufferRef>,
    current: Option<BufferRef>,
    vblank_pending: bool,
    plane_hook_pending: bool,

    pp: Option<PpPool>,
    /// Conversions in flight: source kept referenced until the converter is
    /// done with it, destination shown afterwards.
    pp_jobs: VecDeque<(BufferRef, BufferRef)>,

    pending_attributes: Vec<(String, i64)>,
    allowed_attributes: Vec<String>,
    disallowed_attributes: Vec<String>,
    deferred_unmute: bool,
    follow_topmost: bool,

    destroyed: bool,
}

impl VideoSurface {
    fn queues_disjoint(&self) -> bool {
        let waiting: Vec<SurfaceId> = self.waiting.iter().map(|b| b.id()).collect();
        let committed: Vec<SurfaceId> = self.committed.iter().map(|b| b.id()).collect();
        let current = self.current.as_ref().map(|b| b.id());
        waiting.iter().all(|id| !committed.contains(id) && Some(*id) != current)
            && committed.iter().all(|id| Some(*id) != current)
    }
}

pub struct VideoManager {
    device: Arc<dyn DisplayDevice>,
    registry: BufferRegistry,
    layers: Arc<Mutex<LayerDirectory>>,
    shell: Arc<dyn ShellProxy>,
    primary_output: OutputId,
    surfaces: IndexMap<VideoObjectId, VideoSurface>,
}

impl VideoManager {
    pub fn new(
        device: Arc<dyn DisplayDevice>,
        registry: BufferRegistry,
        layers: Arc<Mutex<LayerDirectory>>,
        shell: Arc<dyn ShellProxy>,
        primary_output: OutputId,
    ) -> VideoManager {
        VideoManager {
            device,
            registry,
            layers,
            shell,
            primary_output,
            surfaces: IndexMap::new(),
        }
    }

    pub fn object_for_window(&self, window: WindowHandle) -> Option<VideoObjectId> {
        self.surfaces
            .values()
            .find(|surface| surface.window == window)
            .map(|surface| surface.id)
    }

    pub fn windows(&self) -> Vec<(VideoObjectId, WindowHandle)> {
        self.surfaces
            .values()
            .map(|surface| (surface.id, surface.window))
            .collect()
    }

    /// Viewport resolution produced a new placement for this surface.
    pub fn set_geometry(&mut self, object: VideoObjectId, geometry: VideoGeometry) {
        if let Some(surface) = self.surfaces.get_mut(&object) {
            surface.geometry = Some(geometry);
        }
    }

    /// A client attached and committed a buffer on a video surface.
    pub fn attach_buffer(&mut self, object: VideoObjectId, hw_surface: HwSurface) {
        let Some(surface) = self.surfaces.get_mut(&object) else {
            return;
        };
        if surface.destroyed {
            return;
        }
        let Some(geometry) = surface.geometry else {
            warn!(?object, "Video buffer attached before geometry, dropping");
            return;
        };
        let buffer = self.registry.acquire(hw_surface);
        buffer.set_content_rect(geometry.src);
        buffer.set_content_transform(geometry.transform);

        self.ensure_layer(object);
        let Some(surface) = self.surfaces.get_mut(&object) else {
            return;
        };
        let Some(layer) = surface.layer.clone() else {
            // no free plane: degrade by dropping the frame, the surface
            // stays alive for the next attempt
            warn!(?object, "No hardware layer available, dropping frame");
            return;
        };

        if needs_post_processing(&*layer, &geometry, hw_surface.format) {
            self.convert_and_show(object, buffer);
        } else {
            self.buffer_show(object, buffer);
        }
    }

    fn ensure_layer(&mut self, object: VideoObjectId) {
        let Some(surface) = self.surfaces.get_mut(&object) else {
            return;
        };
        if surface.layer.is_some() {
            return;
        }
        let mut layers = self.layers.lock().unwrap();
        if let Some(layer) = layers.claim_video_layer(surface.output) {
            debug!(object = ?surface.id, layer = ?layer.id(), "Acquired video layer");
            surface.layer = Some(layer.clone());
            drop(layers);
            // attribute requests that arrived before a plane existed
            for (name, value) in std::mem::take(&mut surface.pending_attributes) {
                if layer.set_property(&name, value).is_ok() {
                    surface.sink.emit(VideoEvent::Attribute { name, value });
                }
            }
        }
    }

    fn release_layer(&mut self, object: VideoObjectId) {
        let Some(surface) = self.surfaces.get_mut(&object) else {
            return;
        };
        if let Some(layer) = surface.layer.take() {
            debug!(object = ?surface.id, layer = ?layer.id(), "Releasing video layer");
            let _ = layer.set_surface(None);
            let _ = layer.commit();
            self.layers.lock().unwrap().release(layer.id());
        }
    }

    fn convert_and_show(&mut self, object: VideoObjectId, src: BufferRef) {
        let Some(surface) = self.surfaces.get_mut(&object) else {
            return;
        };
        let Some(geometry) = surface.geometry else {
            return;
        };
        if surface.pp.is_none() {
            match self.device.create_pp() {
                Ok(pp) => surface.pp = Some(PpPool::new(self.device.clone(), pp)),
                Err(err) => {
                    warn!(?err, "Failed to create converter, dropping frame");
                    return;
                }
            }
        }
        let pool = surface.pp.as_mut().unwrap();
        // YUV sources come out of the converter as RGB; RGB stays put
        let dst_format = if src.surface().format.is_yuv() {
            PixelFormat::Argb8888
        } else {
            src.surface().format
        };
        if let Err(err) = pool.ensure(
            &self.registry,
            geometry.dst.size.retag(),
            dst_format,
            // scanout buffers share the converter's alignment on this path
            pool.pp().size_constraints().align,
        ) {
            warn!(?err, "Conversion pool allocation failed, dropping frame");
            return;
        }
        let Some(dst) = pool.acquire_free() else {
            return;
        };
        let info = crate::backend::PpInfo {
            src: src.content_rect(),
            src_format: src.surface().format,
            dst: Rectangle::from_size(dst.surface().size),
            dst_format,
            transform: geometry.transform,
        };
        let pp = pool.pp().clone();
        if let Err(err) = pp.set_info(&info).and_then(|()| {
            src.mark_in_use(true);
            pp.convert(src.id(), dst.id())
        }) {
            warn!(?err, "Conversion failed, dropping frame");
            src.mark_in_use(false);
            return;
        }
        surface.pp_jobs.push_back((src, dst));
    }

    /// Route a converter completion to its surface. Returns false if the
    /// converter does not belong to the video path.
    pub fn on_pp_done(&mut self, pp: PpId, _src: SurfaceId, dst: SurfaceId) -> bool {
        let Some(object) = self
            .surfaces
            .values()
            .find(|surface| surface.pp.as_ref().map(|pool| pool.pp_id()) == Some(pp))
            .map(|surface| surface.id)
        else {
            return false;
        };
        let Some(surface) = self.surfaces.get_mut(&object) else {
            return false;
        };
        if surface.destroyed {
            return true;
        }
        let Some(position) = surface
            .pp_jobs
            .iter()
            .position(|(_, job_dst)| job_dst.id() == dst)
        else {
            warn!(?pp, ?dst, "Unexpected conversion completion");
            return true;
        };
        let (src, dst) = surface.pp_jobs.remove(position).unwrap();
        src.mark_in_use(false);
        drop(src);
        // the converted buffer covers the full destination, rotation baked in
        dst.set_content_rect(Rectangle::from_size(dst.surface().size));
        dst.set_content_transform(Transform::Normal);
        self.buffer_show(object, dst);
        true
    }

    /// Enqueue a ready-to-scan-out buffer and try to push it to the plane.
    fn buffer_show(&mut self, object: VideoObjectId, buffer: BufferRef) {
        let Some(surface) = self.surfaces.get_mut(&object) else {
            return;
        };
        if surface.vblank_pending || surface.plane_hook_pending {
            surface.waiting.push_back(buffer);
        } else {
            surface.committed.push_back(buffer);
            self.try_commit(object);
        }
        if let Some(surface) = self.surfaces.get(&object) {
            debug_assert!(surface.queues_disjoint(), "buffer tracked in two queues");
        }
    }

    fn commit_preconditions(&self, surface: &VideoSurface) -> bool {
        surface.layer.is_some()
            && surface.geometry.is_some()
            && self.shell.window_visible(surface.window)
            && self
                .device
                .output(surface.output)
                .map_or(false, |output| output.dpms() == Dpms::On)
    }

    #[profiling::function]
    fn try_commit(&mut self, object: VideoObjectId) {
        let Some(surface) = self.surfaces.get(&object) else {
            return;
        };
        if surface.committed.is_empty() {
            return;
        }
        if !self.commit_preconditions(surface) {
            trace!(?object, "Commit preconditions not met, flushing");
            self.flush_queues(object);
            return;
        }
        let surface = self.surfaces.get_mut(&object).unwrap();
        let buffer = surface.committed.back().unwrap().clone();
        let layer = surface.layer.clone().unwrap();
        let geometry = surface.geometry.unwrap();
        let hw_geometry = LayerGeometry {
            src: buffer.content_rect(),
            dst: geometry.dst,
            transform: buffer.content_transform(),
        };
        let result = layer
            .set_geometry(&hw_geometry)
            .and_then(|()| layer.set_surface(Some(buffer.id())))
            .and_then(|()| layer.commit());
        match result {
            Ok(_seq) => {
                buffer.mark_in_use(true);
                surface.vblank_pending = true;
                if let Some(output) = self.device.output(surface.output) {
                    let _ = output.request_vblank();
                }
                // deferred unmute happens on the first frame actually shown
                if surface.deferred_unmute {
                    surface.deferred_unmute = false;
                    if layer.set_property("mute", 0).is_ok() {
                        surface.sink.emit(VideoEvent::Attribute {
                            name: "mute".into(),
                            value: 0,
                        });
                    }
                }
            }
            Err(err) => {
                warn!(?err, ?object, "Layer commit failed, dropping frame");
                // drop the specific in-flight buffer, flush the rest
                let failed = surface.committed.pop_back();
                drop(failed);
                self.flush_queues(object);
            }
        }
    }

    /// Synthetic commit-complete plus vblank: drain the queues without
    /// touching the hardware so no reference leaks.
    fn flush_queues(&mut self, object: VideoObjectId) {
        let Some(surface) = self.surfaces.get_mut(&object) else {
            return;
        };
        for buffer in surface.committed.drain(..) {
            buffer.mark_in_use(false);
            drop(buffer);
        }
        for buffer in surface.waiting.drain(..) {
            drop(buffer);
        }
        surface.vblank_pending = false;
    }

    /// Hardware finished a layer commit. Promote the matching committed
    /// entry to current and retire the previous one.
    pub fn on_layer_commit_done(&mut self, layer: LayerId, displayed: Option<SurfaceId>) -> bool {
        let Some(object) = self
            .surfaces
            .values()
            .find(|surface| surface.layer.as_ref().map(|l| l.id()) == Some(layer))
            .map(|surface| surface.id)
        else {
            return false;
        };
        let surface = self.surfaces.get_mut(&object).unwrap();
        if surface.destroyed {
            return true;
        }
        let position = displayed.and_then(|id| {
            surface
                .committed
                .iter()
                .position(|buffer| buffer.id() == id)
        });
        let Some(position) = position else {
            // the slot was already cancelled or reassigned
            trace!(?layer, ?displayed, "Commit completion for retired slot");
            return true;
        };
        let promoted = surface.committed.remove(position).unwrap();
        if let Some(previous) = surface.current.replace(promoted) {
            previous.mark_in_use(false);
            drop(previous);
        }
        debug_assert!(surface.queues_disjoint(), "buffer tracked in two queues");
        true
    }

    /// One vblank after a commit: advance the double buffer.
    pub fn on_vblank(&mut self, output: OutputId) {
        let objects: Vec<_> = self
            .surfaces
            .values()
            .filter(|surface| surface.output == output && surface.vblank_pending)
            .map(|surface| surface.id)
            .collect();
        for object in objects {
            let surface = self.surfaces.get_mut(&object).unwrap();
            surface.vblank_pending = false;
            if let Some(buffer) = surface.waiting.pop_front() {
                surface.committed.push_back(buffer);
                self.try_commit(object);
            }
        }
    }

    /// An external plane coordinator released the plane to us.
    pub fn on_plane_hook_fired(&mut self, object: VideoObjectId) {
        let Some(surface) = self.surfaces.get_mut(&object) else {
            return;
        };
        if !surface.plane_hook_pending {
            return;
        }
        surface.plane_hook_pending = false;
        if let Some(buffer) = surface.waiting.pop_front() {
            surface.committed.push_back(buffer);
            self.try_commit(object);
        }
    }

    pub fn set_plane_hook_pending(&mut self, object: VideoObjectId, pending: bool) {
        if let Some(surface) = self.surfaces.get_mut(&object) {
            surface.plane_hook_pending = pending;
        }
    }

    /// Powering the output down flushes every queue synthetically; frames
    /// committed into a dark panel would only pin buffers.
    pub fn on_dpms_changed(&mut self, output: OutputId, mode: Dpms) {
        if mode == Dpms::On {
            return;
        }
        let objects: Vec<_> = self
            .surfaces
            .values()
            .filter(|surface| surface.output == output)
            .map(|surface| surface.id)
            .collect();
        for object in objects {
            self.flush_queues(object);
        }
    }

    /// Visibility change of the owning window.
    pub fn window_visibility_changed(&mut self, window: WindowHandle, visible: bool) {
        let objects: Vec<_> = self
            .surfaces
            .values()
            .filter(|surface| surface.window == window)
            .map(|surface| surface.id)
            .collect();
        for object in objects {
            if visible {
                continue;
            }
            let surface = self.surfaces.get_mut(&object).unwrap();
            if surface.follow_topmost {
                if let Some(layer) = surface.layer.clone() {
                    let _ = layer.set_property("mute", 1);
                }
            }
            self.flush_queues(object);
            if let Some(surface) = self.surfaces.get_mut(&object) {
                if let Some(previous) = surface.current.take() {
                    previous.mark_in_use(false);
                    drop(previous);
                }
            }
            self.release_layer(object);
        }
    }

    fn apply_attribute(&mut self, object: VideoObjectId, name: String, value: i64) {
        let Some(surface) = self.surfaces.get_mut(&object) else {
            return;
        };
        if !surface.allowed_attributes.is_empty() && !surface.allowed_attributes.contains(&name) {
            debug!(?object, %name, "Attribute not in allowed set, ignoring");
            return;
        }
        if surface.disallowed_attributes.contains(&name) {
            debug!(?object, %name, "Attribute disallowed, ignoring");
            return;
        }
        // unmuting while hidden is deferred to the next shown frame
        if name == "mute" && value == 0 && !self.shell.window_visible(surface.window) {
            surface.deferred_unmute = true;
            return;
        }
        match surface.layer.clone() {
            Some(layer) => {
                if layer.set_property(&name, value).is_ok() {
                    surface.sink.emit(VideoEvent::Attribute { name, value });
                }
            }
            None => {
                surface.pending_attributes.push((name, value));
            }
        }
    }

    #[cfg(test)]
    fn surface_queues(&self, object: VideoObjectId) -> (usize, usize, bool) {
        let surface = self.surfaces.get(&object).unwrap();
        (
            surface.waiting.len(),
            surface.committed.len(),
            surface.current.is_some(),
        )
    }

    #[cfg(test)]
    fn queues_disjoint(&self, object: VideoObjectId) -> bool {
        self.surfaces.get(&object).unwrap().queues_disjoint()
    }
}

impl VideoHandler for VideoManager {
    fn video_create(
        &mut self,
        client: ClientId,
        window: WindowHandle,
        sink: ClientSink<VideoEvent>,
    ) -> VideoObjectId {
        let id = VideoObjectId(next_video_id());
        debug!(?id, ?window, "New video surface");
        // advertise the converter's limits up front
        if let Ok(pp) = self.device.create_pp() {
            let constraints = pp.size_constraints();
            sink.emit(VideoEvent::Size {
                min: constraints.min,
                max: constraints.max,
                align: constraints.align,
            });
        }
        self.surfaces.insert(
            id,
            VideoSurface {
                id,
                client,
                window,
                output: self.primary_output,
                sink,
                layer: None,
                geometry: None,
                waiting: VecDeque::new(),
                committed: VecDeque::new(),
                current: None,
                vblank_pending: false,
                plane_hook_pending: false,
                pp: None,
                pp_jobs: VecDeque::new(),
                pending_attributes: Vec::new(),
                allowed_attributes: Vec::new(),
                disallowed_attributes: Vec::new(),
                deferred_unmute: false,
                follow_topmost: false,
                destroyed: false,
            },
        );
        id
    }

    fn video_request(&mut self, object: VideoObjectId, request: VideoRequest) {
        match request {
            VideoRequest::SetAttribute { name, value } => {
                self.apply_attribute(object, name, value);
            }
            VideoRequest::FollowTopmostVisibility => {
                if let Some(surface) = self.surfaces.get_mut(&object) {
                    surface.follow_topmost = true;
                }
            }
            VideoRequest::UnfollowTopmostVisibility => {
                if let Some(surface) = self.surfaces.get_mut(&object) {
                    surface.follow_topmost = false;
                }
            }
            VideoRequest::AllowedAttribute { name } => {
                if let Some(surface) = self.surfaces.get_mut(&object) {
                    if !surface.allowed_attributes.contains(&name) {
                        surface.allowed_attributes.push(name);
                    }
                }
            }
            VideoRequest::DisallowedAttribute { name } => {
                if let Some(surface) = self.surfaces.get_mut(&object) {
                    if !surface.disallowed_attributes.contains(&name) {
                        surface.disallowed_attributes.push(name);
                    }
                }
            }
        }
    }

    fn video_destroy(&mut self, object: VideoObjectId) {
        let Some(surface) = self.surfaces.get_mut(&object) else {
            return;
        };
        surface.destroyed = true;
        for (src, dst) in surface.pp_jobs.drain(..) {
            src.mark_in_use(false);
            drop(src);
            drop(dst);
        }
        self.flush_queues(object);
        if let Some(surface) = self.surfaces.get_mut(&object) {
            if let Some(current) = surface.current.take() {
                current.mark_in_use(false);
                drop(current);
            }
        }
        self.release_layer(object);
        self.surfaces.shift_remove(&object);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::testing::FakeDevice;
    use crate::backend::HwEvent;
    use crate::shell::StubShell;
    use crate::utils::geometry::Size;

    struct Fixture {
        device: FakeDevice,
        shell: Arc<StubShell>,
        manager: VideoManager,
        object: VideoObjectId,
    }

    fn fixture() -> Fixture {
        let device = FakeDevice::new_dual_output();
        let registry = BufferRegistry::new();
        let shell = Arc::new(StubShell::new(Rectangle::new(0, 0, 720, 1280)));
        let layers = Arc::new(Mutex::new(LayerDirectory::new()));
        for output in device.outputs() {
            layers.lock().unwrap().register_output(&*output);
        }
        let mut manager = VideoManager::new(
            Arc::new(device.clone()),
            registry,
            layers,
            shell.clone(),
            OutputId(0),
        );
        let object = manager.video_create(ClientId(1), WindowHandle(1), ClientSink::new());
        manager.set_geometry(
            object,
            VideoGeometry {
                src: Rectangle::new(0, 0, 640, 480),
                dst: Rectangle::new(0, 0, 640, 480),
                transform: Transform::Normal,
            },
        );
        Fixture {
            device,
            shell,
            manager,
            object,
        }
    }

    fn attach(fixture: &mut Fixture, id: u64) {
        let surface =
            fixture
                .device
                .client_surface(id, Size::new(640, 480), PixelFormat::Nv12);
        fixture.manager.attach_buffer(fixture.object, surface);
    }

    fn dispatch(fixture: &mut Fixture, event: HwEvent) {
        match event {
            HwEvent::LayerCommitDone {
                layer, displayed, ..
            } => {
                fixture.manager.on_layer_commit_done(layer, displayed);
            }
            HwEvent::Vblank { output } => fixture.manager.on_vblank(output),
            HwEvent::PpDone { pp, src, dst } => {
                fixture.manager.on_pp_done(pp, src, dst);
            }
            _ => {}
        }
    }

    #[test]
    fn direct_show_on_video_capable_layer() {
        let mut fixture = fixture();
        attach(&mut fixture, 1);
        // NV12 land directly on the VIDEO layer, no conversion
        assert_eq!(fixture.device.pending_pp_jobs(), 0);
        assert_eq!(fixture.device.pending_layer_commits(LayerId(1)), 1);

        let done = fixture.device.complete_layer_commit(LayerId(1)).unwrap();
        dispatch(&mut fixture, done);
        let (waiting, committed, current) = fixture.manager.surface_queues(fixture.object);
        assert_eq!((waiting, committed), (0, 0));
        assert!(current);
        assert_eq!(fixture.device.layer_surface(LayerId(1)), Some(SurfaceId(1)));
    }

    #[test]
    fn queues_stay_disjoint_across_interleavings() {
        let mut fixture = fixture();
        attach(&mut fixture, 1);
        assert!(fixture.manager.queues_disjoint(fixture.object));
        // second and third frame arrive while the first is in flight
        attach(&mut fixture, 2);
        attach(&mut fixture, 3);
        assert!(fixture.manager.queues_disjoint(fixture.object));
        let (waiting, committed, _) = fixture.manager.surface_queues(fixture.object);
        assert_eq!((waiting, committed), (2, 1));

        let done = fixture.device.complete_layer_commit(LayerId(1)).unwrap();
        dispatch(&mut fixture, done);
        assert!(fixture.manager.queues_disjoint(fixture.object));

        let vblank = fixture.device.take_vblank(OutputId(0)).unwrap();
        dispatch(&mut fixture, vblank);
        assert!(fixture.manager.queues_disjoint(fixture.object));
        let (waiting, committed, current) = fixture.manager.surface_queues(fixture.object);
        assert_eq!((waiting, committed), (1, 1));
        assert!(current);

        let done = fixture.device.complete_layer_commit(LayerId(1)).unwrap();
        dispatch(&mut fixture, done);
        let vblank = fixture.device.take_vblank(OutputId(0)).unwrap();
        dispatch(&mut fixture, vblank);
        let done = fixture.device.complete_layer_commit(LayerId(1)).unwrap();
        dispatch(&mut fixture, done);
        assert!(fixture.manager.queues_disjoint(fixture.object));
        let (waiting, committed, current) = fixture.manager.surface_queues(fixture.object);
        assert_eq!((waiting, committed), (0, 0));
        assert!(current);
        assert_eq!(fixture.device.layer_surface(LayerId(1)), Some(SurfaceId(3)));
    }

    #[test]
    fn conversion_used_when_format_unsupported() {
        let mut fixture = fixture();
        // occupy the VIDEO layer with another surface
        let other = fixture
            .manager
            .video_create(ClientId(2), WindowHandle(2), ClientSink::new());
        fixture.manager.set_geometry(
            other,
            VideoGeometry {
                src: Rectangle::new(0, 0, 640, 480),
                dst: Rectangle::new(0, 0, 640, 480),
                transform: Transform::Normal,
            },
        );
        let surface = fixture
            .device
            .client_surface(90, Size::new(640, 480), PixelFormat::Nv12);
        fixture.manager.attach_buffer(other, surface);

        // this surface lands on the plain overlay, NV12 unsupported there
        attach(&mut fixture, 1);
        assert_eq!(fixture.device.pending_pp_jobs(), 1);
        assert_eq!(fixture.device.pending_layer_commits(LayerId(2)), 0);

        let done = fixture.device.complete_pp().unwrap();
        dispatch(&mut fixture, done);
        // the converted buffer is what gets committed
        assert_eq!(fixture.device.pending_layer_commits(LayerId(2)), 1);
        let done = fixture.device.complete_layer_commit(LayerId(2)).unwrap();
        dispatch(&mut fixture, done);
        let shown = fixture.device.layer_surface(LayerId(2)).unwrap();
        assert!(shown.0 >= 1000, "expected an internally allocated buffer");
    }

    #[test]
    fn attribute_queued_until_layer_assigned() {
        let mut fixture = fixture();
        fixture.manager.video_request(
            fixture.object,
            VideoRequest::SetAttribute {
                name: "mute".into(),
                value: 1,
            },
        );
        assert_eq!(fixture.device.layer_property(LayerId(1), "mute"), None);
        attach(&mut fixture, 1);
        assert_eq!(fixture.device.layer_property(LayerId(1), "mute"), Some(1));
    }

    #[test]
    fn unmute_while_hidden_is_deferred_to_next_show() {
        let mut fixture = fixture();
        attach(&mut fixture, 1);
        fixture.shell.set_window_visible(WindowHandle(1), false);
        fixture.manager.video_request(
            fixture.object,
            VideoRequest::SetAttribute {
                name: "mute".into(),
                value: 0,
            },
        );
        assert_eq!(fixture.device.layer_property(LayerId(1), "mute"), None);

        fixture.shell.set_window_visible(WindowHandle(1), true);
        let done = fixture.device.complete_layer_commit(LayerId(1)).unwrap();
        dispatch(&mut fixture, done);
        let vblank = fixture.device.take_vblank(OutputId(0)).unwrap();
        dispatch(&mut fixture, vblank);
        attach(&mut fixture, 2);
        assert_eq!(fixture.device.layer_property(LayerId(1), "mute"), Some(0));
    }

    #[test]
    fn buffers_wait_for_plane_hook() {
        let mut fixture = fixture();
        fixture.manager.set_plane_hook_pending(fixture.object, true);
        attach(&mut fixture, 1);
        // held until the coordinator hands the plane over
        assert_eq!(fixture.device.pending_layer_commits(LayerId(1)), 0);
        let (waiting, committed, _) = fixture.manager.surface_queues(fixture.object);
        assert_eq!((waiting, committed), (1, 0));

        fixture.manager.on_plane_hook_fired(fixture.object);
        assert_eq!(fixture.device.pending_layer_commits(LayerId(1)), 1);
        assert!(fixture.manager.queues_disjoint(fixture.object));
    }

    #[test]
    fn commit_failure_drops_frame_without_leaking() {
        let mut fixture = fixture();
        fixture.device.set_fail_layer_commit(true);
        attach(&mut fixture, 1);
        let (waiting, committed, current) = fixture.manager.surface_queues(fixture.object);
        assert_eq!((waiting, committed, current), (0, 0, false));
        // surface still alive: a later frame shows normally
        fixture.device.set_fail_layer_commit(false);
        attach(&mut fixture, 2);
        assert_eq!(fixture.device.pending_layer_commits(LayerId(1)), 1);
    }

    #[test]
    fn hidden_surface_releases_its_layer() {
        let mut fixture = fixture();
        attach(&mut fixture, 1);
        let done = fixture.device.complete_layer_commit(LayerId(1)).unwrap();
        dispatch(&mut fixture, done);

        fixture.manager.window_visibility_changed(WindowHandle(1), false);
        let layers = fixture.manager.layers.clone();
        assert!(layers.lock().unwrap().is_usable(LayerId(1)));
        let (_, _, current) = fixture.manager.surface_queues(fixture.object);
        assert!(!current);
    }
}
