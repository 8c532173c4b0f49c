// SPDX-License-Identifier: GPL-3.0-only

//! Entry points the wire adapter calls into. Each protocol's handler trait
//! is implemented by its manager; this module only routes, fans out
//! lifecycle events and bridges viewport results into the video path.

use tracing::trace;

use crate::backend::HwSurface;
use crate::shell::WindowHandle;
use crate::state::State;
use crate::video::VideoGeometry;
use crate::viewport::{OutputContext, ParentContext};
use crate::wayland::protocols::eom::{EomEvent, EomHandler, EomRequest};
use crate::wayland::protocols::screen_mirror::{
    MirrorEvent, MirrorRequest, MirrorSessionId, ScreenMirrorHandler, ScreenshooterEvent,
};
use crate::wayland::protocols::video::{VideoEvent, VideoHandler, VideoObjectId, VideoRequest};
use crate::wayland::protocols::viewport::{
    ViewportEvent, ViewportHandler, ViewportId, ViewportRequest,
};
use crate::wayland::protocols::{ClientId, ClientSink};

impl State {
    pub fn eom_bind(&mut self, client: ClientId, sink: ClientSink<EomEvent>) {
        self.eom.eom_bind(client, sink);
    }

    pub fn eom_request(&mut self, client: ClientId, request: EomRequest) {
        self.eom.eom_request(client, request);
    }

    pub fn mirror_create(
        &mut self,
        client: ClientId,
        sink: ClientSink<MirrorEvent>,
    ) -> MirrorSessionId {
        self.capture.mirror_create(client, sink)
    }

    pub fn mirror_request(&mut self, session: MirrorSessionId, request: MirrorRequest) {
        self.capture.mirror_request(session, request);
    }

    pub fn mirror_destroy(&mut self, session: MirrorSessionId) {
        self.capture.mirror_destroy(session);
    }

    pub fn screenshoot(
        &mut self,
        client: ClientId,
        dst: HwSurface,
        sink: ClientSink<ScreenshooterEvent>,
    ) {
        self.capture.screenshoot(client, dst, sink);
    }

    pub fn video_create(
        &mut self,
        client: ClientId,
        window: WindowHandle,
        sink: ClientSink<VideoEvent>,
    ) -> VideoObjectId {
        let object = self.video.video_create(client, window, sink);
        // a viewport may already have resolved for this window
        self.sync_video_geometry(window, object);
        object
    }

    pub fn video_request(&mut self, object: VideoObjectId, request: VideoRequest) {
        self.video.video_request(object, request);
    }

    pub fn video_destroy(&mut self, object: VideoObjectId) {
        self.video.video_destroy(object);
    }

    pub fn viewport_create(
        &mut self,
        client: ClientId,
        window: WindowHandle,
        sink: ClientSink<ViewportEvent>,
    ) -> ViewportId {
        self.viewports.viewport_create(client, window, sink)
    }

    pub fn viewport_request(&mut self, viewport: ViewportId, request: ViewportRequest) {
        self.viewports.viewport_request(viewport, request);
        self.resync_windows();
    }

    pub fn viewport_destroy(&mut self, viewport: ViewportId) {
        self.viewports.viewport_destroy(viewport);
    }

    /// The compositor re-laid-out a surface's parent.
    pub fn surface_parent_changed(&mut self, window: WindowHandle, parent: ParentContext) {
        self.viewports.update_parent(window, parent);
        self.resync_windows();
    }

    pub fn surface_output_changed(&mut self, window: WindowHandle, output: OutputContext) {
        self.viewports.update_output(window, output);
        self.resync_windows();
    }

    /// A client committed a buffer on `window`. External-output windows go
    /// through the presentation path, video windows through the plane
    /// renderer.
    pub fn window_buffer_committed(
        &mut self,
        client: ClientId,
        window: WindowHandle,
        surface: HwSurface,
    ) {
        self.eom.window_commit(client, window, surface);
        self.viewports.update_buffer_size(window, surface.size);
        if let Some(object) = self.video_object_for(window) {
            self.sync_video_geometry(window, object);
            self.video.attach_buffer(object, surface);
        }
    }

    pub fn surface_visibility_changed(&mut self, window: WindowHandle, visible: bool) {
        self.video.window_visibility_changed(window, visible);
    }

    pub fn client_disconnected(&mut self, client: ClientId) {
        trace!(?client, "Protocol client disconnected");
        self.eom.eom_unbind(client);
        self.capture.client_disconnected(client);
    }

    fn video_object_for(&self, window: WindowHandle) -> Option<VideoObjectId> {
        self.video.object_for_window(window)
    }

    fn sync_video_geometry(&mut self, window: WindowHandle, object: VideoObjectId) {
        if let Some(mapping) = self.viewports.mapping_for_window(window) {
            self.video.set_geometry(
                object,
                VideoGeometry {
                    src: mapping.src,
                    dst: mapping.dst_physical,
                    transform: mapping.hw_transform,
                },
            );
        }
    }

    fn resync_windows(&mut self) {
        let pairs = self.video.windows();
        for (object, window) in pairs {
            self.sync_video_geometry(window, object);
        }
    }
}
