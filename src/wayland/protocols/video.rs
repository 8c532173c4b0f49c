// SPDX-License-Identifier: GPL-3.0-only

//! Hardware video-plane protocol surface.

use crate::shell::WindowHandle;
use crate::utils::geometry::{Buffer as BufferCoords, Size};
use crate::wayland::protocols::{ClientId, ClientSink};

#[derive(Debug, Clone)]
pub enum VideoRequest {
    /// Driver attribute on the video plane, e.g. "mute".
    SetAttribute { name: String, value: i64 },
    FollowTopmostVisibility,
    UnfollowTopmostVisibility,
    /// Allow a driver attribute to pass through to the layer.
    AllowedAttribute { name: String },
    /// Block a driver attribute from reaching the layer.
    DisallowedAttribute { name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum VideoEvent {
    /// Buffer size constraints of the video path.
    Size {
        min: Size<BufferCoords>,
        max: Size<BufferCoords>,
        align: i32,
    },
    /// An attribute was applied to the hardware.
    Attribute { name: String, value: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VideoObjectId(pub u64);

/// Implemented by the video-plane renderer.
pub trait VideoHandler {
    fn video_create(
        &mut self,
        client: ClientId,
        window: WindowHandle,
        sink: ClientSink<VideoEvent>,
    ) -> VideoObjectId;
    fn video_request(&mut self, object: VideoObjectId, request: VideoRequest);
    fn video_destroy(&mut self, object: VideoObjectId);
}
