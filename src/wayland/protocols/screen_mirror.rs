// SPDX-License-Identifier: GPL-3.0-only

//! Screen-mirror (streaming capture) and legacy one-shot screenshooter
//! protocol surfaces.

use crate::backend::{HwSurface, SurfaceId};
use crate::wayland::protocols::{ClientId, ClientSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StretchMode {
    /// Letterbox into the destination, preserving the source aspect ratio.
    #[default]
    KeepRatio,
    /// Fill the whole destination.
    Fully,
}

/// What the captured frames currently contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    None,
    Video,
}

#[derive(Debug, Clone)]
pub enum MirrorRequest {
    SetStretch(StretchMode),
    /// Hand a client buffer to the session to be filled.
    Queue(HwSurface),
    /// Take a not-yet-filled buffer back.
    Dequeue(SurfaceId),
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    Content(ContentType),
    /// The buffer has been filled (or the session is winding down and hands
    /// it back unfilled). Sent exactly once per queued buffer.
    Dequeued(SurfaceId),
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScreenshooterEvent {
    Done(SurfaceId),
}

/// Implemented by the capture manager.
pub trait ScreenMirrorHandler {
    fn mirror_create(&mut self, client: ClientId, sink: ClientSink<MirrorEvent>) -> MirrorSessionId;
    fn mirror_request(&mut self, session: MirrorSessionId, request: MirrorRequest);
    fn mirror_destroy(&mut self, session: MirrorSessionId);
    /// One-shot screenshot into a client-supplied buffer.
    fn screenshoot(
        &mut self,
        client: ClientId,
        dst: HwSurface,
        sink: ClientSink<ScreenshooterEvent>,
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MirrorSessionId(pub u64);
