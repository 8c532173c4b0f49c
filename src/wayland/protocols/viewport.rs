// SPDX-License-Identifier: GPL-3.0-only

//! Viewport protocol surface: per-surface crop, destination and transform
//! negotiation.

use crate::utils::geometry::{Buffer as BufferCoords, Logical, Rectangle, Size, Transform};
use crate::wayland::protocols::{ClientId, ClientSink};

/// Layout strategy of the destination-mode specification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestinationModeType {
    #[default]
    None,
    LetterBox,
    Origin,
    Full,
    CroppedFull,
    OriginOrLetter,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ratio {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Clone)]
pub enum DestinationModeRequest {
    Set(DestinationModeType),
    SetRatio(Ratio),
    SetScale { x: f64, y: f64 },
    /// Alignment inside the parent, each axis in `0.0..=1.0`.
    SetAlign { x: f64, y: f64 },
    SetOffset { x: i32, y: i32, w: i32, h: i32 },
    FollowParentTransform,
    UnfollowParentTransform,
}

#[derive(Debug, Clone)]
pub enum ViewportRequest {
    SetTransform(Transform),
    /// Crop in buffer coordinates; `None` resets to the full buffer.
    SetSource(Option<Rectangle<BufferCoords>>),
    SetDestination(Rectangle<Logical>),
    /// Destination as a fraction of the parent.
    SetDestinationRatio(Ratio),
    DestinationMode(DestinationModeRequest),
    QueryParentSize,
    FollowParentTransform,
    UnfollowParentTransform,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewportEvent {
    ParentSize(Size<Logical>),
    DestinationChanged {
        transform: Transform,
        rect: Rectangle<Logical>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewportId(pub u64);

/// Implemented by the viewport engine.
pub trait ViewportHandler {
    fn viewport_create(
        &mut self,
        client: ClientId,
        surface: crate::shell::WindowHandle,
        sink: ClientSink<ViewportEvent>,
    ) -> ViewportId;
    fn viewport_request(&mut self, viewport: ViewportId, request: ViewportRequest);
    fn viewport_destroy(&mut self, viewport: ViewportId);
}
