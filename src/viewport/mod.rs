// SPDX-License-Identifier: GPL-3.0-only

//! Viewport geometry engine.
//!
//! Maps a client buffer (optionally cropped) through the surface and parent
//! transforms onto a destination rectangle, then into the physical
//! coordinates of the output. All rectangle math is integer; fractional
//! specifications are applied in one multiplication before rounding.

use indexmap::IndexMap;
use tracing::debug;

use crate::shell::WindowHandle;
use crate::utils::geometry::{
    Buffer as BufferCoords, Logical, Physical, Rectangle, Size, Transform,
};
use crate::utils::id_gen;
use crate::wayland::protocols::viewport::{
    DestinationModeRequest, DestinationModeType, Ratio, ViewportEvent, ViewportHandler,
    ViewportId, ViewportRequest,
};
use crate::wayland::protocols::{ClientId, ClientSink};

id_gen!(next_viewport_id);

/// Best-fit `src`'s aspect ratio into `bounds`, centered. The limiting axis
/// is picked by cross-multiplied aspect comparison, so a source already
/// matching the bounds' ratio fills them exactly.
pub fn fit_aspect<SrcKind, Kind>(src: Size<SrcKind>, bounds: Rectangle<Kind>) -> Rectangle<Kind> {
    if src.is_empty() || bounds.is_empty() {
        return bounds;
    }
    let (w, h) = if src.w as i64 * bounds.size.h as i64 >= src.h as i64 * bounds.size.w as i64 {
        // source is the wider shape, width limits
        let w = bounds.size.w;
        (w, (w as i64 * src.h as i64 / src.w as i64) as i32)
    } else {
        let h = bounds.size.h;
        ((h as i64 * src.w as i64 / src.h as i64) as i32, h)
    };
    Rectangle::new(
        bounds.loc.x + (bounds.size.w - w) / 2,
        bounds.loc.y + (bounds.size.h - h) / 2,
        w,
        h,
    )
}

/// Scale `src`'s aspect ratio to cover `bounds` completely, centered; the
/// overflowing axis is cropped later against the parent.
pub fn cover_aspect<SrcKind, Kind>(src: Size<SrcKind>, bounds: Rectangle<Kind>) -> Rectangle<Kind> {
    if src.is_empty() || bounds.is_empty() {
        return bounds;
    }
    let (w, h) = if src.w as i64 * bounds.size.h as i64 >= src.h as i64 * bounds.size.w as i64 {
        // source is the wider shape, height limits
        let h = bounds.size.h;
        ((h as i64 * src.w as i64 / src.h as i64) as i32, h)
    } else {
        let w = bounds.size.w;
        (w, (w as i64 * src.h as i64 / src.w as i64) as i32)
    };
    Rectangle::new(
        bounds.loc.x + (bounds.size.w - w) / 2,
        bounds.loc.y + (bounds.size.h - h) / 2,
        w,
        h,
    )
}

/// Clip `dst` against `clip` and shrink `src` by the same fractions, keeping
/// the source-to-destination mapping linear.
pub fn clip_mapping(
    src: Rectangle<BufferCoords>,
    dst: Rectangle<Logical>,
    clip: Rectangle<Logical>,
) -> Option<(Rectangle<BufferCoords>, Rectangle<Logical>)> {
    let clipped = dst.intersection(&clip)?;
    if clipped == dst {
        return Some((src, dst));
    }
    let map_x = |v: i32| (v as i64 * src.size.w as i64 / dst.size.w as i64) as i32;
    let map_y = |v: i32| (v as i64 * src.size.h as i64 / dst.size.h as i64) as i32;
    let new_src = Rectangle::new(
        src.loc.x + map_x(clipped.loc.x - dst.loc.x),
        src.loc.y + map_y(clipped.loc.y - dst.loc.y),
        map_x(clipped.size.w).max(1),
        map_y(clipped.size.h).max(1),
    );
    Some((new_src, clipped))
}

/// Geometry of the parent a surface is mapped into: its absolute logical
/// rectangle and its own content transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParentContext {
    pub rect: Rectangle<Logical>,
    pub transform: Transform,
}

/// Fixed properties of the output the surface ends up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputContext {
    pub transform: Transform,
    pub size: Size<Logical>,
}

/// Fully resolved mapping of one surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportMapping {
    pub src: Rectangle<BufferCoords>,
    /// Destination after parent clipping, absolute logical coordinates.
    pub dst: Rectangle<Logical>,
    /// Content transform relative to the output.
    pub transform: Transform,
    /// Destination in the output's physical coordinate system.
    pub dst_physical: Rectangle<Physical>,
    /// Transform to program into the hardware (content ∘ output).
    pub hw_transform: Transform,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
enum DestinationSpec {
    #[default]
    Unset,
    Rect(Rectangle<Logical>),
    Ratio(Ratio),
    Mode,
}

#[derive(Debug, Clone, Default)]
struct ModeSpec {
    kind: DestinationModeType,
    /// Aspect-ratio override (w, h fractions of the parent).
    ratio: Option<(f64, f64)>,
    scale: Option<(f64, f64)>,
    align: Option<(f64, f64)>,
    offset: (i32, i32, i32, i32),
    follow_parent_transform: bool,
}

pub struct Viewport {
    id: ViewportId,
    #[allow(dead_code)]
    client: ClientId,
    window: WindowHandle,
    sink: ClientSink<ViewportEvent>,

    transform: Transform,
    source: Option<Rectangle<BufferCoords>>,
    destination: DestinationSpec,
    mode: ModeSpec,
    follow_parent_transform: bool,

    buffer_size: Size<BufferCoords>,
    parent: ParentContext,
    output: OutputContext,

    last_emitted: Option<(Transform, Rectangle<Logical>)>,
}

impl Viewport {
    fn effective_transform(&self) -> Transform {
        let follow = self.follow_parent_transform
            || (matches!(self.destination, DestinationSpec::Mode)
                && self.mode.follow_parent_transform);
        if follow {
            self.transform.compose(self.parent.transform)
        } else {
            self.transform
        }
    }

    fn source_rect(&self) -> Rectangle<BufferCoords> {
        self.source
            .unwrap_or(Rectangle::from_size(self.buffer_size))
    }

    /// Destination in parent-relative logical coordinates, before clipping.
    fn raw_destination(&self, source_size: Size<Logical>) -> Option<Rectangle<Logical>> {
        let parent_size = self.parent.size();
        match self.destination {
            DestinationSpec::Unset => None,
            DestinationSpec::Rect(rect) => Some(rect),
            DestinationSpec::Ratio(ratio) => {
                if ratio.w <= 0.0 || ratio.h <= 0.0 {
                    return None;
                }
                Some(Rectangle::new(
                    (parent_size.w as f64 * ratio.x).round() as i32,
                    (parent_size.h as f64 * ratio.y).round() as i32,
                    (parent_size.w as f64 * ratio.w).round() as i32,
                    (parent_size.h as f64 * ratio.h).round() as i32,
                ))
            }
            DestinationSpec::Mode => self.mode_destination(parent_size, source_size),
        }
    }

    fn mode_destination(
        &self,
        parent_size: Size<Logical>,
        source_size: Size<Logical>,
    ) -> Option<Rectangle<Logical>> {
        let parent_rect = Rectangle::from_size(parent_size);
        let aspect: Size<Logical> = match self.mode.ratio {
            Some((w, h)) if w > 0.0 && h > 0.0 => Size::new(
                (parent_size.w as f64 * w).round() as i32,
                (parent_size.h as f64 * h).round() as i32,
            ),
            _ => source_size,
        };
        let fits = source_size.w <= parent_size.w && source_size.h <= parent_size.h;
        let (mut rect, default_align) = match self.mode.kind {
            DestinationModeType::None => return None,
            DestinationModeType::LetterBox => (fit_aspect(aspect, parent_rect), (0.5, 0.5)),
            DestinationModeType::Origin => {
                (Rectangle::from_size(source_size), (0.0, 0.0))
            }
            DestinationModeType::Full => (parent_rect, (0.0, 0.0)),
            DestinationModeType::CroppedFull => (cover_aspect(aspect, parent_rect), (0.5, 0.5)),
            DestinationModeType::OriginOrLetter => {
                if fits {
                    (Rectangle::from_size(source_size), (0.0, 0.0))
                } else {
                    (fit_aspect(aspect, parent_rect), (0.5, 0.5))
                }
            }
        };
        if let Some((sx, sy)) = self.mode.scale {
            rect.size.w = (rect.size.w as f64 * sx).round() as i32;
            rect.size.h = (rect.size.h as f64 * sy).round() as i32;
        }
        let (ax, ay) = self.mode.align.unwrap_or(default_align);
        rect.loc.x = ((parent_size.w - rect.size.w) as f64 * ax.clamp(0.0, 1.0)).round() as i32;
        rect.loc.y = ((parent_size.h - rect.size.h) as f64 * ay.clamp(0.0, 1.0)).round() as i32;
        let (ox, oy, ow, oh) = self.mode.offset;
        rect.loc.x += ox;
        rect.loc.y += oy;
        rect.size.w += ow;
        rect.size.h += oh;
        Some(rect)
    }

    pub fn resolve(&self) -> Option<ViewportMapping> {
        if self.buffer_size.is_empty() || self.parent.rect.is_empty() {
            return None;
        }
        let src = self.source_rect();
        let transform = self.effective_transform();
        let source_size: Size<Logical> = transform.transform_size(src.size).retag();

        let dst = self.raw_destination(source_size)?;
        if dst.is_empty() {
            return None;
        }
        let (src, dst) = clip_mapping(src, dst, Rectangle::from_size(self.parent.size()))?;

        let dst_abs = Rectangle::new(
            dst.loc.x + self.parent.rect.loc.x,
            dst.loc.y + self.parent.rect.loc.y,
            dst.size.w,
            dst.size.h,
        );
        let dst_physical = self
            .output
            .transform
            .transform_rect_in(dst_abs, self.output.size)
            .retag::<Physical>();
        Some(ViewportMapping {
            src,
            dst: dst_abs,
            transform,
            dst_physical,
            hw_transform: transform.compose(self.output.transform),
        })
    }
}

impl ParentContext {
    fn size(&self) -> Size<Logical> {
        self.rect.size
    }
}

/// Owns every viewport, keyed by id with a window index for the compositor
/// side (geometry updates arrive per window).
#[derive(Default)]
pub struct ViewportEngine {
    viewports: IndexMap<ViewportId, Viewport>,
}

impl ViewportEngine {
    pub fn new() -> ViewportEngine {
        ViewportEngine::default()
    }

    pub fn mapping_for_window(&self, window: WindowHandle) -> Option<ViewportMapping> {
        self.viewports
            .values()
            .find(|viewport| viewport.window == window)
            .and_then(|viewport| viewport.resolve())
    }

    /// The subsurface hierarchy or parent geometry changed.
    pub fn update_parent(&mut self, window: WindowHandle, parent: ParentContext) {
        let ids: Vec<_> = self
            .viewports
            .values()
            .filter(|viewport| viewport.window == window)
            .map(|viewport| viewport.id)
            .collect();
        for id in ids {
            if let Some(viewport) = self.viewports.get_mut(&id) {
                viewport.parent = parent;
            }
            self.recompute(id);
        }
    }

    pub fn update_output(&mut self, window: WindowHandle, output: OutputContext) {
        let ids: Vec<_> = self
            .viewports
            .values()
            .filter(|viewport| viewport.window == window)
            .map(|viewport| viewport.id)
            .collect();
        for id in ids {
            if let Some(viewport) = self.viewports.get_mut(&id) {
                viewport.output = output;
            }
            self.recompute(id);
        }
    }

    pub fn update_buffer_size(&mut self, window: WindowHandle, size: Size<BufferCoords>) {
        let ids: Vec<_> = self
            .viewports
            .values()
            .filter(|viewport| viewport.window == window)
            .map(|viewport| viewport.id)
            .collect();
        for id in ids {
            if let Some(viewport) = self.viewports.get_mut(&id) {
                viewport.buffer_size = size;
            }
            self.recompute(id);
        }
    }

    fn recompute(&mut self, id: ViewportId) {
        let Some(viewport) = self.viewports.get_mut(&id) else {
            return;
        };
        let Some(mapping) = viewport.resolve() else {
            return;
        };
        let emitted = (mapping.transform, mapping.dst);
        if viewport.last_emitted != Some(emitted) {
            viewport.last_emitted = Some(emitted);
            viewport.sink.emit(ViewportEvent::DestinationChanged {
                transform: mapping.transform,
                rect: mapping.dst,
            });
        }
    }
}

impl ViewportHandler for ViewportEngine {
    fn viewport_create(
        &mut self,
        client: ClientId,
        window: WindowHandle,
        sink: ClientSink<ViewportEvent>,
    ) -> ViewportId {
        let id = ViewportId(next_viewport_id());
        debug!(?id, ?window, "New viewport");
        self.viewports.insert(
            id,
            Viewport {
                id,
                client,
                window,
                sink,
                transform: Transform::Normal,
                source: None,
                destination: DestinationSpec::Unset,
                mode: ModeSpec::default(),
                follow_parent_transform: false,
                buffer_size: Size::default(),
                parent: ParentContext::default(),
                output: OutputContext::default(),
                last_emitted: None,
            },
        );
        id
    }

    fn viewport_request(&mut self, id: ViewportId, request: ViewportRequest) {
        let Some(viewport) = self.viewports.get_mut(&id) else {
            return;
        };
        match request {
            ViewportRequest::SetTransform(transform) => {
                viewport.transform = transform;
            }
            ViewportRequest::SetSource(source) => {
                // zero-sized crops are protocol misuse, ignored
                if source.map_or(false, |rect| rect.is_empty()) {
                    return;
                }
                viewport.source = source;
            }
            ViewportRequest::SetDestination(rect) => {
                if rect.is_empty() {
                    return;
                }
                viewport.destination = DestinationSpec::Rect(rect);
            }
            ViewportRequest::SetDestinationRatio(ratio) => {
                if ratio.w <= 0.0 || ratio.h <= 0.0 {
                    return;
                }
                viewport.destination = DestinationSpec::Ratio(ratio);
            }
            ViewportRequest::DestinationMode(mode_request) => {
                viewport.destination = DestinationSpec::Mode;
                match mode_request {
                    DestinationModeRequest::Set(kind) => viewport.mode.kind = kind,
                    DestinationModeRequest::SetRatio(ratio) => {
                        viewport.mode.ratio = Some((ratio.w, ratio.h));
                    }
                    DestinationModeRequest::SetScale { x, y } => {
                        viewport.mode.scale = Some((x, y));
                    }
                    DestinationModeRequest::SetAlign { x, y } => {
                        viewport.mode.align = Some((x, y));
                    }
                    DestinationModeRequest::SetOffset { x, y, w, h } => {
                        viewport.mode.offset = (x, y, w, h);
                    }
                    DestinationModeRequest::FollowParentTransform => {
                        viewport.mode.follow_parent_transform = true;
                    }
                    DestinationModeRequest::UnfollowParentTransform => {
                        viewport.mode.follow_parent_transform = false;
                    }
                }
            }
            ViewportRequest::QueryParentSize => {
                let size = viewport.parent.size();
                viewport.sink.emit(ViewportEvent::ParentSize(size));
                return;
            }
            ViewportRequest::FollowParentTransform => {
                viewport.follow_parent_transform = true;
            }
            ViewportRequest::UnfollowParentTransform => {
                viewport.follow_parent_transform = false;
            }
        }
        self.recompute(id);
    }

    fn viewport_destroy(&mut self, id: ViewportId) {
        self.viewports.shift_remove(&id);
    }
}
