// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::marker::PhantomData;

/// Marker type for coordinates in buffer space
pub struct Buffer;

/// Marker type for coordinates in surface-logical space
pub struct Logical;

/// Marker type for coordinates in physical output space
pub struct Physical;

pub struct Point<Kind> {
    pub x: i32,
    pub y: i32,
    _kind: PhantomData<Kind>,
}

pub struct Size<Kind> {
    pub w: i32,
    pub h: i32,
    _kind: PhantomData<Kind>,
}

pub struct Rectangle<Kind> {
    pub loc: Point<Kind>,
    pub size: Size<Kind>,
}

impl<Kind> Point<Kind> {
    pub const fn new(x: i32, y: i32) -> Point<Kind> {
        Point {
            x,
            y,
            _kind: PhantomData,
        }
    }
}

impl<Kind> Size<Kind> {
    pub const fn new(w: i32, h: i32) -> Size<Kind> {
        Size {
            w,
            h,
            _kind: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    /// Re-tag into another coordinate space without conversion.
    pub fn retag<Other>(self) -> Size<Other> {
        Size::new(self.w, self.h)
    }
}

impl<Kind> Rectangle<Kind> {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Rectangle<Kind> {
        Rectangle {
            loc: Point::new(x, y),
            size: Size::new(w, h),
        }
    }

    pub const fn from_size(size: Size<Kind>) -> Rectangle<Kind> {
        Rectangle {
            loc: Point::new(0, 0),
            size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_empty()
    }

    pub fn right(&self) -> i32 {
        self.loc.x + self.size.w
    }

    pub fn bottom(&self) -> i32 {
        self.loc.y + self.size.h
    }

    pub fn contains(&self, point: Point<Kind>) -> bool {
        point.x >= self.loc.x
            && point.y >= self.loc.y
            && point.x < self.right()
            && point.y < self.bottom()
    }

    pub fn overlaps(&self, other: &Rectangle<Kind>) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.loc.x < other.right()
            && other.loc.x < self.right()
            && self.loc.y < other.bottom()
            && other.loc.y < self.bottom()
    }

    pub fn intersection(&self, other: &Rectangle<Kind>) -> Option<Rectangle<Kind>> {
        if !self.overlaps(other) {
            return None;
        }
        let x = self.loc.x.max(other.loc.x);
        let y = self.loc.y.max(other.loc.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Some(Rectangle::new(x, y, right - x, bottom - y))
    }

    pub fn retag<Other>(self) -> Rectangle<Other> {
        Rectangle::new(self.loc.x, self.loc.y, self.size.w, self.size.h)
    }
}

macro_rules! impl_common {
    ($ty:ident; $($field:ident),+) => {
        impl<Kind> Clone for $ty<Kind> {
            fn clone(&self) -> Self {
                *self
            }
        }
        impl<Kind> Copy for $ty<Kind> {}
        impl<Kind> PartialEq for $ty<Kind> {
            fn eq(&self, other: &Self) -> bool {
                true $(&& self.$field == other.$field)+
            }
        }
        impl<Kind> Eq for $ty<Kind> {}
        impl<Kind> Default for $ty<Kind> {
            fn default() -> Self {
                $ty::new(0, 0)
            }
        }
    };
}

impl_common!(Point; x, y);
impl_common!(Size; w, h);

impl<Kind> Clone for Rectangle<Kind> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<Kind> Copy for Rectangle<Kind> {}
impl<Kind> PartialEq for Rectangle<Kind> {
    fn eq(&self, other: &Self) -> bool {
        self.loc == other.loc && self.size == other.size
    }
}
impl<Kind> Eq for Rectangle<Kind> {}
impl<Kind> Default for Rectangle<Kind> {
    fn default() -> Self {
        Rectangle::new(0, 0, 0, 0)
    }
}

impl<Kind> fmt::Debug for Point<Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}
impl<Kind> fmt::Debug for Size<Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}
impl<Kind> fmt::Debug for Rectangle<Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.size.w, self.size.h, self.loc.x, self.loc.y
        )
    }
}

impl<Kind> From<(i32, i32)> for Point<Kind> {
    fn from((x, y): (i32, i32)) -> Self {
        Point::new(x, y)
    }
}
impl<Kind> From<(i32, i32)> for Size<Kind> {
    fn from((w, h): (i32, i32)) -> Self {
        Size::new(w, h)
    }
}

/// Output/buffer transforms, the dihedral group over quarter rotations and a
/// horizontal flip. The flip is applied before the rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform {
    #[default]
    Normal,
    _90,
    _180,
    _270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl Transform {
    pub fn from_parts(flipped: bool, quarter_turns: u8) -> Transform {
        match (flipped, quarter_turns % 4) {
            (false, 0) => Transform::Normal,
            (false, 1) => Transform::_90,
            (false, 2) => Transform::_180,
            (false, _) => Transform::_270,
            (true, 0) => Transform::Flipped,
            (true, 1) => Transform::Flipped90,
            (true, 2) => Transform::Flipped180,
            (true, _) => Transform::Flipped270,
        }
    }

    pub fn flipped(&self) -> bool {
        matches!(
            self,
            Transform::Flipped
                | Transform::Flipped90
                | Transform::Flipped180
                | Transform::Flipped270
        )
    }

    pub fn quarter_turns(&self) -> u8 {
        match self {
            Transform::Normal | Transform::Flipped => 0,
            Transform::_90 | Transform::Flipped90 => 1,
            Transform::_180 | Transform::Flipped180 => 2,
            Transform::_270 | Transform::Flipped270 => 3,
        }
    }

    /// Clockwise rotation angle in degrees.
    pub fn degrees(&self) -> u32 {
        self.quarter_turns() as u32 * 90
    }

    /// Transform for a rotation angle in degrees, snapped to a quarter turn.
    pub fn from_degrees(angle: u32) -> Transform {
        Transform::from_parts(false, ((angle % 360) / 90) as u8)
    }

    /// Compose two transforms. Rotations add modulo four, flip bits toggle
    /// independently.
    pub fn compose(&self, other: Transform) -> Transform {
        Transform::from_parts(
            self.flipped() ^ other.flipped(),
            self.quarter_turns().wrapping_add(other.quarter_turns()),
        )
    }

    pub fn invert(&self) -> Transform {
        if self.flipped() {
            // flip-then-rotate transforms are their own inverse
            *self
        } else {
            Transform::from_parts(false, (4 - self.quarter_turns()) % 4)
        }
    }

    /// Size of an area after applying this transform.
    pub fn transform_size<Kind>(&self, size: Size<Kind>) -> Size<Kind> {
        if self.quarter_turns() % 2 == 1 {
            Size::new(size.h, size.w)
        } else {
            size
        }
    }

    /// Map a rectangle inside an area of size `area` into the transformed
    /// area's coordinate system.
    pub fn transform_rect_in<Kind>(
        &self,
        rect: Rectangle<Kind>,
        area: Size<Kind>,
    ) -> Rectangle<Kind> {
        let (x, y, w, h) = (rect.loc.x, rect.loc.y, rect.size.w, rect.size.h);
        let (x, y) = if self.flipped() {
            (area.w - (x + w), y)
        } else {
            (x, y)
        };
        match self.quarter_turns() {
            0 => Rectangle::new(x, y, w, h),
            1 => Rectangle::new(area.h - (y + h), x, h, w),
            2 => Rectangle::new(area.w - (x + w), area.h - (y + h), w, h),
            _ => Rectangle::new(y, area.w - (x + w), h, w),
        }
    }
}
