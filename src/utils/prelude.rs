// SPDX-License-Identifier: GPL-3.0-only

pub use crate::utils::geometry::{
    Buffer as BufferCoords, Logical, Physical, Point, Rectangle, Size, Transform,
};

pub use crate::backend::{LayerId, OutputId, SurfaceId};
pub use crate::state::State;
