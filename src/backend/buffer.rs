// SPDX-License-Identifier: GPL-3.0-only

//! Tracking of hardware surfaces shared between the pipelines.
//!
//! Every hardware surface that passes through a pipeline is wrapped exactly
//! once. Wrappers are reference counted; the `in_use` flag keeps a wrapper
//! alive between "client released it" and "hardware stopped scanning it out",
//! which do not happen in that order reliably.

use std::{
    collections::HashMap,
    ops::Deref,
    sync::{Arc, Mutex},
};

use tracing::{trace, warn};

use crate::backend::{HwSurface, SurfaceId};
use crate::utils::geometry::{Buffer as BufferCoords, Rectangle, Transform};
use crate::utils::id_gen;

id_gen!(next_callback_id);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FreeCallbackId(u64);

type FreeCallback = Box<dyn FnMut(&HwSurface) + Send>;

struct BufferState {
    surface: HwSurface,
    content: Rectangle<BufferCoords>,
    transform: Transform,
    refs: u32,
    in_use: bool,
    destroyed: bool,
    free_callbacks: Vec<(FreeCallbackId, FreeCallback)>,
}

/// Shared wrapper around one hardware surface. Cloning the wrapper does not
/// touch the reference count; only [`BufferRef`] handles do.
#[derive(Clone)]
pub struct Buffer {
    id: SurfaceId,
    state: Arc<Mutex<BufferState>>,
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Buffer {}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("refs", &state.refs)
            .field("in_use", &state.in_use)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

impl Buffer {
    fn new(surface: HwSurface) -> Buffer {
        let content = Rectangle::from_size(surface.size);
        Buffer {
            id: surface.id,
            state: Arc::new(Mutex::new(BufferState {
                surface,
                content,
                transform: Transform::Normal,
                refs: 0,
                in_use: false,
                destroyed: false,
                free_callbacks: Vec::new(),
            })),
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn surface(&self) -> HwSurface {
        self.state.lock().unwrap().surface
    }

    pub fn content_rect(&self) -> Rectangle<BufferCoords> {
        self.state.lock().unwrap().content
    }

    pub fn set_content_rect(&self, rect: Rectangle<BufferCoords>) {
        self.state.lock().unwrap().content = rect;
    }

    pub fn content_transform(&self) -> Transform {
        self.state.lock().unwrap().transform
    }

    pub fn set_content_transform(&self, transform: Transform) {
        self.state.lock().unwrap().transform = transform;
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().unwrap().destroyed
    }

    pub fn ref_count(&self) -> u32 {
        self.state.lock().unwrap().refs
    }

    pub fn in_use(&self) -> bool {
        self.state.lock().unwrap().in_use
    }

    /// Flag the surface as referenced by an in-flight hardware commit. While
    /// set, the wrapper outlives a reference count of zero.
    pub fn mark_in_use(&self, in_use: bool) {
        let destroy = {
            let mut state = self.state.lock().unwrap();
            if state.destroyed {
                return;
            }
            state.in_use = in_use;
            !in_use && state.refs == 0
        };
        if destroy {
            self.destroy();
        }
    }

    pub fn ref_(&self) {
        let mut state = self.state.lock().unwrap();
        if state.destroyed {
            warn!(buffer = ?self.id, "Referencing destroyed buffer");
            return;
        }
        state.refs += 1;
    }

    pub fn unref(&self) {
        let destroy = {
            let mut state = self.state.lock().unwrap();
            if state.destroyed {
                return;
            }
            state.refs = state.refs.saturating_sub(1);
            state.refs == 0 && !state.in_use
        };
        if destroy {
            self.destroy();
        }
    }

    pub fn register_free_callback<F>(&self, callback: F) -> FreeCallbackId
    where
        F: FnMut(&HwSurface) + Send + 'static,
    {
        let id = FreeCallbackId(next_callback_id());
        self.state
            .lock()
            .unwrap()
            .free_callbacks
            .push((id, Box::new(callback)));
        id
    }

    pub fn unregister_free_callback(&self, id: FreeCallbackId) {
        self.state
            .lock()
            .unwrap()
            .free_callbacks
            .retain(|(cb_id, _)| *cb_id != id);
    }

    fn destroy(&self) {
        let (surface, mut callbacks) = {
            let mut state = self.state.lock().unwrap();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            (state.surface, std::mem::take(&mut state.free_callbacks))
        };
        trace!(buffer = ?self.id, "Destroying buffer");
        for (_, callback) in callbacks.iter_mut() {
            callback(&surface);
        }
    }
}

/// RAII reference to a [`Buffer`]. Creation and clones increment the count,
/// drop decrements it, so early returns cannot leak a reference.
pub struct BufferRef {
    buffer: Buffer,
}

impl BufferRef {
    fn new(buffer: Buffer) -> BufferRef {
        buffer.ref_();
        BufferRef { buffer }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}

impl Clone for BufferRef {
    fn clone(&self) -> Self {
        BufferRef::new(self.buffer.clone())
    }
}

impl Drop for BufferRef {
    fn drop(&mut self) {
        self.buffer.unref();
    }
}

impl Deref for BufferRef {
    type Target = Buffer;
    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

impl PartialEq for BufferRef {
    fn eq(&self, other: &Self) -> bool {
        self.buffer == other.buffer
    }
}
impl Eq for BufferRef {}

impl std::fmt::Debug for BufferRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.buffer.fmt(f)
    }
}

/// Registry of all live buffer wrappers, keyed by the underlying surface.
#[derive(Clone, Default)]
pub struct BufferRegistry {
    buffers: Arc<Mutex<HashMap<SurfaceId, Buffer>>>,
}

impl BufferRegistry {
    pub fn new() -> BufferRegistry {
        BufferRegistry::default()
    }

    /// Wrap a hardware surface, returning the existing wrapper if this
    /// surface is already tracked.
    pub fn acquire(&self, surface: HwSurface) -> BufferRef {
        let mut buffers = self.buffers.lock().unwrap();
        if let Some(existing) = buffers.get(&surface.id) {
            if !existing.is_destroyed() {
                return BufferRef::new(existing.clone());
            }
        }
        let buffer = Buffer::new(surface);
        let map = self.buffers.clone();
        buffer.register_free_callback(move |surface| {
            map.lock().unwrap().remove(&surface.id);
        });
        buffers.insert(surface.id, buffer.clone());
        BufferRef::new(buffer)
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.lock().unwrap().is_empty()
    }
}
