// SPDX-License-Identifier: GPL-3.0-only

//! Interface to the compositor core. The shell owns client windows, stacking
//! and the primary scanout path; this module only needs a narrow view of it.

use std::{collections::HashSet, sync::Mutex};

use crate::utils::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

pub trait ShellProxy {
    fn window_visible(&self, window: WindowHandle) -> bool;
    /// Remove or restore a window from the primary-screen compositing path.
    fn set_redirected(&self, window: WindowHandle, redirected: bool);
    /// Ask the client to resize to the given size.
    fn send_reconfigure(&self, window: WindowHandle, size: Size<Logical>);
    fn primary_output_rect(&self) -> Rectangle<Logical>;
    /// Rotation angle of the topmost visible window on `output` in degrees.
    fn topmost_angle(&self, output: OutputId) -> u32;
}

/// Minimal shell for standalone operation and tests: a fixed primary
/// geometry, every window visible unless explicitly hidden.
#[derive(Debug)]
pub struct StubShell {
    primary_rect: Rectangle<Logical>,
    hidden: Mutex<HashSet<WindowHandle>>,
    unredirected: Mutex<HashSet<WindowHandle>>,
    reconfigures: Mutex<Vec<(WindowHandle, Size<Logical>)>>,
    angle: Mutex<u32>,
}

impl StubShell {
    pub fn new(primary_rect: Rectangle<Logical>) -> StubShell {
        StubShell {
            primary_rect,
            hidden: Mutex::new(HashSet::new()),
            unredirected: Mutex::new(HashSet::new()),
            reconfigures: Mutex::new(Vec::new()),
            angle: Mutex::new(0),
        }
    }

    pub fn set_window_visible(&self, window: WindowHandle, visible: bool) {
        let mut hidden = self.hidden.lock().unwrap();
        if visible {
            hidden.remove(&window);
        } else {
            hidden.insert(window);
        }
    }

    pub fn set_topmost_angle(&self, angle: u32) {
        *self.angle.lock().unwrap() = angle;
    }

    pub fn is_redirected(&self, window: WindowHandle) -> bool {
        !self.unredirected.lock().unwrap().contains(&window)
    }

    pub fn reconfigures(&self) -> Vec<(WindowHandle, Size<Logical>)> {
        self.reconfigures.lock().unwrap().clone()
    }
}

impl ShellProxy for StubShell {
    fn window_visible(&self, window: WindowHandle) -> bool {
        !self.hidden.lock().unwrap().contains(&window)
    }

    fn set_redirected(&self, window: WindowHandle, redirected: bool) {
        let mut unredirected = self.unredirected.lock().unwrap();
        if redirected {
            unredirected.remove(&window);
        } else {
            unredirected.insert(window);
        }
    }

    fn send_reconfigure(&self, window: WindowHandle, size: Size<Logical>) {
        self.reconfigures.lock().unwrap().push((window, size));
    }

    fn primary_output_rect(&self) -> Rectangle<Logical> {
        self.primary_rect
    }

    fn topmost_angle(&self, _output: OutputId) -> u32 {
        *self.angle.lock().unwrap()
    }
}
