// src/device/egl/connection.rs

use super::ffi;
use anyhow::{anyhow, Result};
use libc::{c_char, c_int, c_long, c_uint, c_ulong};
use log::{debug, info, warn};
use std::ffi::CString;
use std::mem;
use std::ptr;
use x11::xlib;

/// Owns the `*mut xlib::Display`; closes it on drop.
#[derive(Debug)]
struct ManagedDisplay {
    ptr: *mut xlib::Display,
}

impl ManagedDisplay {
    /// Opens the display named by `DISPLAY`.
    fn new() -> Result<Self> {
        let display_ptr = unsafe { xlib::XOpenDisplay(ptr::null()) };
        if display_ptr.is_null() {
            Err(anyhow!(
                "Failed to open X display. Check DISPLAY environment variable or X server status."
            ))
        } else {
            debug!("X display opened: {:p}", display_ptr);
            Ok(Self { ptr: display_ptr })
        }
    }

    #[inline]
    fn raw(&self) -> *mut xlib::Display {
        self.ptr
    }
}

impl Drop for ManagedDisplay {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            info!("Closing X11 display connection: {:p}", self.ptr);
            unsafe {
                let status = xlib::XCloseDisplay(self.ptr);
                if status != 0 {
                    warn!(
                        "XCloseDisplay returned non-zero status: {}. Display may not have closed cleanly.",
                        status
                    );
                }
            }
        }
    }
}

/// A top-level window and the colormap created for its visual.
#[derive(Debug, Clone, Copy)]
pub struct NativeWindow {
    pub id: xlib::Window,
    colormap: xlib::Colormap,
}

/// Connection to the X server plus the default screen's root window.
///
/// Pixmaps, images and windows created through it must be released before
/// it is dropped.
#[derive(Debug)]
pub struct Connection {
    managed_display: ManagedDisplay,
    screen: c_int,
    root: xlib::Window,
}

impl Connection {
    pub fn new() -> Result<Self> {
        info!("Establishing X11 server connection.");
        let managed_display = ManagedDisplay::new()?;
        let screen = unsafe { xlib::XDefaultScreen(managed_display.raw()) };
        let root = unsafe { xlib::XRootWindow(managed_display.raw(), screen) };
        debug!("Default screen {}, root window {}", screen, root);
        Ok(Connection {
            managed_display,
            screen,
            root,
        })
    }

    #[inline]
    pub fn display(&self) -> *mut xlib::Display {
        self.managed_display.raw()
    }

    /// Size of the root window in pixels.
    pub fn root_size(&self) -> (u32, u32) {
        let mut attrs: xlib::XWindowAttributes = unsafe { mem::zeroed() };
        unsafe { xlib::XGetWindowAttributes(self.display(), self.root, &mut attrs) };
        (attrs.width.max(0) as u32, attrs.height.max(0) as u32)
    }

    /// Event type of MIT-SHM completion events, if the server has the
    /// extension.
    pub fn shm_completion_event(&self) -> Option<c_int> {
        let supported = unsafe { ffi::XShmQueryExtension(self.display()) };
        if supported == xlib::False {
            debug!("MIT-SHM not available");
            return None;
        }
        Some(unsafe { ffi::XShmGetEventBase(self.display()) } + ffi::SHM_COMPLETION)
    }

    /// Looks up a visual of the default screen matching `template`.
    fn find_visual(
        &self,
        mask: c_long,
        template: &mut xlib::XVisualInfo,
    ) -> Option<xlib::XVisualInfo> {
        template.screen = self.screen;
        let mut count: c_int = 0;
        unsafe {
            let infos = xlib::XGetVisualInfo(
                self.display(),
                mask | xlib::VisualScreenMask,
                template,
                &mut count,
            );
            if infos.is_null() {
                return None;
            }
            let found = if count > 0 { Some(*infos) } else { None };
            xlib::XFree(infos.cast());
            found
        }
    }

    pub fn visual_for_depth(&self, depth: u32) -> Option<*mut xlib::Visual> {
        let mut template: xlib::XVisualInfo = unsafe { mem::zeroed() };
        template.depth = depth as c_int;
        self.find_visual(xlib::VisualDepthMask, &mut template)
            .map(|info| info.visual)
    }

    /// Creates and maps a window using the visual `visual_id`. Requests
    /// fullscreen when the size matches the root window.
    pub fn create_window(
        &self,
        visual_id: xlib::VisualID,
        width: u32,
        height: u32,
        title: &str,
    ) -> Result<NativeWindow> {
        info!("Creating X11 window: {}x{}px", width, height);
        let display = self.display();
        let mut template: xlib::XVisualInfo = unsafe { mem::zeroed() };
        template.visualid = visual_id;
        let visual = self
            .find_visual(xlib::VisualIDMask, &mut template)
            .ok_or_else(|| anyhow!("no X visual with id 0x{:x}", visual_id))?;

        let window = unsafe {
            let colormap =
                xlib::XCreateColormap(display, self.root, visual.visual, xlib::AllocNone);
            let mut attributes: xlib::XSetWindowAttributes = mem::zeroed();
            attributes.background_pixmap = 0;
            attributes.border_pixel = 0;
            attributes.colormap = colormap;

            let id = xlib::XCreateWindow(
                display,
                self.root,
                0,
                0,
                width as c_uint,
                height as c_uint,
                0,
                visual.depth,
                xlib::InputOutput as c_uint,
                visual.visual,
                xlib::CWBackPixmap | xlib::CWBorderPixel | xlib::CWColormap,
                &mut attributes,
            );
            if id == 0 {
                xlib::XFreeColormap(display, colormap);
                return Err(anyhow!("XCreateWindow failed"));
            }
            NativeWindow { id, colormap }
        };
        debug!("X window created (ID: {})", window.id);

        if self.root_visual_id() == visual_id {
            self.mark_non_composited(window.id);
        } else {
            warn!("Using a composited window; blit rates include compositor overhead");
        }

        if let Ok(title_cstr) = CString::new(title) {
            unsafe { xlib::XStoreName(display, window.id, title_cstr.as_ptr() as *mut c_char) };
        }
        unsafe {
            xlib::XMapWindow(display, window.id);
            xlib::XFlush(display);
        }

        if self.root_size() == (width, height) {
            self.request_fullscreen(window.id);
        }
        Ok(window)
    }

    fn root_visual_id(&self) -> xlib::VisualID {
        let mut attrs: xlib::XWindowAttributes = unsafe { mem::zeroed() };
        unsafe {
            xlib::XGetWindowAttributes(self.display(), self.root, &mut attrs);
            xlib::XVisualIDFromVisual(attrs.visual)
        }
    }

    /// Asks the window manager to skip compositing for `window`.
    fn mark_non_composited(&self, window: xlib::Window) {
        let display = self.display();
        let one: c_long = 1;
        unsafe {
            let hint = xlib::XInternAtom(
                display,
                b"_HILDON_NON_COMPOSITED_WINDOW\0".as_ptr() as *const c_char,
                xlib::False,
            );
            xlib::XChangeProperty(
                display,
                window,
                hint,
                xlib::XA_INTEGER,
                32,
                xlib::PropModeReplace,
                &one as *const c_long as *const u8,
                1,
            );
        }
    }

    fn request_fullscreen(&self, window: xlib::Window) {
        let display = self.display();
        unsafe {
            let wm_state = xlib::XInternAtom(
                display,
                b"_NET_WM_STATE\0".as_ptr() as *const c_char,
                xlib::False,
            );
            let fullscreen = xlib::XInternAtom(
                display,
                b"_NET_WM_STATE_FULLSCREEN\0".as_ptr() as *const c_char,
                xlib::False,
            );
            let mut message: xlib::XClientMessageEvent = mem::zeroed();
            message.type_ = xlib::ClientMessage;
            message.window = window;
            message.message_type = wm_state;
            message.format = 32;
            message.data.set_long(0, 1);
            message.data.set_long(1, fullscreen as c_long);
            let mut event = xlib::XEvent {
                client_message: message,
            };
            xlib::XSendEvent(
                display,
                self.root,
                xlib::False,
                xlib::SubstructureNotifyMask,
                &mut event,
            );
        }
        debug!("Requested fullscreen for window {}", window);
    }

    pub fn destroy_window(&self, window: NativeWindow) {
        unsafe {
            xlib::XDestroyWindow(self.display(), window.id);
            xlib::XFreeColormap(self.display(), window.colormap);
        }
    }

    /// Creates a pixmap on the root window and a GC for writing into it.
    pub fn create_pixmap(
        &self,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Option<(xlib::Pixmap, xlib::GC)> {
        unsafe {
            let pixmap = xlib::XCreatePixmap(
                self.display(),
                self.root,
                width as c_uint,
                height as c_uint,
                depth as c_uint,
            );
            if pixmap == 0 {
                return None;
            }
            let gc = xlib::XCreateGC(self.display(), pixmap, 0, ptr::null_mut());
            xlib::XFlush(self.display());
            Some((pixmap, gc))
        }
    }

    pub fn free_pixmap(&self, pixmap: xlib::Pixmap, gc: xlib::GC) {
        unsafe {
            xlib::XFreeGC(self.display(), gc);
            xlib::XFreePixmap(self.display(), pixmap);
        }
    }

    /// Events already read from the socket, after reading what is pending.
    pub fn events_queued(&self) -> usize {
        let queued = unsafe { xlib::XEventsQueued(self.display(), xlib::QueuedAfterReading) };
        queued.max(0) as usize
    }

    /// Blocks until an event arrives.
    pub fn next_event(&self) -> xlib::XEvent {
        let mut event: xlib::XEvent = unsafe { mem::zeroed() };
        unsafe { xlib::XNextEvent(self.display(), &mut event) };
        event
    }

    pub fn sync(&self) {
        unsafe { xlib::XSync(self.display(), xlib::False) };
    }
}

/// `AllPlanes` for `XGetImage`.
pub const ALL_PLANES: c_ulong = !0;

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_new_connection_requires_x_server() {
        // Only meaningful where DISPLAY points at a server; elsewhere the
        // error path must not panic.
        match Connection::new() {
            Ok(conn) => {
                assert!(!conn.display().is_null());
                let (w, h) = conn.root_size();
                assert!(w > 0 && h > 0);
            }
            Err(err) => assert!(err.to_string().contains("Failed to open X display")),
        }
    }
}
