//! Lifecycle of an embedded image node.
//!
//! An [`ImageLifecycle`] follows one mounted image through
//! `Unresolved -> Loading -> Resolved | Errored`, with interactive resizing
//! on top of `Resolved`. Attribute changes are written back to the node
//! through an [`AttributeSink`].
//!
//! Resize listeners are installed on the [`Viewport`] only while a resize is
//! running, and are owned by the lifecycle's state: ending the resize,
//! unmounting, or dropping the lifecycle all remove them.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::config::RestoreImage;
use crate::error::EditorError;
use crate::schema::ImageAttrs;
use crate::viewport::{ListenerGuard, PointerEventKind, Viewport};

/// Smallest width or height a resize may produce, in pixels.
pub const MIN_SIZE: f64 = 100.0;

/// Share of the container an unsized image takes on first load.
pub const INITIAL_WIDTH_RATIO: f64 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePhase {
    /// No source yet, e.g. an upload still running.
    Unresolved,
    Loading,
    Resolved,
    /// Terminal for this node instance.
    Errored,
}

/// Persists attributes onto the node.
pub type AttributeSink = Rc<dyn Fn(&ImageAttrs) -> Result<(), EditorError>>;

struct ResizeState {
    container_left: f64,
    width: f64,
    height: f64,
    _guards: Vec<ListenerGuard>,
}

struct State {
    attrs: ImageAttrs,
    phase: ImagePhase,
    /// Local preview or restored source shown instead of `attrs.src`.
    display_src: Option<String>,
    restore_attempted: bool,
    resize: Option<ResizeState>,
}

struct Shared {
    state: RefCell<State>,
    viewport: Viewport,
    restorer: Option<Arc<dyn RestoreImage>>,
    sink: AttributeSink,
}

impl Shared {
    fn persist(&self, attrs: &ImageAttrs) {
        if let Err(error) = (self.sink)(attrs) {
            tracing::error!(src = ?attrs.src, %error, "failed to update image attributes");
        }
    }
}

/// One mounted image node.
#[derive(Clone)]
pub struct ImageLifecycle {
    shared: Rc<Shared>,
}

/// Non-owning handle to an [`ImageLifecycle`].
#[derive(Clone)]
pub struct WeakImageLifecycle {
    shared: Weak<Shared>,
}

impl WeakImageLifecycle {
    pub fn upgrade(&self) -> Option<ImageLifecycle> {
        self.shared.upgrade().map(|shared| ImageLifecycle { shared })
    }
}

impl ImageLifecycle {
    pub fn new(
        attrs: ImageAttrs,
        viewport: Viewport,
        restorer: Option<Arc<dyn RestoreImage>>,
        sink: AttributeSink,
    ) -> Self {
        let phase = if attrs.src.is_some() {
            ImagePhase::Loading
        } else {
            ImagePhase::Unresolved
        };
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(State {
                    attrs,
                    phase,
                    display_src: None,
                    restore_attempted: false,
                    resize: None,
                }),
                viewport,
                restorer,
                sink,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakImageLifecycle {
        WeakImageLifecycle {
            shared: Rc::downgrade(&self.shared),
        }
    }

    pub fn phase(&self) -> ImagePhase {
        self.shared.state.borrow().phase
    }

    pub fn attrs(&self) -> ImageAttrs {
        self.shared.state.borrow().attrs.clone()
    }

    /// The source to display: a preview or restored source if one is set,
    /// the node's own source otherwise.
    pub fn source(&self) -> Option<String> {
        let state = self.shared.state.borrow();
        state.display_src.clone().or_else(|| state.attrs.src.clone())
    }

    pub fn is_resizing(&self) -> bool {
        self.shared.state.borrow().resize.is_some()
    }

    /// Displayed size: the live size while resizing, the stored one otherwise.
    pub fn size(&self) -> (Option<f64>, Option<f64>) {
        let state = self.shared.state.borrow();
        match &state.resize {
            Some(r) => (Some(r.width), Some(r.height)),
            None => (state.attrs.width, state.attrs.height),
        }
    }

    /// Show a local file while the canonical source resolves.
    pub fn set_preview(&self, local_src: impl Into<String>) {
        let mut state = self.shared.state.borrow_mut();
        state.display_src = Some(local_src.into());
        if state.phase == ImagePhase::Unresolved {
            state.phase = ImagePhase::Loading;
        }
    }

    /// The upload finished and the node has its canonical source.
    pub fn set_source(&self, src: impl Into<String>) {
        let attrs = {
            let mut state = self.shared.state.borrow_mut();
            state.attrs.src = Some(src.into());
            state.phase = ImagePhase::Loading;
            state.attrs.clone()
        };
        self.shared.persist(&attrs);
    }

    /// The source loaded with the given natural dimensions.
    ///
    /// A never-sized node gets its one-time default size; a sized node only
    /// has its aspect ratio recorded or corrected.
    pub fn on_load(&self, natural_width: f64, natural_height: f64, container_width: f64) {
        if natural_width <= 0.0 || natural_height <= 0.0 {
            tracing::warn!(natural_width, natural_height, "image loaded with no size");
            self.shared.state.borrow_mut().phase = ImagePhase::Resolved;
            return;
        }
        let ratio = natural_width / natural_height;

        let changed = {
            let mut state = self.shared.state.borrow_mut();
            state.phase = ImagePhase::Resolved;
            let attrs = &mut state.attrs;
            match attrs.width {
                None => {
                    let width = (container_width * INITIAL_WIDTH_RATIO).max(MIN_SIZE).round();
                    attrs.width = Some(width);
                    attrs.height = Some((width * natural_height / natural_width).round());
                    attrs.aspect_ratio = Some(ratio);
                    Some(attrs.clone())
                }
                Some(_) if attrs.aspect_ratio != Some(ratio) => {
                    attrs.aspect_ratio = Some(ratio);
                    Some(attrs.clone())
                }
                Some(_) => None,
            }
        };
        if let Some(attrs) = changed {
            tracing::debug!(width = ?attrs.width, height = ?attrs.height, ratio, "image sized");
            self.shared.persist(&attrs);
        }
    }

    /// The displayed source failed to load.
    ///
    /// With a restore capability, the first failure tries one restore and
    /// re-points the node on success. Every other failure is terminal.
    pub async fn on_error(&self) -> Result<(), EditorError> {
        let src = {
            let mut state = self.shared.state.borrow_mut();
            if self.shared.restorer.is_none() || state.restore_attempted {
                state.phase = ImagePhase::Errored;
                return Err(EditorError::AttachmentLoadFailed {
                    src: state.attrs.src.clone(),
                });
            }
            state.restore_attempted = true;
            match state.attrs.src.clone() {
                Some(src) => {
                    state.phase = ImagePhase::Loading;
                    src
                }
                None => {
                    state.phase = ImagePhase::Errored;
                    return Err(EditorError::AttachmentLoadFailed { src: None });
                }
            }
        };
        let Some(restorer) = self.shared.restorer.clone() else {
            return Err(EditorError::AttachmentLoadFailed { src: Some(src) });
        };

        match restorer.restore(&src).await {
            Ok(restored) => {
                tracing::debug!(%src, %restored, "image restored");
                let mut state = self.shared.state.borrow_mut();
                state.display_src = Some(restored);
                state.phase = ImagePhase::Resolved;
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%src, %error, "image restore failed");
                self.shared.state.borrow_mut().phase = ImagePhase::Errored;
                Err(EditorError::AttachmentLoadFailed { src: Some(src) })
            }
        }
    }

    // === Resizing ===

    /// Pointer or touch down on the resize handle. `container_left` is the
    /// left edge of the image container in viewport coordinates.
    ///
    /// Returns false unless the image is resolved and not already resizing.
    pub fn begin_resize(&self, container_left: f64) -> bool {
        {
            let state = self.shared.state.borrow();
            if state.phase != ImagePhase::Resolved || state.resize.is_some() {
                return false;
            }
        }

        let weak = Rc::downgrade(&self.shared);
        let guards = vec![
            self.listen_move(PointerEventKind::MouseMove, weak.clone()),
            self.listen_move(PointerEventKind::TouchMove, weak.clone()),
            self.listen_end(PointerEventKind::MouseUp, weak.clone()),
            self.listen_end(PointerEventKind::MouseLeave, weak.clone()),
            self.listen_end(PointerEventKind::TouchEnd, weak),
        ];

        let mut state = self.shared.state.borrow_mut();
        let width = state.attrs.width.unwrap_or(MIN_SIZE);
        let height = state
            .attrs
            .height
            .unwrap_or_else(|| width / aspect_ratio(&state.attrs));
        state.resize = Some(ResizeState {
            container_left,
            width,
            height,
            _guards: guards,
        });
        true
    }

    fn listen_move(&self, kind: PointerEventKind, weak: Weak<Shared>) -> ListenerGuard {
        self.shared.viewport.listen(kind, move |event| {
            if let Some(shared) = weak.upgrade() {
                resize_to(&shared, event.client_x);
            }
        })
    }

    fn listen_end(&self, kind: PointerEventKind, weak: Weak<Shared>) -> ListenerGuard {
        self.shared.viewport.listen(kind, move |_| {
            if let Some(shared) = weak.upgrade() {
                end_resize(&shared);
            }
        })
    }

    /// Track the pointer. Width follows the pointer with a floor of
    /// [`MIN_SIZE`]; height follows the aspect ratio.
    pub fn resize_to(&self, client_x: f64) {
        resize_to(&self.shared, client_x);
    }

    /// Commit the live size and release the viewport listeners.
    pub fn end_resize(&self) {
        end_resize(&self.shared);
    }

    /// The node view is going away. A running resize is abandoned and its
    /// listeners released.
    pub fn unmount(&self) {
        self.shared.state.borrow_mut().resize = None;
    }
}

fn aspect_ratio(attrs: &ImageAttrs) -> f64 {
    match (attrs.aspect_ratio, attrs.width, attrs.height) {
        (Some(ratio), _, _) if ratio > 0.0 => ratio,
        (_, Some(w), Some(h)) if h > 0.0 => w / h,
        _ => 1.0,
    }
}

fn resize_to(shared: &Shared, client_x: f64) {
    let mut state = shared.state.borrow_mut();
    let ratio = aspect_ratio(&state.attrs);
    if let Some(resize) = state.resize.as_mut() {
        let width = (client_x - resize.container_left).max(MIN_SIZE);
        resize.width = width;
        resize.height = width / ratio;
    }
}

fn end_resize(shared: &Shared) {
    let attrs = {
        let mut state = shared.state.borrow_mut();
        let Some(resize) = state.resize.take() else {
            return;
        };
        state.attrs.width = Some(resize.width);
        state.attrs.height = Some(resize.height);
        state.attrs.clone()
    };
    shared.persist(&attrs);
}
