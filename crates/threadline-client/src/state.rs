//! UI-side state kept alongside the engine.
//!
//! The engine owns the data; [`ClientState`] only remembers what the UI last
//! rendered, so it can tell prepends from appends and keep the viewport
//! steady across them.

use threadline_shared::Viewer;
use threadline_sync::{Notice, RenderedView, ScrollKeeper};

/// How a new view differs from the previous one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewUpdate {
    pub prepended: bool,
    pub appended: bool,
    pub follow_bottom: bool,
}

pub struct ClientState {
    /// The signed-in account.
    pub viewer: Viewer,

    /// Last view rendered for the open conversation.
    /// `None` when no conversation is open.
    pub view: Option<RenderedView>,

    /// Notices currently on screen.
    pub notices: Vec<Notice>,

    /// Whether the list is scrolled to its bottom edge.
    pub at_bottom: bool,

    pub scroll: ScrollKeeper,
}

impl ClientState {
    pub fn new(viewer: Viewer) -> Self {
        Self {
            viewer,
            view: None,
            notices: Vec::new(),
            at_bottom: true,
            scroll: ScrollKeeper::new(),
        }
    }

    /// The user asked for older entries while the content was
    /// `content_height` tall.
    pub fn begin_load_older(&mut self, content_height: f64) {
        self.scroll.before_prepend(content_height);
    }

    /// Offset to restore once the prepended entries are laid out.
    pub fn restore_offset(&mut self, content_height: f64, offset: f64) -> f64 {
        self.scroll.after_prepend(content_height, offset)
    }

    /// Remember `view` and work out how it changed.
    pub fn apply_view(&mut self, view: RenderedView) -> ViewUpdate {
        let mut update = ViewUpdate::default();

        if let Some(prev) = self
            .view
            .as_ref()
            .filter(|prev| prev.conversation == view.conversation)
        {
            let (old_first, old_last) = (prev.entries.first(), prev.entries.last());
            let (new_first, new_last) = (view.entries.first(), view.entries.last());

            update.prepended = match (old_first, new_first) {
                (Some(old), Some(new)) => new.created_at < old.created_at,
                _ => false,
            };
            update.appended = match (old_last, new_last) {
                (Some(old), Some(new)) => new.created_at > old.created_at,
                (None, Some(_)) => true,
                _ => false,
            };
        }

        update.follow_bottom =
            update.appended && !update.prepended && self.scroll.should_auto_scroll(self.at_bottom);
        self.view = Some(view);
        update
    }
}
