//! Viewport bookkeeping around prepends and appends.
//!
//! Prepending older entries must not move what the user is looking at: the
//! offset grows by exactly the height that was inserted above. The append
//! that may coincide with a prepend must not then yank the view to the
//! bottom, so the next auto-scroll decision after a prepend is skipped.

/// Tracks one list viewport. Heights and offsets are in layout units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollKeeper {
    pending_height: Option<f64>,
    skip_next_auto_scroll: bool,
}

impl ScrollKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the content height just before older entries are prepended.
    pub fn before_prepend(&mut self, content_height: f64) {
        self.pending_height = Some(content_height);
    }

    /// Return the scroll offset that keeps the viewport in place after the
    /// prepend, given the new content height and the current offset.
    pub fn after_prepend(&mut self, content_height: f64, offset: f64) -> f64 {
        let Some(before) = self.pending_height.take() else {
            return offset;
        };
        self.skip_next_auto_scroll = true;
        offset + (content_height - before).max(0.0)
    }

    /// Whether an appended entry should scroll the view to the bottom.
    ///
    /// The first decision after a prepend is always "no".
    pub fn should_auto_scroll(&mut self, at_bottom: bool) -> bool {
        if std::mem::take(&mut self.skip_next_auto_scroll) {
            return false;
        }
        at_bottom
    }

    pub fn is_prepending(&self) -> bool {
        self.pending_height.is_some()
    }
}
