/// Auto-scroll policy for the message viewport
use serde::{Deserialize, Serialize};

/// Content units from the bottom that still count as "at the bottom"
pub const DEFAULT_NEAR_BOTTOM_THRESHOLD: f64 = 30.0;

/// Scroll geometry reported by the view
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Viewport {
    /// Distance scrolled from the top
    pub offset: f64,
    /// Visible height
    pub height: f64,
    /// Total content height
    pub content_height: f64,
}

impl Viewport {
    pub fn new(offset: f64, height: f64, content_height: f64) -> Self {
        Self {
            offset,
            height,
            content_height,
        }
    }

    pub fn max_offset(&self) -> f64 {
        (self.content_height - self.height).max(0.0)
    }

    pub fn is_near_bottom(&self, threshold: f64) -> bool {
        self.offset + self.height >= self.content_height - threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScrollDecision {
    pub auto_scroll: bool,
    pub new_content_available: bool,
}

/// Decide what a message arrival does to a viewport measured before it
pub fn on_new_content(before: Viewport, threshold: f64) -> ScrollDecision {
    if before.is_near_bottom(threshold) {
        ScrollDecision {
            auto_scroll: true,
            new_content_available: false,
        }
    } else {
        ScrollDecision {
            auto_scroll: false,
            new_content_available: true,
        }
    }
}

/// Tracks the last viewport and the "new messages" affordance
#[derive(Debug, Clone)]
pub struct ScrollState {
    threshold: f64,
    viewport: Viewport,
    new_content_available: bool,
    scroll_requests: u64,
}

impl ScrollState {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            viewport: Viewport::default(),
            new_content_available: false,
            scroll_requests: 0,
        }
    }

    /// View reports a new geometry (user scroll or resize)
    pub fn update_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        if viewport.is_near_bottom(self.threshold) {
            self.new_content_available = false;
        }
    }

    pub fn on_message_arrival(&mut self) -> ScrollDecision {
        let decision = on_new_content(self.viewport, self.threshold);
        if decision.auto_scroll {
            self.request_scroll();
        } else {
            self.new_content_available = true;
        }
        decision
    }

    /// Unconditional jump to the bottom (own send, conversation opened)
    pub fn scroll_to_bottom(&mut self) {
        self.request_scroll();
        self.new_content_available = false;
    }

    pub fn reset(&mut self) {
        self.viewport = Viewport::default();
        self.new_content_available = false;
    }

    pub fn new_content_available(&self) -> bool {
        self.new_content_available
    }

    /// Monotonic counter the view watches to know when to jump to the bottom
    pub fn scroll_requests(&self) -> u64 {
        self.scroll_requests
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn request_scroll(&mut self) {
        self.scroll_requests += 1;
        // Assume the view honours the jump until it reports otherwise
        self.viewport.offset = self.viewport.max_offset();
    }
}
