//! User and transport activity.

/// Source of an activity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Pointer,
    Keyboard,
    Scroll,
    Touch,
    /// An outbound call was dispatched.
    Dispatch,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pointer => "pointer",
            Self::Keyboard => "keyboard",
            Self::Scroll => "scroll",
            Self::Touch => "touch",
            Self::Dispatch => "dispatch",
        }
    }

    /// Parse a DOM event name.
    pub fn from_event(name: &str) -> Option<Self> {
        match name {
            "mousedown" | "mousemove" | "pointerdown" | "pointermove" | "click" => {
                Some(Self::Pointer)
            }
            "keypress" | "keydown" => Some(Self::Keyboard),
            "scroll" | "wheel" => Some(Self::Scroll),
            "touchstart" | "touchmove" => Some(Self::Touch),
            _ => None,
        }
    }
}

/// Receiver of activity events.
pub trait ActivitySink: Send + Sync {
    /// Record activity now.
    fn record_activity(&self, kind: ActivityKind);
}
