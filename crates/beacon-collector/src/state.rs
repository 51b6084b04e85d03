use std::fmt;

/// Lifecycle state of the wrapped collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CollectorState {
    #[default]
    Unknown,
    Starting,
    Running,
    Closing,
    Closed,
}

impl CollectorState {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectorState::Unknown => "unknown",
            CollectorState::Starting => "starting",
            CollectorState::Running => "running",
            CollectorState::Closing => "closing",
            CollectorState::Closed => "closed",
        }
    }

    pub fn is_running(self) -> bool {
        self == CollectorState::Running
    }
}

impl fmt::Display for CollectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
