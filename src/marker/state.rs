//! Clean/Dirty state machine behind lazy relocation

/// Whether a marker's cached placement can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelocationState {
    /// Placement matches the marker's time in the current structure
    #[default]
    Clean,
    /// Placement must be recomputed before it is trusted
    Dirty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationEvent {
    /// The structure changed in a way that may move the marker
    Invalidated,
    /// A new placement was established
    Relocated,
    /// No destination was found
    Failed,
}

impl RelocationState {
    /// Next state after `event`.
    ///
    /// Only `Relocated` leaves `Dirty`; a failure keeps the marker dirty so the
    /// next query retries.
    pub fn on(self, event: RelocationEvent) -> Self {
        match (self, event) {
            (_, RelocationEvent::Invalidated) => RelocationState::Dirty,
            (RelocationState::Dirty, RelocationEvent::Relocated) => RelocationState::Clean,
            (RelocationState::Dirty, RelocationEvent::Failed) => RelocationState::Dirty,
            (RelocationState::Clean, _) => RelocationState::Clean,
        }
    }

    pub fn is_dirty(self) -> bool {
        self == RelocationState::Dirty
    }
}
