use serde::Serialize;

/// Lifecycle state of a tracked identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum IdentityStatus {
    /// Detected in the most recent frame
    #[default]
    Active,
    /// Missed for at least one consecutive frame, still carried as a track slot
    Inactive,
    /// Terminal, never revived
    Dead,
}

impl IdentityStatus {
    pub fn is_live(self) -> bool {
        self != IdentityStatus::Dead
    }
}
