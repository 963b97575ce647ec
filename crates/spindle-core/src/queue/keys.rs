//! Store key layout for one named queue.

/// Keys of the structures backing queue `N`.
///
/// | structure    | key              |
/// |--------------|------------------|
/// | work         | `N:workq`        |
/// | processing   | `N:processingq`  |
/// | scheduled    | `N:scheduledq`   |
/// | success      | `N:success`      |
/// | failure      | `N:failure`      |
/// | logs         | `N:logs` (reserved, unused) |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub work: String,
    pub processing: String,
    pub scheduled: String,
    pub success: String,
    pub failure: String,
    pub logs: String,
}

impl QueueKeys {
    pub fn new(name: &str) -> Self {
        Self {
            work: format!("{name}:workq"),
            processing: format!("{name}:processingq"),
            scheduled: format!("{name}:scheduledq"),
            success: format!("{name}:success"),
            failure: format!("{name}:failure"),
            logs: format!("{name}:logs"),
        }
    }

    pub fn counter(&self, success: bool) -> &str {
        if success { &self.success } else { &self.failure }
    }
}
