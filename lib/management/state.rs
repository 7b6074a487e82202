//! The sandbox lifecycle state machine, as data.

use crate::{
    store::{SandboxRecord, SandboxStatus},
    DcsandboxError, DcsandboxResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The legal status transitions. Checked before every record mutation;
/// removal is not a transition (the record ceases to exist).
const TRANSITIONS: &[(SandboxStatus, SandboxStatus)] = &[
    (SandboxStatus::Creating, SandboxStatus::Running),
    (SandboxStatus::Creating, SandboxStatus::Stopped),
    (SandboxStatus::Creating, SandboxStatus::Error),
    (SandboxStatus::Stopped, SandboxStatus::Running),
    (SandboxStatus::Running, SandboxStatus::Stopped),
    (SandboxStatus::Running, SandboxStatus::Error),
    (SandboxStatus::Stopped, SandboxStatus::Error),
];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns whether the transition `from -> to` is legal.
pub fn can_transition(from: SandboxStatus, to: SandboxStatus) -> bool {
    TRANSITIONS.iter().any(|&(f, t)| f == from && t == to)
}

/// Applies a status transition to a record, rejecting illegal ones with
/// `INVALID_STATE`.
pub fn transition(
    record: &mut SandboxRecord,
    to: SandboxStatus,
    operation: &str,
) -> DcsandboxResult<()> {
    if !can_transition(record.status, to) {
        return Err(DcsandboxError::InvalidState {
            id: record.id.clone(),
            status: record.status.to_string(),
            operation: operation.to_string(),
        });
    }
    record.status = to;
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use SandboxStatus::*;

        assert!(can_transition(Creating, Running));
        assert!(can_transition(Creating, Error));
        assert!(can_transition(Stopped, Running));
        assert!(can_transition(Running, Stopped));

        assert!(!can_transition(Running, Running));
        assert!(!can_transition(Stopped, Creating));
        assert!(!can_transition(Error, Running));
        assert!(!can_transition(Error, Stopped));
    }
}
