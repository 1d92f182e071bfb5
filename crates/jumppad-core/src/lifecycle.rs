use crate::CoreError;
use jumppad_schema::Status;

/// Check that the scheduler may move a resource from `from` to `to` within
/// one run.
pub fn validate_transition(from: Status, to: Status) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            Status::PendingCreation | Status::PendingUpdate,
            Status::Applied | Status::Failed
        ) | (Status::Applied, Status::Applied | Status::Failed)
            | (
                Status::PendingModification
                    | Status::Applied
                    | Status::Failed
                    | Status::PendingCreation
                    | Status::PendingUpdate,
                Status::Destroyed | Status::Failed
            )
            | (Status::Disabled, Status::Destroyed)
            | (_, Status::Disabled)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(Status::PendingCreation, Status::Applied).is_ok());
        assert!(validate_transition(Status::PendingCreation, Status::Failed).is_ok());
        assert!(validate_transition(Status::PendingUpdate, Status::Applied).is_ok());
        assert!(validate_transition(Status::Applied, Status::Applied).is_ok()); // refresh
        assert!(validate_transition(Status::PendingModification, Status::Destroyed).is_ok());
        assert!(validate_transition(Status::Failed, Status::Destroyed).is_ok());
        assert!(validate_transition(Status::Applied, Status::Disabled).is_ok());
        assert!(validate_transition(Status::Disabled, Status::Destroyed).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(Status::Applied, Status::PendingCreation).is_err());
        assert!(validate_transition(Status::Destroyed, Status::Applied).is_err());
        assert!(validate_transition(Status::Failed, Status::Applied).is_err());
        assert!(validate_transition(Status::PendingModification, Status::Applied).is_err());
        assert!(validate_transition(Status::Disabled, Status::Applied).is_err());
    }
}
