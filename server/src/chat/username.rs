//! Display-name rules for room members.

use thiserror::Error;

/// Longest accepted display name, in characters.
pub const MAX_USERNAME_LEN: usize = 20;

/// Reasons a display-name claim is refused. The `Display` text is what the
/// requester sees in the `error` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsernameError {
    #[error("Invalid username. Use 1-20 alphanumeric characters or underscores.")]
    Invalid,
    #[error("Username already taken, please choose another one.")]
    Taken,
    #[error("You already have a username in this room.")]
    AlreadySet,
}

/// Check that `name` is 1 to 20 ASCII letters, digits or underscores.
pub fn validate_username(name: &str) -> Result<(), UsernameError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(UsernameError::Invalid)
    }
}
