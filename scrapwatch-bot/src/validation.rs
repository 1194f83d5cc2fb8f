/// Input validation functions for all Discord commands
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Player id cannot be empty")]
    PlayerIdEmpty,

    #[error("Player id must be numeric (got '{0}')")]
    PlayerIdNotNumeric(String),

    #[error("Server id cannot be empty")]
    ServerIdEmpty,

    #[error("Server id must be numeric (got '{0}')")]
    ServerIdNotNumeric(String),

    #[error("Nickname cannot be empty")]
    NicknameEmpty,

    #[error("Nickname too long (max 64 characters, got {0})")]
    NicknameTooLong(usize),
}

/// Validates a Battlemetrics player id
///
/// Rules:
/// - Cannot be empty
/// - Digits only, as issued by Battlemetrics
pub fn validate_player_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::PlayerIdEmpty);
    }

    if !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::PlayerIdNotNumeric(id.to_string()));
    }

    Ok(())
}

/// Validates a Battlemetrics server id
///
/// Rules:
/// - Cannot be empty
/// - Digits only, as issued by Battlemetrics
pub fn validate_server_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::ServerIdEmpty);
    }

    if !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::ServerIdNotNumeric(id.to_string()));
    }

    Ok(())
}

/// Validates a tracked player nickname
///
/// Rules:
/// - Cannot be empty after trimming
/// - Max 64 characters, so it fits in an embed field title
pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    if nickname.trim().is_empty() {
        return Err(ValidationError::NicknameEmpty);
    }

    if nickname.len() > 64 {
        return Err(ValidationError::NicknameTooLong(nickname.len()));
    }

    Ok(())
}
