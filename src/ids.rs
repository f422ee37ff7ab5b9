use mongodb::bson::oid::ObjectId;

use crate::error::ApiError;

/// Document ids are 12-byte object ids rendered as 24 hex characters.
const OBJECT_ID_HEX_LEN: usize = 24;

/// Structural check only, existence is not verified.
pub fn is_valid_id(candidate: &str) -> bool {
    candidate.len() == OBJECT_ID_HEX_LEN && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Parses a caller-supplied id, failing with an invalid-identifier error
/// naming `what` ("video", "channel", ...).
pub fn parse_id(candidate: &str, what: &str) -> Result<ObjectId, ApiError> {
    if !is_valid_id(candidate) {
        return Err(ApiError::InvalidInput(format!("Invalid {} id", what)));
    }

    ObjectId::parse_str(candidate)
        .map_err(|_| ApiError::InvalidInput(format!("Invalid {} id", what)))
}
