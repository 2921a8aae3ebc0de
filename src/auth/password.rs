use crate::error::{AppError, AppResult};

/// Hash a plaintext password for storage with the given bcrypt cost.
pub fn hash_password(plaintext: &str, cost: u32) -> AppResult<String> {
    bcrypt::hash(plaintext, cost)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify plaintext against a stored hash - constant-time via bcrypt.
/// A malformed hash never verifies.
pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    bcrypt::verify(plaintext, hash).unwrap_or(false)
}
