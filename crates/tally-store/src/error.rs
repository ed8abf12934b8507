#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient balance: {available} < {requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("balance overflow for {0}")]
    Overflow(String),
}
