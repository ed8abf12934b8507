use crate::errors::CommandError;

/// How far in the past a command header timestamp may lie.
pub const FRESHNESS_WINDOW_MS: i64 = 500;

/// Admit a header timestamp only if `now - window < timestamp <= now`.
pub fn check_freshness(timestamp: i64, now_ms: i64, window_ms: i64) -> Result<(), CommandError> {
    if timestamp > now_ms {
        return Err(CommandError::FromTheFuture);
    }
    if timestamp <= now_ms - window_ms {
        return Err(CommandError::TimedOut);
    }
    Ok(())
}
