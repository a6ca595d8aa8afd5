use crate::error::{TfError, TfResult};

/// Validates a frame name and strips one leading `/`, the legacy tf prefix.
pub fn normalize_frame_id(frame_id: &str) -> TfResult<&str> {
    let stripped = frame_id.strip_prefix('/').unwrap_or(frame_id);
    if stripped.is_empty() {
        return Err(TfError::InvalidArgument(format!(
            "Invalid frame id \"{frame_id}\": frame ids cannot be empty"
        )));
    }
    if stripped.chars().any(char::is_whitespace) {
        return Err(TfError::InvalidArgument(format!(
            "Invalid frame id \"{frame_id}\": frame ids cannot contain whitespace"
        )));
    }
    Ok(stripped)
}
