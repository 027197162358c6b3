use serde::{Deserialize, Serialize};

/// Wire envelope shared by every JSON endpoint.
///
/// Successful single-record responses carry `data`, list responses also
/// carry `total`, and failures carry `error` with `success: false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            total: None,
            error: None,
        }
    }
}

impl<T> ApiResponse<Vec<T>> {
    /// List response. `total` is the number of matching records, which may
    /// exceed `data.len()` when the caller paginates.
    pub fn list(data: Vec<T>, total: usize) -> Self {
        Self {
            success: true,
            data: Some(data),
            total: Some(total),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    /// Bare acknowledgement, used by deletes.
    pub fn done() -> Self {
        Self {
            success: true,
            data: None,
            total: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            total: None,
            error: Some(message.into()),
        }
    }
}
