use serde::{Deserialize, Serialize};

use super::courses::Course;

/// Search result wrapper returned by `/searchResults/searchResults`.
///
/// `data` is null (not an empty array) when the session had no term selected,
/// which callers treat as an auth problem rather than an empty subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub success: bool,
    pub total_count: i32,
    pub page_offset: i32,
    pub page_max_size: i32,
    #[serde(default)]
    pub path_mode: Option<String>,
    pub data: Option<Vec<Course>>,
}
