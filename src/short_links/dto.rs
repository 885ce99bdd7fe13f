use serde::Serialize;
use uuid::Uuid;

use super::services::ShortLinkView;

#[derive(Debug, Serialize)]
pub struct ShortLinkResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub link: ShortLinkView,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub success: bool,
    pub message: String,
    pub curriculum_id: Uuid,
}
