use super::FanoutMessage;
use crate::error::FanoutError;
use serde::{Deserialize, Serialize};

/// A newly created image comment announced on the comments topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl FanoutMessage for Comment {
    const TOPIC: &'static str = "comments";

    fn decode(payload: &str) -> Result<Self, FanoutError> {
        serde_json::from_str(payload).map_err(|e| FanoutError::DecodeFailure(e.to_string()))
    }

    // Comments are public: every viewer gets the JSON form.
    fn render_for(&self, _viewer: &str) -> Result<Option<String>, FanoutError> {
        serde_json::to_string(self)
            .map(Some)
            .map_err(|e| FanoutError::Serialization(e.to_string()))
    }
}
