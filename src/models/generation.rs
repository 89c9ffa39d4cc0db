use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub image: String, // Base64 encoded
}

/// Request body sent to the hosted inference endpoint.
#[derive(Debug, Serialize)]
pub struct InferencePayload<'a> {
    pub inputs: &'a str,
}

/// Error body returned by the hosted inference endpoint.
///
/// The service reports either a single message or a list of them.
#[derive(Debug, Deserialize)]
pub struct UpstreamErrorBody {
    pub error: UpstreamErrorField,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum UpstreamErrorField {
    Message(String),
    Messages(Vec<String>),
}

impl UpstreamErrorField {
    pub fn into_message(self) -> Option<String> {
        match self {
            UpstreamErrorField::Message(msg) => Some(msg),
            UpstreamErrorField::Messages(msgs) => {
                if msgs.is_empty() {
                    None
                } else {
                    Some(msgs.join("; "))
                }
            }
        }
    }
}
