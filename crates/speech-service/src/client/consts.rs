pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
pub const CONNECTION_ID_HEADER: &str = "X-ConnectionId";
pub const OUTPUT_FORMAT_HEADER: &str = "X-Microsoft-OutputFormat";

pub const RECOGNITION_PATH: &str = "/speech/recognition/conversation/cognitiveservices/v1";
pub const SYNTHESIS_PATH: &str = "/cognitiveservices/v1";

pub const SSML_CONTENT_TYPE: &str = "application/ssml+xml";
pub const USER_AGENT: &str = "voice-coach";
