pub mod collector;
pub mod models;
pub mod request;
pub mod response;
pub mod streaming;

pub use collector::collect_stream_to_response;
pub use models::*;
pub use request::{transform_claude_request, TranslationOptions};
pub use response::transform_response;
pub use streaming::{create_anthropic_sse_stream, StreamContext};
