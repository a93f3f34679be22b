pub mod models;
pub mod request;
pub mod response;
pub mod streaming;

pub use models::*;
pub use request::to_claude_request;
pub use response::to_openai_response;
pub use streaming::create_openai_chunk_stream;
