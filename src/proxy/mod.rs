pub mod broker;
pub mod common;
pub mod dispatcher;
pub mod google;
pub mod handlers;
pub mod mappers;
pub mod pool;
pub mod rate_limit;
pub mod server;
pub mod signature_cache;
pub mod state;
pub mod upstream;

pub use signature_cache::SignatureCache;
pub use state::AppState;
