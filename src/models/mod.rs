mod account;
mod settings;

pub use account::{Account, AccountSource, ModelRateLimit, PoolFile};
pub use settings::Settings;
