pub use self::parser::{
    Config, DatabaseConfig, DiscordConfig, LoggingConfig, MetaConfig, RelayConfig, ServerConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
