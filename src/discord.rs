pub use self::client::{DiscordClient, DispatchOutcome};
pub use self::embed::DiscordEmbed;
pub use self::router::ChannelRouter;
pub use self::sanitize::{MAX_CONTENT_CHARS, TagMatcher, sanitize_message};

pub mod client;
pub mod embed;
pub mod router;
pub mod sanitize;
