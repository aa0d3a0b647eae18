use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::Config;
use crate::facebook::GraphClient;

#[derive(Parser, Debug)]
#[command(name = "facebook-discord-relay")]
#[command(about = "Facebook-page to Discord-webhook relay", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "(Re)attach this app to the page's feed webhook field")]
    Subscribe {
        #[arg(long, help = "Read the subscriptions back after attaching")]
        verify: bool,
    },

    #[command(about = "Validate the environment configuration")]
    ValidateConfig,
}

/// One-shot `subscribe` administration command.
pub async fn run_subscribe(config: Arc<Config>, verify: bool) -> Result<()> {
    let graph = GraphClient::new(config.clone())?;

    let page_name = graph.verify_page_access().await?;
    graph.subscribe_app().await?;
    info!(page = %page_name, "subscribed app to page feed");
    println!("subscribed to feed events for page {page_name}");

    if verify {
        let subscriptions = graph.list_subscriptions().await?;
        println!("{}", serde_json::to_string_pretty(&subscriptions)?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subscribe_accepts_the_verify_flag() {
        let cli = Cli::parse_from(["facebook-discord-relay", "subscribe", "--verify"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Subscribe { verify: true })
        ));
    }

    #[test]
    fn bare_invocation_runs_the_relay() {
        let cli = Cli::parse_from(["facebook-discord-relay"]);
        assert!(cli.command.is_none());
    }
}
