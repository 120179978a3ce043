//! parley - Interactive chat client

use clap::Parser;

use parley_utils::{LogConfig, Result};

mod client;

#[derive(Parser)]
#[command(name = "parley", version, about = "Interactive parley chat client")]
struct Cli {
    /// Server host
    host: String,

    /// Server port
    port: u16,

    /// Display name to register
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    parley_utils::init_logging_with_config(LogConfig::client())?;

    let cli = Cli::parse();

    let framed = client::connect(&cli.host, cli.port, &cli.name).await?;
    println!("connected to {}:{} as '{}'", cli.host, cli.port, cli.name);
    println!("type messages to chat, 'ban <id>' / 'unban <id>' to mute, 'logout' to quit");

    client::run(framed).await
}
