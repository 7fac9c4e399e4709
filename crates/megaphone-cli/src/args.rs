use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Command line client for the megaphone broker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Broker base URL (overrides config and MEGAPHONE_URL)
    #[arg(short, long, global = true)]
    pub url: Option<String>,
    /// Path to client.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    /// Event ids remembered for duplicate suppression
    #[arg(long, global = true)]
    pub capacity: Option<usize>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a channel and print its id
    Create,
    /// Write a JSON message into a channel stream
    Write(WriteArgs),
    /// Follow streams and print every chunk as a JSON line
    Watch(SubscribeArgs),
    /// Wait for the first chunk on any of the streams and print it
    Wait(SubscribeArgs),
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    #[arg(long)]
    pub channel: String,
    #[arg(long)]
    pub stream: String,
    /// Message body as JSON
    pub body: String,
}

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Stream ids to subscribe (repeatable)
    #[arg(short, long = "stream", required = true)]
    pub streams: Vec<String>,
    /// Read an existing channel instead of creating one
    #[arg(long)]
    pub channel: Option<String>,
}
