use clap::Parser;
use std::path::PathBuf;

use crate::error::Result;
use crate::streams::{parse_stream_list, StreamName};

#[derive(Parser, Debug)]
#[command(name = "cortex-relay")]
#[command(version)]
#[command(about = "Stream headset data into a remote inference endpoint and query it on demand")]
pub struct Args {
    /// TOML config file with [session] and [bridge] tables
    #[arg(long, short)]
    pub config: PathBuf,

    /// Override the bridge endpoint from the config file
    #[arg(long)]
    pub bridge_url: Option<String>,

    /// Comma-separated streams to subscribe once the session is ready
    #[arg(long, default_value = "eeg,mot,met,pow")]
    pub streams: String,

    /// Pin a headset id instead of using the first one discovered
    #[arg(long)]
    pub headset: Option<String>,

    /// Log every request and reply
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    pub fn stream_list(&self) -> Result<Vec<StreamName>> {
        parse_stream_list(&self.streams)
    }

    /// `RUST_LOG`-style directive for the tracing subscriber.
    pub fn log_directive(&self) -> &'static str {
        if self.debug {
            "cortex_relay=debug"
        } else {
            "cortex_relay=info"
        }
    }
}
