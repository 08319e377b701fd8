use std::sync::Arc;

use clap::Parser;
use colored::*;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cortex_relay::bridge::QueryBridge;
use cortex_relay::cli::Args;
use cortex_relay::config::RelayConfig;
use cortex_relay::events::{EventDispatcher, SessionEvent};
use cortex_relay::session::{CortexClient, Operation};
use cortex_relay::streams::StreamName;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new(args.log_directive())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_directive()))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = RelayConfig::load(&args.config)?;
    config.apply_env();
    if let Some(url) = &args.bridge_url {
        config.bridge.url = url.clone();
    }
    if let Some(headset) = &args.headset {
        config.session.headset_id = Some(headset.clone());
    }
    let streams = args.stream_list()?;

    let bridge = QueryBridge::connect(&config.bridge);
    let events = EventDispatcher::new();
    let rx = events.subscribe();
    let client = Arc::new(CortexClient::connect(config.session.clone(), events)?);
    let pump = tokio::spawn(pump_events(Arc::clone(&client), rx, streams, bridge.records()));

    println!(
        "{} press enter to query {}, ctrl-c to quit",
        "cortex-relay".bold(),
        config.bridge.url.as_str().cyan()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(_)) => {
                    let timeout = config.bridge.trigger_timeout();
                    match bridge.trigger_until(timeout, tokio::signal::ctrl_c()).await {
                        Ok(Some(reply)) => println!("{} {}", "reply".green().bold(), reply_text(&reply)),
                        Ok(None) => break,
                        Err(e) => eprintln!("{} {}", "query failed".red().bold(), e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("shutting down");
    client.close();
    bridge.close();
    pump.abort();
    let _ = pump.await;
    if let Ok(client) = Arc::try_unwrap(client) {
        client.join().await?;
    }
    Ok(())
}

/// Subscribe once the session is ready, recreate it if the service stops it,
/// and forward labeled samples to the bridge.
async fn pump_events(
    client: Arc<CortexClient>,
    mut rx: broadcast::Receiver<SessionEvent>,
    streams: Vec<StreamName>,
    records: mpsc::UnboundedSender<Value>,
) {
    loop {
        match rx.recv().await {
            Ok(SessionEvent::SessionReady(id)) => {
                println!("{} {}", "session ready".green(), id);
                if let Err(e) = client.subscribe(streams.clone()).await {
                    eprintln!("{} {}", "subscribe failed".red(), e);
                }
            }
            Ok(SessionEvent::StreamLabels { stream, labels }) => {
                println!("{} {} {}", "streaming".green(), stream, labels.join(",").dimmed());
            }
            Ok(SessionEvent::StreamData(sample)) if sample.stream().is_labeled() => {
                if records.send(sample.to_record()).is_err() {
                    break;
                }
            }
            Ok(SessionEvent::StreamsStopped(id)) => {
                eprintln!("{} {}", "streams stopped by the service for".yellow(), id);
                if let Err(e) = client.execute(Operation::CreateSession).await {
                    eprintln!("{} {}", "could not recreate session".red(), e);
                }
            }
            Ok(SessionEvent::Warning(message)) => {
                eprintln!("{} {}", "warning".yellow().bold(), message);
            }
            Ok(SessionEvent::InformError { kind, error }) => {
                eprintln!(
                    "{} {} ({}): {}",
                    "error".red().bold(),
                    kind,
                    error.code,
                    error.message
                );
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event pump fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn reply_text(reply: &Value) -> String {
    match reply.get("text").and_then(Value::as_str) {
        Some(text) => text.to_string(),
        None => reply.to_string(),
    }
}
