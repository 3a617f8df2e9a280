//! Greeter Demo
//!
//! Starts a framework with two plugins: one publishes greeter services, the
//! other looks them up and greets. Service and framework events are logged
//! as they happen.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package greeter
//! cargo run --package greeter -- --once
//! CAPSULE_LOGGING__LEVEL=debug cargo run --package greeter
//! ```
//!
//! A `capsule.toml` in the working directory can override the plugin list
//! or set `framework.properties."demo.name"`.

mod plugins;

use anyhow::Result;
use capsule::prelude::*;
use capsule::runtime::{CapsuleConfig, PluginEntry};
use clap::Parser;

use plugins::{CONSUMER, CONSUMER_LOCATION, PROVIDER, PROVIDER_LOCATION};

#[derive(Debug, Parser)]
#[command(version, about = "Capsule greeter demo")]
struct Args {
    /// Configuration file to load instead of searching for `capsule.toml`.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Configuration profile (development, production, ...).
    #[arg(short, long)]
    profile: Option<String>,

    /// Start, report and shut down without waiting for Ctrl+C.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let defaults = CapsuleConfig {
        plugins: vec![
            PluginEntry::new(PROVIDER_LOCATION),
            PluginEntry::new(CONSUMER_LOCATION),
        ],
        ..Default::default()
    };

    let mut builder = CapsuleRuntime::builder()
        .merge(defaults)
        .plugin(PROVIDER_LOCATION, PROVIDER)
        .plugin(CONSUMER_LOCATION, CONSUMER);
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = args.profile {
        builder = builder.profile(profile);
    }
    let mut runtime = builder.build()?;

    let framework = runtime.start()?;
    framework.system_context()?.connect_framework_listener(
        framework_listener(|event| {
            match event.kind() {
                FrameworkEventKind::Error => {
                    error!(plugin_id = ?event.plugin(), message = ?event.message(), "Framework error")
                }
                kind => info!(?kind, "Framework event"),
            }
            Ok(())
        }),
        DeliveryMode::Queued,
    )?;

    let stats = runtime.stats();
    info!(
        plugins = stats.plugins,
        active = stats.active_plugins,
        services = stats.services,
        "Greeter demo running"
    );

    if args.once {
        runtime.shutdown();
        return Ok(());
    }

    runtime.run().await?;
    Ok(())
}
