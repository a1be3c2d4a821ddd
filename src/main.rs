//! Command-line front end for the GitHub activity collector.
//!
//! Each subcommand runs one flow once and exits:
//!
//! ```bash
//! # Ingest a webhook delivery captured to a file
//! ghcollect webhook --event-type issues --payload delivery.json
//!
//! # Recover events the webhook path missed
//! ghcollect delta --org contoso --org-id 1 --repo widgets --repo-id 2
//!
//! # Backfill an organization, then each queued repository
//! ghcollect onboard organization --org contoso --org-id 1
//! ghcollect onboard repository --org contoso --org-id 1 --repo widgets --repo-id 2
//!
//! # Fetch one queued resource
//! ghcollect point --input item.json
//!
//! # Collect traffic statistics
//! ghcollect traffic --org contoso --org-id 1 --repo widgets --repo-id 2
//! ```
//!
//! Records are appended as JSON lines under `<state_dir>/output`, caches live under
//! `<state_dir>/cache` and follow-up work is queued under `<state_dir>/queues`.
//!
//! When a flow runs out of API quota and its policy says not to wait, the process exits with
//! code 75 so a scheduler can run it again later.

use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};
use ghcollect::Result;

mod commands;

use crate::commands::{
    DeltaArgs, InitArgs, OnboardArgs, PointArgs, TrafficArgs, ValidateArgs, WebhookArgs, init_config, process_delta, process_onboarding,
    process_point, process_traffic, process_webhook, validate_config,
};

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "ghcollect", version, about)]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest one webhook delivery
    Webhook(Box<WebhookArgs>),
    /// Reconcile a repository's event timeline with the deliveries already ingested
    Delta(Box<DeltaArgs>),
    /// Backfill an organization or a repository
    Onboard(Box<OnboardArgs>),
    /// Fetch a single resource described by a queued work item
    Point(Box<PointArgs>),
    /// Collect a repository's traffic statistics
    Traffic(Box<TrafficArgs>),
    /// Generate a default configuration file
    Init(InitArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    match &Cli::parse().command {
        Command::Webhook(args) => process_webhook(args).await,
        Command::Delta(args) => process_delta(args).await,
        Command::Onboard(args) => process_onboarding(args).await,
        Command::Point(args) => process_point(args).await,
        Command::Traffic(args) => process_traffic(args).await,
        Command::Init(args) => init_config(args),
        Command::Validate(args) => validate_config(args),
    }
}
