use super::common::{Common, CommonArgs, finish, new_session_id};
use camino::Utf8PathBuf;
use clap::Parser;
use core::time::Duration;
use ghcollect::Result;
use ghcollect::cache::EventsBookkeeper;
use ghcollect::processors::{DefaultCollector, PushCollector, WebhookProcessor};
use ghcollect::web::GLOBAL_SCOPE;
use ohno::IntoAppError;
use serde_json::Value;
use std::fs;
use std::sync::Arc;

#[derive(Parser, Debug)]
pub struct WebhookArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Webhook event name, as delivered in the X-GitHub-Event header
    #[arg(long, value_name = "TYPE")]
    pub event_type: String,

    /// File holding the delivery body
    #[arg(long, value_name = "FILE")]
    pub payload: Utf8PathBuf,

    /// Session the delivery belongs to [default: derived from the current time]
    #[arg(long, value_name = "ID")]
    pub session_id: Option<String>,
}

pub async fn process_webhook(args: &WebhookArgs) -> Result<()> {
    let common = Common::new(&args.common)?;
    let body = fs::read_to_string(&args.payload).into_app_err_with(|| format!("reading webhook payload from {}", args.payload))?;
    let session_id = args.session_id.clone().unwrap_or_else(new_session_id);

    // quota scope only; the processor validates the payload
    let organization_login = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|payload| payload.pointer("/organization/login").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| GLOBAL_SCOPE.to_string());

    let default_collector = DefaultCollector::new(
        common.queue("point"),
        common.cache(),
        Duration::from_secs(common.config.point_collection_freshness_secs),
    );
    let push_collector = PushCollector::new(
        default_collector.clone(),
        common.collector(common.config.flows.webhook, &organization_login),
        common.cache(),
        Arc::clone(&common.telemetry),
        common.api.clone(),
    );
    let bookkeeper = EventsBookkeeper::new(common.cache(), common.queue("eventstats"), Arc::clone(&common.telemetry));

    let processor = WebhookProcessor::new(
        common.sinks(),
        common.cache(),
        bookkeeper,
        common.config.event_count_limit,
        common.hashers(),
        Arc::clone(&common.telemetry),
        default_collector,
        push_collector,
    );

    let outcome = processor.process(&args.event_type, &body, &session_id).await?;
    finish(outcome, |properties| {
        if properties.is_empty() {
            println!("Ignored '{}' delivery", args.event_type);
            return;
        }

        println!("Processed '{}' delivery in session {session_id}", args.event_type);
        for (name, value) in properties {
            println!("  {name}: {value}");
        }
    });

    Ok(())
}
