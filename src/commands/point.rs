use super::common::{Common, CommonArgs, finish};
use camino::Utf8PathBuf;
use clap::Parser;
use core::time::Duration;
use ghcollect::Result;
use ghcollect::model::PointCollectorInput;
use ghcollect::processors::{PointOutcome, PointProcessor};
use ghcollect::web::RetryPolicy;
use ohno::IntoAppError;
use std::fs;
use std::sync::Arc;

#[derive(Parser, Debug)]
pub struct PointArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// JSON file holding a point collector work item, as placed on the point queue
    #[arg(long, value_name = "FILE")]
    pub input: Utf8PathBuf,
}

pub async fn process_point(args: &PointArgs) -> Result<()> {
    let common = Common::new(&args.common)?;
    let text = fs::read_to_string(&args.input).into_app_err_with(|| format!("reading point collector input from {}", args.input))?;
    let input: PointCollectorInput =
        serde_json::from_str(&text).into_app_err_with(|| format!("parsing point collector input from {}", args.input))?;

    let organization_login = input.repository()?.organization_login().to_string();

    // resources named by a fresh webhook can briefly 404 until GitHub catches up
    let client = common
        .http_client(common.config.flows.point, &organization_login)
        .with_retry_policy(RetryPolicy::canonical().with_not_found_once());

    let processor = PointProcessor::new(
        common.collector_for(Arc::new(client), &organization_login),
        common.cache(),
        Duration::from_secs(common.config.point_collection_freshness_secs),
        Arc::clone(&common.telemetry),
    );

    let outcome = processor.process(&input).await?;
    finish(outcome, |result| match result {
        PointOutcome::Collected(written) => println!("{}: {written} records", input.url),
        PointOutcome::Fresh => println!("{}: collected recently, skipped", input.url),
    });

    Ok(())
}
