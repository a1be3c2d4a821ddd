use super::common::{Common, CommonArgs, RepositoryArgs, finish, new_session_id};
use clap::Parser;
use ghcollect::Result;
use ghcollect::processors::EventsTimelineProcessor;

#[derive(Parser, Debug)]
pub struct DeltaArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub repository: RepositoryArgs,

    /// Session the pass belongs to [default: derived from the current time]
    #[arg(long, value_name = "ID")]
    pub session_id: Option<String>,
}

pub async fn process_delta(args: &DeltaArgs) -> Result<()> {
    let common = Common::new(&args.common)?;
    let repository = args.repository.to_repository();
    let session_id = args.session_id.clone().unwrap_or_else(new_session_id);

    let processor = EventsTimelineProcessor::new(
        common.client(common.config.flows.delta, repository.organization_login()),
        common.auth_for(repository.organization_login()),
        common.api.clone(),
        common.sinks(),
        common.cache(),
        common.cache(),
        common.hashers(),
        common.config.timeline_max_pages,
    );

    let outcome = processor.process(&repository, &session_id).await?;
    finish(outcome, |summary| {
        println!(
            "{repository}: {} pages read ({} failed), {} events already captured, {} missed events recovered, {} unexpected",
            summary.pages, summary.failed_pages, summary.captured, summary.missed, summary.unexpected
        );
    });

    Ok(())
}
