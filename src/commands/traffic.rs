use super::common::{Common, CommonArgs, RepositoryArgs, finish};
use clap::Parser;
use ghcollect::Result;
use ghcollect::processors::TrafficProcessor;

#[derive(Parser, Debug)]
pub struct TrafficArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub repository: RepositoryArgs,
}

pub async fn process_traffic(args: &TrafficArgs) -> Result<()> {
    let common = Common::new(&args.common)?;
    let repository = args.repository.to_repository();

    let processor = TrafficProcessor::new(
        common.collector(common.config.flows.traffic, repository.organization_login()),
        common.api.clone(),
    );

    let outcome = processor.process(&repository).await?;
    finish(outcome, |written| println!("{repository}: {written} traffic records"));
    Ok(())
}
