use super::common::{Common, CommonArgs, RepositoryArgs, finish};
use clap::{Args, Parser, Subcommand};
use ghcollect::Result;
use ghcollect::model::OnboardingInput;
use ghcollect::processors::OnboardingProcessor;
use std::sync::Arc;

#[derive(Parser, Debug)]
pub struct OnboardArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub target: OnboardTarget,

    /// Crawl every API even when it was onboarded before
    #[arg(long, global = true)]
    pub ignore_cache: bool,

    /// Crawl this API even when it was onboarded before (repeatable)
    #[arg(long = "ignore-cache-for", value_name = "API", global = true)]
    pub ignore_cache_for_apis: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum OnboardTarget {
    /// Collect an organization's teams and queue each of its repositories for onboarding
    Organization(OrganizationArgs),
    /// Backfill a repository's commits, comments, pull requests, issues and milestones
    Repository(RepositoryArgs),
}

#[derive(Args, Debug)]
pub struct OrganizationArgs {
    /// Organization login
    #[arg(long, value_name = "LOGIN")]
    pub org: String,

    /// Organization id
    #[arg(long, value_name = "ID")]
    pub org_id: i64,
}

pub async fn process_onboarding(args: &OnboardArgs) -> Result<()> {
    let common = Common::new(&args.common)?;

    let mut input = match &args.target {
        OnboardTarget::Organization(org) => OnboardingInput::for_organization(org.org_id, &org.org),
        OnboardTarget::Repository(repo) => OnboardingInput::for_repository(&repo.to_repository()),
    };
    input.ignore_cache = args.ignore_cache;
    input.ignore_cache_for_apis.clone_from(&args.ignore_cache_for_apis);

    let target = input.to_repository();
    let processor = OnboardingProcessor::new(
        common.collector(common.config.flows.onboarding, &input.organization_login),
        common.api.clone(),
        common.cache(),
        common.queue("onboarding"),
        Arc::clone(&common.telemetry),
    )
    .with_restart_threshold(common.config.issue_comment_restart_threshold);

    let outcome = processor.process(&input).await?;
    finish(outcome, |written| println!("{target}: {written} records onboarded"));
    Ok(())
}
