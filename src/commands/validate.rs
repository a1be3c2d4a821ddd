use camino::Utf8PathBuf;
use clap::Parser;
use ghcollect::Result;
use ghcollect::config::Config;

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file [default: one of ghcollect.[toml|yml|yaml|json] ]
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,
}

pub fn validate_config(args: &ValidateArgs) -> Result<()> {
    let (config, warnings) = Config::load(&Utf8PathBuf::from("."), args.config.as_ref())?;

    match &args.config {
        Some(path) => println!("Configuration in {path} is valid"),
        None => println!("Configuration is valid"),
    }
    println!("API endpoint: {}", config.api_base_url());

    for warning in &warnings {
        eprintln!("warning: {warning}");
    }

    Ok(())
}
