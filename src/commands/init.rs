use camino::Utf8PathBuf;
use clap::Parser;
use ghcollect::Result;
use ghcollect::config::Config;

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Output configuration file path; the extension picks the format
    #[arg(value_name = "PATH", default_value = "ghcollect.toml")]
    pub output: Utf8PathBuf,
}

pub fn init_config(args: &InitArgs) -> Result<()> {
    Config::save_default(&args.output)?;
    println!("Generated default configuration file: {}", args.output);
    Ok(())
}
