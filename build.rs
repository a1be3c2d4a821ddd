//! Validates the embedded default configuration (`default_config.toml`)

#![allow(
    clippy::redundant_pub_crate,
    reason = "pub(crate) is correct in library context but appears redundant in build script"
)]
#![allow(dead_code, reason = "Some items may be unused in this build script context")]

use camino::Utf8PathBuf;
use ohno::IntoAppError;
use std::env;
use std::process;

type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

#[path = "src/config/mod.rs"]
mod config;

fn main() {
    match inner_main() {
        Ok(warnings) => {
            if !warnings.is_empty() {
                for warning in warnings {
                    eprintln!("cargo:warning=Default configuration warning: {warning}");
                }

                process::exit(1);
            }

            println!("cargo:rerun-if-changed=default_config.toml");
            println!("cargo:rerun-if-changed=src/config");
        }
        Err(e) => {
            eprintln!("unable to load default_config.toml: {e:?}");
            process::exit(1);
        }
    }
}

fn inner_main() -> Result<Vec<String>> {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").into_app_err("CARGO_MANIFEST_DIR should be set during build")?;
    let root = Utf8PathBuf::from(&manifest_dir);
    let config_path = root.join("default_config.toml");

    let (config, warnings) = config::Config::load(&root, Some(&config_path)).into_app_err("unable to load default_config.toml")?;
    if config != config::Config::default() {
        return Err(ohno::app_err!("default_config.toml disagrees with the built-in defaults"));
    }

    Ok(warnings)
}
