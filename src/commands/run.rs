use anyhow::{Context, Result};
use clap::Parser;

use pullrun::executor::Outcome;
use pullrun::image::ImageReference;
use pullrun::launcher::Launcher;
use pullrun::registry::RegistryConfig;
use pullrun::syscall::create_syscall;
use pullrun::transport::HttpTransport;

/// Pull an image's first layer and run a command inside it
#[derive(Parser, Debug)]
pub struct Run {
    /// Docker Hub library image, as `name` or `name:tag`
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new())]
    pub image: String,
    /// Command to run, either a path or a name looked up on PATH
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new())]
    pub command: String,
    /// Arguments passed to the command unchanged
    #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

pub fn run(args: Run) -> Result<Outcome> {
    let image: ImageReference = args
        .image
        .parse()
        .with_context(|| format!("invalid image {:?}", args.image))?;

    let config = RegistryConfig::default();
    let transport = HttpTransport::new(config.timeout)?;
    let syscall = create_syscall();

    Launcher::new(Box::new(transport), syscall.as_ref())
        .with_config(config)
        .launch(&image, &args.command, &args.args)
        .with_context(|| format!("failed to run {} in {}", args.command, image))
}
