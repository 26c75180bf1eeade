//! # KubeDB webhook
//!
//! Admission server of the `kubedb.com/v1alpha2` database kinds. Without a
//! subcommand it serves the mutating and validating endpoints called by the
//! api server, subcommands print the manifests needed to register it and run
//! the admission logic on local files.

use std::{convert::TryFrom, sync::Arc};

use clap::Parser;
use tracing::{error, info};

use crate::{
    cmd::{daemon, Args, Executor},
    svc::cfg::Configuration,
};

pub mod cmd;
pub mod logging;
pub mod svc;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to run {}, {0}", env!("CARGO_PKG_NAME"))]
    Command(#[from] cmd::Error),
    #[error("failed to initialize logging system, {0}")]
    Logging(#[from] logging::Error),
    #[error("failed to load configuration, {0}")]
    Configuration(#[from] svc::cfg::Error),
}

// -----------------------------------------------------------------------------
// Helpers

fn load(args: &Args) -> Result<Arc<Configuration>, svc::cfg::Error> {
    let config = match &args.config {
        Some(path) => Configuration::try_from(path.to_owned())?,
        None => Configuration::try_default()?,
    };

    Ok(Arc::new(config))
}

async fn run(args: &Args, config: Arc<Configuration>) -> Result<(), cmd::Error> {
    match &args.command {
        Some(cmd) => cmd.execute(args.kubeconfig.to_owned(), config).await,
        None => {
            info!(
                listen = config.server.listen.to_string(),
                tls = config.server.tls.is_some(),
                "Start admission server"
            );

            daemon(args.kubeconfig.to_owned(), config).await
        }
    }
}

// -----------------------------------------------------------------------------
// main entrypoint

#[tokio::main]
pub(crate) async fn main() -> Result<(), Error> {
    let args = Args::parse();

    logging::initialize(args.verbosity, args.log_format)?;
    let config = load(&args)?;

    config.help();
    if args.check {
        println!(
            "{} configuration is healthy, admission server would listen on {}",
            env!("CARGO_PKG_NAME"),
            config.server.listen
        );
        return Ok(());
    }

    if let Err(err) = run(&args, config).await {
        error!(
            error = err.to_string(),
            version = env!("CARGO_PKG_VERSION"),
            "Could not complete {}",
            env!("CARGO_PKG_NAME"),
        );

        return Err(err.into());
    }

    info!("{} halted!", env!("CARGO_PKG_NAME"));
    Ok(())
}
