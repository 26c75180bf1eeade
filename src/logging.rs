//! # Logging module
//!
//! This module provide the tracing subscriber of the webhook. Events are
//! written on the standard error so that manifests printed by commands stay
//! parseable, in cluster the json format is easier to collect.

use clap::ValueEnum;
use tracing::{Level, Subscriber};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to set global default subscriber, {0}")]
    GlobalDefaultSubscriber(tracing::subscriber::SetGlobalDefaultError),
}

// -----------------------------------------------------------------------------
// Format enumeration

#[derive(ValueEnum, PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum Format {
    /// human readable lines
    #[default]
    Plain,
    /// one json object per event
    Json,
}

// -----------------------------------------------------------------------------
// Helpers

pub const fn level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

pub fn initialize(verbosity: u8, format: Format) -> Result<(), Error> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(level(verbosity))
        .with_writer(std::io::stderr)
        .with_target(true);

    match format {
        Format::Plain => install(builder.with_line_number(true).finish()),
        Format::Json => install(
            builder
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .finish(),
        ),
    }
}

fn install<S>(subscriber: S) -> Result<(), Error>
where
    S: Subscriber + Send + Sync + 'static,
{
    tracing::subscriber::set_global_default(subscriber).map_err(Error::GlobalDefaultSubscriber)
}
