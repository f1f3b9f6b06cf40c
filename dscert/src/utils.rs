//! Utility functions used by the dscert utility

use crate::args::DsCertArgs;
use colored::Colorize;
use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};

/// Sets up log4rs for dscert.
///
/// `--logging-config` names a log4rs YAML file (see `assets/log.yaml`, which sends dscertlib debug
/// output to a rolling file). Otherwise `--log-to-console` prints Info and above to stdout, which
/// is where the certificate is also printed. With neither option dscert logs nothing. A logging
/// configuration that cannot be applied is reported and issuance proceeds without logging.
pub(crate) fn configure_logging(args: &DsCertArgs) {
    if let Some(logging_config) = &args.logging_config {
        match log4rs::init_file(logging_config, Default::default()) {
            Ok(()) => return,
            Err(e) => println!(
                "{}: could not apply logging configuration {logging_config}: {e:?}. Issuance will continue without logging.",
                "ERROR".bold()
            ),
        }
    }

    if args.log_to_console {
        if let Err(e) = console_logging() {
            println!(
                "{}: could not log to stdout: {e}. Issuance will continue without logging.",
                "ERROR".bold()
            );
        }
    }
}

/// Info level and above, message only, to stdout
fn console_logging() -> Result<(), String> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .map_err(|e| format!("{e:?}"))?;
    log4rs::init_config(config)
        .map(|_| ())
        .map_err(|e| format!("{e:?}"))
}

#[test]
fn unusable_logging_config_is_not_fatal() {
    use clap::Parser;
    let args = DsCertArgs::try_parse_from([
        "dscert",
        "-i",
        "-e",
        "a@b.gov.uk",
        "-l",
        "/nonexistent/dscert/log.yaml",
    ])
    .unwrap();
    configure_logging(&args);
    assert_eq!(log::LevelFilter::Off, log::max_level());
}
