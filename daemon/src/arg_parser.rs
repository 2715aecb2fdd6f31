use std::path::PathBuf;

use argparse::{ArgumentParser, Print, StoreOption};

#[derive(Debug, Default)]
pub struct ArgsOptions {
    pub config_file_path: Option<PathBuf>,
    pub textfile_path: Option<PathBuf>,
    pub interval_secs: Option<u64>,
}

impl ArgsOptions {
    pub fn parse() -> Self {
        let mut options = ArgsOptions::default();

        {
            let mut parser = ArgumentParser::new();
            parser.set_description("Periodically sample the NVIDIA GPU metrics");

            // Configuration file path
            parser.refer(&mut options.config_file_path).add_option(
                &["-c", "--config"],
                StoreOption,
                "The file path of the Json configuration file",
            );

            parser.refer(&mut options.textfile_path).add_option(
                &["-o", "--textfile"],
                StoreOption,
                "Write the Prometheus rendering to this file",
            );

            parser.refer(&mut options.interval_secs).add_option(
                &["-i", "--interval"],
                StoreOption,
                "Seconds between two samples",
            );

            // Show the daemon version
            parser.add_option(
                &["-V", "--version"],
                Print(env!("CARGO_PKG_VERSION").to_string()),
                "Show the version",
            );

            parser.parse_args_or_exit();
        }

        options
    }
}
