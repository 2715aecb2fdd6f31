use anyhow::{Context, Result};
use gpu_metrics::{Collector, Config, NvmlSource, logger};
use gpu_metricsd::{
    arg_parser::ArgsOptions,
    sampler::Sampler,
    sink::{LogSink, TextfileSink},
};
use tokio::{select, signal::ctrl_c, sync::mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse the command line arguments
    let args_options = ArgsOptions::parse();

    let mut config = match &args_options.config_file_path {
        Some(path) => Config::load(path)
            .with_context(|| "Failed to load the configuration")?,
        None => Config::default(),
    };

    // Command line options win over the configuration file
    if let Some(path) = args_options.textfile_path {
        config.textfile_path = Some(path);
    }
    if let Some(secs) = args_options.interval_secs {
        config.sample_interval_secs = secs;
    }
    config.validate().with_context(|| "Invalid configuration")?;

    logger::init_logging(config.log_level.as_deref());

    debug!("Current config: {:?}", config);

    // This token and tracker will be used to handle graceful shutdown
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    // Errors raised by the sampler are logged here
    let (tx_err, mut rx_err) = mpsc::channel(16);

    let collector =
        Collector::new(NvmlSource::new()).with_window(config.averaging_window());

    let mut sampler = Sampler::new(collector, config.sample_interval());
    sampler.add_sink(Box::new(LogSink));
    if let Some(path) = &config.textfile_path {
        sampler.add_sink(Box::new(TextfileSink::new(path, &config.namespace)));
    }

    {
        let token = token.clone();

        tracker.spawn(async move {
            sampler.run(token, tx_err).await;
        });
    }

    loop {
        select! {
            _ = ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            },
            err_msg = rx_err.recv() => {
                match err_msg {
                    Some(err) => {
                        for e in err.chain() {
                            error!("{e}");
                        }
                    }
                    // The sampler is gone
                    None => break,
                }
            }
        }
    }

    // Cancel the token to communicate the program
    // termination to the running tasks
    token.cancel();

    // Wait for the tasks to finish
    tracker.close();
    tracker.wait().await;

    Ok(())
}
