#[macro_use]
extern crate tracing;

use clap::Parser;
use mobystash::{
    cli::Opts,
    config::Config,
    engine::Engine,
    router::{Router, RouterMessage},
    trace,
};

fn main() {
    let opts = Opts::parse();
    trace::init(opts.log_level());

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!(message = "Configuration error.", %error);
            std::process::exit(exitcode::CONFIG);
        }
    };

    let engine = match Engine::new(&config.docker_host) {
        Ok(engine) => engine,
        Err(error) => {
            error!(message = "Configuration error.", %error);
            std::process::exit(exitcode::CONFIG);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("unable to create async runtime");

    runtime.block_on(async move {
        info!(
            message = "Mobystash is starting.",
            version = %mobystash::get_version(),
            docker_host = %config.docker_host,
            logstash_server = %config.logstash_server,
        );

        let router = Router::new(&config, engine);
        tokio::spawn(terminate_on_signal(router.handle()));
        router.run().await;
    });

    std::process::exit(exitcode::OK);
}

/// Funnels SIGTERM/SIGINT into the router queue so tear-down is serialized
/// with discovery.
async fn terminate_on_signal(handle: tokio::sync::mpsc::UnboundedSender<RouterMessage>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("signal handlers should not panic");
    let mut sigterm = signal(SignalKind::terminate()).expect("signal handlers should not panic");

    tokio::select! {
        _ = sigint.recv() => info!(message = "Received SIGINT, shutting down."),
        _ = sigterm.recv() => info!(message = "Received SIGTERM, shutting down."),
    }

    let _ = handle.send(RouterMessage::Terminate);
}
