use bitroute::probes::{RELEASE, SERVICE_NAME};
use bitroute::{lifecycle, logger, Control, Error, Probes, Router, Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = ServerConfig::new()?;
    logger::init(config.log_level)?;
    log::info!("{} Version: {}", SERVICE_NAME, RELEASE);

    let probes = Probes::new();
    let mut router = Router::new();
    probes.setup(&mut router);
    router.use_options_replies(config.options_replies);
    router.setup_recovery_handler(|c: &mut Control| {
        c.code(500);
        c.write("Internal Server Error");
    });

    let signals = lifecycle::Signals::new()?;
    Server::from_config(config)
        .serve_with_shutdown(router, lifecycle::wait(signals, probes))
        .await
}
