use std::{path::PathBuf, time::Duration};

use actix_web::{App, HttpServer};
use anyhow::Context;
use clap::Parser;
use tracing::{Level, info, warn};
use tracing_subscriber::{
    Layer, filter::Targets, layer::SubscriberExt, util::SubscriberInitExt,
};

use acs_server::{
    AcsServer,
    memory::{LoggingPerformanceHandler, MemoryObjectStore, MemoryStore},
};
use stund::StunServer;

mod config;

use config::Config;

#[derive(Parser)]
#[clap(name = "acsd", about = "TR-069 auto-configuration server")]
struct Options {
    /// Path to the JSON configuration file.
    #[clap(short, long, env = "ACS_CONFIG")]
    config: Option<PathBuf>,

    /// Address the CWMP HTTP surface listens on.
    #[clap(long, env = "ACS_HTTP_ADDR", default_value = "0.0.0.0:7547")]
    http_addr: String,

    /// Address family for the STUN responder.
    #[clap(long, env = "stun_network", default_value = "udp4")]
    stun_network: String,

    /// Listen address for the STUN responder; empty disables it.
    #[clap(long, env = "stun_addr", default_value = "")]
    stun_addr: String,

    /// Log at debug level.
    #[clap(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = Targets::new().with_default(level);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    init_logging(options.verbose);

    let config = Config::load(options.config.as_deref()).await?;

    let store = MemoryStore::new();
    for product in &config.products {
        store.add_product(&config.schema, &product.oui, &product.product_class);
    }
    if config.products.is_empty() {
        warn!("no products configured, devices will be rejected");
    }

    let mut builder = AcsServer::builder(
        store.clone(),
        store.clone(),
        std::sync::Arc::new(LoggingPerformanceHandler::default()),
        MemoryObjectStore::new(),
    )
    .schema(&config.schema)
    .data_retention(Duration::from_secs(config.data_retention_secs))
    .lan_check_fail_open(config.lan_check_fail_open);
    if let Some(auth) = &config.auth {
        builder = builder.credentials(&auth.username, &auth.password);
    }
    let acs = builder.build()?;

    let stun_task = if options.stun_addr.is_empty() {
        None
    } else {
        let stun = StunServer::bind(&options.stun_network, &options.stun_addr)
            .await
            .context("binding STUN responder")?;
        info!(addr = options.stun_addr, "STUN responder listening");
        Some(tokio::spawn(stun.run()))
    };

    info!(addr = options.http_addr, "ACS listening");
    let server = {
        let acs = acs.clone();
        HttpServer::new(move || App::new().service(acs.service()))
            .bind(&options.http_addr)
            .with_context(|| format!("binding {}", options.http_addr))?
            .run()
    };

    server.await?;

    if let Some(task) = stun_task {
        task.abort();
    }

    Ok(())
}
