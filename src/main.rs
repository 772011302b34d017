use std::sync::Arc;

use actix_web::web::{self, Data, JsonConfig, PathConfig, QueryConfig};
use actix_web::{App, HttpServer, ResponseError};
use mongodb::Client;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::fmt::format::FmtSpan;

mod adserver;
mod campaign;
mod config;
mod database;
mod error;
mod sync;
mod typedid;

use adserver::HttpAdServer;
use config::Config;
use error::Error;
use sync::Pipeline;

use crate::database::{Database, MongoDatabase};

#[actix_web::main]
async fn main() -> Result<(), Error> {
    let config = Config::load_from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(config.server.log_level.parse().unwrap_or(Level::DEBUG))
        .with_span_events(FmtSpan::NEW)
        .compact()
        .init();

    run(config).await
}

async fn run(config: Config) -> Result<(), Error> {
    info!("connecting to db: {}", config.database.uri);
    let db = Client::with_uri_str(&config.database.uri)
        .await?
        .database(&config.database.name);
    let db = MongoDatabase::initialize(db).await?;

    info!("using ad server at {}", config.ad_server.base_url);
    let ad_server = Arc::new(HttpAdServer::new(&config.ad_server));
    let pipeline = Data::new(Pipeline::new(ad_server, config.sync.clone()));
    let db = Data::new(Box::new(db) as Box<dyn Database>);

    let address = (config.server.host.clone(), config.server.port);
    HttpServer::new(move || {
        App::new()
            .app_data(JsonConfig::default().error_handler(|err, _req| {
                // format json errors with custom format
                Error::InvalidJson(err).into()
            }))
            .app_data(PathConfig::default().error_handler(|err, _req| {
                // format path errors with custom format
                Error::InvalidPath(err).into()
            }))
            .app_data(QueryConfig::default().error_handler(|err, _req| {
                // format query errors with custom format
                Error::InvalidQuery(err).into()
            }))
            .app_data(db.clone())
            .app_data(pipeline.clone())
            .wrap(TracingLogger::default())
            .service(campaign::endpoints::create_campaign)
            .service(campaign::endpoints::get_campaigns)
            .service(campaign::endpoints::get_campaign_by_id)
            .service(campaign::endpoints::edit_campaign)
            .service(campaign::endpoints::delete_campaign)
            .default_service(web::to(|| async { Error::PathNotFound.error_response() }))
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}
