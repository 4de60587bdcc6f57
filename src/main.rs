use std::env;
use std::sync::Arc;

use actix_request_identifier::{IdReuse, RequestIdentifier};
use actix_web::web::Data;

use tracing_actix_web::TracingLogger;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::config::Config;
use crate::database::connect::{create_db_connection_pool, run_migrations};
use crate::notify::{LogNotifier, Notifier};
use crate::routes::{
    approve_withdrawal_handler, audit_handler, balance_handler, create_order_handler,
    create_withdrawal_handler, order_handler, pay_withdrawal_handler, reject_withdrawal_handler,
    statement_handler, webhook_handler, withdrawal_handler, withdrawal_list_handler,
};

mod commission;
mod config;
mod database;
mod error;
mod events;
mod notify;
mod responses;
mod routes;
mod schema;

#[actix_web::main]
async fn main() {
    dotenvy::dotenv().ok();

    // setup tracing and use bunyan formatter
    let formatting_layer = BunyanFormattingLayer::new("gtclicks-settlement".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(filter_fn(|metadata| *metadata.level() <= tracing::Level::INFO))
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let db = create_db_connection_pool();
    run_migrations(&db);

    let config = Config::from_env();
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let server = actix_web::HttpServer::new(move || {
        let db = db.clone();

        actix_web::App::new()
            .wrap(RequestIdentifier::with_uuid().use_incoming_id(IdReuse::UseIncoming))
            .wrap(TracingLogger::default())
            .app_data(Data::new(db.clone()))
            .app_data(Data::new(config.clone()))
            .app_data(Data::from(notifier.clone()))
            .service(webhook_handler)
            .service(create_order_handler)
            .service(order_handler)
            .service(balance_handler)
            .service(statement_handler)
            .service(audit_handler)
            .service(withdrawal_list_handler)
            .service(create_withdrawal_handler)
            .service(withdrawal_handler)
            .service(approve_withdrawal_handler)
            .service(pay_withdrawal_handler)
            .service(reject_withdrawal_handler)
    });

    server
        .bind(env::var("BIND_ADDRESS").unwrap())
        .unwrap()
        .run()
        .await
        .unwrap();
}
