use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use ternary_server::{
    config::{self, Config},
    consts::MEMBERSHIP_PERIOD,
    database::{self, PgStore},
    error::Error,
    handlers,
    memory::MemoryStore,
    operator::Operator,
    payout::PayoutExecutor,
    rewards::{Rewards, TierTable},
    store::Store,
    utils, webhook, worker, Registry,
};
use types::Member;

#[actix_web::main]
async fn main() -> Result<(), Error> {
    env_logger::init();
    let config = Config::from_env()?;
    let store = open_store().await?;

    // root of the network, sponsor of every unreferred registration
    let now = utils::unix_timestamp();
    let root = Member::new(config.root_wallet, None, None, now, now + MEMBERSHIP_PERIOD);
    if store.insert_root(&root).await? {
        log::info!("created root member {}", config.root_wallet);
    }

    let rewards = Arc::new(Rewards::new(store.clone(), TierTable::default()));
    let registry = web::Data::new(Registry::new(
        store.clone(),
        rewards.clone(),
        config.root_wallet,
        config.referral_base_url.clone(),
    ));

    // kick off payout loop
    match Operator::new().await {
        Ok(operator) => {
            let executor = Arc::new(PayoutExecutor::new(store.clone(), Arc::new(operator)));
            tokio::task::spawn(worker::payout_loop(executor, config.payout_interval));
        }
        Err(err) => {
            log::error!("payout worker disabled, no payout operator: {:?}", err);
        }
    }

    // kick off monthly scan
    tokio::task::spawn(worker::monthly_loop(rewards, config.monthly_interval));

    let events = match config.event_auth_token.clone() {
        Some(token) => Some(web::Data::new(webhook::Handle::new(token))),
        None => {
            log::warn!("EVENT_AUTH_TOKEN not set, chain event intake disabled");
            None
        }
    };

    // launch server
    log::info!("listening on {}", config.bind_addr);
    HttpServer::new(move || {
        let app = App::new()
            .wrap(middleware::Logger::default())
            .app_data(registry.clone())
            .service(
                web::resource("/members/register")
                    .wrap(utils::create_cors())
                    .route(web::post().to(handlers::register)),
            )
            .service(
                web::resource("/members/renew")
                    .wrap(utils::create_cors())
                    .route(web::post().to(handlers::renew)),
            )
            .service(
                web::resource("/members/{wallet}/status")
                    .wrap(utils::create_cors())
                    .route(web::get().to(handlers::member_status)),
            );
        match events.clone() {
            Some(handle) => app.app_data(handle).service(
                web::resource("/events").route(web::post().to(webhook::Handle::chain_event)),
            ),
            None => app,
        }
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await
    .map_err(From::from)
}

async fn open_store() -> Result<Arc<dyn Store>, Error> {
    match config::db_url() {
        Ok(_) => {
            let store = PgStore::new(database::create_pool()?);
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        Err(_) => {
            log::warn!("DB_URL not set, using the in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
