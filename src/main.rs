use actix_web::{middleware, web, App, HttpServer};
use anyhow::Result;
use std::path::PathBuf;
use std::{env, process};
use tracing::info;
use wildfire::config::Settings;
use wildfire::util::init_tracing;
use wildfire::{server, InferenceHandler};

const USAGE: &str = "usage: ./wildfire [config file]";

fn get_args() -> Option<PathBuf> {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => None,
        2 if args[1] != "-h" && args[1] != "--help" => Some(PathBuf::from(&args[1])),
        _ => {
            println!("{USAGE}");
            process::exit(1);
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = get_args();
    let settings = Settings::load(config.as_deref())?;
    info!("loaded settings {settings:?}");

    // Every actix worker shares the same model pool
    let handler = web::Data::new(InferenceHandler::from_settings(&settings)?);

    let addr = settings.bind_addr();
    info!("listening on {}:{}", addr.0, addr.1);
    HttpServer::new(move || {
        App::new()
            .app_data(handler.clone())
            .wrap(middleware::Logger::default())
            .configure(server::configure)
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}
