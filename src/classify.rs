//! Classify a single image URL locally and print the response envelope

use anyhow::Result;
use std::path::PathBuf;
use std::{env, process};
use wildfire::config::Settings;
use wildfire::server::protocol::Envelope;
use wildfire::util::init_tracing;
use wildfire::InferenceHandler;

const USAGE: &str = "usage: ./classify <image url> [config file]";

fn get_args() -> (String, Option<PathBuf>) {
    let args: Vec<String> = env::args().collect();
    if !(2..=3).contains(&args.len()) {
        println!("{USAGE}");
        process::exit(1);
    }

    let url = args[1].clone();
    let config = args.get(2).map(PathBuf::from);

    (url, config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let (url, config) = get_args();
    let mut settings = Settings::load(config.as_deref())?;
    // One request needs one model instance
    settings.model.workers = 1;

    let handler = InferenceHandler::from_settings(&settings)?;
    let envelope: Envelope = handler.predict(&url).await.into();
    println!("{}", serde_json::to_string_pretty(&envelope)?);

    if !envelope.is_ok() {
        process::exit(2);
    }
    Ok(())
}
