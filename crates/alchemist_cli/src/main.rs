//! CLI smoke entry point.
//!
//! # Responsibility
//! - Build a context from `ALCHEMIST_*` settings and create its tables.
//! - Run one create/read/update cycle through a concrete repository and print
//!   the results.

mod stamp;

use alchemist_core::{
    core_version, default_log_level, init_logging, Context, Repository, SchemaRegistry, Settings,
};
use chrono::{Duration, Utc};
use log::info;
use stamp::{Stamp, StampRepository, StampRow};
use std::error::Error;

const ENV_LOG_DIR: &str = "ALCHEMIST_LOG_DIR";
const ENV_LOG_LEVEL: &str = "ALCHEMIST_LOG_LEVEL";

fn main() -> Result<(), Box<dyn Error>> {
    if let Ok(log_dir) = std::env::var(ENV_LOG_DIR) {
        let level = std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| default_log_level().into());
        init_logging(&level, &log_dir)?;
    }

    let settings = Settings::from_env()?;
    let registry = SchemaRegistry::new().with::<StampRow>()?;
    let context = Context::new(settings, registry)?;
    context.create_tables()?;
    info!("event=smoke_run module=cli status=start url={context}");
    println!("alchemist_core version={}", core_version());
    println!("context={context}");

    let repo = StampRepository::instance(&context);
    let mut stamp = Stamp::now();
    let id = repo.create_stamp(&mut stamp)?;
    println!("created id={id} timestamp={stamp}");

    match repo.get_stamp_by_id(id)? {
        Some(loaded) => println!("read id={id} timestamp={loaded}"),
        None => println!("read id={id} missing"),
    }

    let count = repo.update_stamp_by_id(id, stamp.timestamp + Duration::hours(1))?;
    println!("updated rows={count}");
    if let Some(updated) = repo.get_stamp_by_id(id)? {
        println!("read id={id} timestamp={updated}");
    }

    info!(
        "event=smoke_run module=cli status=ok elapsed_ms={}",
        (Utc::now() - stamp.timestamp).num_milliseconds()
    );
    Ok(())
}
