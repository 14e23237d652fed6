use anyhow::Result;
use log::error;
use wakefield_rs::{run, Config};

fn main_impl() -> Result<()> {
    let cfg = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::new()?,
    };
    run(cfg)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = main_impl() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
