use lstest::report::{run_suite, started_banner, stopped_banner};
use lstest::Config;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::from_args(std::env::args());
    log::debug!("config: {config:?}");

    println!("{}", started_banner(&config));
    run_suite(&config, |measurement| println!("{measurement}"))?;
    println!("{}", stopped_banner());

    Ok(())
}
