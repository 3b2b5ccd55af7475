use std::sync::Arc;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use log::{error, info, LevelFilter};

use fabcar_client::config::{NetworkConfig, DEFAULT_CONFIG_FILE};
use fabcar_client::cryptosuite::{CryptoSuite, Secp256k1Suite};
use fabcar_client::devnet::{self, Devnet};
use fabcar_client::fabcar::{Car, FabcarSession};
use fabcar_client::identity;
use fabcar_client::txn::TransientMap;
use fabcar_client::{Error, Result};

const TRANSIENT_KEY: &str = "result";

fn transient_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("transient")
        .long("transient")
        .takes_value(true)
        .help("private data passed to the chaincode, never written to the ledger")
}

fn build_cli<'a, 'b>() -> App<'a, 'b> {
    App::new("fabcar")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Queries and updates the fabcar chaincode")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .default_value(DEFAULT_CONFIG_FILE)
                .help("network configuration file"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("increase output verbosity"),
        )
        .subcommand(SubCommand::with_name("query-all").about("list every car"))
        .subcommand(
            SubCommand::with_name("query")
                .about("show one car")
                .arg(Arg::with_name("key").required(true).index(1)),
        )
        .subcommand(
            SubCommand::with_name("create")
                .about("register a new car")
                .arg(Arg::with_name("key").required(true).index(1))
                .arg(Arg::with_name("make").required(true).index(2))
                .arg(Arg::with_name("model").required(true).index(3))
                .arg(Arg::with_name("colour").required(true).index(4))
                .arg(Arg::with_name("owner").required(true).index(5))
                .arg(transient_arg()),
        )
        .subcommand(
            SubCommand::with_name("change-owner")
                .about("transfer a car to a new owner")
                .arg(Arg::with_name("key").required(true).index(1))
                .arg(Arg::with_name("owner").required(true).index(2))
                .arg(transient_arg()),
        )
}

fn value<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    args.value_of(name)
        .ok_or_else(|| Error::ConfigError(format!("missing argument {}", name)))
}

fn transient(args: &ArgMatches) -> TransientMap {
    let mut map = TransientMap::new();
    if let Some(data) = args.value_of("transient") {
        map.insert(TRANSIENT_KEY.to_string(), data.as_bytes().to_vec());
    }
    map
}

async fn run(matches: &ArgMatches<'_>) -> Result<()> {
    let config_path = matches.value_of("config").unwrap_or(DEFAULT_CONFIG_FILE);
    let config = NetworkConfig::from_file(config_path)?;
    let suite: Arc<dyn CryptoSuite> = Arc::new(Secp256k1Suite::new());

    identity::generate_crypto_material(
        config.crypto_config_path(),
        suite.as_ref(),
        &devnet::org_specs(&config)?,
    )?;
    let network = Devnet::start(&config, suite.clone())?;
    let session = FabcarSession::setup(config, network, suite)?;

    match matches.subcommand() {
        ("query-all", _) => println!("{}", session.query_all_cars().await?),
        ("query", Some(args)) => println!("{}", session.query_car(value(args, "key")?).await?),
        ("create", Some(args)) => {
            let car = Car::new(
                value(args, "make")?,
                value(args, "model")?,
                value(args, "colour")?,
                value(args, "owner")?,
            );
            let tx_id = session
                .create_car(value(args, "key")?, &car, transient(args))
                .await?;
            println!("{}", tx_id);
        }
        ("change-owner", Some(args)) => {
            let tx_id = session
                .change_car_owner(value(args, "key")?, value(args, "owner")?, transient(args))
                .await?;
            println!("{}", tx_id);
        }
        (other, _) => {
            return Err(Error::ConfigError(format!("unknown command {}", other)));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if let Err(err) = run(&matches).await {
        error!("{}", err);
        std::process::exit(1);
    }
    info!("Done");
}
