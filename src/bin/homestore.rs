use clap::{Arg, Command};
use home_bridge::{AnyEngine, Config, EngineKind, KVStoreEngine, Result};
use std::env;
use std::path::PathBuf;
use std::process;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(err) = run() {
        log::error!("{}", err);
        eprintln!("{}", err);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let command = Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .help("JSON config file naming the store directory and engine"),
        )
        .arg(
            Arg::new("engine")
                .long("engine")
                .global(true)
                .value_parser(["kvs", "sled"])
                .help("Storage engine, overrides the config file"),
        )
        .arg(
            Arg::new("dir")
                .long("dir")
                .global(true)
                .help("Store directory, overrides the config file"),
        )
        .subcommand(
            Command::new("set")
                .about("Set the value of a string key to a string")
                .arg(Arg::new("KEY").help("A string key").required(true))
                .arg(
                    Arg::new("VALUE")
                        .help("The value of the string key")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("get")
                .about("Get the string value of a given string key")
                .arg(Arg::new("KEY").help("A string key").required(true)),
        )
        .subcommand(
            Command::new("rm")
                .about("Remove a given key")
                .arg(Arg::new("KEY").help("A string key").required(true)),
        )
        .subcommand(Command::new("clear").about("Remove every key"))
        .get_matches();

    let (name, args) = match command.subcommand() {
        Some(subcommand) => subcommand,
        None => unreachable!("subcommand_required"),
    };
    // global args are propagated into the subcommand's matches
    let mut config = match args.get_one::<String>("config") {
        Some(path) => Config::load(path)?,
        None => Config {
            db_path: env::current_dir()?,
            ..Config::default()
        },
    };
    if let Some(engine) = args.get_one::<String>("engine") {
        config.engine = engine.parse::<EngineKind>()?;
    }
    if let Some(dir) = args.get_one::<String>("dir") {
        config.db_path = PathBuf::from(dir);
    }
    let db = AnyEngine::open(config.engine, &config.db_path)?;

    match name {
        "set" => db.set(required(args, "KEY"), required(args, "VALUE"))?,
        "get" => match db.get(required(args, "KEY"))? {
            Some(value) => println!("{}", value),
            None => println!("Key not found"),
        },
        "rm" => db.remove(required(args, "KEY"))?,
        "clear" => db.clear()?,
        _ => unreachable!("unknown subcommand {}", name),
    }
    Ok(())
}

fn required(args: &clap::ArgMatches, name: &str) -> String {
    // clap enforces `required(true)` before we get here
    args.get_one::<String>(name).cloned().unwrap_or_default()
}
