//! Fetch asset definitions from the command line.
//!
//! Usage: assetdef-fetch [--config <file>] [--data-dir <dir>] [--json] <address[@network]>...

use assetdef_cache::{AssetDefinitionStore, PassthroughParser};
use assetdef_core::{Address, AssetDefConfig, AssetDefError, AssetDefResult, ContractKey, NetworkId};
use assetdef_store::{BackingStore, DiskBackingStore, InMemoryBackingStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "Usage: assetdef-fetch [--config <file>] [--data-dir <dir>] [--json] <address[@network]>...";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    json: bool,
    keys: Vec<ContractKey>,
}

fn parse_key(raw: &str) -> Result<ContractKey, String> {
    let (address, network) = match raw.split_once('@') {
        Some((address, network)) => (address, Some(network)),
        None => (raw, None),
    };
    let address = Address::parse(address).map_err(|e| e.to_string())?;
    match network {
        Some(network) => network
            .parse::<u64>()
            .map(|id| ContractKey::on_network(address, NetworkId(id)))
            .map_err(|e| format!("invalid network {}: {}", network, e)),
        None => Ok(ContractKey::new(address)),
    }
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut args = Args::default();
    let mut raw = raw.into_iter();
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--config" => args.config = Some(raw.next().ok_or("--config needs a path")?.into()),
            "--data-dir" => args.data_dir = Some(raw.next().ok_or("--data-dir needs a path")?.into()),
            "--json" => args.json = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            other => args.keys.push(parse_key(other)?),
        }
    }
    if args.keys.is_empty() {
        return Err(USAGE.to_string());
    }
    Ok(args)
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("assetdef_cache=info,assetdef_fetch=info,assetdef_store=info,warn")
    });
    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to init tracing: {}", e);
    }
}

fn open_store(data_dir: Option<PathBuf>) -> AssetDefResult<Arc<dyn BackingStore>> {
    Ok(match data_dir {
        Some(dir) => Arc::new(DiskBackingStore::open(dir.join("official"), dir.join("overrides"))?),
        None => Arc::new(InMemoryBackingStore::new()),
    })
}

async fn run(args: Args) -> AssetDefResult<bool> {
    let config = AssetDefConfig::load(args.config.as_deref())?;
    let store = AssetDefinitionStore::builder(open_store(args.data_dir)?, PassthroughParser)
        .config(config)
        .build()?;

    let mut all_ok = true;
    for key in args.keys {
        let outcomes = store.fetch(key, true).collect().await;
        let summary: Vec<&str> = outcomes.iter().map(|o| o.as_str()).collect();
        all_ok &= !outcomes.iter().any(|o| o.is_error());

        match store.read(&key.address) {
            Some(document) => println!(
                "{}\t{}\t{} bytes\t{:?}\t{}",
                key,
                summary.join(","),
                document.xml.len(),
                document.provenance,
                document.content_hash_hex()
            ),
            None => println!("{}\t{}\tnot found", key, summary.join(",")),
        }
    }
    Ok(all_ok)
}

#[tokio::main]
async fn main() {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
    };
    init_tracing(args.json);

    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(AssetDefError::Config(e)) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
