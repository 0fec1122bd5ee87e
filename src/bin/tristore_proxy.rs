use tonic::transport::Server;
use tristore::config::{
    normalize_shard_addrs, read_shards_file, ConfigOverrides, ProxyOverrides, TriConfig,
};
use tristore::proto::store_service_server::StoreServiceServer;
use tristore::ShardingProxy;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"tristore_proxy - tristore sharding proxy

USAGE:
    tristore_proxy [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to config file (TOML)
    -l, --listen <ADDR>     Override listen address [default: 127.0.0.1:10000]
    -s, --shards <ADDRS>    Override shard addresses (comma-separated)
        --shards-file <F>   Path to file containing shard addresses (one per line)
    -h, --help              Print help

ENVIRONMENT:
    TRISTORE_CONFIG         Path to config file
    TRISTORE_PROXY_LISTEN   Listen address
    TRISTORE_PROXY_SHARDS   Comma-separated shard addresses

CONFIG FILE (tristore.toml):
    [proxy]
    listen = "0.0.0.0:10000"
    shards = ["shard-0:10001", "shard-1:10001", "shard-2:10001"]
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    // Build CLI overrides
    let mut overrides = ConfigOverrides::default();
    let mut proxy_overrides = ProxyOverrides::default();

    if let Some(listen) = parse_arg("--listen").or_else(|| parse_arg("-l")) {
        proxy_overrides.listen = Some(listen.parse()?);
    }

    if let Some(shards_arg) = parse_arg("--shards").or_else(|| parse_arg("-s")) {
        let shards: Vec<String> = shards_arg
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        proxy_overrides.shards = Some(shards);
    }

    if let Some(shards_file) = parse_arg("--shards-file") {
        proxy_overrides.shards_file = Some(shards_file.into());
    }

    if proxy_overrides.listen.is_some()
        || proxy_overrides.shards.is_some()
        || proxy_overrides.shards_file.is_some()
    {
        overrides.proxy = Some(proxy_overrides);
    }

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("TRISTORE_CONFIG").ok());
    let config = TriConfig::load(config_path.as_deref(), overrides)?;

    // Resolve the shard list; it is fixed for the lifetime of the process.
    let backends = if let Some(path) = &config.proxy.shards_file {
        read_shards_file(path)?
    } else {
        normalize_shard_addrs(&config.proxy.shards)
    };

    let proxy = ShardingProxy::connect(&backends)?;

    println!(
        "tristore proxy listening on {} ({} shards)",
        config.proxy.listen,
        proxy.shard_count()
    );
    Server::builder()
        .add_service(StoreServiceServer::new(proxy))
        .serve(config.proxy.listen)
        .await?;

    Ok(())
}
