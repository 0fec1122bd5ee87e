use std::fs::File;
use std::io::BufReader;

use tristore::import::import_dataset;
use tristore::proto::store_service_client::StoreServiceClient;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let server = parse_arg("--server").unwrap_or_else(|| "http://127.0.0.1:10000".to_string());
    let path = parse_arg("--file").ok_or_else(|| anyhow::anyhow!("--file is required"))?;

    let client = StoreServiceClient::connect(server).await?;

    println!("Importing {} ...", path);
    let reader = BufReader::new(File::open(&path)?);
    let stats = import_dataset(&client, reader).await?;
    println!(
        "Added {} namespaces and {} statements",
        stats.namespaces, stats.statements
    );

    Ok(())
}
