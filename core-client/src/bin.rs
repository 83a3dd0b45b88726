use clap::Parser;
use fhevm_core_client::*;
use observability::telemetry::init_tracing;

// CLI
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Starting Core Client");

    // Parse command line arguments and configuration file
    let config = CmdConfig::parse();
    let conf = load_config(config.file_conf.as_deref())?;
    let _guard = if config.logs {
        Some(init_tracing(&conf.tracing_settings())?)
    } else {
        None
    };

    for out in execute_cmd(&config, &conf).await? {
        println!("{} - {}", out.message, serde_json::to_string_pretty(&out.value)?);
    }
    Ok(())
}
