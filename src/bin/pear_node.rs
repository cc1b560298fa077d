use clap::Parser;
use pear::log_node_info;
use pear::logging::LoggingSystem;
use pear::pear_node::{load_node_config, PearHttpServer, PearNode};

/// Command line options for the node binary.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the node configuration file
    #[arg(long)]
    config: Option<String>,
    /// Port for the HTTP server, overriding the configured bind address
    #[arg(long)]
    port: Option<u16>,
}

/// Starts a Pear node serving its hosted identities over HTTP.
///
/// # Environment Variables
///
/// * `PEAR_CONFIG` - Path to the node configuration file (default: config/pear_config.json)
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_node_config(cli.config.as_deref(), cli.port)?;
    LoggingSystem::init(&config.logging)?;
    log_node_info!("Config loaded successfully");

    let node = PearNode::new(config.clone())?;
    for identity in node.pear().list_identities()? {
        log_node_info!("Hosting {}", identity.did);
    }
    log_node_info!("Signing key: {}", node.signer().public_key_base64());

    let http_server = PearHttpServer::new(node, &config.bind_address);
    http_server.run().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["test"]);
        assert_eq!(cli.config, None);
        assert_eq!(cli.port, None);
    }

    #[test]
    fn custom_port_and_config() {
        let cli = Cli::parse_from(["test", "--port", "8000", "--config", "node.json"]);
        assert_eq!(cli.port, Some(8000));
        assert_eq!(cli.config.as_deref(), Some("node.json"));
    }
}
