//! tftpd - TFTP server executable
//!
//! Serves files from a root directory over RFC 1350 TFTP until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use tftp::{TftpServer, TftpServerConfig, TransferConfig};
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "0.0.0.0:69";
const DEFAULT_ROOT: &str = "./tftp_root";

#[derive(FromArgs, Debug)]
#[argh(
    description = "tftpd - RFC 1350 TFTP server",
    example = "Serve /srv/tftp on the standard port:\n  {command_name} --root /srv/tftp",
    example = "Unprivileged port, accepting uploads over existing files:\n  {command_name} --bind 0.0.0.0:6969 --root ./files --allow-overwrite",
    example = "Verbose logging:\n  RUST_LOG=debug {command_name} --root ./files"
)]
struct CliConfig {
    #[argh(
        option,
        short = 'b',
        description = "address to listen on",
        default = "DEFAULT_BIND.to_string()"
    )]
    bind: String,

    #[argh(
        option,
        short = 'r',
        description = "directory served to clients",
        default = "PathBuf::from(DEFAULT_ROOT)"
    )]
    root: PathBuf,

    #[argh(option, description = "retransmission interval in milliseconds", default = "1000")]
    timeout_ms: u64,

    #[argh(option, description = "retransmissions before a peer is given up", default = "5")]
    retries: u32,

    #[argh(switch, description = "let write requests replace existing files")]
    allow_overwrite: bool,
}

impl CliConfig {
    fn into_server_config(self) -> Result<TftpServerConfig> {
        if self.timeout_ms == 0 {
            anyhow::bail!("--timeout-ms must be greater than zero");
        }

        let metadata = std::fs::metadata(&self.root)
            .with_context(|| format!("Cannot access root directory {}", self.root.display()))?;
        if !metadata.is_dir() {
            anyhow::bail!("Root {} is not a directory", self.root.display());
        }

        Ok(TftpServerConfig {
            bind_address: self.bind,
            root_directory: self.root,
            transfer_config: TransferConfig {
                timeout: Duration::from_millis(self.timeout_ms),
                max_retries: self.retries,
                allow_overwrite: self.allow_overwrite,
            },
        })
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the server runs until killed
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl-C received, shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli_config: CliConfig = argh::from_env();
    let server_config = cli_config.into_server_config()?;

    let mut server = TftpServer::new(server_config);
    server.bind().await?;
    server.run_until(shutdown_signal()).await
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn parse(args: &[&str]) -> CliConfig {
        CliConfig::from_args(&["tftpd"], args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert_eq!(cli.bind, DEFAULT_BIND);
        assert_eq!(cli.root, PathBuf::from(DEFAULT_ROOT));
        assert_eq!(cli.timeout_ms, 1000);
        assert_eq!(cli.retries, 5);
        assert!(!cli.allow_overwrite);
    }

    #[test]
    fn test_into_server_config() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().to_str().unwrap();
        let cli = parse(&[
            "-b",
            "127.0.0.1:6969",
            "-r",
            root,
            "--timeout-ms",
            "250",
            "--retries",
            "3",
            "--allow-overwrite",
        ]);

        let config = cli.into_server_config().unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:6969");
        assert_eq!(config.root_directory, temp_dir.path());
        assert_eq!(config.transfer_config.timeout, Duration::from_millis(250));
        assert_eq!(config.transfer_config.max_retries, 3);
        assert!(config.transfer_config.allow_overwrite);
    }

    #[test]
    fn test_root_must_be_directory() {
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();

        let cli = parse(&["--root", file.to_str().unwrap()]);
        assert!(cli.into_server_config().is_err());

        let cli = parse(&["--root", temp_dir.path().join("missing").to_str().unwrap()]);
        assert!(cli.into_server_config().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let temp_dir = tempdir().unwrap();
        let cli = parse(&["--root", temp_dir.path().to_str().unwrap(), "--timeout-ms", "0"]);
        assert!(cli.into_server_config().is_err());
    }
}
