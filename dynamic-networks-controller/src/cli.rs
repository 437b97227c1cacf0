use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/cni/net.d/multus.d/daemon-config.json";
pub const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// path to the controller's configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// name of the node this controller instance manages
    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,
    /// how many times a failed reconciliation is retried before the pod is dropped
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,
    /// enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose_logging: bool,
}
