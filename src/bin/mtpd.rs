use std::path::PathBuf;
use std::time::Duration;
use clap::Parser;
use clap_derive::Parser;
use mtp::config::MtpConfig;
use mtp::ipc::server::IpcServer;
use mtp::node::MtpNode;
use tokio::select;
use tracing::{info, Level};

/// Runs an MTP node, serving local processes through a Unix datagram socket
#[derive(Parser)]
struct Args {
    #[clap(long, default_value = "/tmp/mtp.sock")]
    ipc_path: PathBuf,

    #[clap(long, default_value_t = 25)]
    table_size: usize,

    #[clap(long, default_value_t = 10)]
    send_buffer_size: usize,

    #[clap(long, default_value_t = 5)]
    recv_buffer_size: usize,

    #[clap(long, default_value_t = 16)]
    max_seq_no: usize,

    #[clap(long, default_value_t = 1000)]
    payload_size: usize,

    /// probability for dropping incoming datagrams, for testing
    #[clap(long, default_value_t = 0.0)]
    drop_probability: f64,

    #[clap(long, default_value_t = 5)]
    retransmit_timeout_secs: u64,

    #[clap(long, default_value_t = 200)]
    reclamation_interval_secs: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let config = MtpConfig {
        table_size: args.table_size,
        send_buffer_size: args.send_buffer_size,
        recv_buffer_size: args.recv_buffer_size,
        max_seq_no: args.max_seq_no,
        payload_size: args.payload_size,
        drop_probability: args.drop_probability,
        retransmit_timeout: Duration::from_secs(args.retransmit_timeout_secs),
        reclamation_interval: Duration::from_secs(args.reclamation_interval_secs),
        ..MtpConfig::default()
    };

    let node = MtpNode::new(config)?;
    let ipc_server = IpcServer::bind(&args.ipc_path, node.control(), node.table().clone())?;

    select! {
        result = node.run() => { result }
        result = ipc_server.run() => { result }
        result = tokio::signal::ctrl_c() => {
            info!("shutting down");
            result.map_err(Into::into)
        }
    }
}
