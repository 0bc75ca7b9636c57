use std::net::SocketAddr;
use std::path::PathBuf;
use bytes::{BufMut, BytesMut};
use clap::Parser;
use clap_derive::Parser;
use mtp::client::ConnectionApi;
use mtp::ipc::client::IpcClient;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{info, Level};

/// Sends a file to a peer running `recv_file`, through the local mtpd daemon
#[derive(Parser)]
struct Args {
    file: PathBuf,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,

    #[clap(long, default_value = "/tmp/mtp.sock")]
    ipc_path: PathBuf,

    /// must match the daemon's payload size
    #[clap(long, default_value_t = 1000)]
    payload_size: usize,
}

const CHUNK_HEADER_LEN: usize = 3;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .try_init()
        .ok();

    let args = Args::parse();
    if args.payload_size <= CHUNK_HEADER_LEN {
        anyhow::bail!("payload size must be larger than {}", CHUNK_HEADER_LEN);
    }

    let client_path = std::env::temp_dir().join(format!("mtp-send-{}.sock", std::process::id()));
    let client = IpcClient::connect(&args.ipc_path, client_path)?;

    let id = client.open().await?;
    client.bind(id, args.local_addr, args.peer_addr).await?;
    info!("connection {}: {} -> {}", id, args.local_addr, args.peer_addr);

    let mut file = File::open(&args.file).await?;
    let mut data = vec![0u8; (args.payload_size - CHUNK_HEADER_LEN).min(u16::MAX as usize)];
    let mut total = 0usize;
    let mut chunk = BytesMut::with_capacity(args.payload_size);
    loop {
        let len = file.read(&mut data).await?;
        if len == 0 {
            break;
        }

        chunk.clear();
        chunk.put_u8(b'D');
        chunk.put_u16(len as u16);
        chunk.put_slice(&data[..len]);
        client.send_with_retry(id, args.peer_addr, &chunk).await?;
        total += len;
    }

    client.send_with_retry(id, args.peer_addr, b"#").await?;
    info!("sent {} bytes, waiting for confirmation", total);

    // closing discards unacknowledged data, so wait for the receiver to confirm
    let confirmation = client.receive_with_retry(id).await?;
    if confirmation.first() != Some(&b'#') {
        anyhow::bail!("unexpected confirmation from peer");
    }

    client.close(id).await?;
    info!("done");
    Ok(())
}
