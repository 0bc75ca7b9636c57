use std::net::SocketAddr;
use std::path::PathBuf;
use bytes::Buf;
use clap::Parser;
use clap_derive::Parser;
use mtp::client::ConnectionApi;
use mtp::ipc::client::IpcClient;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, Level};

/// Receives a file sent by `send_file`, through the local mtpd daemon
#[derive(Parser)]
struct Args {
    file: PathBuf,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,

    #[clap(long, default_value = "/tmp/mtp.sock")]
    ipc_path: PathBuf,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .try_init()
        .ok();

    let args = Args::parse();

    let client_path = std::env::temp_dir().join(format!("mtp-recv-{}.sock", std::process::id()));
    let client = IpcClient::connect(&args.ipc_path, client_path)?;

    let id = client.open().await?;
    client.bind(id, args.local_addr, args.peer_addr).await?;
    info!("connection {}: waiting for data from {}", id, args.peer_addr);

    let mut file = File::create(&args.file).await?;
    let mut total = 0usize;
    loop {
        let message = client.receive_with_retry(id).await?;
        let chunk = &mut message.as_ref();

        match chunk.try_get_u8()? {
            b'#' => break,
            b'D' => {
                let len = chunk.try_get_u16()? as usize;
                if len > chunk.remaining() {
                    anyhow::bail!("chunk length {} exceeds message", len);
                }
                file.write_all(&chunk[..len]).await?;
                total += len;
            }
            tag => anyhow::bail!("unknown chunk tag {}", tag),
        }
    }
    file.flush().await?;
    info!("received {} bytes", total);

    client.send_with_retry(id, args.peer_addr, b"#").await?;

    // give the confirmation time to get through before the connection is reset
    tokio::time::sleep(std::time::Duration::from_secs(15)).await;
    client.close(id).await?;
    Ok(())
}
