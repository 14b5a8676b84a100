//! Listens for one peer and echoes back every message it sends on stream 1, the way `perf`'s
//! server binary drives one connection per accepted handshake (`perf_server.rs`), simplified to
//! this transport's symmetric connect-only model (no listen/accept split, §1 Non-goals).

use std::net::SocketAddr;

use anyhow::{Context, Result};
use octane::{Side, TransportConfig};
use serde::{Deserialize, Serialize};
use structopt::StructOpt;
use tracing::{error, info};

#[derive(StructOpt)]
#[structopt(name = "echo-server")]
struct Opt {
    /// Address to bind and exchange handshakes on.
    #[structopt(long, default_value = "127.0.0.1:4433")]
    listen: SocketAddr,
    /// Address of the peer to connect to.
    #[structopt(long)]
    peer: SocketAddr,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    seq: u32,
    body: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();
    if let Err(e) = run(opt).await {
        error!("{:#}", e);
    }
}

async fn run(opt: Opt) -> Result<()> {
    let conn = octane::connect(opt.listen, opt.peer, Side::Server, TransportConfig::default())
        .await
        .context("establishing connection")?;
    info!(peer = %opt.peer, "connected");

    let (mut send, mut recv) = conn.open_stream().context("opening stream")?;
    loop {
        let message: Message = match recv.receive().await {
            Ok(message) => message,
            Err(e) => {
                info!(%e, "stream ended");
                break;
            }
        };
        info!(seq = message.seq, "echoing message");
        send.send(&message).await.context("sending echo")?;
    }
    Ok(())
}
