//! Sends a handful of messages to an `echo_server` and checks they come back unchanged, the
//! client-side counterpart to `perf_client.rs`'s request-then-drain loop, generalized to this
//! transport's typed messages instead of a byte count.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use octane::{Side, TransportConfig};
use serde::{Deserialize, Serialize};
use structopt::StructOpt;
use tracing::{error, info};

#[derive(StructOpt)]
#[structopt(name = "echo-client")]
struct Opt {
    /// Local address to bind and exchange handshakes on.
    #[structopt(long, default_value = "127.0.0.1:4434")]
    bind: SocketAddr,
    /// Address of the echo server.
    #[structopt(long)]
    server: SocketAddr,
    /// Number of messages to send.
    #[structopt(long, default_value = "5")]
    count: u32,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
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
    let conn = octane::connect(opt.bind, opt.server, Side::Client, TransportConfig::default())
        .await
        .context("establishing connection")?;

    // Give the handshake a moment to complete before the first send; a production driver would
    // instead await a connected-notification, which `octane-proto`'s engine doesn't expose yet.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (mut send, mut recv) = conn.open_stream().context("opening stream")?;
    for seq in 0..opt.count {
        let sent = Message {
            seq,
            body: format!("ping {seq}"),
        };
        send.send(&sent).await.context("sending message")?;
        let echoed: Message = recv.receive().await.context("receiving echo")?;
        ensure!(echoed == sent, "echoed message didn't match what was sent");
        info!(seq, "round trip ok");
    }

    let stats = conn.stats();
    info!(?stats, "done");
    Ok(())
}
