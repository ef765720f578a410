use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

use crate::{cli::SubmitArgs, protocol::format_request};

/// Sends one submission and returns the server's reply text.
///
/// Fails when the server cannot be reached or closes without replying,
/// which is how a persistence failure on the server side looks.
pub async fn submit(args: &SubmitArgs) -> Result<String> {
    let mut stream = timeout(args.timeout(), TcpStream::connect(args.server))
        .await
        .map_err(|_| anyhow!("timed out connecting to {}", args.server))?
        .with_context(|| format!("failed to connect to {}", args.server))?;
    debug!(server = %args.server, "connected");

    let request = format_request(&args.name, &args.class_label, &args.score);
    stream
        .write_all(request.as_bytes())
        .await
        .context("failed to send submission")?;

    let mut reply = Vec::new();
    timeout(args.timeout(), stream.read_to_end(&mut reply))
        .await
        .map_err(|_| anyhow!("timed out waiting for a reply from {}", args.server))?
        .context("failed to read reply")?;

    if reply.is_empty() {
        anyhow::bail!("no response from server");
    }

    Ok(String::from_utf8_lossy(&reply).into_owned())
}
