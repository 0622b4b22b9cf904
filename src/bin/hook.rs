//! Hook client binary: reads a transcript reference from standard input,
//! extracts the text to speak, and hands it to the daemon over its socket.
//!
//! Always exits 0 — a speech failure must never fail the caller's hook chain.

use std::io::Read;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tts_daemon::{paths, transcript};

#[tokio::main]
async fn main() {
    let mut stdin_json = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut stdin_json) {
        eprintln!("tts-hook: failed to read stdin: {e}");
        return;
    }

    let text = transcript::resolve_text_to_speak(&stdin_json);

    if let Err(e) = send_to_daemon(&text).await {
        eprintln!("tts-hook: {e}");
    }
}

async fn send_to_daemon(text: &str) -> std::io::Result<()> {
    let mut stream = UnixStream::connect(paths::socket_path()).await?;
    stream.write_all(text.as_bytes()).await?;
    stream.shutdown().await
}
