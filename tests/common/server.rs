//! Scripted server for driving a session from the wire side.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

pub struct TestServer {
    listener: TcpListener,
}

impl TestServer {
    /// Bind on an ephemeral local port.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind test listener")?;
        Ok(Self { listener })
    }

    pub fn port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(0)
    }

    pub async fn accept(&self) -> Result<TestPeer> {
        let (stream, _) = self.listener.accept().await?;
        let (read_half, write_half) = stream.into_split();
        Ok(TestPeer {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    /// Accept with a deadline; used to assert that a reconnect happens.
    pub async fn accept_timeout(&self, timeout: Duration) -> Result<TestPeer> {
        match tokio::time::timeout(timeout, self.accept()).await {
            Ok(peer) => peer,
            Err(_) => bail!("no connection within {timeout:?}"),
        }
    }
}

/// One accepted client connection.
pub struct TestPeer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestPeer {
    /// Next line from the client, terminator stripped.
    pub async fn recv_line(&mut self) -> Result<String> {
        let mut buf = String::new();
        let n = self.reader.read_line(&mut buf).await?;
        if n == 0 {
            bail!("client closed the connection");
        }
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }

    pub async fn recv_line_timeout(&mut self, timeout: Duration) -> Result<String> {
        match tokio::time::timeout(timeout, self.recv_line()).await {
            Ok(line) => line,
            Err(_) => bail!("no line within {timeout:?}"),
        }
    }

    /// Skip lines until one starts with `prefix`.
    pub async fn recv_until_prefix(&mut self, prefix: &str) -> Result<String> {
        loop {
            let line = self.recv_line_timeout(Duration::from_secs(5)).await?;
            if line.starts_with(prefix) {
                return Ok(line);
            }
        }
    }

    /// Assert that nothing arrives for the given window.
    pub async fn expect_silence(&mut self, window: Duration) -> Result<()> {
        match tokio::time::timeout(window, self.recv_line()).await {
            Ok(Ok(line)) => bail!("unexpected line: {line}"),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(()),
        }
    }

    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.send_raw(format!("{line}\r\n").as_bytes()).await
    }

    /// Write raw bytes with no framing; lets tests split a line across
    /// writes.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Consume the client's registration burst (through NICK) and answer
    /// with the welcome numeric from `host`.
    pub async fn welcome(&mut self, host: &str, nick: &str) -> Result<()> {
        self.recv_until_prefix("NICK ").await?;
        self.send_line(&format!(":{host} 001 {nick} :Welcome to the test network, {nick}"))
            .await
    }
}
