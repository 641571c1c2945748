//! Agent runtime orchestration.

use crate::config::AgentConfig;
use crate::console::Command;
use crate::transport::{TransportError, UdpTransport};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dissem_core::{ChangeOrigin, Disposition, ImageGuid, Node, NodeConfig};
use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// The main agent runtime.
#[derive(Debug)]
pub struct Agent {
    node: Node,
    transport: UdpTransport,
}

impl Agent {
    /// Create a node, register the configured keys and bind the socket.
    ///
    /// # Errors
    ///
    /// Returns error if the MTU cannot carry a summary frame, a key is
    /// misconfigured or the socket cannot be bound.
    pub async fn new(config: AgentConfig) -> Result<Self> {
        let image_guid = config.image_guid.map(ImageGuid::new);
        let min_mtu = dissem_proto::min_mtu(image_guid.is_some());
        if config.mtu < min_mtu {
            bail!("MTU {} cannot carry a {min_mtu}-byte summary frame", config.mtu);
        }

        let node_config = NodeConfig {
            max_payload: dissem_proto::max_value_size(config.mtu, image_guid.is_some()),
            image_guid,
        };
        let mut node = match config.seed {
            Some(seed) => Node::with_seed(node_config, seed),
            None => Node::new(node_config),
        };

        let now = Instant::now();
        for entry in &config.keys {
            let key = match entry.assigned_key()? {
                Some(key) => node.register(key, entry.size, entry.params(), now),
                None => node.register_generated(entry.size, entry.params(), now),
            }
            .context("Failed to register key")?;

            if let Some(initial) = entry.initial_value()? {
                node.set(key, &initial)
                    .with_context(|| format!("Invalid initial value for key {key}"))?;
            }

            node.subscribe(key, |event| {
                let value = STANDARD.encode(event.payload);
                match event.origin {
                    ChangeOrigin::Local => {
                        tracing::info!(key = %event.key, version = %event.version, %value, "Local change");
                    }
                    ChangeOrigin::Remote => {
                        tracing::info!(key = %event.key, version = %event.version, %value, "Adopted remote value");
                    }
                }
            })?;

            tracing::info!(
                %key,
                size = entry.size,
                imin_ms = entry.imin_ms,
                imax_ms = entry.imax_ms,
                redundancy = entry.redundancy,
                "Registered key"
            );
        }

        let transport = UdpTransport::bind(config.bind, config.peers, config.broadcast, config.mtu)
            .await
            .context("Failed to create transport")?;

        Ok(Self { node, transport })
    }

    /// The node owned by this agent.
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// The node owned by this agent, mutably.
    pub fn node_mut(&mut self) -> &mut Node {
        &mut self.node
    }

    /// Local socket address.
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.transport.local_addr()
    }

    /// Send announcements to `peer` as well.
    pub fn add_peer(&mut self, peer: SocketAddr) {
        self.transport.add_peer(peer);
    }

    /// Run with stdin as console until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if the runtime fails.
    pub async fn run(self) -> Result<()> {
        let (lines_tx, lines_rx) = mpsc::channel(16);
        tokio::spawn(read_stdin(lines_tx));

        let shutdown = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(err) => {
                    tracing::error!(error = %err, "Cannot listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            }
        };

        tracing::info!("Agent running, press Ctrl+C to stop");
        self.serve(lines_rx, shutdown).await?;
        tracing::info!("Agent stopped");
        Ok(())
    }

    /// Run the event loop until `shutdown` completes, then hand the agent
    /// back.
    ///
    /// `console` carries command lines; the loop keeps running after its
    /// senders are gone.
    ///
    /// # Errors
    ///
    /// Returns error if the runtime fails.
    pub async fn serve<S>(mut self, mut console: mpsc::Receiver<String>, shutdown: S) -> Result<Self>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut console_open = true;

        loop {
            self.flush().await;

            let deadline = self
                .node
                .next_deadline()
                .map_or_else(|| tokio::time::Instant::now() + IDLE_WAIT, tokio::time::Instant::from_std);

            tokio::select! {
                received = self.transport.recv() => {
                    match received {
                        Ok((msg, from)) => {
                            let disposition = self.node.handle_message(&msg, Instant::now());
                            if let Disposition::Ignored(reason) = disposition {
                                tracing::debug!(%from, key = %msg.key, ?reason, "Dropped frame");
                            } else {
                                tracing::trace!(%from, key = %msg.key, version = %msg.version, ?disposition, "Received frame");
                            }
                        }
                        Err(TransportError::Frame { from, source }) => {
                            tracing::debug!(%from, error = %source, "Failed to decode frame");
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "Receive failed");
                        }
                    }
                }

                () = tokio::time::sleep_until(deadline) => {}

                line = console.recv(), if console_open => {
                    match line {
                        Some(line) => self.command(&line),
                        None => console_open = false,
                    }
                }

                () = &mut shutdown => break,
            }
        }

        Ok(self)
    }

    async fn flush(&mut self) {
        for msg in self.node.poll(Instant::now()) {
            if let Err(err) = self.transport.send(&msg).await {
                tracing::warn!(error = %err, key = %msg.key, "Failed to send announcement");
            }
        }
    }

    fn command(&mut self, line: &str) {
        let command = match Command::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return,
            Err(err) => {
                println!("error: {err}");
                return;
            }
        };
        match command.execute(&mut self.node, Instant::now()) {
            Ok(out) => println!("{out}"),
            Err(err) => println!("error: {err}"),
        }
    }
}

async fn read_stdin(lines_tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if lines_tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read console input");
                break;
            }
        }
    }
}
