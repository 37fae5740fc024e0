use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::controller::EngineHandle;
use crate::error::EngineError;
use crate::protocol::{self, EngineEvent, MethodCall, MethodReply};

/// Largest payload a single UDP datagram can carry.
const MAX_DATAGRAM: usize = 65507;

/// Local method channel: JSON requests in, JSON replies back to the sender,
/// engine events pushed to whichever peer spoke last.
pub struct MethodBridge {
    socket: Arc<UdpSocket>,
    engine: EngineHandle,
    peer: Mutex<Option<SocketAddr>>,
    buffer_size: usize,
}

// 客户端与引擎通过本地UDP通信，端口在配置中指定
impl MethodBridge {
    pub async fn new(
        local_ip: &str,
        local_port: u16,
        buffer_size: usize,
        engine: EngineHandle,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(format!("{}:{}", local_ip, local_port))
            .await
            .with_context(|| format!("Failed to bind method channel on {}:{}", local_ip, local_port))?;
        log::info!("Method channel listening on {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
            engine,
            peer: Mutex::new(None),
            buffer_size: buffer_size.clamp(1, MAX_DATAGRAM),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve requests until the socket fails.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, addr) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            self.remember_peer(addr);

            let reply = match serde_json::from_slice::<MethodCall>(&buf[..len]) {
                Ok(call) => {
                    let result = self.engine.call(&call.method, &call.args).await;
                    MethodReply::from_result(call.id, result)
                }
                Err(e) => {
                    log::warn!("Malformed request from {}: {}", addr, e);
                    MethodReply::from_result(
                        None,
                        Err(EngineError::Unknown(format!("Malformed request: {}", e))),
                    )
                }
            };
            self.send_reply(reply, addr).await;
        }
    }

    /// Push engine events to the last peer until the engine goes away.
    pub async fn forward_events(&self, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
        while let Some(event) = events.recv().await {
            let Some(peer) = self.current_peer() else {
                log::trace!("No peer for {}", event.name());
                continue;
            };
            let msg = protocol::platform_event(&event).to_string();
            if let Err(e) = self.send_message(&msg, peer).await {
                log::warn!("Failed to push {} to {}: {}", event.name(), peer, e);
            }
        }
    }

    pub async fn send_message(&self, msg: &str, addr: SocketAddr) -> anyhow::Result<()> {
        self.socket.send_to(msg.as_bytes(), addr).await?;
        Ok(())
    }

    async fn send_reply(&self, reply: MethodReply, addr: SocketAddr) {
        let id = reply.id;
        let mut encoded = match serde_json::to_string(&reply) {
            Ok(encoded) => encoded,
            Err(e) => {
                log::error!("Failed to encode reply: {}", e);
                return;
            }
        };
        if encoded.len() > MAX_DATAGRAM {
            let too_large = MethodReply::from_result(
                id,
                Err(EngineError::Unknown(format!(
                    "Reply of {} bytes exceeds the datagram limit",
                    encoded.len()
                ))),
            );
            encoded = serde_json::to_string(&too_large).unwrap_or_default();
        }
        if let Err(e) = self.send_message(&encoded, addr).await {
            log::warn!("Failed to reply to {}: {}", addr, e);
        }
    }

    fn remember_peer(&self, addr: SocketAddr) {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);
    }

    fn current_peer(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
