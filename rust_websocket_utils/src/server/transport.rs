// rust_websocket_utils/src/server/transport.rs

//! 服务端 WebSocket 传输层。
//!
//! 一个极简的监听器：接受 TCP 连接、完成 WebSocket 握手，然后把拆分好的
//! `ServerConnection` 交给调用方提供的回调处理。实时通信核心的集成测试与
//! 模拟对端都基于它构建。

use std::net::SocketAddr;

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use log::{error, info};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::protocol::Message};

use crate::client::transport::receive_message;
use crate::error::WsError;
use crate::message::Envelope;

pub type WsStream = WebSocketStream<TcpStream>;

/// 服务端视角下的一条客户端连接。
pub struct ServerConnection {
    pub peer_addr: SocketAddr,
    pub ws_sender: SplitSink<WsStream, Message>,
    pub ws_receiver: SplitStream<WsStream>,
}

impl ServerConnection {
    fn new(ws_stream: WsStream, peer_addr: SocketAddr) -> Self {
        let (ws_sender, ws_receiver) = ws_stream.split();
        Self {
            peer_addr,
            ws_sender,
            ws_receiver,
        }
    }

    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), WsError> {
        self.send_text(envelope.to_text()?).await
    }

    /// 原样发送一段文本，不做任何编码校验 (可用于构造格式错误的帧)。
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), WsError> {
        self.ws_sender.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// 语义与客户端的 `receive_message` 相同。
    pub async fn receive_message(&mut self) -> Option<Result<Envelope, WsError>> {
        receive_message(&mut self.ws_receiver).await
    }

    pub async fn close(&mut self) -> Result<(), WsError> {
        self.ws_sender.close().await?;
        Ok(())
    }
}

/// 已绑定地址、尚未开始接受连接的服务端。
pub struct ServerTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ServerTransport {
    /// 绑定监听地址。传入端口 0 时由系统分配，可通过 `local_addr` 获取实际地址。
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, WsError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("WebSocket 服务器正在监听地址: {}", local_addr);
        Ok(Self { listener, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 持续接受连接，每个握手成功的连接都在独立任务中交给 `on_connect` 处理。
    ///
    /// 单个连接握手失败或 accept 失败只记录日志，服务器继续运行。
    pub async fn serve<F, Fut>(self, on_connect: F) -> Result<(), WsError>
    where
        F: Fn(ServerConnection, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    info!("从 {} 接受了新的 TCP 连接", peer_addr);
                    let on_connect_callback = on_connect.clone();
                    tokio::spawn(async move {
                        match accept_async(tcp_stream).await {
                            Ok(ws_stream) => {
                                info!("与 {} 的 WebSocket 握手成功", peer_addr);
                                on_connect_callback(ServerConnection::new(ws_stream, peer_addr), peer_addr).await;
                            }
                            Err(e) => {
                                error!("与 {} 的 WebSocket 握手失败: {}", peer_addr, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("接受 TCP 连接失败: {}。服务器将继续运行。", e);
                }
            }
        }
    }
}
