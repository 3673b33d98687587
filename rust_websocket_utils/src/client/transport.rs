// rust_websocket_utils/src/client/transport.rs

//! 客户端 WebSocket 传输层核心逻辑。
//!
//! 提供建立到服务器的连接与接收 `Envelope` 文本帧的能力，发送由调用方直接写入 `ws_sender`。
//! 每次 `connect_client` 都会创建一个全新的 `ClientConnection`，旧连接不会被复用。

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use log::{debug, error, info};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    WebSocketStream, connect_async,
    tungstenite::Error as TungsteniteError,
    tungstenite::protocol::Message,
};
use url::Url;

use crate::error::WsError;
use crate::message::{self, Envelope};

/// 可能经过 TLS 加密的客户端 WebSocket 流。
pub type ClientWsStream = WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// 客户端连接的发送端。
pub type ClientWsSink = SplitSink<ClientWsStream, Message>;

/// 客户端连接的接收端。
pub type ClientWsReceiver = SplitStream<ClientWsStream>;

/// 一个活动的客户端 WebSocket 连接，已拆分为发送端与接收端。
pub struct ClientConnection {
    pub ws_sender: ClientWsSink,
    pub ws_receiver: ClientWsReceiver,
}

impl ClientConnection {
    /// 发送 Close 帧并关闭发送端。
    pub async fn close(&mut self) -> Result<(), WsError> {
        self.ws_sender.close().await?;
        Ok(())
    }
}

/// 校验并解析 WebSocket 地址，只接受 `ws` 与 `wss` 协议。
pub fn parse_ws_url(url_str: &str) -> Result<Url, WsError> {
    let parsed_url = Url::parse(url_str)
        .map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", url_str, e)))?;
    match parsed_url.scheme() {
        "ws" | "wss" => Ok(parsed_url),
        other => Err(WsError::InvalidUrl(format!(
            "WebSocket URL '{}' 的协议必须是 ws 或 wss，实际为 '{}'",
            url_str, other
        ))),
    }
}

/// 连接到指定的 WebSocket 服务器。
///
/// 成功时返回一个新的 `ClientConnection`；握手失败时返回 `WsError::WebSocketProtocolError`。
pub async fn connect_client(url_str: &str) -> Result<ClientConnection, WsError> {
    info!("客户端：开始尝试连接到 WebSocket 服务器，URL: {}", url_str);
    let parsed_url = parse_ws_url(url_str)?;

    match connect_async(parsed_url.as_str()).await {
        Ok((ws_stream, response)) => {
            info!("客户端：已成功连接到 {} (HTTP 状态码: {})", url_str, response.status());
            debug!("客户端：WebSocket 连接响应头: {:?}", response.headers());
            let (ws_sender, ws_receiver) = ws_stream.split();
            Ok(ClientConnection { ws_sender, ws_receiver })
        }
        Err(e) => {
            error!("客户端：连接到 {} 失败，错误: {}", url_str, e);
            Err(WsError::WebSocketProtocolError(e))
        }
    }
}

/// 从接收端读取下一条消息并解码为 `Envelope`。
///
/// 返回值约定：
/// - `Some(Ok(envelope))`: 成功收到并解码一条文本消息；
/// - `Some(Err(e))` 且 `e.is_frame_local()`: 单帧无效 (格式错误、非预期的二进制帧)，调用方可丢弃后继续接收；
/// - `Some(Err(e))` 其他情况: 底层连接出错，连接已不可用；
/// - `None`: 连接被正常关闭。
///
/// 协议层的 Ping/Pong 控制帧由 tungstenite 自动处理，这里直接跳过。
pub async fn receive_message<S>(
    ws_receiver: &mut SplitStream<WebSocketStream<S>>,
) -> Option<Result<Envelope, WsError>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    debug!("收到原始文本消息，内容: '{}'", text);
                    break Some(message::decode(&text));
                }
                Message::Binary(bin) => {
                    debug!("收到原始二进制消息，长度: {} 字节", bin.len());
                    break Some(Err(WsError::Message("收到了非预期的 WebSocket 二进制消息".to_string())));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    debug!("收到协议层控制帧，跳过。");
                }
                Message::Close(close_frame) => {
                    debug!("收到 Close 控制帧，详细信息: {:?}", close_frame);
                    break None;
                }
            },
            Some(Err(TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed)) => {
                debug!("连接已关闭 (ConnectionClosed / AlreadyClosed)。");
                break None;
            }
            Some(Err(e)) => {
                error!("从 WebSocket 流接收消息时发生底层错误: {}", e);
                break Some(Err(WsError::WebSocketProtocolError(e)));
            }
            None => {
                debug!("WebSocket 接收流已结束。");
                break None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::transport::{ServerConnection, ServerTransport};
    use common_models::ws_payloads::FEEDS_MESSAGE_TYPE;
    use serde_json::json;
    use tokio::time::{Duration, timeout};

    #[test]
    fn test_parse_ws_url_rejects_http_scheme() {
        assert!(parse_ws_url("ws://127.0.0.1:8088/ws").is_ok());
        assert!(matches!(parse_ws_url("http://127.0.0.1:8088"), Err(WsError::InvalidUrl(_))));
        assert!(matches!(parse_ws_url("not a url"), Err(WsError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_client_connect_send_receive_echo() {
        let _ = env_logger::builder().is_test(true).try_init();

        let server = ServerTransport::bind("127.0.0.1:0").await.expect("绑定测试服务端失败");
        let url = format!("ws://{}", server.local_addr());
        let server_handle = tokio::spawn(server.serve(|mut conn: ServerConnection, _peer| async move {
            while let Some(Ok(envelope)) = conn.receive_message().await {
                if conn.send_envelope(&envelope).await.is_err() {
                    break;
                }
            }
        }));

        let mut client_conn = connect_client(&url).await.expect("客户端连接测试服务端失败");
        let outgoing = Envelope::new(FEEDS_MESSAGE_TYPE, &json!([{"id": "feed1", "status": "running"}]))
            .expect("构造信封失败");
        let text = outgoing.to_text().expect("编码信封失败");
        client_conn.ws_sender.send(Message::Text(text)).await.expect("发送消息失败");

        match timeout(Duration::from_secs(5), receive_message(&mut client_conn.ws_receiver)).await {
            Ok(Some(Ok(echoed))) => assert_eq!(echoed, outgoing),
            other => panic!("未收到预期的回显消息: {:?}", other.map(|r| r.map(|r| r.is_ok()))),
        }

        server_handle.abort();
    }

    #[tokio::test]
    async fn test_connect_client_to_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("绑定临时端口失败");
        let addr = listener.local_addr().expect("获取本地地址失败");
        drop(listener);

        let result = connect_client(&format!("ws://{}", addr)).await;
        assert!(matches!(result, Err(WsError::WebSocketProtocolError(_))));
    }
}
