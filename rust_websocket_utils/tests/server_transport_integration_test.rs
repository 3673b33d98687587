// rust_websocket_utils/tests/server_transport_integration_test.rs

//! 服务端传输层集成测试：真实 TCP 连接 + 原始 tungstenite 客户端。

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{LevelFilter, info};
use rust_websocket_utils::error::WsError;
use rust_websocket_utils::server::transport::{ServerConnection, ServerTransport};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as TungsteniteMessage};

fn init_test_logger() {
    let _ = env_logger::builder().filter_level(LevelFilter::Info).is_test(true).try_init();
}

/// 测试服务端：把每条收到的结果 (成功信封或错误描述) 报告给测试主流程，
/// 收到合法信封时回一条 `{"type": "ack", "data": <原类型>}`。
async fn reporting_handler(mut conn: ServerConnection, report_tx: mpsc::UnboundedSender<Result<String, String>>) {
    info!("[Test Server] 新的 WebSocket 连接来自 {}", conn.peer_addr);
    while let Some(result) = conn.receive_message().await {
        match result {
            Ok(envelope) => {
                let _ = report_tx.send(Ok(envelope.message_type.clone()));
                let ack = rust_websocket_utils::Envelope::new("ack", &envelope.message_type).expect("构造 ack 失败");
                if conn.send_envelope(&ack).await.is_err() {
                    break;
                }
            }
            Err(e) if e.is_frame_local() => {
                let _ = report_tx.send(Err(e.to_string()));
            }
            Err(e) => {
                let _ = report_tx.send(Err(e.to_string()));
                break;
            }
        }
    }
    info!("[Test Server] 连接 {} 处理结束", conn.peer_addr);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_starts_and_accepts_connection() {
    init_test_logger();

    let server = ServerTransport::bind("127.0.0.1:0").await.expect("无法绑定到随机端口");
    let addr = server.local_addr();
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();

    let server_handle = tokio::spawn(server.serve(move |conn, _peer| {
        let report_tx = report_tx.clone();
        reporting_handler(conn, report_tx)
    }));

    let url = format!("ws://{}", addr);
    let (mut client_ws_stream, response) = connect_async(url.as_str()).await.expect("[Test Main] 客户端连接失败");
    info!("[Test Main] 客户端连接成功，服务器响应状态: {}", response.status());

    client_ws_stream
        .send(TungsteniteMessage::Text(json!({"type": "feeds", "data": []}).to_string()))
        .await
        .expect("客户端发送消息失败");

    let reported = tokio::time::timeout(Duration::from_secs(5), report_rx.recv())
        .await
        .expect("等待服务端报告超时")
        .expect("报告通道意外关闭");
    assert_eq!(reported, Ok("feeds".to_string()));

    match tokio::time::timeout(Duration::from_secs(5), client_ws_stream.next()).await {
        Ok(Some(Ok(TungsteniteMessage::Text(text)))) => {
            let value: serde_json::Value = serde_json::from_str(&text).expect("ack 不是合法JSON");
            assert_eq!(value, json!({"type": "ack", "data": "feeds"}));
        }
        other => panic!("[Test Main] 未收到预期的 ack: {:?}", other),
    }

    let _ = client_ws_stream.close(None).await;
    server_handle.abort();
    let _ = server_handle.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_frames_do_not_end_the_connection() {
    init_test_logger();

    let server = ServerTransport::bind("127.0.0.1:0").await.expect("无法绑定到随机端口");
    let addr = server.local_addr();
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();

    let server_handle = tokio::spawn(server.serve(move |conn, _peer| {
        let report_tx = report_tx.clone();
        reporting_handler(conn, report_tx)
    }));

    let url = format!("ws://{}", addr);
    let (mut client_ws_stream, _) = connect_async(url.as_str()).await.expect("客户端连接失败");

    for frame in ["definitely not json", r#"{"data": {"id": "n1"}}"#, r#"{"type": "nodes", "data": []}"#] {
        client_ws_stream
            .send(TungsteniteMessage::Text(frame.to_string()))
            .await
            .expect("客户端发送消息失败");
    }

    let mut reports = Vec::new();
    for _ in 0..3 {
        let report = tokio::time::timeout(Duration::from_secs(5), report_rx.recv())
            .await
            .expect("等待服务端报告超时")
            .expect("报告通道意外关闭");
        reports.push(report);
    }

    assert!(reports[0].is_err(), "非JSON文本应报告为错误");
    assert!(reports[1].is_err(), "缺少 type 的帧应报告为错误");
    assert_eq!(reports[2], Ok("nodes".to_string()), "格式错误的帧之后连接应仍可用");

    let malformed = WsError::MalformedMessage("不是合法的JSON".to_string()).to_string();
    assert!(reports[0].as_ref().unwrap_err().starts_with(&malformed));

    let _ = client_ws_stream.close(None).await;
    server_handle.abort();
    let _ = server_handle.await;
}
