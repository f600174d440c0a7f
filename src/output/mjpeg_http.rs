// 该文件是 Chepai （车牌记录） 项目的一部分。
// src/output/mjpeg_http.rs - MJPEG HTTP 推流输出
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::convert::Infallible;
use std::future::IntoFuture;
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread::{self, JoinHandle};

use axum::{
  Router,
  body::Body,
  extract::{ConnectInfo, State},
  http::header,
  response::IntoResponse,
};
use bytes::Bytes;
use futures::stream;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::FrameSink,
  stream::{CONTENT_TYPE, EncodedFrame},
};

/// 每个客户端最多积压的帧数，超出后跳过旧帧
const FRAME_CHANNEL_CAPACITY: usize = 4;

#[derive(Error, Debug)]
pub enum MjpegHttpOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无效的监听地址: {0}")]
  InvalidAddress(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// MJPEG 推流服务
///
/// 任意 HTTP GET 请求都会得到 `multipart/x-mixed-replace` 响应，
/// 之后每处理一帧推送一个分段。服务运行在独立线程的 tokio 运行时上，
/// 帧经广播通道分发，写入从不等待客户端；读得慢的客户端会跳过旧帧。
pub struct MjpegHttpOutput {
  local_addr: SocketAddr,
  frames_tx: broadcast::Sender<Bytes>,
  shutdown_tx: Option<oneshot::Sender<()>>,
  server: Option<JoinHandle<()>>,
}

impl FromUrlWithScheme for MjpegHttpOutput {
  const SCHEME: &'static str = "mjpeg";
}

impl FromUrl for MjpegHttpOutput {
  type Error = MjpegHttpOutputError;

  // mjpeg://0.0.0.0:5000
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(MjpegHttpOutputError::SchemeMismatch);
    }

    let host = url
      .host_str()
      .ok_or_else(|| MjpegHttpOutputError::InvalidAddress(url.to_string()))?;
    let port = url
      .port()
      .ok_or_else(|| MjpegHttpOutputError::InvalidAddress(url.to_string()))?;
    let addr = (host, port)
      .to_socket_addrs()?
      .next()
      .ok_or_else(|| MjpegHttpOutputError::InvalidAddress(url.to_string()))?;

    Self::bind(addr)
  }
}

impl MjpegHttpOutput {
  pub fn bind(addr: SocketAddr) -> Result<Self, MjpegHttpOutputError> {
    // 先同步绑定，地址错误在构造时即可返回
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()?;

    let (frames_tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let app = Router::new()
      .fallback(stream_frames)
      .with_state(frames_tx.clone());

    let server = thread::Builder::new()
      .name("mjpeg-http".to_string())
      .spawn(move || {
        runtime.block_on(serve(listener, app, shutdown_rx));
        debug!("MJPEG 服务线程退出");
      })?;
    info!("MJPEG 推流地址: http://{}/", local_addr);

    Ok(Self {
      local_addr,
      frames_tx,
      shutdown_tx: Some(shutdown_tx),
      server: Some(server),
    })
  }

  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// 当前订阅推流的客户端数
  pub fn client_count(&self) -> usize {
    self.frames_tx.receiver_count()
  }

  fn stop(&mut self) {
    if let Some(shutdown_tx) = self.shutdown_tx.take() {
      let _ = shutdown_tx.send(());
    }
    if let Some(server) = self.server.take()
      && server.join().is_err()
    {
      warn!("MJPEG 服务线程异常退出");
    }
  }
}

async fn serve(
  listener: std::net::TcpListener,
  app: Router,
  shutdown_rx: oneshot::Receiver<()>,
) {
  let listener = match tokio::net::TcpListener::from_std(listener) {
    Ok(listener) => listener,
    Err(e) => {
      error!("MJPEG 监听失败: {}", e);
      return;
    }
  };

  // 推流响应永不结束，不等待连接自然关闭；运行时退出时连接随之释放
  let server = axum::serve(
    listener,
    app.into_make_service_with_connect_info::<SocketAddr>(),
  );
  tokio::select! {
    result = server.into_future() => {
      if let Err(e) = result {
        error!("MJPEG 服务异常结束: {}", e);
      }
    }
    _ = shutdown_rx => debug!("MJPEG 服务收到停止信号"),
  }
}

async fn stream_frames(
  ConnectInfo(peer): ConnectInfo<SocketAddr>,
  State(frames_tx): State<broadcast::Sender<Bytes>>,
) -> impl IntoResponse {
  info!("MJPEG 客户端已连接: {}", peer);
  let frames_rx = frames_tx.subscribe();

  let parts = stream::unfold(frames_rx, move |mut frames_rx| async move {
    loop {
      match frames_rx.recv().await {
        Ok(part) => return Some((Ok::<_, Infallible>(part), frames_rx)),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          debug!("MJPEG 客户端 {} 跟不上，跳过 {} 帧", peer, skipped);
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  });

  (
    [
      (header::CONTENT_TYPE, CONTENT_TYPE),
      (header::CACHE_CONTROL, "no-cache"),
    ],
    Body::from_stream(parts),
  )
}

impl FrameSink for MjpegHttpOutput {
  type Error = MjpegHttpOutputError;

  fn write_frame(&mut self, frame: &EncodedFrame) -> Result<(), Self::Error> {
    // 没有客户端时发送失败，丢弃即可
    let _ = self.frames_tx.send(Bytes::from(frame.multipart_part()));
    Ok(())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    self.stop();
    Ok(())
  }
}

impl Drop for MjpegHttpOutput {
  fn drop(&mut self) {
    self.stop();
  }
}
