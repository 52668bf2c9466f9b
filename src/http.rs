//! HTTP 辅助工具：请求日志、客户端地址识别与安全头。

use axum::body::Body as AxumBody;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Uri};
use axum::{middleware, response::Response};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use tracing::info;

/// 发起请求的客户端地址，由请求日志中间件写入请求扩展。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientAddr(String);

impl ClientAddr {
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }

    /// 综合转发头与连接信息计算客户端地址。
    pub fn resolve(headers: &HeaderMap, connect_addr: Option<SocketAddr>) -> Self {
        extract_forwarded_ip(headers)
            .map(|ip| ip.to_string())
            .or_else(|| connect_addr.map(|addr| addr.to_string()))
            .map(Self)
            .unwrap_or_else(Self::unknown)
    }
}

impl fmt::Display for ClientAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 从 `x-forwarded-for` 解析客户端 IP。
pub fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
}

pub fn request_line(client: &ClientAddr, method: &Method, uri: &Uri) -> String {
    format!("{client} {method} {uri}")
}

/// 记录每个请求的 `地址 方法 URL`，并把客户端地址交给后续处理器。
pub async fn log_requests(mut request: Request<AxumBody>, next: middleware::Next) -> Response {
    let connect_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = ClientAddr::resolve(request.headers(), connect_addr);
    info!("{}", request_line(&client, request.method(), request.uri()));
    request.extensions_mut().insert(client);
    next.run(request).await
}

/// 添加基础安全响应头。
pub async fn add_security_headers(request: Request<AxumBody>, next: middleware::Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        axum::http::header::X_FRAME_OPTIONS,
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        axum::http::header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_address_wins_over_socket() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let socket: SocketAddr = "192.168.1.20:50123".parse().expect("socket addr");

        let client = ClientAddr::resolve(&headers, Some(socket));
        assert_eq!(client.to_string(), "203.0.113.7");
    }

    #[test]
    fn socket_address_keeps_port() {
        let socket: SocketAddr = "192.168.1.20:50123".parse().expect("socket addr");
        let client = ClientAddr::resolve(&HeaderMap::new(), Some(socket));
        assert_eq!(client.to_string(), "192.168.1.20:50123");
        assert_eq!(ClientAddr::resolve(&HeaderMap::new(), None), ClientAddr::unknown());
    }

    #[test]
    fn request_line_has_address_method_and_url() {
        let client = ClientAddr("10.0.0.5:4000".to_string());
        let uri: Uri = "/uploads/report.pdf?download=1".parse().expect("uri");
        assert_eq!(
            request_line(&client, &Method::GET, &uri),
            "10.0.0.5:4000 GET /uploads/report.pdf?download=1"
        );
    }
}
