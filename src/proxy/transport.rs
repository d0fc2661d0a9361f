//! Connections to upstream HTTP proxies

use hyper::Uri;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::error::{Result, RotatorError};
use crate::models::ProxyRecord;
use crate::pool::RequestTarget;

/// Upper bound on the upstream's CONNECT response head
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Proxy transport handler
pub struct ProxyTransport;

impl ProxyTransport {
    /// Open a TCP connection to the upstream proxy itself
    #[instrument(skip(proxy), fields(proxy_id = proxy.id()))]
    pub async fn connect(proxy: &ProxyRecord) -> Result<TcpStream> {
        let endpoint = proxy.resolved_endpoint()?;
        debug!("Connecting to upstream proxy at {}", endpoint);

        TcpStream::connect(endpoint)
            .await
            .map_err(|e| RotatorError::ProxyConnectionFailed(format!("TCP connect failed: {}", e)))
    }

    /// Open a tunnel to `target` through the upstream proxy using `CONNECT`
    #[instrument(skip(proxy), fields(proxy_id = proxy.id(), target = %target))]
    pub async fn open_tunnel(proxy: &ProxyRecord, target: &RequestTarget) -> Result<TcpStream> {
        let mut stream = Self::connect(proxy).await?;
        Self::establish_tunnel(&mut stream, target).await?;

        debug!("HTTP CONNECT tunnel established");
        Ok(stream)
    }

    /// Send `CONNECT` on an open stream and wait for a 200
    pub async fn establish_tunnel<S>(stream: &mut S, target: &RequestTarget) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = Self::build_connect_request(target);
        stream.write_all(request.as_bytes()).await.map_err(|e| {
            RotatorError::ProxyConnectionFailed(format!("Failed to send CONNECT: {}", e))
        })?;

        let head = Self::read_response_head(stream).await?;
        let status_line = head.lines().next().unwrap_or_default();

        let status = status_line.split_whitespace().nth(1);
        if !status_line.starts_with("HTTP/1.") || status != Some("200") {
            return Err(RotatorError::ProxyConnectionFailed(format!(
                "CONNECT failed: {}",
                if status_line.is_empty() { "empty response" } else { status_line }
            )));
        }

        Ok(())
    }

    /// Build HTTP CONNECT request
    fn build_connect_request(target: &RequestTarget) -> String {
        format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", target)
    }

    /// Read up to the blank line ending the response head, without consuming
    /// any tunneled bytes that follow it
    async fn read_response_head<S>(stream: &mut S) -> Result<String>
    where
        S: AsyncRead + Unpin,
    {
        let mut head = Vec::with_capacity(256);
        let mut byte = [0u8; 1];

        while !head.ends_with(b"\r\n\r\n") {
            if head.len() >= MAX_CONNECT_RESPONSE {
                return Err(RotatorError::ProxyConnectionFailed(
                    "CONNECT response too large".to_string(),
                ));
            }

            let n = stream.read(&mut byte).await.map_err(|e| {
                RotatorError::ProxyConnectionFailed(format!("Failed to read CONNECT response: {}", e))
            })?;
            if n == 0 {
                break;
            }
            head.push(byte[0]);
        }

        Ok(String::from_utf8_lossy(&head).into_owned())
    }

    /// Parse host and port from an absolute-form request URI
    pub fn parse_target(uri: &Uri) -> Result<RequestTarget> {
        let host = uri
            .host()
            .ok_or_else(|| RotatorError::InvalidRequest("Missing host in URI".to_string()))?;

        let port = uri.port_u16().unwrap_or_else(|| match uri.scheme_str() {
            Some("https") => 443,
            _ => 80,
        });

        Ok(RequestTarget::new(host, port))
    }

    /// Parse host and port from authority (for CONNECT requests)
    pub fn parse_authority(authority: &str) -> Result<RequestTarget> {
        if let Some((host, port_str)) = authority.rsplit_once(':') {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| RotatorError::InvalidRequest("Invalid port".to_string()))?;
            Ok(RequestTarget::new(host, port))
        } else {
            // Default to port 443 for CONNECT (typically HTTPS)
            Ok(RequestTarget::new(authority, 443))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let uri: Uri = "http://example.com/path".parse().unwrap();
        assert_eq!(
            ProxyTransport::parse_target(&uri).unwrap(),
            RequestTarget::new("example.com", 80)
        );

        let uri: Uri = "https://example.com:8443/".parse().unwrap();
        assert_eq!(
            ProxyTransport::parse_target(&uri).unwrap(),
            RequestTarget::new("example.com", 8443)
        );

        let uri: Uri = "/relative".parse().unwrap();
        assert!(matches!(
            ProxyTransport::parse_target(&uri),
            Err(RotatorError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_parse_authority() {
        assert_eq!(
            ProxyTransport::parse_authority("example.com:443").unwrap(),
            RequestTarget::new("example.com", 443)
        );
        assert_eq!(
            ProxyTransport::parse_authority("example.com").unwrap(),
            RequestTarget::new("example.com", 443)
        );
        tokio_test::assert_err!(ProxyTransport::parse_authority("example.com:https"));
    }

    #[test]
    fn test_build_connect_request() {
        let request = ProxyTransport::build_connect_request(&RequestTarget::new("example.com", 443));
        assert_eq!(
            request,
            "CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_establish_tunnel_accepts_200_and_keeps_payload() {
        let (mut client, mut upstream) = tokio::io::duplex(1024);

        let upstream_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 256];
            let n = upstream.read(&mut buf).await.unwrap();
            assert!(String::from_utf8_lossy(&buf[..n]).starts_with("CONNECT example.com:443 "));
            upstream
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\npayload")
                .await
                .unwrap();
        });

        ProxyTransport::establish_tunnel(&mut client, &RequestTarget::new("example.com", 443))
            .await
            .unwrap();
        upstream_task.await.unwrap();

        let mut rest = vec![0u8; 7];
        client.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"payload");
    }

    #[tokio::test]
    async fn test_establish_tunnel_rejects_non_200() {
        let (mut client, mut upstream) = tokio::io::duplex(1024);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 256];
            let _ = upstream.read(&mut buf).await.unwrap();
            upstream
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let err = ProxyTransport::establish_tunnel(&mut client, &RequestTarget::new("example.com", 443))
            .await
            .unwrap_err();
        assert!(matches!(err, RotatorError::ProxyConnectionFailed(_)));
        assert!(err.to_string().contains("407"));
    }

    #[tokio::test]
    async fn test_connect_requires_resolved_endpoint() {
        let record = ProxyRecord::candidate(Default::default());
        assert!(matches!(
            ProxyTransport::connect(&record).await,
            Err(RotatorError::Unresolved { .. })
        ));
    }
}
