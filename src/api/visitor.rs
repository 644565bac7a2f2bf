use std::convert::Infallible;
use std::net::SocketAddr;

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::identity::{Identity, IdentityError};

/// Raw network origin of a request: proxy headers and the socket peer.
///
/// Extraction never fails, so handlers can validate the slug before judging the origin.
#[derive(Debug, Clone, Default)]
pub struct Visitor {
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub peer: Option<SocketAddr>,
}

impl Visitor {
    pub fn identity(&self) -> Result<Identity, IdentityError> {
        Identity::from_origin(
            self.forwarded_for.as_deref(),
            self.real_ip.as_deref(),
            self.peer,
        )
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Visitor {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(peer)| *peer);

        Ok(Self {
            forwarded_for: header(&parts.headers, "x-forwarded-for"),
            real_ip: header(&parts.headers, "x-real-ip"),
            peer,
        })
    }
}

/// A header value, kept even when it is not valid UTF-8 so it fails identity parsing
/// instead of silently falling through to the next source.
fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn visitor(request: Request<()>) -> Visitor {
        let (mut parts, ()) = request.into_parts();
        Visitor::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn reads_proxy_headers_and_peer() {
        let mut request = Request::builder()
            .header("X-Forwarded-For", "203.0.113.5, 10.0.0.1")
            .header("X-Real-IP", "198.51.100.7")
            .body(())
            .unwrap();
        let peer: SocketAddr = "10.0.0.1:52000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        let visitor = visitor(request).await;
        assert_eq!(visitor.forwarded_for.as_deref(), Some("203.0.113.5, 10.0.0.1"));
        assert_eq!(visitor.real_ip.as_deref(), Some("198.51.100.7"));
        assert_eq!(visitor.peer, Some(peer));

        assert_eq!(visitor.identity().unwrap().to_string(), "203.0.113.5");
    }

    #[tokio::test]
    async fn falls_back_to_the_socket_peer() {
        let mut request = Request::builder().body(()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("[2001:db8:1:2:3:4:5:6]:443".parse().unwrap()));

        let identity = visitor(request).await.identity().unwrap();
        assert_eq!(identity.to_string(), "2001:db8:1:2::");
    }

    #[tokio::test]
    async fn without_any_origin_there_is_no_identity() {
        let request = Request::builder().body(()).unwrap();

        let error = visitor(request).await.identity().unwrap_err();
        assert_eq!(error, IdentityError::MissingOrigin);
    }

    #[tokio::test]
    async fn garbage_forwarded_header_does_not_fall_through() {
        let mut request = Request::builder()
            .header("X-Forwarded-For", "unknown")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("192.0.2.1:4000".parse().unwrap()));

        let error = visitor(request).await.identity().unwrap_err();
        assert!(matches!(error, IdentityError::Unparsable { .. }));
    }
}
