//! Minimal HTTP/1 serving on top of hyper, shared by both binaries

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::{debug, warn};

pub type HttpResponse = Response<Full<Bytes>>;

/// Largest request body `serve` accepts; server records are a few hundred bytes
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Accept connections forever, handing every request to `handler`.
///
/// The request body is collected before the handler runs; handlers see the
/// method, the path and the raw body.
pub async fn serve<H, Fut>(listener: TcpListener, handler: H)
where
    H: Fn(Method, String, Bytes) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    serve_with_limit(listener, MAX_BODY_BYTES, handler).await
}

/// Like `serve`, rejecting bodies over `max_body` bytes with 413
pub async fn serve_with_limit<H, Fut>(listener: TcpListener, max_body: usize, handler: H)
where
    H: Fn(Method, String, Bytes) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Error accepting HTTP connection: {}", e);
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let handler = handler.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let handler = handler.clone();
                async move {
                    let method = req.method().clone();
                    let path = req.uri().path().to_string();
                    debug!("{} {}", method, path);

                    let body = match Limited::new(req.into_body(), max_body).collect().await {
                        Ok(collected) => collected.to_bytes(),
                        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                            debug!("Request body from {} over {} bytes", peer_addr, max_body);
                            return Ok::<_, hyper::Error>(text_response(
                                StatusCode::PAYLOAD_TOO_LARGE,
                                "Request body too large\n",
                            ));
                        }
                        Err(e) => {
                            debug!("Error reading request body from {}: {}", peer_addr, e);
                            return Ok::<_, hyper::Error>(text_response(
                                StatusCode::BAD_REQUEST,
                                "Unreadable request body\n",
                            ));
                        }
                    };
                    Ok::<_, hyper::Error>(handler(method, path, body).await)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving HTTP connection from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Build a plain text response
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Build an empty 200 response
pub fn ok_response() -> HttpResponse {
    text_response(StatusCode::OK, Bytes::new())
}

/// Serialize `value` as JSON; a serialization failure becomes a 500
pub fn json_response<T: Serialize>(value: &T, pretty: bool) -> HttpResponse {
    let encoded = if pretty {
        serde_json::to_vec_pretty(value)
    } else {
        serde_json::to_vec(value)
    };

    match encoded {
        Ok(bytes) => {
            let mut response = text_response(StatusCode::OK, bytes);
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => {
            warn!("Error encoding JSON response: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Encoding error\n")
        }
    }
}

/// Liveness reply used as the probe target
pub fn pong_response() -> HttpResponse {
    text_response(StatusCode::OK, "pong\n")
}

pub fn not_found_response(path: &str) -> HttpResponse {
    text_response(StatusCode::NOT_FOUND, format!("Not Found: {}\n", path))
}

/// Prometheus text exposition
pub fn metrics_response(metrics: &crate::MetricsCollector) -> HttpResponse {
    match metrics.gather() {
        Ok(text) => {
            let mut response = text_response(StatusCode::OK, text);
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(e) => {
            warn!("Failed to gather metrics: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics\n")
        }
    }
}

/// Read the whole body of a response produced by one of the helpers
pub async fn body_bytes(response: HttpResponse) -> Bytes {
    match response.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pong_response() {
        let response = pong_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, Bytes::from("pong\n"));
    }

    #[tokio::test]
    async fn test_json_response() {
        let response = json_response(&vec!["3", "2"], false);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(hyper::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(body_bytes(response).await, Bytes::from(r#"["3","2"]"#));
    }

    #[test]
    fn test_not_found_response() {
        assert_eq!(not_found_response("/nope").status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_dispatches_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, |method, path, body: Bytes| async move {
            match (method, path.as_str()) {
                (Method::GET, "/ping") => pong_response(),
                (Method::POST, "/echo") => text_response(StatusCode::OK, body),
                (_, path) => not_found_response(path),
            }
        }));

        let client = reqwest::Client::new();
        let pong = client
            .get(format!("http://{}/ping", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(pong.status().as_u16(), 200);
        assert_eq!(pong.text().await.unwrap(), "pong\n");

        let echo = client
            .post(format!("http://{}/echo", addr))
            .body("hello")
            .send()
            .await
            .unwrap();
        assert_eq!(echo.text().await.unwrap(), "hello");

        let missing = client
            .get(format!("http://{}/missing", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_serve_rejects_oversized_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_with_limit(listener, 1024, |_method, _path, body: Bytes| async move {
            text_response(StatusCode::OK, body)
        }));

        let client = reqwest::Client::new();
        let small = client
            .post(format!("http://{}/new-server", addr))
            .body(vec![b'a'; 512])
            .send()
            .await
            .unwrap();
        assert_eq!(small.status().as_u16(), 200);
        assert_eq!(small.bytes().await.unwrap().len(), 512);

        let large = client
            .post(format!("http://{}/new-server", addr))
            .body(vec![b'a'; 2048])
            .send()
            .await
            .unwrap();
        assert_eq!(large.status().as_u16(), 413);
    }
}
