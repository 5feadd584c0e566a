use super::full;
use emulator_types::InvocationResult;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Response, StatusCode};
use tracing::warn;

/// Copies the handler result onto the HTTP response: headers, then status, then the body as is.
/// No content type is added if the handler did not set one.
pub(crate) fn write(result: InvocationResult) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut builder = Response::builder();

    if let (Some(headers), Some(target)) = (&result.headers, builder.headers_mut()) {
        for (key, value) in headers {
            match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => {
                    target.insert(name, value);
                }
                _ => warn!("Invalid header in handler result, dropped: {key}: {value}"),
            }
        }
    }

    let status = match StatusCode::from_u16(result.status()) {
        Ok(v) => v,
        Err(_) => {
            warn!("Invalid status code in handler result: {}", result.status());
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    builder
        .status(status)
        .body(full(result.body))
        .expect("Failed to create a response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_text(response: Response<BoxBody<Bytes, hyper::Error>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn headers_status_and_body_are_copied() {
        let result = InvocationResult::new(201, "created")
            .with_header("X-Test", "1")
            .with_header("Content-Type", "text/plain");

        let response = write(result);

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-test"], "1");
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert_eq!(body_text(response).await, "created");
    }

    #[tokio::test]
    async fn missing_status_defaults_to_200_without_content_type() {
        let response = write(InvocationResult {
            status_code: None,
            headers: None,
            body: "{\"a\":1}".to_owned(),
        });

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("content-type").is_none());
        assert_eq!(body_text(response).await, "{\"a\":1}");
    }

    #[test]
    fn invalid_headers_are_dropped() {
        let response = write(InvocationResult::new(200, "").with_header("bad header", "1"));
        assert!(response.headers().is_empty());
    }
}
