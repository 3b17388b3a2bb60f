use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request, Response};

use crate::commands::common::CliEngine;
use crate::error::CliError;

pub async fn run_request(
    engine: &CliEngine,
    method: &str,
    path: &str,
    body: Option<Vec<u8>>,
    content_type: Option<&str>,
) -> Result<(), CliError> {
    let request = build_request(method, path, body, content_type)?;
    let response = engine.worker().fetch(request).await;

    eprintln!("HTTP {}", response.status());
    println!("{}", response_text(&response));
    Ok(())
}

/// Build the request the router sees from command-line arguments.
pub fn build_request(
    method: &str,
    path: &str,
    body: Option<Vec<u8>>,
    content_type: Option<&str>,
) -> Result<Request<Vec<u8>>, CliError> {
    let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| CliError::InvalidArgument(format!("invalid HTTP method: {method}")))?;
    let path = path.trim();
    if path.is_empty() {
        return Err(CliError::InvalidArgument("request path is empty".to_string()));
    }

    let mut request = Request::new(body.unwrap_or_default());
    *request.method_mut() = method;
    *request.uri_mut() = path
        .parse()
        .map_err(|_| CliError::InvalidArgument(format!("invalid request path: {path}")))?;
    if let Some(content_type) = content_type {
        let value = HeaderValue::from_str(content_type)
            .map_err(|_| CliError::InvalidArgument(format!("invalid content type: {content_type}")))?;
        request.headers_mut().insert(CONTENT_TYPE, value);
    }
    Ok(request)
}

pub fn response_text(response: &Response<Vec<u8>>) -> String {
    String::from_utf8_lossy(response.body()).into_owned()
}
