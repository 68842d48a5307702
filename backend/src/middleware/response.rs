use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};

/// Paths whose bodies are relayed from a third party untouched.
const PASSTHROUGH_PREFIXES: [&str; 1] = ["/api/weather/"];

pub async fn wrap_response_middleware(req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path().to_string();
    let res = next.run(req).await;

    if !path.starts_with("/api") || PASSTHROUGH_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return Ok(res);
    }

    let status = res.status();
    let is_json = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .map_or(false, |ct| ct.contains("application/json"));

    let (mut parts, body) = res.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    let wrapped = if is_json {
        let data: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        envelope(status, data)
    } else if bytes.is_empty() {
        envelope(status, Value::Null)
    } else {
        envelope(status, Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    let new_bytes = serde_json::to_vec(&wrapped).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(new_bytes.len()));

    Ok(Response::from_parts(parts, Body::from(new_bytes)))
}

fn envelope(status: StatusCode, data: Value) -> Value {
    // Error bodies produced by AgriError already carry the envelope.
    if data.get("success").is_some() {
        return data;
    }

    if status.is_success() {
        json!({ "success": true, "data": data })
    } else {
        let message = data
            .as_str()
            .map(str::to_string)
            .or_else(|| data.get("error").and_then(|v| v.as_str()).map(str::to_string))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| status.to_string());
        json!({ "success": false, "error": message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_wrapped() {
        let v = envelope(StatusCode::OK, json!({ "id": 1 }));
        assert_eq!(v, json!({ "success": true, "data": { "id": 1 } }));
    }

    #[test]
    fn test_existing_envelope_is_kept() {
        let body = json!({ "success": false, "kind": "not_found", "error": "Field not found" });
        assert_eq!(envelope(StatusCode::NOT_FOUND, body.clone()), body);
    }

    #[test]
    fn test_plain_error_gets_status_text() {
        // e.g. axum's own JSON extractor rejections
        let v = envelope(StatusCode::UNPROCESSABLE_ENTITY, Value::Null);
        assert_eq!(v["success"], json!(false));
        assert_eq!(v["error"], json!("422 Unprocessable Entity"));
    }
}
