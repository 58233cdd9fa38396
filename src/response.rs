use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{Map, Value};

const DEFAULT_MIMETYPE: &str = "text/html";

/// Build a JSON object response from `(field, value)` pairs.
pub fn json_response<I, K>(fields: I) -> Response
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    let body: Map<String, Value> = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
    Json(Value::Object(body)).into_response()
}

/// A response with explicit control over every HTTP-level attribute.
///
/// Content type resolution: an explicit `content_type` wins, then `mimetype`,
/// then a `Content-Type` in `headers`, then `text/html`. Text mimetypes get a
/// `charset=utf-8` suffix unless `direct_passthrough` is set, in which case
/// body and headers are sent exactly as given.
#[derive(Debug, Clone)]
pub struct RawResponse {
    body: Bytes,
    status: StatusCode,
    headers: HeaderMap,
    mimetype: Option<String>,
    content_type: Option<String>,
    direct_passthrough: bool,
}

impl Default for RawResponse {
    fn default() -> Self {
        Self {
            body: Bytes::new(),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            mimetype: None,
            content_type: None,
            direct_passthrough: false,
        }
    }
}

impl RawResponse {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn direct_passthrough(mut self, passthrough: bool) -> Self {
        self.direct_passthrough = passthrough;
        self
    }

    fn resolved_content_type(&self) -> Option<String> {
        if let Some(ct) = &self.content_type {
            return Some(ct.clone());
        }
        let mimetype = match &self.mimetype {
            Some(m) => m.clone(),
            None if self.headers.contains_key(header::CONTENT_TYPE) => return None,
            None => DEFAULT_MIMETYPE.to_string(),
        };
        if !self.direct_passthrough && mimetype.starts_with("text/") && !mimetype.contains("charset") {
            Some(format!("{}; charset=utf-8", mimetype))
        } else {
            Some(mimetype)
        }
    }
}

impl IntoResponse for RawResponse {
    fn into_response(self) -> Response {
        let content_type = self.resolved_content_type();
        let mut resp = Response::new(Body::from(self.body));
        *resp.status_mut() = self.status;
        *resp.headers_mut() = self.headers;

        if let Some(ct) = content_type {
            match HeaderValue::from_str(&ct) {
                Ok(value) => {
                    resp.headers_mut().insert(header::CONTENT_TYPE, value);
                }
                Err(_) => {
                    tracing::warn!(target: "route_gateway::response", content_type = %ct, "Dropping invalid content type");
                }
            }
        }
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::json;

    async fn body_bytes(resp: Response) -> Bytes {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_json_response_serializes_fields() {
        let resp = json_response([("message", json!("running...")), ("count", json!(2))]);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");

        let body: Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(body, json!({"message": "running...", "count": 2}));
    }

    #[tokio::test]
    async fn test_raw_response_defaults() {
        let resp = RawResponse::new("<p>hi</p>").into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");
        assert_eq!(body_bytes(resp).await, Bytes::from_static(b"<p>hi</p>"));
    }

    #[test]
    fn test_raw_response_explicit_attributes() {
        let resp = RawResponse::new("gone")
            .status(StatusCode::GONE)
            .header(HeaderName::from_static("x-plugin"), HeaderValue::from_static("linkpay"))
            .mimetype("text/plain")
            .into_response();
        assert_eq!(resp.status(), StatusCode::GONE);
        assert_eq!(resp.headers()["x-plugin"], "linkpay");
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    }

    #[test]
    fn test_content_type_overrides_mimetype() {
        let resp = RawResponse::new("{}")
            .mimetype("text/plain")
            .content_type("application/vnd.api+json")
            .into_response();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/vnd.api+json");
    }

    #[test]
    fn test_passthrough_keeps_mimetype_verbatim() {
        let resp = RawResponse::new("raw")
            .mimetype("text/csv")
            .direct_passthrough(true)
            .into_response();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/csv");
    }

    #[test]
    fn test_header_content_type_used_when_nothing_else_set() {
        let resp = RawResponse::new("x")
            .header(header::CONTENT_TYPE, HeaderValue::from_static("image/png"))
            .into_response();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
    }
}
