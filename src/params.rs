//! Required-parameter extraction.
//!
//! GET and HEAD requests read the query string, POST requests read the body (JSON object or
//! urlencoded form). Names are checked in declaration order and the first
//! missing one is reported.

use crate::error::ParamError;
use axum::{
    async_trait,
    body::to_bytes,
    extract::{FromRequest, Request},
    http::{header, Method},
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Parameter names a route declared at registration. The registry attaches
/// this to every request it routes.
#[derive(Debug, Clone, Default)]
pub struct RequiredParams(pub Arc<[String]>);

/// Extracted parameter values, looked up by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params {
    values: Map<String, Value>,
}

impl Params {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Value as text. Non-string JSON values are not coerced.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Validate `required` against the payload selected by `method`.
pub fn extract(
    method: &Method,
    query: Option<&str>,
    content_type: Option<&str>,
    body: &[u8],
    required: &[String],
) -> Result<Params, ParamError> {
    let source = match *method {
        Method::GET | Method::HEAD => parse_query(query.unwrap_or_default())?,
        Method::POST => parse_body(content_type, body)?,
        _ => return Err(ParamError::UnsupportedMethod(method.clone())),
    };

    let mut values = Map::new();
    for name in required {
        let value = source
            .get(name)
            .ok_or_else(|| ParamError::MissingParameter(name.clone()))?;
        values.insert(name.clone(), value.clone());
    }
    Ok(Params { values })
}

fn parse_query(query: &str) -> Result<Map<String, Value>, ParamError> {
    parse_urlencoded(query.as_bytes())
}

fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<Map<String, Value>, ParamError> {
    let is_form = content_type
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        return parse_urlencoded(body);
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ParamError::MalformedBody(
            "expected a JSON object".to_string(),
        )),
        Err(e) => Err(ParamError::MalformedBody(e.to_string())),
    }
}

/// Repeated keys keep their first value.
fn parse_urlencoded(raw: &[u8]) -> Result<Map<String, Value>, ParamError> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_bytes(raw).map_err(|e| ParamError::MalformedBody(e.to_string()))?;

    let mut map = Map::new();
    for (key, value) in pairs {
        map.entry(key).or_insert(Value::String(value));
    }
    Ok(map)
}

#[async_trait]
impl<S> FromRequest<S> for Params
where
    S: Send + Sync,
{
    type Rejection = ParamError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let required = parts
            .extensions
            .get::<RequiredParams>()
            .cloned()
            .unwrap_or_default();

        let bytes = if parts.method == Method::POST {
            to_bytes(body, MAX_BODY_BYTES)
                .await
                .map_err(|e| ParamError::MalformedBody(e.to_string()))?
        } else {
            Default::default()
        };

        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());

        extract(
            &parts.method,
            parts.uri.query(),
            content_type,
            &bytes,
            &required.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_get_reads_query_string() {
        let params = extract(&Method::GET, Some("a=1&b=two"), None, b"", &names(&["a", "b"])).unwrap();
        assert_eq!(params.get_str("a"), Some("1"));
        assert_eq!(params.get_str("b"), Some("two"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_first_missing_parameter_is_reported() {
        let err = extract(&Method::GET, Some("a=1"), None, b"", &names(&["a", "b"])).unwrap_err();
        assert_eq!(err, ParamError::MissingParameter("b".into()));

        let err = extract(&Method::GET, None, None, b"", &names(&["a", "b"])).unwrap_err();
        assert_eq!(err, ParamError::MissingParameter("a".into()));
    }

    #[test]
    fn test_unsupported_method_is_rejected_before_lookup() {
        let err = extract(&Method::DELETE, Some("a=1"), None, b"", &[]).unwrap_err();
        assert_eq!(err, ParamError::UnsupportedMethod(Method::DELETE));

        let err = extract(&Method::PUT, None, None, b"", &names(&["a"])).unwrap_err();
        assert_eq!(err, ParamError::UnsupportedMethod(Method::PUT));
    }

    #[test]
    fn test_head_reads_query_string_like_get() {
        let params = extract(&Method::HEAD, Some("text=hi"), None, b"", &names(&["text"])).unwrap();
        assert_eq!(params.get_str("text"), Some("hi"));

        let err = extract(&Method::HEAD, None, None, b"", &names(&["text"])).unwrap_err();
        assert_eq!(err, ParamError::MissingParameter("text".into()));
    }

    #[test]
    fn test_post_reads_json_body() {
        let body = json!({"text": "hi", "n": 3, "extra": true}).to_string();
        let params = extract(
            &Method::POST,
            Some("text=ignored"),
            Some("application/json"),
            body.as_bytes(),
            &names(&["text", "n"]),
        )
        .unwrap();
        assert_eq!(params.get_str("text"), Some("hi"));
        assert_eq!(params.get("n"), Some(&json!(3)));
        assert!(params.get("extra").is_none());
    }

    #[test]
    fn test_post_ignores_query_string() {
        let err = extract(&Method::POST, Some("text=hi"), None, b"", &names(&["text"])).unwrap_err();
        assert_eq!(err, ParamError::MissingParameter("text".into()));
    }

    #[test]
    fn test_post_reads_form_body() {
        let params = extract(
            &Method::POST,
            None,
            Some("application/x-www-form-urlencoded; charset=utf-8"),
            b"text=hello+world&text=second",
            &names(&["text"]),
        )
        .unwrap();
        assert_eq!(params.get_str("text"), Some("hello world"));
    }

    #[test]
    fn test_post_rejects_non_object_json() {
        let err = extract(&Method::POST, None, Some("application/json"), b"[1,2]", &[]).unwrap_err();
        assert!(matches!(err, ParamError::MalformedBody(_)));
    }

    #[test]
    fn test_no_required_params_yields_empty_params() {
        let params = extract(&Method::GET, Some("x=1"), None, b"", &[]).unwrap();
        assert!(params.is_empty());
    }
}
