use serde::Serialize;
use serde_json::Value;

/// Uniform gateway response envelope: `{code, msg, data}`. Code 0 is
/// success, anything else carries a human-readable failure message.
#[derive(Debug, Serialize)]
pub struct HttpResponse {
    pub code: i32,
    pub msg: String,
    pub data: Value,
}

impl HttpResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            code: 0,
            msg: "success".to_string(),
            data,
        }
    }

    pub fn fail(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: Value::Null,
        }
    }
}
