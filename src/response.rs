use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mongodb::bson::{self, Bson, Document};
use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::error::ApiError;

/// Success envelope: `{statusCode, data, message, success: true}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status_code: u16,
    pub data: Value,
    pub message: String,
    pub success: bool,
}

impl ApiResponse {
    pub fn new(status: StatusCode, data: Value, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            data,
            message: message.into(),
            success: status.as_u16() < 400,
        }
    }

    pub fn ok(data: Value, message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, data, message)
    }

    pub fn created(data: Value, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CREATED, data, message)
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK)
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// Failure envelope: `{statusCode, message, success: false, errors, data: null}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub status_code: u16,
    pub message: String,
    pub success: bool,
    pub errors: Vec<String>,
    pub data: Option<Value>,
}

impl ErrorEnvelope {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            message: message.into(),
            success: false,
            errors: vec![],
            data: None,
        }
    }
}

/// Serializes an entity through bson so ids and timestamps come out the
/// same way as documents returned by aggregation.
pub fn to_json<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    let bson = bson::to_bson(value)
        .map_err(|e| ApiError::Internal(format!("Failed to serialize response: {}", e)))?;
    Ok(bson_to_json(bson))
}

pub fn docs_to_json(docs: Vec<Document>) -> Value {
    Value::Array(docs.into_iter().map(|d| bson_to_json(Bson::Document(d))).collect())
}

/// Object ids become hex strings and dates become RFC 3339 strings.
pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::ObjectId(id) => Value::String(id.to_hex()),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .map(Value::String)
            .unwrap_or_else(|_| Value::from(dt.timestamp_millis())),
        Bson::Document(doc) => {
            let map: Map<String, Value> =
                doc.into_iter().map(|(k, v)| (k, bson_to_json(v))).collect();
            Value::Object(map)
        }
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::String(s) => Value::String(s),
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(n) => Value::from(n),
        Bson::Int64(n) => Value::from(n),
        Bson::Double(n) => Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null),
        Bson::Null | Bson::Undefined => Value::Null,
        other => other.into_relaxed_extjson(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId, DateTime};
    use serde_json::json;

    #[test]
    fn success_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::created(json!({"a": 1}), "Made it")).unwrap();
        assert_eq!(
            body,
            json!({"statusCode": 201, "data": {"a": 1}, "message": "Made it", "success": true})
        );
    }

    #[test]
    fn failure_envelope_shape() {
        let body =
            serde_json::to_value(ErrorEnvelope::new(StatusCode::FORBIDDEN, "Not yours")).unwrap();
        assert_eq!(
            body,
            json!({
                "statusCode": 403,
                "message": "Not yours",
                "success": false,
                "errors": [],
                "data": null
            })
        );
    }

    #[test]
    fn ids_and_dates_are_flattened() {
        let id = ObjectId::new();
        let when = DateTime::from_millis(0);
        let value = bson_to_json(Bson::Document(doc! {
            "_id": id,
            "createdAt": when,
            "videos": [id],
            "views": 3_i64,
        }));

        assert_eq!(value["_id"], json!(id.to_hex()));
        assert!(value["createdAt"]
            .as_str()
            .unwrap()
            .starts_with("1970-01-01T00:00:00"));
        assert_eq!(value["videos"][0], json!(id.to_hex()));
        assert_eq!(value["views"], json!(3));
    }
}
