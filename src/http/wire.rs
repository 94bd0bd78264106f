//! Pipeline v2 request and response bodies.

use serde::{Deserialize, Deserializer, Serialize};

use super::table::RowTable;
use crate::value::{SqlValue, WireValue, from_wire, to_json_args};
use crate::{Error, Result};

/// `POST /v2/pipeline` body.
#[derive(Debug, Serialize)]
pub struct PipelineRequest<'a> {
    /// Stream requests, executed in order.
    pub requests: Vec<StreamRequest<'a>>,
}

impl<'a> PipelineRequest<'a> {
    /// One statement followed by a close, so the server drops the stream immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Binding`] when an argument cannot be sent.
    pub fn single(sql: &'a str, args: &[SqlValue]) -> Result<Self> {
        Ok(Self {
            requests: vec![
                StreamRequest::Execute {
                    stmt: StatementBody {
                        sql,
                        args: to_json_args(args)?,
                    },
                },
                StreamRequest::Close,
            ],
        })
    }
}

/// One entry of `requests`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamRequest<'a> {
    /// Run a statement.
    Execute {
        /// The statement.
        stmt: StatementBody<'a>,
    },
    /// Close the stream.
    Close,
}

/// `stmt` object of an execute request.
#[derive(Debug, Serialize)]
pub struct StatementBody<'a> {
    /// SQL text.
    pub sql: &'a str,
    /// Positional arguments; left out entirely when there are none.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<WireValue>,
}

/// Response body.
#[derive(Debug, Deserialize)]
pub struct PipelineResponse {
    /// One result per request.
    #[serde(default)]
    pub results: Vec<StreamResult>,
}

/// One entry of `results`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamResult {
    /// The request succeeded.
    Ok {
        /// Typed response.
        response: StreamResponse,
    },
    /// The request failed.
    Error {
        /// Failure detail.
        error: StreamError,
    },
    /// A result type this client does not know.
    #[serde(other)]
    Unknown,
}

/// `response` of an ok result.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamResponse {
    /// Result of an execute request.
    Execute {
        /// Statement result.
        result: StatementResult,
    },
    /// Any other response, such as `close`.
    #[serde(other)]
    Other,
}

/// Server-side failure.
#[derive(Debug, Deserialize)]
pub struct StreamError {
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Engine error code, such as `SQLITE_CONSTRAINT`.
    #[serde(default)]
    pub code: Option<String>,
}

/// Result of one statement.
#[derive(Debug, Deserialize)]
pub struct StatementResult {
    /// Column descriptors.
    #[serde(default)]
    pub cols: Vec<ColumnDescriptor>,
    /// Row cells.
    #[serde(default)]
    pub rows: Vec<Vec<WireValue>>,
    /// Rows changed.
    #[serde(default)]
    pub affected_row_count: u64,
    /// Last inserted rowid, as a string or a number.
    #[serde(default, deserialize_with = "optional_integer")]
    pub last_insert_rowid: Option<i64>,
}

/// Column descriptor.
#[derive(Debug, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name; absent for unnamed expressions.
    #[serde(default)]
    pub name: Option<String>,
    /// Declared type, if the column has one.
    #[serde(default)]
    pub decltype: Option<String>,
}

fn optional_integer<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("{n} is not an i64"))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected rowid string or number, found {other}"
        ))),
    }
}

fn response_error(status: u16, body: &str, cause: impl Into<String>) -> Error {
    Error::Transport {
        operation: "pipeline".to_string(),
        cause: cause.into(),
        native_code: None,
        http_status: Some(status),
        body: Some(body.to_string()),
    }
}

/// Decodes a pipeline response into a row table.
///
/// # Errors
///
/// Returns [`Error::Transport`] carrying the status and raw body when the status is not
/// 2xx, the body is not a pipeline response, a result reports an error, or no `ok`
/// execute result is present.
pub fn decode_response(status: u16, body: &str) -> Result<RowTable> {
    if !(200..300).contains(&status) {
        return Err(Error::http("pipeline", status, body));
    }
    let response: PipelineResponse = serde_json::from_str(body)
        .map_err(|e| response_error(status, body, format!("malformed pipeline response: {e}")))?;

    for result in response.results {
        match result {
            StreamResult::Ok {
                response: StreamResponse::Execute { result },
            } => return table_from(result).map_err(|e| response_error(status, body, e.to_string())),
            StreamResult::Error { error } => {
                let code = error.code.as_deref().unwrap_or("UNKNOWN");
                return Err(response_error(
                    status,
                    body,
                    format!("statement failed ({code}): {}", error.message),
                ));
            },
            StreamResult::Ok { .. } | StreamResult::Unknown => {},
        }
    }
    Err(response_error(status, body, "response has no ok execute result"))
}

fn table_from(result: StatementResult) -> Result<RowTable> {
    let columns = result
        .cols
        .into_iter()
        .map(|col| col.name.unwrap_or_default())
        .collect();
    let rows = result
        .rows
        .iter()
        .map(|row| row.iter().map(from_wire).collect::<Result<Vec<_>>>())
        .collect::<Result<Vec<_>>>()?;
    Ok(RowTable::new(
        columns,
        rows,
        result.affected_row_count,
        result.last_insert_rowid,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"{"results":[{"type":"ok","response":{"type":"execute","result":{"cols":[{"name":"id"}],"rows":[[{"type":"integer","value":"1"}]],"affected_row_count":1,"last_insert_rowid":"1"}}}]}"#;

    #[test]
    fn test_envelope_with_args() {
        let request = PipelineRequest::single("SELECT ?", &[SqlValue::Integer(1)]).unwrap();
        let body = serde_json::to_value(request).unwrap();
        assert_eq!(
            body,
            json!({"requests": [
                {"type": "execute", "stmt": {"sql": "SELECT ?", "args": [{"type": "integer", "value": "1"}]}},
                {"type": "close"}
            ]})
        );
    }

    #[test]
    fn test_envelope_omits_empty_args() {
        let body = serde_json::to_value(PipelineRequest::single("SELECT 1", &[]).unwrap()).unwrap();
        assert!(body["requests"][0]["stmt"].get("args").is_none());
    }

    #[test]
    fn test_decode_sample_response() {
        let table = decode_response(200, SAMPLE).unwrap();
        assert_eq!(table.columns(), ["id"]);
        assert_eq!(table.rows(), [vec![SqlValue::Integer(1)]]);
        assert_eq!(table.rows_affected(), 1);
        assert_eq!(table.last_insert_rowid(), Some(1));
    }

    #[test]
    fn test_decode_skips_close_and_unknown_results() {
        let body = json!({"results": [
            {"type": "future"},
            {"type": "ok", "response": {"type": "close"}},
            {"type": "ok", "response": {"type": "execute", "result": {
                "cols": [{}], "rows": [[{"type": "null"}]],
                "affected_row_count": 0, "last_insert_rowid": null
            }}}
        ]})
        .to_string();
        let table = decode_response(200, &body).unwrap();
        assert_eq!(table.columns(), [""]);
        assert_eq!(table.last_insert_rowid(), None);
    }

    #[test]
    fn test_non_success_status_keeps_body() {
        let err = decode_response(401, "unauthorized").unwrap_err();
        assert_eq!(err.http_status(), Some(401));
        assert!(matches!(err, Error::Transport { body: Some(ref b), .. } if b == "unauthorized"));
    }

    #[test]
    fn test_error_result_is_transport_error() {
        let body = json!({"results": [
            {"type": "error", "error": {"message": "no such table: t", "code": "SQLITE_ERROR"}},
            {"type": "ok", "response": {"type": "close"}}
        ]})
        .to_string();
        let err = decode_response(200, &body).unwrap_err();
        assert_eq!(err.http_status(), Some(200));
        assert!(err.to_string().contains("no such table"));
    }

    #[test]
    fn test_missing_ok_result_is_transport_error() {
        let err = decode_response(200, r#"{"results":[]}"#).unwrap_err();
        assert!(err.to_string().contains("no ok execute result"));
        let err = decode_response(200, "not json").unwrap_err();
        assert!(matches!(err, Error::Transport { http_status: Some(200), .. }));
    }
}
