//! Wire messages.
//!
//! One JSON object per line in each direction, discriminated by a
//! `type` field.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use kscale_expr::{Context, Value};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Field that carries the resolved instance count on outbound points.
pub const SCALE_FIELD: &str = "scale";

/// Messages sent by the stream processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Info,
    Init {
        options: Vec<OptionSpec>,
    },
    Keepalive {
        time: i64,
    },
    Snapshot,
    Restore {
        #[serde(default)]
        snapshot: String,
    },
    BeginBatch {
        #[serde(default)]
        name: String,
    },
    Point(Point),
    EndBatch {
        #[serde(default)]
        name: String,
    },
}

/// Messages sent back to the stream processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Info(InfoResponse),
    Init {
        success: bool,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        error: String,
    },
    Keepalive {
        time: i64,
    },
    Snapshot {
        snapshot: String,
    },
    Restore {
        success: bool,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        error: String,
    },
    Point(Point),
    Error {
        error: String,
    },
}

/// Kind of data flowing into or out of the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Stream,
    Batch,
}

/// Type of an option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Int,
    Double,
    String,
    Duration,
}

/// Description of the handler returned for an `info` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoResponse {
    pub wants: EdgeType,
    pub provides: EdgeType,
    pub options: BTreeMap<String, Vec<ValueType>>,
}

/// A named option supplied at `init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    pub values: Vec<OptionValue>,
}

impl OptionSpec {
    pub fn new(name: &str, value: OptionValue) -> Self {
        Self {
            name: name.to_string(),
            values: vec![value],
        }
    }
}

/// A typed option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    /// Nanoseconds.
    Duration(i64),
}

impl OptionValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            OptionValue::Bool(_) => ValueType::Bool,
            OptionValue::Int(_) => ValueType::Int,
            OptionValue::Double(_) => ValueType::Double,
            OptionValue::String(_) => ValueType::String,
            OptionValue::Duration(_) => ValueType::Duration,
        }
    }
}

/// A single data point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Point {
    pub name: String,
    /// Nanoseconds since the Unix epoch.
    pub time: i64,
    pub database: String,
    pub retention_policy: String,
    pub group: String,
    pub dimensions: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub fields_double: BTreeMap<String, f64>,
    pub fields_int: BTreeMap<String, i64>,
    pub fields_string: BTreeMap<String, String>,
}

impl Point {
    /// The point's own timestamp.
    pub fn event_time(&self) -> SystemTime {
        let offset = Duration::from_nanos(self.time.unsigned_abs());
        if self.time >= 0 {
            SystemTime::UNIX_EPOCH + offset
        } else {
            SystemTime::UNIX_EPOCH
                .checked_sub(offset)
                .unwrap_or(SystemTime::UNIX_EPOCH)
        }
    }

    /// Numeric fields as an evaluation context.
    pub fn context(&self) -> Context {
        let ints = self
            .fields_int
            .iter()
            .map(|(k, v)| (k.clone(), Value::Int(*v)));
        let doubles = self
            .fields_double
            .iter()
            .map(|(k, v)| (k.clone(), Value::Float(*v)));
        ints.chain(doubles).collect()
    }

    /// Replace all fields with a single `scale` field.
    pub fn with_scale(mut self, scale: i64) -> Self {
        self.fields_double.clear();
        self.fields_string.clear();
        self.fields_int = BTreeMap::from([(SCALE_FIELD.to_string(), scale)]);
        self
    }
}

/// Serialize `message` as one line.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tagged_requests() {
        let req: Request = serde_json::from_str(r#"{"type":"info"}"#).unwrap();
        assert_eq!(req, Request::Info);

        let req: Request = serde_json::from_str(
            r#"{"type":"init","options":[
                {"name":"id","values":[{"type":"string","value":"abc"}]},
                {"name":"max_instances","values":[{"type":"int","value":10}]},
                {"name":"simulate","values":[{"type":"bool","value":true}]}
            ]}"#,
        )
        .unwrap();
        let Request::Init { options } = req else {
            panic!("expected init");
        };
        assert_eq!(options[0], OptionSpec::new("id", OptionValue::String("abc".into())));
        assert_eq!(options[1].values, vec![OptionValue::Int(10)]);
        assert_eq!(options[2].values, vec![OptionValue::Bool(true)]);
    }

    #[test]
    fn point_fields_default_when_missing() {
        let req: Request =
            serde_json::from_str(r#"{"type":"point","time":5,"fields_double":{"cpu_usage":10.0}}"#)
                .unwrap();
        let Request::Point(point) = req else {
            panic!("expected point");
        };
        assert_eq!(point.time, 5);
        assert_eq!(point.fields_double["cpu_usage"], 10.0);
        assert!(point.tags.is_empty());
    }

    #[test]
    fn init_response_omits_empty_error() {
        let ok = serde_json::to_string(&Response::Init {
            success: true,
            error: String::new(),
        })
        .unwrap();
        assert_eq!(ok, r#"{"type":"init","success":true}"#);
    }

    #[test]
    fn context_merges_int_and_double_fields() {
        let point = Point {
            fields_double: BTreeMap::from([("cpu_usage".to_string(), 10.0)]),
            fields_int: BTreeMap::from([("queue_size".to_string(), 10)]),
            fields_string: BTreeMap::from([("host".to_string(), "a".to_string())]),
            ..Point::default()
        };
        let ctx = point.context();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx["cpu_usage"], Value::Float(10.0));
        assert_eq!(ctx["queue_size"], Value::Int(10));
    }

    #[test]
    fn with_scale_replaces_fields_but_keeps_identity() {
        let point = Point {
            name: "cpu".into(),
            time: 42,
            tags: BTreeMap::from([("host".to_string(), "a".to_string())]),
            fields_double: BTreeMap::from([("cpu_usage".to_string(), 10.0)]),
            fields_string: BTreeMap::from([("note".to_string(), "x".to_string())]),
            ..Point::default()
        }
        .with_scale(3);
        assert_eq!(point.name, "cpu");
        assert_eq!(point.time, 42);
        assert_eq!(point.tags.len(), 1);
        assert!(point.fields_double.is_empty());
        assert!(point.fields_string.is_empty());
        assert_eq!(point.fields_int, BTreeMap::from([("scale".to_string(), 3)]));
    }

    #[test]
    fn event_time_uses_point_timestamp() {
        let point = Point {
            time: 1_500_000_000,
            ..Point::default()
        };
        assert_eq!(
            point.event_time(),
            SystemTime::UNIX_EPOCH + Duration::from_millis(1500)
        );
    }

    #[tokio::test]
    async fn write_message_appends_newline() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Response::Keepalive { time: 7 })
            .await
            .unwrap();
        assert_eq!(buf, b"{\"type\":\"keepalive\",\"time\":7}\n");
    }
}
