//! Path-addressed parameter containers with two-way JSON binding.
//!
//! A [`ParamContainer`] maps slash-delimited paths to typed parameter slots
//! and serialises them to and from a JSON document in both directions. The
//! camera configuration and status containers, the processor plugin
//! configuration and the control-channel payloads are all built on it.
//!
//! The binding set is fixed when a concrete container is constructed: paths
//! are registered once with [`ParamContainer::bind`] and never added or
//! removed afterwards. Registering the same path twice is a programming
//! error and panics.
//!
//! Updates have partial semantics: paths present in the incoming document
//! replace the bound value, paths absent from the document leave the bound
//! value untouched, and paths present in the document but not bound are
//! silently ignored so that newer clients can talk to older servers. A
//! failed update leaves the container unchanged.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::ParamError;

/// Scalar parameter kinds supported by the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    I32,
    U32,
    I64,
    U64,
    F64,
    Bool,
    Str,
}

impl ParamType {
    fn name(self) -> &'static str {
        match self {
            ParamType::I32 => "i32",
            ParamType::U32 => "u32",
            ParamType::I64 => "i64",
            ParamType::U64 => "u64",
            ParamType::F64 => "f64",
            ParamType::Bool => "bool",
            ParamType::Str => "string",
        }
    }

    fn template(self) -> ParamValue {
        match self {
            ParamType::I32 => ParamValue::I32(0),
            ParamType::U32 => ParamValue::U32(0),
            ParamType::I64 => ParamValue::I64(0),
            ParamType::U64 => ParamValue::U64(0),
            ParamType::F64 => ParamValue::F64(0.0),
            ParamType::Bool => ParamValue::Bool(false),
            ParamType::Str => ParamValue::Str(String::new()),
        }
    }
}

/// A typed parameter slot.
///
/// Sequences are homogeneous: every element shares the scalar kind recorded
/// alongside the element vector.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Str(String),
    Seq(ParamType, Vec<ParamValue>),
}

impl ParamValue {
    fn kind_name(&self) -> String {
        match self {
            ParamValue::I32(_) => "i32".to_string(),
            ParamValue::U32(_) => "u32".to_string(),
            ParamValue::I64(_) => "i64".to_string(),
            ParamValue::U64(_) => "u64".to_string(),
            ParamValue::F64(_) => "f64".to_string(),
            ParamValue::Bool(_) => "bool".to_string(),
            ParamValue::Str(_) => "string".to_string(),
            ParamValue::Seq(ty, _) => format!("{} sequence", ty.name()),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            ParamValue::I32(v) => Value::from(*v),
            ParamValue::U32(v) => Value::from(*v),
            ParamValue::I64(v) => Value::from(*v),
            ParamValue::U64(v) => Value::from(*v),
            ParamValue::F64(v) => Value::from(*v),
            ParamValue::Bool(v) => Value::from(*v),
            ParamValue::Str(v) => Value::from(v.clone()),
            ParamValue::Seq(_, items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// Decode `value` into a new slot of the same kind as `self`.
    fn coerced_from(&self, path: &str, value: &Value) -> Result<ParamValue, ParamError> {
        let mismatch = || ParamError::TypeMismatch {
            path: path.to_string(),
            expected: self.kind_name(),
            found: json_kind_name(value).to_string(),
        };

        match self {
            ParamValue::I32(_) => value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(ParamValue::I32)
                .ok_or_else(mismatch),
            ParamValue::U32(_) => value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(ParamValue::U32)
                .ok_or_else(mismatch),
            ParamValue::I64(_) => value.as_i64().map(ParamValue::I64).ok_or_else(mismatch),
            ParamValue::U64(_) => value.as_u64().map(ParamValue::U64).ok_or_else(mismatch),
            ParamValue::F64(_) => value.as_f64().map(ParamValue::F64).ok_or_else(mismatch),
            ParamValue::Bool(_) => value.as_bool().map(ParamValue::Bool).ok_or_else(mismatch),
            ParamValue::Str(_) => value
                .as_str()
                .map(|s| ParamValue::Str(s.to_string()))
                .ok_or_else(mismatch),
            ParamValue::Seq(ty, _) => {
                let items = value.as_array().ok_or_else(mismatch)?;
                let template = ty.template();
                let mut decoded = Vec::with_capacity(items.len());
                for item in items {
                    decoded.push(template.coerced_from(path, item)?);
                }
                Ok(ParamValue::Seq(*ty, decoded))
            }
        }
    }
}

fn json_kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Container mapping slash-delimited paths to typed parameter slots.
#[derive(Debug, Clone, Default)]
pub struct ParamContainer {
    bindings: BTreeMap<String, ParamValue>,
}

impl ParamContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter slot at `path` with its initial value.
    ///
    /// Paths are relative to the container root and must not start with a
    /// slash. Panics if the path is already bound: the binding set is fixed
    /// at construction and a duplicate registration is a programming error.
    pub fn bind(&mut self, path: &str, initial: ParamValue) {
        assert!(
            !path.is_empty() && !path.starts_with('/'),
            "parameter path {path:?} must be non-empty and container-relative"
        );
        if self.bindings.insert(path.to_string(), initial).is_some() {
            panic!("duplicate parameter binding for path {path:?}");
        }
    }

    pub fn is_bound(&self, path: &str) -> bool {
        self.bindings.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Serialise all bound parameters into a JSON string.
    pub fn encode(&self) -> String {
        let mut doc = Value::Object(Map::new());
        self.encode_into(&mut doc, "");
        doc.to_string()
    }

    /// Merge all bound parameters into `doc` under `prefix`.
    ///
    /// The prefix is normalised to begin with `/` and end with `/` unless it
    /// is empty, so `"camera"`, `"/camera"` and `"camera/"` are equivalent.
    pub fn encode_into(&self, doc: &mut Value, prefix: &str) {
        let prefix = normalise_prefix(prefix);
        for (path, value) in &self.bindings {
            pointer_set(doc, &format!("{prefix}{path}"), value.to_json());
        }
    }

    /// Parse `json` and apply it with [`ParamContainer::update_doc`].
    pub fn update_str(&mut self, json: &str) -> Result<(), ParamError> {
        let doc: Value = serde_json::from_str(json).map_err(|e| ParamError::Parse {
            offset: byte_offset(json, e.line(), e.column()),
            reason: e.to_string(),
        })?;
        self.update_doc(&doc)
    }

    /// Parse raw `json` bytes and apply them with [`ParamContainer::update_doc`].
    pub fn update_bytes(&mut self, json: &[u8]) -> Result<(), ParamError> {
        let text = std::str::from_utf8(json).map_err(|e| ParamError::Parse {
            offset: e.valid_up_to(),
            reason: "invalid UTF-8 in JSON document".to_string(),
        })?;
        self.update_str(text)
    }

    /// Apply a parsed document to the bound parameters.
    ///
    /// The update is transactional: if any present value fails to coerce the
    /// container is left exactly as it was.
    pub fn update_doc(&mut self, doc: &Value) -> Result<(), ParamError> {
        let mut staged = Vec::new();
        for (path, current) in &self.bindings {
            if let Some(value) = doc.pointer(&format!("/{path}")) {
                staged.push((path.clone(), current.coerced_from(path, value)?));
            }
        }
        for (path, value) in staged {
            self.bindings.insert(path, value);
        }
        Ok(())
    }

    /// Replay the parameter values of `other` into this container.
    ///
    /// The other container is serialised and the resulting document applied,
    /// so only paths bound on both sides are transferred.
    pub fn update_from(&mut self, other: &ParamContainer) -> Result<(), ParamError> {
        self.update_str(&other.encode())
    }

    pub fn get_i32(&self, path: &str) -> i32 {
        match self.bindings.get(path) {
            Some(ParamValue::I32(v)) => *v,
            other => panic!("parameter {path:?} is not a bound i32: {other:?}"),
        }
    }

    pub fn get_u32(&self, path: &str) -> u32 {
        match self.bindings.get(path) {
            Some(ParamValue::U32(v)) => *v,
            other => panic!("parameter {path:?} is not a bound u32: {other:?}"),
        }
    }

    pub fn get_u64(&self, path: &str) -> u64 {
        match self.bindings.get(path) {
            Some(ParamValue::U64(v)) => *v,
            other => panic!("parameter {path:?} is not a bound u64: {other:?}"),
        }
    }

    pub fn get_f64(&self, path: &str) -> f64 {
        match self.bindings.get(path) {
            Some(ParamValue::F64(v)) => *v,
            other => panic!("parameter {path:?} is not a bound f64: {other:?}"),
        }
    }

    pub fn get_bool(&self, path: &str) -> bool {
        match self.bindings.get(path) {
            Some(ParamValue::Bool(v)) => *v,
            other => panic!("parameter {path:?} is not a bound bool: {other:?}"),
        }
    }

    pub fn get_str(&self, path: &str) -> &str {
        match self.bindings.get(path) {
            Some(ParamValue::Str(v)) => v,
            other => panic!("parameter {path:?} is not a bound string: {other:?}"),
        }
    }

    pub fn set_u32(&mut self, path: &str, value: u32) {
        self.set(path, ParamValue::U32(value));
    }

    pub fn set_u64(&mut self, path: &str, value: u64) {
        self.set(path, ParamValue::U64(value));
    }

    pub fn set_f64(&mut self, path: &str, value: f64) {
        self.set(path, ParamValue::F64(value));
    }

    pub fn set_bool(&mut self, path: &str, value: bool) {
        self.set(path, ParamValue::Bool(value));
    }

    pub fn set_str(&mut self, path: &str, value: impl Into<String>) {
        self.set(path, ParamValue::Str(value.into()));
    }

    fn set(&mut self, path: &str, value: ParamValue) {
        match self.bindings.get_mut(path) {
            Some(slot) if std::mem::discriminant(slot) == std::mem::discriminant(&value) => {
                *slot = value;
            }
            other => panic!("parameter {path:?} is not bound with kind {value:?}: {other:?}"),
        }
    }
}

/// Translate a serde line/column position into a byte offset into `input`.
pub(crate) fn byte_offset(input: &str, line: usize, column: usize) -> usize {
    input
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum::<usize>()
        + column.saturating_sub(1)
}

fn normalise_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        return "/".to_string();
    }
    let mut normalised = String::with_capacity(prefix.len() + 2);
    if !prefix.starts_with('/') {
        normalised.push('/');
    }
    normalised.push_str(prefix);
    if !normalised.ends_with('/') {
        normalised.push('/');
    }
    normalised
}

fn forced_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Set `value` at a JSON pointer, creating intermediate objects as needed.
fn pointer_set(doc: &mut Value, pointer: &str, value: Value) {
    let segments: Vec<&str> = pointer.split('/').skip(1).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut node = doc;
    for segment in parents {
        node = forced_object(node)
            .entry(segment.to_string())
            .or_insert(Value::Null);
    }
    forced_object(node).insert(last.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_container() -> ParamContainer {
        let mut params = ParamContainer::new();
        params.bind("camera_num", ParamValue::U32(0));
        params.bind("exposure_time", ParamValue::F64(0.01));
        params.bind("camera/info/name", ParamValue::Str("unknown".to_string()));
        params.bind("acquisition/acquiring", ParamValue::Bool(false));
        params.bind("frames", ParamValue::U64(0));
        params.bind(
            "roi",
            ParamValue::Seq(
                ParamType::U32,
                vec![
                    ParamValue::U32(0),
                    ParamValue::U32(0),
                    ParamValue::U32(640),
                    ParamValue::U32(480),
                ],
            ),
        );
        params
    }

    #[test]
    fn encode_produces_nested_document() {
        let params = sample_container();
        let doc: Value = serde_json::from_str(&params.encode()).unwrap();

        assert_eq!(doc["camera_num"], json!(0));
        assert_eq!(doc["camera"]["info"]["name"], json!("unknown"));
        assert_eq!(doc["acquisition"]["acquiring"], json!(false));
        assert_eq!(doc["roi"], json!([0, 0, 640, 480]));
    }

    #[test]
    fn round_trip_preserves_values() {
        let mut params = sample_container();
        params.set_u32("camera_num", 3);
        params.set_f64("exposure_time", 0.125);
        params.set_str("camera/info/name", "pco.sim");

        let encoded = params.encode();
        let mut copy = sample_container();
        copy.update_str(&encoded).unwrap();

        assert_eq!(copy.get_u32("camera_num"), 3);
        assert_eq!(copy.get_f64("exposure_time"), 0.125);
        assert_eq!(copy.get_str("camera/info/name"), "pco.sim");
        assert_eq!(copy.encode(), encoded);
    }

    #[test]
    fn empty_update_changes_nothing() {
        let mut params = sample_container();
        let before = params.encode();
        params.update_str("{}").unwrap();
        assert_eq!(params.encode(), before);
    }

    #[test]
    fn partial_update_touches_only_named_path() {
        let mut params = sample_container();
        params
            .update_doc(&json!({"exposure_time": 0.5}))
            .unwrap();

        assert_eq!(params.get_f64("exposure_time"), 0.5);
        assert_eq!(params.get_u32("camera_num"), 0);
        assert_eq!(params.get_str("camera/info/name"), "unknown");
    }

    #[test]
    fn unknown_paths_are_ignored() {
        let mut params = sample_container();
        let before = params.encode();
        params
            .update_doc(&json!({"no_such_param": 42, "camera": {"other": true}}))
            .unwrap();
        assert_eq!(params.encode(), before);
    }

    #[test]
    fn type_mismatch_preserves_prior_state() {
        let mut params = sample_container();
        params.set_u32("camera_num", 7);

        let err = params
            .update_doc(&json!({"camera_num": 1, "exposure_time": "fast"}))
            .unwrap_err();

        match err {
            ParamError::TypeMismatch { path, expected, .. } => {
                assert_eq!(path, "exposure_time");
                assert_eq!(expected, "f64");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The transaction aborted before camera_num was applied.
        assert_eq!(params.get_u32("camera_num"), 7);
    }

    #[test]
    fn negative_value_rejected_for_unsigned_binding() {
        let mut params = sample_container();
        let err = params.update_doc(&json!({"camera_num": -1})).unwrap_err();
        assert!(matches!(err, ParamError::TypeMismatch { .. }));
    }

    #[test]
    fn parse_error_reports_offset() {
        let mut params = sample_container();
        let err = params.update_str("{\"camera_num\": }").unwrap_err();
        match err {
            ParamError::Parse { offset, .. } => assert_eq!(offset, 15),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sequence_update_replaces_whole_vector_in_order() {
        let mut params = sample_container();
        params.update_doc(&json!({"roi": [8, 16, 32]})).unwrap();

        let doc: Value = serde_json::from_str(&params.encode()).unwrap();
        assert_eq!(doc["roi"], json!([8, 16, 32]));
    }

    #[test]
    fn sequence_element_mismatch_rejected() {
        let mut params = sample_container();
        let err = params.update_doc(&json!({"roi": [1, "two"]})).unwrap_err();
        assert!(matches!(err, ParamError::TypeMismatch { .. }));
    }

    #[test]
    fn encode_into_normalises_prefix() {
        let params = sample_container();
        for prefix in ["camera", "/camera", "camera/", "/camera/"] {
            let mut doc = json!({});
            params.encode_into(&mut doc, prefix);
            assert_eq!(doc["camera"]["camera_num"], json!(0), "prefix {prefix:?}");
        }
    }

    #[test]
    fn update_from_replays_other_container() {
        let mut source = sample_container();
        source.set_u32("camera_num", 9);
        source.set_bool("acquisition/acquiring", true);

        let mut copy = sample_container();
        copy.update_from(&source).unwrap();
        assert_eq!(copy.get_u32("camera_num"), 9);
        assert!(copy.get_bool("acquisition/acquiring"));
    }

    #[test]
    #[should_panic(expected = "duplicate parameter binding")]
    fn duplicate_binding_panics() {
        let mut params = ParamContainer::new();
        params.bind("camera_num", ParamValue::U32(0));
        params.bind("camera_num", ParamValue::U32(1));
    }

    #[test]
    fn byte_offset_spans_lines() {
        let input = "{\n  \"a\": 1,\n  \"b\": oops\n}";
        // Line 3, column 8 points at the start of "oops".
        assert_eq!(byte_offset(input, 3, 8), 19);
    }
}
