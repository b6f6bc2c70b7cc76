use bytes::Bytes;

/// A value handed across the script boundary.
///
/// Only the shapes this crate inspects are modelled; marshalling richer
/// script objects is the embedder's job. Producers pass chunks as
/// `ScriptValue`s so that payloads of the wrong type are rejected the same
/// way a script would see them rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Buffer(Bytes),
}

impl ScriptValue {
    /// The bytes behind a binary buffer view, if this is one.
    pub fn as_buffer_view(&self) -> Option<&Bytes> {
        match self {
            ScriptValue::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Undefined => "undefined",
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Buffer(_) => "ArrayBufferView",
        }
    }
}

impl From<Bytes> for ScriptValue {
    fn from(bytes: Bytes) -> Self { ScriptValue::Buffer(bytes) }
}

impl From<Vec<u8>> for ScriptValue {
    fn from(bytes: Vec<u8>) -> Self { ScriptValue::Buffer(Bytes::from(bytes)) }
}

impl From<&[u8]> for ScriptValue {
    fn from(bytes: &[u8]) -> Self { ScriptValue::Buffer(Bytes::copy_from_slice(bytes)) }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self { ScriptValue::String(s) }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self { ScriptValue::String(s.to_owned()) }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self { ScriptValue::Number(n) }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self { ScriptValue::Bool(b) }
}
