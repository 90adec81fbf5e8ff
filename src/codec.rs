//! Payload decoding: raw message bytes to ordered invocation arguments
//!
//! A decoder is selected once per handler at registration time and never
//! re-evaluated. Decoding the same bytes through the same decoder always
//! yields the same arguments.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::MomError;

/// Declared consumption format for a handler registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// UTF-8 text payload
    Text,
    /// Raw byte payload
    Binary,
    /// One JSON document per message, handed to the handler whole
    JsonWhole,
    /// JSON object per message, individual fields bound to parameters
    JsonFields,
}

/// Declared value encoding for one bound field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldEncoding {
    #[default]
    Utf8,
}

/// One parameter's declared JSON field binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldBinding {
    /// JSON object key the parameter value is read from
    pub field: String,
    #[serde(default)]
    pub encoding: FieldEncoding,
}

impl FieldBinding {
    pub fn new<S: Into<String>>(field: S) -> Self {
        Self {
            field: field.into(),
            encoding: FieldEncoding::Utf8,
        }
    }
}

/// One decoded invocation argument
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedArg {
    Text(String),
    Bytes(Bytes),
    Json(Value),
}

impl DecodedArg {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            DecodedArg::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            DecodedArg::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            DecodedArg::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Decoding strategy resolved at descriptor construction, immutable thereafter
#[derive(Debug, Clone, PartialEq)]
pub enum Decoder {
    /// UTF-8 text, one argument
    Text,
    /// Raw bytes, one argument, passed through unchanged
    Binary,
    /// Whole-document JSON, one argument
    JsonWhole,
    /// JSON object, one argument per bound field in declared order
    JsonFields(Vec<FieldBinding>),
}

impl Decoder {
    /// Select the decoding strategy for a declared format and parameter shape.
    ///
    /// `params` holds one entry per declared handler parameter; `None` marks
    /// a parameter without a field binding. Selection is deterministic:
    ///   - `Binary` and `Text` map directly;
    ///   - any JSON format with a no-argument handler decodes as text (there
    ///     is nothing to bind a document to);
    ///   - `JsonWhole` takes the document whole and accepts no bindings;
    ///   - `JsonFields` requires every parameter bound, or none (none falls
    ///     back to text with a logged warning); a partial binding is an
    ///     `InvalidBinding` construction error, never a per-message error.
    pub fn select(
        format: PayloadFormat,
        params: &[Option<FieldBinding>],
    ) -> Result<Decoder, MomError> {
        let bound = params.iter().filter(|p| p.is_some()).count();

        match format {
            PayloadFormat::Binary => Ok(Decoder::Binary),
            PayloadFormat::Text => Ok(Decoder::Text),
            PayloadFormat::JsonWhole | PayloadFormat::JsonFields if params.is_empty() => {
                debug!("JSON format declared for a no-argument handler, decoding as text");
                Ok(Decoder::Text)
            }
            PayloadFormat::JsonWhole => {
                if bound > 0 {
                    return Err(MomError::invalid_binding(
                        "field bindings require the json_fields format",
                    ));
                }
                Ok(Decoder::JsonWhole)
            }
            PayloadFormat::JsonFields => {
                if bound == 0 {
                    warn!("json_fields declared without any field bindings, decoding as text");
                    Ok(Decoder::Text)
                } else if bound == params.len() {
                    Ok(Decoder::JsonFields(
                        params.iter().flatten().cloned().collect(),
                    ))
                } else {
                    Err(MomError::invalid_binding(format!(
                        "{bound} of {} parameters carry field bindings; bind all or none",
                        params.len()
                    )))
                }
            }
        }
    }

    /// Turn raw payload bytes into the ordered argument list for invocation.
    ///
    /// `Ok(None)` means the payload carried no data for this strategy (empty
    /// input under `JsonWhole`): the handler is not invoked and nothing is
    /// reported. Errors are per-handler and recoverable; the caller skips the
    /// handler and moves on.
    pub fn decode(&self, payload: &Bytes) -> Result<Option<Vec<DecodedArg>>, MomError> {
        match self {
            Decoder::Text => {
                let text = std::str::from_utf8(payload)
                    .map_err(|e| MomError::decode_failed(payload.len(), e.to_string()))?;
                Ok(Some(vec![DecodedArg::Text(text.to_owned())]))
            }
            Decoder::Binary => Ok(Some(vec![DecodedArg::Bytes(payload.clone())])),
            Decoder::JsonWhole => {
                if payload.is_empty() {
                    return Ok(None);
                }
                let value: Value = serde_json::from_slice(payload)
                    .map_err(|e| MomError::decode_failed(payload.len(), e.to_string()))?;
                Ok(Some(vec![DecodedArg::Json(value)]))
            }
            Decoder::JsonFields(bindings) => {
                let value: Value = serde_json::from_slice(payload)
                    .map_err(|e| MomError::decode_failed(payload.len(), e.to_string()))?;
                let object = value.as_object().ok_or_else(|| {
                    MomError::decode_failed(payload.len(), "expected a JSON object")
                })?;

                let mut args = Vec::with_capacity(bindings.len());
                for binding in bindings {
                    let field_value = object
                        .get(&binding.field)
                        .ok_or_else(|| MomError::missing_field(&binding.field))?;
                    args.push(DecodedArg::Json(field_value.clone()));
                }
                Ok(Some(args))
            }
        }
    }

    /// Number of arguments this decoder produces on success
    pub fn arity(&self) -> usize {
        match self {
            Decoder::Text | Decoder::Binary | Decoder::JsonWhole => 1,
            Decoder::JsonFields(bindings) => bindings.len(),
        }
    }
}
