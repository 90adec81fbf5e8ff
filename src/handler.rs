//! Handler descriptors: an application callback bound to a resolved decoder
//!
//! A descriptor is built once, when the embedding application registers a
//! callback for a topic. The decoder is selected at that point from the
//! declared format and parameter shape and never changes afterwards.
//! Descriptor equality is target identity plus declared format, which is what
//! duplicate rejection and removal key on.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::codec::{DecodedArg, Decoder, FieldBinding, PayloadFormat};
use crate::error::{HandlerError, MomError};

/// Callable target signature shared by all handlers
pub type HandlerFn = dyn Fn(&[DecodedArg]) -> Result<(), HandlerError> + Send + Sync;

/// One registered callback with its decoding strategy
#[derive(Clone)]
pub struct HandlerDescriptor {
    /// Human-readable identity used in logs and error reports
    name: String,
    target: Arc<HandlerFn>,
    format: PayloadFormat,
    decoder: Decoder,
}

impl HandlerDescriptor {
    /// Build a descriptor, resolving the decoder from the declared format
    /// and parameter shape.
    ///
    /// `params` holds one entry per declared parameter of the target, `None`
    /// for parameters without a field binding. Fails with `InvalidBinding`
    /// when the shape and format cannot be reconciled (partial bindings,
    /// bindings under `JsonWhole`).
    pub fn new<S: Into<String>>(
        name: S,
        format: PayloadFormat,
        params: &[Option<FieldBinding>],
        target: Arc<HandlerFn>,
    ) -> Result<Self, MomError> {
        let decoder = Decoder::select(format, params)?;
        Ok(Self {
            name: name.into(),
            target,
            format,
            decoder,
        })
    }

    /// Handler taking the payload as UTF-8 text
    pub fn text<S, F>(name: S, f: F) -> Self
    where
        S: Into<String>,
        F: Fn(&str) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let target: Arc<HandlerFn> = Arc::new(move |args| {
            let text = args.first().and_then(DecodedArg::as_text).unwrap_or("");
            f(text)
        });
        Self {
            name: name.into(),
            target,
            format: PayloadFormat::Text,
            decoder: Decoder::Text,
        }
    }

    /// Handler taking the raw payload bytes
    pub fn binary<S, F>(name: S, f: F) -> Self
    where
        S: Into<String>,
        F: Fn(&Bytes) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let target: Arc<HandlerFn> = Arc::new(move |args| {
            let bytes = args
                .first()
                .and_then(DecodedArg::as_bytes)
                .cloned()
                .unwrap_or_default();
            f(&bytes)
        });
        Self {
            name: name.into(),
            target,
            format: PayloadFormat::Binary,
            decoder: Decoder::Binary,
        }
    }

    /// Handler taking the whole JSON document deserialized into `T`.
    ///
    /// A payload that parses as JSON but does not match `T` is reported as an
    /// invocation failure for this handler; other handlers are unaffected.
    pub fn json<T, S, F>(name: S, f: F) -> Self
    where
        T: serde::de::DeserializeOwned,
        S: Into<String>,
        F: Fn(T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let target: Arc<HandlerFn> = Arc::new(move |args| {
            let value = args
                .first()
                .and_then(DecodedArg::as_json)
                .cloned()
                .unwrap_or(Value::Null);
            let typed: T = serde_json::from_value(value)?;
            f(typed)
        });
        Self {
            name: name.into(),
            target,
            format: PayloadFormat::JsonWhole,
            decoder: Decoder::JsonWhole,
        }
    }

    /// Handler taking one JSON value per bound field, in declared order
    pub fn json_fields<S, F>(name: S, fields: &[&str], f: F) -> Self
    where
        S: Into<String>,
        F: Fn(&[Value]) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let bindings: Vec<FieldBinding> = fields.iter().map(|f| FieldBinding::new(*f)).collect();
        let target: Arc<HandlerFn> = Arc::new(move |args| {
            let values: Vec<Value> = args
                .iter()
                .map(|a| a.as_json().cloned().unwrap_or(Value::Null))
                .collect();
            f(&values)
        });
        Self {
            name: name.into(),
            target,
            format: PayloadFormat::JsonFields,
            decoder: Decoder::JsonFields(bindings),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Invoke the target with already-decoded arguments.
    ///
    /// The caller owns failure containment; this neither logs nor catches.
    pub fn invoke(&self, args: &[DecodedArg]) -> Result<(), HandlerError> {
        (self.target)(args)
    }

    /// Stable identity of the callable, independent of descriptor clones
    fn target_addr(&self) -> usize {
        Arc::as_ptr(&self.target) as *const () as usize
    }
}

impl PartialEq for HandlerDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.target_addr() == other.target_addr() && self.format == other.format
    }
}

impl Eq for HandlerDescriptor {}

impl Hash for HandlerDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target_addr().hash(state);
        self.format.hash(state);
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("decoder", &self.decoder)
            .finish_non_exhaustive()
    }
}

/// One entry of a handler registration list.
///
/// This is the raw shape produced by whatever discovers handlers in the
/// embedding application (explicit calls, config files, code generation);
/// `into_descriptor` resolves it or rejects it as a whole.
pub struct Registration {
    pub topic: String,
    pub name: String,
    pub format: PayloadFormat,
    pub params: Vec<Option<FieldBinding>>,
    pub target: Arc<HandlerFn>,
}

impl Registration {
    pub fn into_descriptor(self) -> Result<(String, HandlerDescriptor), MomError> {
        let descriptor = HandlerDescriptor::new(self.name, self.format, &self.params, self.target)?;
        Ok((self.topic, descriptor))
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("topic", &self.topic)
            .field("name", &self.name)
            .field("format", &self.format)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn noop_target() -> Arc<HandlerFn> {
        Arc::new(|_args| Ok(()))
    }

    #[test]
    fn test_equal_when_same_target_and_format() {
        let target = noop_target();
        let a = HandlerDescriptor::new("a", PayloadFormat::Text, &[None], target.clone()).unwrap();
        let b = HandlerDescriptor::new("b", PayloadFormat::Text, &[None], target).unwrap();

        // Name is diagnostics only; identity is target + format.
        assert_eq!(a, b);
    }

    #[test]
    fn test_not_equal_when_format_differs() {
        let target = noop_target();
        let text =
            HandlerDescriptor::new("h", PayloadFormat::Text, &[None], target.clone()).unwrap();
        let binary = HandlerDescriptor::new("h", PayloadFormat::Binary, &[None], target).unwrap();

        assert_ne!(text, binary);
    }

    #[test]
    fn test_not_equal_when_target_differs() {
        let a = HandlerDescriptor::new("h", PayloadFormat::Text, &[None], noop_target()).unwrap();
        let b = HandlerDescriptor::new("h", PayloadFormat::Text, &[None], noop_target()).unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn test_clone_preserves_identity() {
        let a = HandlerDescriptor::text("h", |_| Ok(()));
        let b = a.clone();

        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_partial_binding_fails_construction() {
        let result = HandlerDescriptor::new(
            "partial",
            PayloadFormat::JsonFields,
            &[Some(FieldBinding::new("a")), None],
            noop_target(),
        );

        assert!(matches!(result, Err(MomError::InvalidBinding { .. })));
    }

    #[test]
    fn test_text_constructor_invokes_with_payload_text() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let descriptor = HandlerDescriptor::text("capture", move |text| {
            seen_clone.lock().unwrap().push(text.to_string());
            Ok(())
        });

        let args = descriptor
            .decoder()
            .decode(&Bytes::from_static(b"21.5"))
            .unwrap()
            .unwrap();
        descriptor.invoke(&args).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["21.5".to_string()]);
    }

    #[test]
    fn test_json_constructor_deserializes_into_type() {
        #[derive(serde::Deserialize)]
        struct Reading {
            value: f64,
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let descriptor = HandlerDescriptor::json("reading", move |r: Reading| {
            seen_clone.lock().unwrap().push(r.value);
            Ok(())
        });

        let args = descriptor
            .decoder()
            .decode(&Bytes::from_static(br#"{"value":3.25}"#))
            .unwrap()
            .unwrap();
        descriptor.invoke(&args).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![3.25]);
    }

    #[test]
    fn test_json_constructor_type_mismatch_is_invocation_error() {
        #[derive(serde::Deserialize)]
        struct Reading {
            #[allow(dead_code)]
            value: f64,
        }

        let descriptor = HandlerDescriptor::json("reading", |_r: Reading| Ok(()));

        let args = descriptor
            .decoder()
            .decode(&Bytes::from_static(br#"{"other":true}"#))
            .unwrap()
            .unwrap();
        let result = descriptor.invoke(&args);

        assert!(result.is_err());
    }

    #[test]
    fn test_json_fields_constructor_orders_values() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let descriptor = HandlerDescriptor::json_fields("move", &["x", "y"], move |values| {
            seen_clone.lock().unwrap().extend_from_slice(values);
            Ok(())
        });

        let args = descriptor
            .decoder()
            .decode(&Bytes::from_static(br#"{"y":2,"x":1}"#))
            .unwrap()
            .unwrap();
        descriptor.invoke(&args).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![serde_json::json!(1), serde_json::json!(2)]
        );
    }

    #[test]
    fn test_registration_into_descriptor() {
        let registration = Registration {
            topic: "sensors/kitchen".to_string(),
            name: "kitchen".to_string(),
            format: PayloadFormat::JsonFields,
            params: vec![Some(FieldBinding::new("temp"))],
            target: noop_target(),
        };

        let (topic, descriptor) = registration.into_descriptor().unwrap();

        assert_eq!(topic, "sensors/kitchen");
        assert_eq!(descriptor.format(), PayloadFormat::JsonFields);
        assert_eq!(descriptor.decoder().arity(), 1);
    }

    #[test]
    fn test_registration_partial_binding_rejected() {
        let registration = Registration {
            topic: "sensors/kitchen".to_string(),
            name: "kitchen".to_string(),
            format: PayloadFormat::JsonFields,
            params: vec![Some(FieldBinding::new("temp")), None],
            target: noop_target(),
        };

        assert!(matches!(
            registration.into_descriptor(),
            Err(MomError::InvalidBinding { .. })
        ));
    }
}
