// model = "claude-opus-4-5"
// created = 2026-02-02
// modified = 2026-02-03
// driver = "Isaac Clayton"

//! Value encoding for the replicated map.
//!
//! Stored values come in two kinds:
//!
//! - `Plain`: any JSON-equivalent payload. Round-trips through the wire
//!   and snapshot formats unchanged.
//! - `Shared`: a reference to another replicated object, carried on the
//!   wire as a locator string and materialized through the embedder's
//!   [`HandleResolver`].
//!
//! The wire shape keeps the kind as a plain string rather than a closed
//! enum so that an unrecognized kind arriving from a newer client is a
//! reportable error instead of a silent parse failure.

use serde::Deserialize;
use serde::Serialize;

use super::MapError;

/// Wire kind for JSON-equivalent payloads.
pub const KIND_PLAIN: &str = "Plain";

/// Wire kind for shared-object handles.
pub const KIND_SHARED: &str = "Shared";

/// A reference to another replicated object, identified by its locator.
///
/// The kernel treats handles as opaque identities; attaching, routing, and
/// lifetime all belong to the embedder behind [`HandleResolver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedHandle {
    /// Locator of the referenced object.
    pub url: String,
}

impl SharedHandle {
    /// Create a handle from its locator.
    pub fn new(url: impl Into<String>) -> SharedHandle {
        return SharedHandle { url: url.into() };
    }
}

/// A value as held in the local store.
#[derive(Clone, Debug, PartialEq)]
pub enum LocalValue {
    /// A JSON-equivalent payload.
    Plain(serde_json::Value),
    /// A handle to another replicated object.
    Shared(SharedHandle),
}

impl LocalValue {
    /// Wrap a JSON-equivalent payload.
    pub fn plain(value: impl Into<serde_json::Value>) -> LocalValue {
        return LocalValue::Plain(value.into());
    }

    /// Wrap a shared-object handle.
    pub fn shared(url: impl Into<String>) -> LocalValue {
        return LocalValue::Shared(SharedHandle::new(url));
    }

    /// Decode a wire value, materializing handles through `resolver`.
    ///
    /// An unrecognized kind fails the whole operation; the message is
    /// considered malformed.
    pub fn from_wire(
        wire: &SerializedValue,
        resolver: &dyn HandleResolver,
    ) -> Result<LocalValue, MapError> {
        match wire.kind.as_str() {
            KIND_PLAIN => {
                return Ok(LocalValue::Plain(wire.value.clone()));
            }
            KIND_SHARED => {
                let url = wire.value.as_str().ok_or(MapError::MalformedHandle)?;
                return Ok(LocalValue::Shared(resolver.resolve(url)?));
            }
            other => {
                return Err(MapError::UnknownValueKind(other.to_string()));
            }
        }
    }

    /// Encode for the wire or a snapshot, binding handles through
    /// `resolver`.
    pub fn to_wire(&self, resolver: &dyn HandleResolver) -> SerializedValue {
        match self {
            LocalValue::Plain(value) => {
                return SerializedValue {
                    kind: KIND_PLAIN.to_string(),
                    value: value.clone(),
                };
            }
            LocalValue::Shared(handle) => {
                return SerializedValue {
                    kind: KIND_SHARED.to_string(),
                    value: serde_json::Value::String(resolver.bind(handle)),
                };
            }
        }
    }
}

/// The wire and snapshot form of a stored value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedValue {
    /// Value kind: [`KIND_PLAIN`] or [`KIND_SHARED`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-dependent payload.
    pub value: serde_json::Value,
}

/// Materializes and binds shared-object handles.
///
/// Owned by the embedder; the kernel only calls through it when a value
/// of kind `Shared` crosses the wire or snapshot boundary.
pub trait HandleResolver {
    /// Materialize an inbound handle from its locator.
    fn resolve(&self, url: &str) -> Result<SharedHandle, MapError>;

    /// Produce the locator for an outbound handle, binding it to the
    /// session if the embedder requires that.
    fn bind(&self, handle: &SharedHandle) -> String;
}

/// Resolver that passes locators through untouched.
///
/// Suitable for detached replicas and tests, where handles never need to
/// be bound to a live session.
pub struct NoopResolver;

impl HandleResolver for NoopResolver {
    fn resolve(&self, url: &str) -> Result<SharedHandle, MapError> {
        return Ok(SharedHandle::new(url));
    }

    fn bind(&self, handle: &SharedHandle) -> String {
        return handle.url.clone();
    }
}
