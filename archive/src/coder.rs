use crate::archivable::{self, Archivable};
use crate::registry::TypeRegistry;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use shared::{Error, Result};
use std::any::Any;
use std::fmt::{self, Debug, Display};

/// Parsed form of a stored type identifier: `T` or `[T]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Single(String),
    Array(String),
}

impl TypeTag {
    /// Strips exactly one bracket layer.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        match raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            Some("") => None,
            Some(inner) => Some(TypeTag::Array(inner.to_string())),
            None => Some(TypeTag::Single(raw.to_string())),
        }
    }

    pub fn element(&self) -> &str {
        match self {
            TypeTag::Single(name) | TypeTag::Array(name) => name,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeTag::Array(_))
    }
}

impl Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Single(name) => write!(f, "{}", name),
            TypeTag::Array(name) => write!(f, "[{}]", name),
        }
    }
}

/// Result of decoding through the identifier path.
pub enum Decoded {
    /// Holds a `T`.
    One(Box<dyn Any + Send>),
    /// Holds a `Vec<T>`.
    Many(Box<dyn Any + Send>),
}

impl Debug for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoded::One(_) => f.write_str("Decoded::One(..)"),
            Decoded::Many(_) => f.write_str("Decoded::Many(..)"),
        }
    }
}

/// Binary payload plus the identifier needed to rebuild the value it came from.
///
/// `payload` is `None` only when there was no value; `type_id` is `None` when
/// the concrete type could not be determined, in which case decoding through
/// the identifier path always fails.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveCoder {
    payload: Option<ByteBuf>,
    type_id: Option<String>,
}

impl ArchiveCoder {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_parts(payload: Option<Vec<u8>>, type_id: Option<String>) -> Self {
        Self {
            payload: payload.map(ByteBuf::from),
            type_id,
        }
    }

    pub fn from_value<T: Archivable>(value: &T) -> Self {
        Self::from_value_in(TypeRegistry::global(), value)
    }

    /// Archive a single value, registering its type if nobody has yet.
    pub fn from_value_in<T: Archivable>(registry: &TypeRegistry, value: &T) -> Self {
        registry.ensure_registered::<T>();
        match value.archive() {
            Ok(bytes) => Self::from_parts(
                Some(bytes),
                Some(TypeTag::Single(T::type_name().to_string()).to_string()),
            ),
            Err(e) => {
                tracing::warn!("Failed to archive '{}': {}", T::type_name(), e);
                Self::empty()
            }
        }
    }

    pub fn from_option<T: Archivable>(value: Option<&T>) -> Self {
        value.map(Self::from_value).unwrap_or_default()
    }

    pub fn from_values<T: Archivable>(values: &[T]) -> Self {
        Self::from_values_in(TypeRegistry::global(), values)
    }

    /// Archive a homogeneous sequence as `[T]`.
    pub fn from_values_in<T: Archivable>(registry: &TypeRegistry, values: &[T]) -> Self {
        registry.ensure_registered::<T>();
        match archivable::archive_many(values) {
            Ok(bytes) => Self::from_parts(
                Some(bytes),
                Some(TypeTag::Array(T::type_name().to_string()).to_string()),
            ),
            Err(e) => {
                tracing::warn!("Failed to archive '[{}]': {}", T::type_name(), e);
                Self::empty()
            }
        }
    }

    pub fn from_any(value: &dyn Any) -> Self {
        Self::from_any_in(TypeRegistry::global(), value)
    }

    /// Archive a value whose concrete type is only known at runtime. Works for
    /// registered types and `Vec`s of them; anything else yields an empty record.
    pub fn from_any_in(registry: &TypeRegistry, value: &dyn Any) -> Self {
        let Some((name, descriptor)) = registry.registration_for(value.type_id()) else {
            tracing::debug!("No archival type registered for value, storing empty record");
            return Self::empty();
        };

        let (payload, tag) = if value.type_id() == descriptor.sequence_type() {
            (descriptor.encode_many(value), TypeTag::Array(name))
        } else {
            (descriptor.encode_one(value), TypeTag::Single(name))
        };

        match payload {
            Some(bytes) => Self::from_parts(Some(bytes), Some(tag.to_string())),
            None => Self::empty(),
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref().map(|b| b.as_slice())
    }

    pub fn type_id(&self) -> Option<&str> {
        self.type_id.as_deref()
    }

    pub fn tag(&self) -> Option<TypeTag> {
        self.type_id.as_deref().and_then(TypeTag::parse)
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }

    /// Decode the payload as one `T`, ignoring the stored identifier.
    pub fn value<T: Archivable>(&self) -> Option<T> {
        T::unarchive(self.payload()?).ok()
    }

    /// Decode the payload as a sequence of `T`, ignoring the stored identifier.
    pub fn values<T: Archivable>(&self) -> Option<Vec<T>> {
        archivable::unarchive_many(self.payload()?).ok()
    }

    pub fn decode(&self) -> Option<Decoded> {
        self.decode_with(TypeRegistry::global())
    }

    /// Decode through the stored identifier.
    pub fn decode_with(&self, registry: &TypeRegistry) -> Option<Decoded> {
        let payload = self.payload()?;
        let tag = self.tag()?;
        let descriptor = registry.resolve(tag.element())?;

        if tag.is_array() {
            descriptor.decode_many(payload).map(Decoded::Many)
        } else {
            descriptor.decode_one(payload).map(Decoded::One)
        }
    }

    pub fn decode_as<T: 'static>(&self) -> Option<T> {
        self.decode_as_with(TypeRegistry::global())
    }

    pub fn decode_as_with<T: 'static>(&self, registry: &TypeRegistry) -> Option<T> {
        match self.decode_with(registry)? {
            Decoded::One(value) => value.downcast::<T>().ok().map(|v| *v),
            Decoded::Many(_) => None,
        }
    }

    pub fn decode_many_as<T: 'static>(&self) -> Option<Vec<T>> {
        self.decode_many_as_with(TypeRegistry::global())
    }

    pub fn decode_many_as_with<T: 'static>(&self, registry: &TypeRegistry) -> Option<Vec<T>> {
        match self.decode_with(registry)? {
            Decoded::Many(values) => values.downcast::<Vec<T>>().ok().map(|v| *v),
            Decoded::One(_) => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| Error::Codec(format!("Failed to encode archive record: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| Error::Codec(format!("Failed to decode archive record: {}", e)))
    }
}

impl Debug for ArchiveCoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveCoder")
            .field("type_id", &self.type_id)
            .field("payload_len", &self.payload.as_ref().map(|p| p.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{LazyLoader, TypeDescriptor};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: u32,
        title: String,
    }
    crate::archivable!(Record => "Record");

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Orphan {
        note: String,
    }
    crate::archivable!(Orphan => "Orphan");

    fn records() -> Vec<Record> {
        (1..=3)
            .map(|id| Record {
                id,
                title: format!("record-{}", id),
            })
            .collect()
    }

    #[test]
    fn test_type_tag_parse() {
        assert_eq!(TypeTag::parse("Record"), Some(TypeTag::Single("Record".into())));
        assert_eq!(TypeTag::parse("[Record]"), Some(TypeTag::Array("Record".into())));
        assert_eq!(TypeTag::parse("[[Record]]"), Some(TypeTag::Array("[Record]".into())));
        assert_eq!(TypeTag::parse("[]"), None);
        assert_eq!(TypeTag::parse(""), None);
        assert_eq!(TypeTag::Array("Record".into()).to_string(), "[Record]");
    }

    #[test]
    fn test_single_value_round_trip() {
        let registry = TypeRegistry::new();
        let record = Record {
            id: 9,
            title: "nine".into(),
        };

        let coder = ArchiveCoder::from_value_in(&registry, &record);
        assert_eq!(coder.type_id(), Some("Record"));
        assert_eq!(coder.decode_as_with::<Record>(&registry), Some(record));
    }

    #[test]
    fn test_array_of_three_records() {
        let registry = TypeRegistry::new();
        let coder = ArchiveCoder::from_values_in(&registry, &records());

        assert_eq!(coder.type_id(), Some("[Record]"));
        let restored = coder.decode_many_as_with::<Record>(&registry).unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(restored, records());
    }

    #[test]
    fn test_encode_registers_type() {
        let registry = TypeRegistry::new();
        assert!(!registry.contains("Record"));

        let _ = ArchiveCoder::from_values_in(&registry, &records());
        assert!(registry.contains("Record"));
    }

    #[test]
    fn test_from_any_uses_registered_types() {
        let registry = TypeRegistry::new();
        registry.register_type::<Record>();

        let many = records();
        let single: &dyn Any = &many[0];
        let coder = ArchiveCoder::from_any_in(&registry, single);
        assert_eq!(coder.type_id(), Some("Record"));
        assert_eq!(coder.decode_as_with::<Record>(&registry), Some(records()[0].clone()));

        let coder = ArchiveCoder::from_any_in(&registry, &many);
        assert_eq!(coder.type_id(), Some("[Record]"));
        assert_eq!(coder.decode_many_as_with::<Record>(&registry), Some(records()));
    }

    #[test]
    fn test_from_any_writes_registered_alias() {
        let registry = TypeRegistry::new();
        registry.register("Entry", TypeDescriptor::of::<Record>());
        let record = records()[1].clone();

        let coder = ArchiveCoder::from_any_in(&registry, &record);
        assert_eq!(coder.type_id(), Some("Entry"));
        assert_eq!(coder.decode_as_with::<Record>(&registry), Some(record));

        let coder = ArchiveCoder::from_any_in(&registry, &records());
        assert_eq!(coder.type_id(), Some("[Entry]"));
        assert_eq!(coder.decode_many_as_with::<Record>(&registry), Some(records()));
    }

    #[test]
    fn test_from_any_after_alias_is_reassigned() {
        let registry = TypeRegistry::new();
        registry.register("Entry", TypeDescriptor::of::<Record>());
        registry.register("Entry", TypeDescriptor::of::<Orphan>());

        let coder = ArchiveCoder::from_any_in(&registry, &records()[0]);
        assert!(coder.is_empty());

        let orphan = Orphan { note: "kept".into() };
        let coder = ArchiveCoder::from_any_in(&registry, &orphan);
        assert_eq!(coder.type_id(), Some("Entry"));
        assert_eq!(coder.decode_as_with::<Orphan>(&registry), Some(orphan));
    }

    #[test]
    fn test_from_any_unknown_type_is_empty() {
        let registry = TypeRegistry::new();
        let coder = ArchiveCoder::from_any_in(&registry, &Orphan { note: "x".into() });
        assert!(coder.is_empty());
        assert!(coder.type_id().is_none());
        assert!(coder.decode_with(&registry).is_none());
    }

    #[test]
    fn test_unknown_identifier_decodes_to_none() {
        let writer = TypeRegistry::new();
        let reader = TypeRegistry::new();
        let coder = ArchiveCoder::from_value_in(&writer, &Orphan { note: "x".into() });

        assert!(coder.decode_with(&reader).is_none());
        assert!(coder.decode_as_with::<Orphan>(&reader).is_none());
    }

    #[test]
    fn test_explicit_type_skips_identifier() {
        let coder = ArchiveCoder::from_parts(
            Some(Orphan { note: "direct".into() }.archive().unwrap()),
            None,
        );
        assert!(coder.decode_with(&TypeRegistry::new()).is_none());
        assert_eq!(coder.value::<Orphan>(), Some(Orphan { note: "direct".into() }));

        let coder = ArchiveCoder::from_parts(Some(archivable::archive_many(&records()).unwrap()), None);
        assert_eq!(coder.values::<Record>(), Some(records()));
    }

    #[test]
    fn test_lazy_loader_resolves_on_decode() {
        let writer = TypeRegistry::new();
        let coder = ArchiveCoder::from_values_in(&writer, &records());

        let loader = LazyLoader::new();
        loader.register_loader("Record", TypeDescriptor::of::<Record>);
        let reader = TypeRegistry::new();
        reader.add_resolver(loader);

        assert_eq!(coder.decode_many_as_with::<Record>(&reader), Some(records()));
        assert!(reader.contains("Record"));
    }

    #[test]
    fn test_malformed_payload_is_none() {
        let registry = TypeRegistry::new();
        registry.register_type::<Record>();
        let coder = ArchiveCoder::from_parts(Some(vec![0xff, 0xff, 0x01]), Some("Record".into()));
        assert!(coder.decode_with(&registry).is_none());

        let coder = ArchiveCoder::from_parts(Some(vec![0x01]), Some("[Record]".into()));
        assert!(coder.decode_with(&registry).is_none());
    }

    #[test]
    fn test_missing_payload_is_none() {
        let coder = ArchiveCoder::from_option::<Record>(None);
        assert!(coder.is_empty());
        assert!(coder.decode().is_none());
        assert!(coder.value::<Record>().is_none());
    }

    #[test]
    fn test_shape_mismatch_is_none() {
        let registry = TypeRegistry::new();
        let coder = ArchiveCoder::from_values_in(&registry, &records());
        assert!(coder.decode_as_with::<Record>(&registry).is_none());
    }

    #[test]
    fn test_record_interchange_keeps_plain_identifier() {
        let coder = ArchiveCoder::from_values(&records());
        let restored = ArchiveCoder::from_bytes(&coder.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, coder);
        assert_eq!(restored.type_id(), Some("[Record]"));
        assert_eq!(restored.decode_many_as::<Record>(), Some(records()));
    }
}
