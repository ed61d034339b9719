use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_bytes::ByteBuf;
use shared::{Error, Result};

/// A value that knows how to turn itself into bytes and back.
///
/// `type_name` is the identifier written next to the payload, so it must stay
/// stable across builds for payloads to remain readable.
pub trait Archivable: Sized + Send + Sync + 'static {
    fn type_name() -> &'static str;

    fn archive(&self) -> Result<Vec<u8>>;

    fn unarchive(bytes: &[u8]) -> Result<Self>;
}

pub fn encode_bincode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Codec(format!("Failed to encode value: {}", e)))
}

pub fn decode_bincode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Codec(format!("Failed to decode value: {}", e)))
}

/// Archive every element on its own, then wrap the element payloads in a
/// single list encoding.
pub fn archive_many<T: Archivable>(values: &[T]) -> Result<Vec<u8>> {
    let units = values
        .iter()
        .map(|v| v.archive().map(ByteBuf::from))
        .collect::<Result<Vec<_>>>()?;
    encode_bincode(&units)
}

pub fn unarchive_many<T: Archivable>(bytes: &[u8]) -> Result<Vec<T>> {
    let units: Vec<ByteBuf> = decode_bincode(bytes)?;
    units.iter().map(|unit| T::unarchive(unit)).collect()
}

/// Implement [`Archivable`] for a serde type using the bincode encoding.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Profile { name: String }
/// archive::archivable!(Profile => "Profile");
/// ```
#[macro_export]
macro_rules! archivable {
    ($ty:ty => $name:expr) => {
        impl $crate::Archivable for $ty {
            fn type_name() -> &'static str {
                $name
            }

            fn archive(&self) -> $crate::Result<Vec<u8>> {
                $crate::archivable::encode_bincode(self)
            }

            fn unarchive(bytes: &[u8]) -> $crate::Result<Self> {
                $crate::archivable::decode_bincode(bytes)
            }
        }
    };
}

archivable!(String => "String");
archivable!(bool => "Bool");
archivable!(i64 => "Int");
archivable!(u64 => "UInt");
archivable!(f64 => "Double");
