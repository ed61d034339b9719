use crate::archivable::{self, Archivable};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

type DecodeFn = fn(&[u8]) -> Option<Box<dyn Any + Send>>;
type EncodeFn = fn(&dyn Any) -> Option<Vec<u8>>;

/// Type-erased codec for one archivable type and sequences of it.
#[derive(Clone)]
pub struct TypeDescriptor {
    name: &'static str,
    value_type: TypeId,
    sequence_type: TypeId,
    decode_one: DecodeFn,
    decode_many: DecodeFn,
    encode_one: EncodeFn,
    encode_many: EncodeFn,
}

impl TypeDescriptor {
    pub fn of<T: Archivable>() -> Self {
        Self {
            name: T::type_name(),
            value_type: TypeId::of::<T>(),
            sequence_type: TypeId::of::<Vec<T>>(),
            decode_one: decode_one::<T>,
            decode_many: decode_many::<T>,
            encode_one: encode_one::<T>,
            encode_many: encode_many::<T>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value_type(&self) -> TypeId {
        self.value_type
    }

    pub fn sequence_type(&self) -> TypeId {
        self.sequence_type
    }

    /// Decode a single value; the box holds a `T`.
    pub fn decode_one(&self, bytes: &[u8]) -> Option<Box<dyn Any + Send>> {
        (self.decode_one)(bytes)
    }

    /// Decode a sequence; the box holds a `Vec<T>`.
    pub fn decode_many(&self, bytes: &[u8]) -> Option<Box<dyn Any + Send>> {
        (self.decode_many)(bytes)
    }

    pub fn encode_one(&self, value: &dyn Any) -> Option<Vec<u8>> {
        (self.encode_one)(value)
    }

    pub fn encode_many(&self, values: &dyn Any) -> Option<Vec<u8>> {
        (self.encode_many)(values)
    }
}

impl Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .finish()
    }
}

fn decode_one<T: Archivable>(bytes: &[u8]) -> Option<Box<dyn Any + Send>> {
    match T::unarchive(bytes) {
        Ok(value) => Some(Box::new(value)),
        Err(e) => {
            tracing::debug!("Payload does not decode as '{}': {}", T::type_name(), e);
            None
        }
    }
}

fn decode_many<T: Archivable>(bytes: &[u8]) -> Option<Box<dyn Any + Send>> {
    match archivable::unarchive_many::<T>(bytes) {
        Ok(values) => Some(Box::new(values)),
        Err(e) => {
            tracing::debug!("Payload does not decode as '[{}]': {}", T::type_name(), e);
            None
        }
    }
}

fn encode_one<T: Archivable>(value: &dyn Any) -> Option<Vec<u8>> {
    value.downcast_ref::<T>()?.archive().ok()
}

fn encode_many<T: Archivable>(values: &dyn Any) -> Option<Vec<u8>> {
    archivable::archive_many(values.downcast_ref::<Vec<T>>()?).ok()
}

/// Outcome of asking a resolver about an identifier.
pub enum Resolution {
    Found(TypeDescriptor),
    NotFound,
}

/// Fallback consulted when an identifier is missing from the eager mapping.
pub trait TypeResolver: Send + Sync {
    fn resolve(&self, type_id: &str) -> Resolution;
}

impl<F> TypeResolver for F
where
    F: Fn(&str) -> Resolution + Send + Sync,
{
    fn resolve(&self, type_id: &str) -> Resolution {
        self(type_id)
    }
}

/// Resolver backed by descriptor thunks that are only built when first asked for.
#[derive(Default)]
pub struct LazyLoader {
    loaders: RwLock<HashMap<String, fn() -> TypeDescriptor>>,
}

impl LazyLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_loader(&self, type_id: impl Into<String>, loader: fn() -> TypeDescriptor) {
        self.loaders.write().insert(type_id.into(), loader);
    }
}

impl TypeResolver for LazyLoader {
    fn resolve(&self, type_id: &str) -> Resolution {
        match self.loaders.read().get(type_id) {
            Some(loader) => Resolution::Found(loader()),
            None => Resolution::NotFound,
        }
    }
}

/// Identifiers must be non-empty and must not contain the sequence brackets.
pub fn is_valid_identifier(type_id: &str) -> bool {
    !type_id.trim().is_empty() && !type_id.contains(['[', ']'])
}

/// A descriptor together with the identifier it was registered under.
type Registration = (String, Arc<TypeDescriptor>);

#[derive(Default)]
struct Tables {
    by_name: HashMap<String, Arc<TypeDescriptor>>,
    by_type: HashMap<TypeId, Registration>,
}

impl Tables {
    fn insert(&mut self, type_id: String, descriptor: Arc<TypeDescriptor>) {
        if let Some(replaced) = self.by_name.insert(type_id.clone(), descriptor.clone()) {
            if self
                .by_type
                .get(&replaced.value_type())
                .is_some_and(|(name, _)| *name == type_id)
            {
                self.by_type.remove(&replaced.value_type());
                self.by_type.remove(&replaced.sequence_type());
                // Another identifier may still name the replaced type
                if let Some((name, other)) = self
                    .by_name
                    .iter()
                    .find(|(_, d)| d.value_type() == replaced.value_type())
                    .map(|(name, d)| (name.clone(), d.clone()))
                {
                    self.link(name, other);
                }
            }
        }
        self.link(type_id, descriptor);
    }

    fn link(&mut self, type_id: String, descriptor: Arc<TypeDescriptor>) {
        self.by_type
            .insert(descriptor.sequence_type(), (type_id.clone(), descriptor.clone()));
        self.by_type.insert(descriptor.value_type(), (type_id, descriptor));
    }
}

/// Maps type identifiers to codecs, with a resolver chain for identifiers
/// nobody registered up front.
#[derive(Default)]
pub struct TypeRegistry {
    tables: RwLock<Tables>,
    resolvers: RwLock<Vec<Arc<dyn TypeResolver>>>,
}

static GLOBAL: Lazy<TypeRegistry> = Lazy::new(TypeRegistry::with_builtins);

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the primitive archivable types.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_type::<String>();
        registry.register_type::<bool>();
        registry.register_type::<i64>();
        registry.register_type::<u64>();
        registry.register_type::<f64>();
        registry
    }

    /// Process-wide registry used by archive coders unless one is passed explicitly.
    pub fn global() -> &'static TypeRegistry {
        &GLOBAL
    }

    /// Register a descriptor; the last registration for an identifier wins.
    pub fn register(&self, type_id: impl Into<String>, descriptor: TypeDescriptor) {
        let type_id = type_id.into();
        if !is_valid_identifier(&type_id) {
            tracing::warn!(
                "Refusing to register archival type '{}' ({}): identifier is unusable",
                type_id,
                descriptor.name()
            );
            return;
        }
        self.tables.write().insert(type_id, Arc::new(descriptor));
    }

    pub fn register_type<T: Archivable>(&self) {
        self.register(T::type_name(), TypeDescriptor::of::<T>());
    }

    /// Register `T` unless its identifier is already known.
    pub fn ensure_registered<T: Archivable>(&self) {
        if !self.contains(T::type_name()) {
            tracing::debug!("Auto-registering archival type '{}'", T::type_name());
            self.register_type::<T>();
        }
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.tables.read().by_name.contains_key(type_id)
    }

    pub fn add_resolver(&self, resolver: impl TypeResolver + 'static) {
        self.resolvers.write().push(Arc::new(resolver));
    }

    /// Look an identifier up, falling back to the resolver chain. A resolved
    /// descriptor is stored so each identifier is resolved at most once.
    pub fn resolve(&self, type_id: &str) -> Option<Arc<TypeDescriptor>> {
        if let Some(descriptor) = self.tables.read().by_name.get(type_id) {
            return Some(descriptor.clone());
        }
        if !is_valid_identifier(type_id) {
            return None;
        }

        // Resolvers run without any registry lock held.
        let resolvers: Vec<Arc<dyn TypeResolver>> = self.resolvers.read().clone();
        for resolver in resolvers {
            if let Resolution::Found(descriptor) = resolver.resolve(type_id) {
                let descriptor = Arc::new(descriptor);
                self.tables
                    .write()
                    .insert(type_id.to_string(), descriptor.clone());
                tracing::debug!("Resolved archival type '{}' lazily", type_id);
                return Some(descriptor);
            }
        }

        tracing::debug!("Archival type '{}' is not resolvable", type_id);
        None
    }

    /// Find the descriptor registered for a Rust value type or for `Vec` of it.
    pub fn descriptor_for(&self, type_id: TypeId) -> Option<Arc<TypeDescriptor>> {
        self.registration_for(type_id).map(|(_, descriptor)| descriptor)
    }

    /// Like [`descriptor_for`](Self::descriptor_for), also returning the
    /// identifier the type was registered under.
    pub fn registration_for(&self, type_id: TypeId) -> Option<(String, Arc<TypeDescriptor>)> {
        self.tables.read().by_type.get(&type_id).cloned()
    }
}

impl Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.tables.read().by_name.len())
            .field("resolvers", &self.resolvers.read().len())
            .finish()
    }
}
