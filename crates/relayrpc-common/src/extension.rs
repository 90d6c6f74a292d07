//! Named extension registry.
//!
//! Pluggable capabilities (serializers, load balancers, discovery backends)
//! are registered under a name and resolved by that name at runtime, usually
//! from configuration. Each `(capability, name)` pair is constructed at most
//! once, even when many tasks resolve it concurrently for the first time; all
//! callers share that instance.
//!
//! The registry is a plain value. A process can run several independently
//! configured runtimes side by side, each with its own registry.
//!
//! # Example
//!
//! ```
//! use relayrpc_common::extension::ExtensionRegistry;
//! use relayrpc_common::serialization::Serializer;
//!
//! let registry = ExtensionRegistry::with_defaults();
//! let serializer = registry.resolve::<dyn Serializer>("msgpack").unwrap();
//! assert_eq!(serializer.code(), 2);
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::discovery::{Discovery, StaticDiscovery};
use crate::protocol::{Result, RpcError};
use crate::serialization::{JsonSerializer, MsgPackSerializer, Serializer};

type Key = (TypeId, String);
type Instance = Box<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn() -> Instance + Send + Sync>;

#[derive(Default)]
pub struct ExtensionRegistry {
    factories: RwLock<HashMap<Key, Factory>>,
    instances: DashMap<Key, Arc<OnceLock<Instance>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the serializers and the in-memory discovery.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register::<dyn Serializer, _>("json", || Arc::new(JsonSerializer));
        registry.register::<dyn Serializer, _>("msgpack", || Arc::new(MsgPackSerializer));
        registry.register::<dyn Discovery, _>("memory", || Arc::new(StaticDiscovery::new()));
        registry
    }

    /// Registers a constructor for capability `T` under `name`.
    ///
    /// Registering a name again replaces the constructor and forgets any
    /// instance built by the previous one.
    pub fn register<T, F>(&self, name: &str, ctor: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        let key = (TypeId::of::<T>(), name.to_string());
        let factory: Factory = Arc::new(move || Box::new(ctor()) as Instance);

        self.factories.write().insert(key.clone(), factory);
        self.instances.remove(&key);
    }

    /// Registers an already built instance for capability `T` under `name`.
    pub fn register_instance<T>(&self, name: &str, instance: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register::<T, _>(name, move || instance.clone());
    }

    /// Returns the shared instance of capability `T` registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::UnknownExtension`] if nothing is registered.
    pub fn resolve<T>(&self, name: &str) -> Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = (TypeId::of::<T>(), name.to_string());

        let factory = self
            .factories
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| RpcError::UnknownExtension {
                capability: type_name::<T>(),
                name: name.to_string(),
            })?;

        // Clone the cell out so the map shard is not locked while constructing.
        let cell = self
            .instances
            .entry(key)
            .or_insert_with(|| Arc::new(OnceLock::new()))
            .clone();

        let instance = cell.get_or_init(|| factory());
        instance
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or_else(|| RpcError::UnknownExtension {
                capability: type_name::<T>(),
                name: name.to_string(),
            })
    }

    /// Returns whether anything is registered for capability `T` under `name`.
    pub fn contains<T>(&self, name: &str) -> bool
    where
        T: ?Sized + 'static,
    {
        self.factories
            .read()
            .contains_key(&(TypeId::of::<T>(), name.to_string()))
    }

    /// Names registered for capability `T`, sorted.
    pub fn names<T>(&self) -> Vec<String>
    where
        T: ?Sized + 'static,
    {
        let type_id = TypeId::of::<T>();
        let mut names: Vec<String> = self
            .factories
            .read()
            .keys()
            .filter(|(id, _)| *id == type_id)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[test]
    fn test_defaults_are_registered() {
        let registry = ExtensionRegistry::with_defaults();
        assert_eq!(registry.names::<dyn Serializer>(), vec!["json", "msgpack"]);
        assert!(registry.contains::<dyn Discovery>("memory"));
        assert_eq!(registry.resolve::<dyn Serializer>("json").unwrap().code(), 1);
    }

    #[test]
    fn test_unknown_name() {
        let registry = ExtensionRegistry::with_defaults();
        let err = registry.resolve::<dyn Serializer>("kryo").err().unwrap();
        assert!(matches!(err, RpcError::UnknownExtension { ref name, .. } if name == "kryo"));
    }

    #[test]
    fn test_same_name_different_capability() {
        let registry = ExtensionRegistry::new();
        registry.register::<dyn Greeter, _>("json", || Arc::new(English));
        assert!(registry.resolve::<dyn Serializer>("json").is_err());
        assert_eq!(registry.resolve::<dyn Greeter>("json").unwrap().greet(), "hello");
    }

    #[test]
    fn test_resolve_returns_shared_instance() {
        let registry = ExtensionRegistry::with_defaults();
        let a = registry.resolve::<dyn Discovery>("memory").unwrap();
        let b = registry.resolve::<dyn Discovery>("memory").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_concurrent_first_resolve_constructs_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(ExtensionRegistry::new());
        {
            let built = built.clone();
            registry.register::<dyn Greeter, _>("slow", move || {
                built.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                Arc::new(English)
            });
        }

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.resolve::<dyn Greeter>("slow").unwrap())
            })
            .collect();
        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_reregister_replaces_instance() {
        let registry = ExtensionRegistry::new();
        let first: Arc<dyn Greeter> = Arc::new(English);
        registry.register_instance::<dyn Greeter>("g", first.clone());
        assert!(Arc::ptr_eq(&registry.resolve::<dyn Greeter>("g").unwrap(), &first));

        let second: Arc<dyn Greeter> = Arc::new(English);
        registry.register_instance::<dyn Greeter>("g", second.clone());
        assert!(Arc::ptr_eq(&registry.resolve::<dyn Greeter>("g").unwrap(), &second));
    }
}
