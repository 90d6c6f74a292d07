//! Service provider and method tables.
//!
//! A service is a named table of methods. Each method is keyed by its name and
//! the declared parameter types, so overloads with the same name coexist.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use relayrpc_common::protocol::error::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A method handler working on raw argument values.
pub type Handler = Arc<dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync>;

/// Method name plus declared parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub method: String,
    pub param_types: Vec<String>,
}

impl MethodKey {
    pub fn new(method: impl Into<String>, param_types: &[&str]) -> Self {
        Self {
            method: method.into(),
            param_types: param_types.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.method, self.param_types.join(", "))
    }
}

/// The methods exposed under one interface name.
///
/// # Example
///
/// ```
/// use relayrpc_server::ServiceDefinition;
///
/// let calculator = ServiceDefinition::new("Calculator")
///     .method2("add", ["i64", "i64"], |a: i64, b: i64| Ok::<_, String>(a + b))
///     .method1("negate", "i64", |a: i64| Ok::<_, String>(-a));
///
/// assert_eq!(calculator.method_count(), 2);
/// ```
pub struct ServiceDefinition {
    name: String,
    methods: HashMap<MethodKey, Handler>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a method taking raw argument values.
    ///
    /// Registering the same name and parameter types twice replaces the
    /// earlier handler.
    pub fn method<F>(mut self, name: &str, param_types: &[&str], handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.methods
            .insert(MethodKey::new(name, param_types), Arc::new(handler));
        self
    }

    /// Adds a method without parameters.
    pub fn method0<R, E, F>(self, name: &str, handler: F) -> Self
    where
        R: Serialize,
        E: fmt::Display,
        F: Fn() -> std::result::Result<R, E> + Send + Sync + 'static,
    {
        self.method(name, &[], move |_args| {
            let result = handler().map_err(handler_error)?;
            Ok(serde_json::to_value(result)?)
        })
    }

    /// Adds a method with one parameter of declared type `param_type`.
    pub fn method1<A, R, E, F>(self, name: &str, param_type: &str, handler: F) -> Self
    where
        A: DeserializeOwned,
        R: Serialize,
        E: fmt::Display,
        F: Fn(A) -> std::result::Result<R, E> + Send + Sync + 'static,
    {
        self.method(name, &[param_type], move |args| {
            let [a] = take_args::<1>(args)?;
            let result = handler(decode_arg(a, 0)?).map_err(handler_error)?;
            Ok(serde_json::to_value(result)?)
        })
    }

    /// Adds a method with two parameters.
    pub fn method2<A, B, R, E, F>(self, name: &str, param_types: [&str; 2], handler: F) -> Self
    where
        A: DeserializeOwned,
        B: DeserializeOwned,
        R: Serialize,
        E: fmt::Display,
        F: Fn(A, B) -> std::result::Result<R, E> + Send + Sync + 'static,
    {
        self.method(name, &param_types, move |args| {
            let [a, b] = take_args::<2>(args)?;
            let result = handler(decode_arg(a, 0)?, decode_arg(b, 1)?).map_err(handler_error)?;
            Ok(serde_json::to_value(result)?)
        })
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Returns the registered method keys, sorted for stable output.
    pub fn methods(&self) -> Vec<&MethodKey> {
        let mut keys: Vec<&MethodKey> = self.methods.keys().collect();
        keys.sort_by(|a, b| {
            a.method
                .cmp(&b.method)
                .then_with(|| a.param_types.cmp(&b.param_types))
        });
        keys
    }

    /// Looks up the handler for `method` with exactly `param_types`.
    pub fn handler(&self, method: &str, param_types: &[String]) -> Result<Handler> {
        let key = MethodKey {
            method: method.to_string(),
            param_types: param_types.to_vec(),
        };
        self.methods.get(&key).cloned().ok_or_else(|| {
            RpcError::MethodNotFound(format!("{}.{}", self.name, key))
        })
    }

    /// Invokes a method directly on the calling thread.
    pub fn invoke(&self, method: &str, param_types: &[String], args: Vec<Value>) -> Result<Value> {
        let handler = self.handler(method, param_types)?;
        handler(args)
    }
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("methods", &self.methods())
            .finish()
    }
}

fn take_args<const N: usize>(args: Vec<Value>) -> Result<[Value; N]> {
    let got = args.len();
    args.try_into().map_err(|_| {
        RpcError::InvalidRequest(format!("expected {} arguments, got {}", N, got))
    })
}

fn decode_arg<T: DeserializeOwned>(value: Value, index: usize) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| RpcError::InvalidRequest(format!("argument {}: {}", index, e)))
}

fn handler_error<E: fmt::Display>(e: E) -> RpcError {
    RpcError::RemoteInvocation(e.to_string())
}

/// Local table of provided services, keyed by interface name.
#[derive(Default)]
pub struct ServiceProvider {
    services: RwLock<HashMap<String, Arc<ServiceDefinition>>>,
}

impl ServiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `service` available under its interface name.
    ///
    /// A second service with an already registered name is ignored.
    pub fn add_service_provider(&self, service: ServiceDefinition) {
        let mut services = self.services.write();
        if services.contains_key(service.name()) {
            tracing::warn!(service = service.name(), "service already registered, ignoring");
            return;
        }
        tracing::info!(
            service = service.name(),
            methods = service.method_count(),
            "registered service provider"
        );
        services.insert(service.name().to_string(), Arc::new(service));
    }

    pub fn get_service_provider(&self, name: &str) -> Result<Arc<ServiceDefinition>> {
        self.services
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RpcError::ServiceNotFound(name.to_string()))
    }

    /// Returns the provided interface names, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn types(ts: &[&str]) -> Vec<String> {
        ts.iter().map(|t| t.to_string()).collect()
    }

    fn calculator() -> ServiceDefinition {
        ServiceDefinition::new("Calculator")
            .method2("add", ["i64", "i64"], |a: i64, b: i64| Ok::<_, String>(a + b))
            .method2("add", ["string", "string"], |a: String, b: String| {
                Ok::<_, String>(format!("{}{}", a, b))
            })
            .method2("divide", ["i64", "i64"], |a: i64, b: i64| {
                if b == 0 {
                    Err("Division by zero")
                } else {
                    Ok(a / b)
                }
            })
            .method0("ping", || Ok::<_, String>("pong"))
    }

    #[test]
    fn test_overloads_resolved_by_param_types() {
        let calc = calculator();
        assert_eq!(
            calc.invoke("add", &types(&["i64", "i64"]), vec![json!(2), json!(3)])
                .unwrap(),
            json!(5)
        );
        assert_eq!(
            calc.invoke("add", &types(&["string", "string"]), vec![json!("a"), json!("b")])
                .unwrap(),
            json!("ab")
        );
    }

    #[test]
    fn test_method_not_found() {
        let calc = calculator();
        let err = calc
            .invoke("add", &types(&["double", "double"]), vec![json!(1.0), json!(2.0)])
            .unwrap_err();
        match err {
            RpcError::MethodNotFound(msg) => assert_eq!(msg, "Calculator.add(double, double)"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_handler_error_carries_message() {
        let calc = calculator();
        let err = calc
            .invoke("divide", &types(&["i64", "i64"]), vec![json!(1), json!(0)])
            .unwrap_err();
        assert!(matches!(err, RpcError::RemoteInvocation(ref m) if m == "Division by zero"));
    }

    #[test]
    fn test_wrong_arity_and_bad_argument() {
        let calc = calculator();
        let err = calc
            .invoke("add", &types(&["i64", "i64"]), vec![json!(1)])
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidRequest(_)));

        let err = calc
            .invoke("add", &types(&["i64", "i64"]), vec![json!("x"), json!(1)])
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidRequest(ref m) if m.starts_with("argument 0")));
    }

    #[test]
    fn test_method0_ignores_args() {
        let calc = calculator();
        assert_eq!(calc.invoke("ping", &[], vec![]).unwrap(), json!("pong"));
    }

    #[test]
    fn test_raw_method() {
        let service = ServiceDefinition::new("Echo")
            .method("echo", &["object"], |mut args| Ok(args.pop().unwrap_or(Value::Null)));
        assert_eq!(
            service
                .invoke("echo", &types(&["object"]), vec![json!({"k": [1, 2]})])
                .unwrap(),
            json!({"k": [1, 2]})
        );
    }

    #[test]
    fn test_methods_sorted() {
        let calc = calculator();
        let names: Vec<String> = calc.methods().iter().map(|k| k.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "add(i64, i64)",
                "add(string, string)",
                "divide(i64, i64)",
                "ping()",
            ]
        );
    }

    #[test]
    fn test_provider_lookup() {
        let provider = ServiceProvider::new();
        assert!(provider.is_empty());
        provider.add_service_provider(calculator());

        assert_eq!(provider.service_names(), vec!["Calculator".to_string()]);
        assert_eq!(provider.get_service_provider("Calculator").unwrap().name(), "Calculator");
        assert!(matches!(
            provider.get_service_provider("Missing"),
            Err(RpcError::ServiceNotFound(ref n)) if n == "Missing"
        ));
    }

    #[test]
    fn test_duplicate_service_ignored() {
        let provider = ServiceProvider::new();
        provider.add_service_provider(calculator());
        provider.add_service_provider(ServiceDefinition::new("Calculator"));

        assert_eq!(provider.len(), 1);
        assert_eq!(provider.get_service_provider("Calculator").unwrap().method_count(), 4);
    }
}
