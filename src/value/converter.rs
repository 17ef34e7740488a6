//! Value-object converters registered per column.
//!
//! A converter is resolved once, when it is registered on a repository, and
//! is then invoked uniformly whenever an entity column is read:
//!
//! - [`Converter::Construct`] builds a typed value object `T` from the raw
//!   value (read with [`Entity::get_as`](crate::Entity::get_as)).
//! - [`Converter::Apply`] maps the raw value to another [`Value`] (applied by
//!   [`Entity::get`](crate::Entity::get)).
//!
//! Both variants receive [`Value::Null`] when the column is absent and must
//! tolerate it.

use super::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type BuildFn = Arc<dyn Fn(&Value) -> Box<dyn Any + Send + Sync> + Send + Sync>;
type ApplyFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// How a raw column value is turned into what callers read.
#[derive(Clone)]
pub enum Converter {
    /// Construct a value object of a fixed type from the raw value
    Construct {
        type_name: &'static str,
        build: BuildFn,
    },
    /// Apply a function to the raw value
    Apply(ApplyFn),
}

impl Converter {
    /// Converter constructing `T` through its `From<Value>` implementation.
    pub fn construct<T>() -> Self
    where
        T: From<Value> + Any + Send + Sync,
    {
        Converter::Construct {
            type_name: std::any::type_name::<T>(),
            build: Arc::new(|raw: &Value| Box::new(T::from(raw.clone())) as Box<dyn Any + Send + Sync>),
        }
    }

    /// Converter applying `f` to the raw value.
    pub fn apply<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Converter::Apply(Arc::new(f))
    }

    pub(crate) fn apply_value(&self, raw: &Value) -> Option<Value> {
        match self {
            Converter::Apply(f) => Some(f(raw)),
            Converter::Construct { .. } => None,
        }
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Converter::Construct { type_name, .. } => {
                f.debug_tuple("Construct").field(type_name).finish()
            }
            Converter::Apply(_) => f.write_str("Apply(..)"),
        }
    }
}

/// Converters keyed by column name.
#[derive(Debug, Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<String, Converter>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, column: impl Into<String>, converter: Converter) {
        self.converters.insert(column.into(), converter);
    }

    pub fn get(&self, column: &str) -> Option<&Converter> {
        self.converters.get(column)
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Email(String);

    impl From<Value> for Email {
        fn from(v: Value) -> Self {
            Email(v.as_str().unwrap_or_default().to_lowercase())
        }
    }

    #[test]
    fn test_construct_builds_value_object() {
        let converter = Converter::construct::<Email>();
        match &converter {
            Converter::Construct { build, type_name } => {
                assert!(type_name.ends_with("Email"));
                let built = build(&Value::from("A@B.IO"));
                assert_eq!(built.downcast_ref::<Email>(), Some(&Email("a@b.io".into())));
            }
            Converter::Apply(_) => panic!("expected construct converter"),
        }
        assert_eq!(converter.apply_value(&Value::Null), None);
    }

    #[test]
    fn test_apply_tolerates_null() {
        let converter = Converter::apply(|raw| match raw {
            Value::Null => Value::from("n/a"),
            other => other.clone(),
        });
        assert_eq!(converter.apply_value(&Value::Null), Some(Value::from("n/a")));
        assert_eq!(converter.apply_value(&Value::Int(4)), Some(Value::Int(4)));
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ConverterRegistry::new();
        assert!(registry.is_empty());
        registry.register("email", Converter::construct::<Email>());
        assert!(registry.get("email").is_some());
        assert!(registry.get("name").is_none());
    }
}
