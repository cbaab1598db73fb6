//! Name-keyed driver registry.
//!
//! Drivers are registered on a [`RegistryBuilder`] during start-up. Calling
//! [`RegistryBuilder::build`] consumes the builder and yields a [`Registry`]
//! that only supports lookups, so registration can never race a lookup.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::driver::DriverError;

/// Plain constructor stored per provider name.
pub type Constructor<D, C> = fn(&C) -> Result<Box<D>, DriverError>;

/// Errors raised while registering or resolving drivers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// Raised when a provider name is registered twice.
    #[error("{kind} driver {name} is already registered")]
    Duplicate {
        /// Registry kind, for example `storage`.
        kind: &'static str,
        /// Provider name.
        name: String,
    },
    /// Raised when no driver is registered under the requested name.
    #[error("{kind} driver {name} is not registered")]
    NotFound {
        /// Registry kind.
        kind: &'static str,
        /// Provider name.
        name: String,
    },
    /// Raised when the constructor itself fails.
    #[error("{kind} driver {name} failed to construct: {source}")]
    Driver {
        /// Registry kind.
        kind: &'static str,
        /// Provider name.
        name: String,
        /// Constructor failure.
        #[source]
        source: Box<DriverError>,
    },
}

/// Mutable registration phase of a registry.
pub struct RegistryBuilder<D: ?Sized, C> {
    kind: &'static str,
    constructors: BTreeMap<String, Constructor<D, C>>,
}

impl<D: ?Sized, C> RegistryBuilder<D, C> {
    /// Creates an empty builder labelled with `kind` for diagnostics.
    #[must_use]
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            constructors: BTreeMap::new(),
        }
    }

    /// Registers `constructor` under `name`, compared case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when the name is taken.
    pub fn register(
        &mut self,
        name: &str,
        constructor: Constructor<D, C>,
    ) -> Result<(), RegistryError> {
        let key = name.trim().to_lowercase();
        if self.constructors.contains_key(&key) {
            return Err(RegistryError::Duplicate {
                kind: self.kind,
                name: key,
            });
        }
        debug!(kind = self.kind, name = %key, "registered driver");
        self.constructors.insert(key, constructor);
        Ok(())
    }

    /// Seals the registry.
    #[must_use]
    pub fn build(self) -> Registry<D, C> {
        Registry {
            kind: self.kind,
            constructors: self.constructors,
        }
    }
}

/// Sealed, lookup-only registry.
pub struct Registry<D: ?Sized, C> {
    kind: &'static str,
    constructors: BTreeMap<String, Constructor<D, C>>,
}

impl<D: ?Sized, C> Registry<D, C> {
    /// Constructs a fresh driver instance registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown names and
    /// [`RegistryError::Driver`] when construction fails.
    pub fn lookup(&self, name: &str, context: &C) -> Result<Box<D>, RegistryError> {
        let key = name.trim().to_lowercase();
        let Some(constructor) = self.constructors.get(&key) else {
            return Err(RegistryError::NotFound {
                kind: self.kind,
                name: key,
            });
        };
        constructor(context).map_err(|source| RegistryError::Driver {
            kind: self.kind,
            name: key,
            source: Box::new(source),
        })
    }

    /// Returns `true` when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.trim().to_lowercase())
    }

    /// Registered provider names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl<D: ?Sized, C> fmt::Debug for Registry<D, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter {
        fn greet(&self) -> String;
    }

    struct Fixed(String);

    impl Greeter for Fixed {
        fn greet(&self) -> String {
            self.0.clone()
        }
    }

    struct Context {
        prefix: String,
    }

    fn context(prefix: &str) -> Context {
        Context {
            prefix: prefix.to_owned(),
        }
    }

    fn build_fixed(context: &Context) -> Result<Box<dyn Greeter>, DriverError> {
        Ok(Box::new(Fixed(format!("{}-fixed", context.prefix))))
    }

    fn build_failing(_: &Context) -> Result<Box<dyn Greeter>, DriverError> {
        Err(DriverError::Config(String::from("nope")))
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut builder = RegistryBuilder::<dyn Greeter, Context>::new("test");
        builder.register("Fixed", build_fixed).expect("register");
        let registry = builder.build();
        let greeter = registry
            .lookup("FIXED", &context("hi"))
            .expect("lookup");
        assert_eq!(greeter.greet(), "hi-fixed");
        assert!(registry.contains("fixed"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut builder = RegistryBuilder::<dyn Greeter, Context>::new("test");
        builder.register("fixed", build_fixed).expect("register");
        let err = builder
            .register("FIXED", build_fixed)
            .expect_err("duplicate");
        assert!(matches!(err, RegistryError::Duplicate { ref name, .. } if name == "fixed"));
    }

    #[test]
    fn unknown_name_is_not_found() {
        let registry = RegistryBuilder::<dyn Greeter, Context>::new("test").build();
        let Err(err) = registry.lookup("missing", &context("")) else {
            panic!("expected lookup to fail");
        };
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn constructor_failures_are_wrapped() {
        let mut builder = RegistryBuilder::<dyn Greeter, Context>::new("test");
        builder.register("broken", build_failing).expect("register");
        let registry = builder.build();
        let Err(err) = registry.lookup("broken", &context("")) else {
            panic!("expected constructor failure");
        };
        assert!(matches!(
            err,
            RegistryError::Driver { ref source, .. } if matches!(**source, DriverError::Config(_))
        ));
        assert_eq!(registry.names(), vec!["broken"]);
    }
}
