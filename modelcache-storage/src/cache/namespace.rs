//! Scope-qualified key generators.
//!
//! Key generator functions follow the `key_of_<name>` convention. Wrapping
//! one in a [`KeyNamespace`] prefixes every key it returns with the dotted
//! path of the scope that defines it plus the short name, so two modules can
//! each define `key_of_summary` without their keys colliding:
//!
//! ```ignore
//! modelcache_storage::key_group! {
//!     pub struct AlbumKeys;
//!
//!     pub fn key_of_summary(id: u64) -> String {
//!         format!("{}_v1", id)
//!     }
//! }
//!
//! // "my_crate.albums.summary.7_v1" when declared in `my_crate::albums`
//! let key = AlbumKeys::key_of_summary(7);
//! ```

/// Name prefix that marks a function as a key generator.
pub const KEY_FN_PREFIX: &str = "key_of_";

/// Dotted namespace derived from a module path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyNamespace {
    path: String,
}

impl KeyNamespace {
    /// Create a namespace from a scope path such as `module_path!()`.
    ///
    /// `::` separators become dots.
    pub fn new(scope: &str) -> Self {
        Self {
            path: scope.replace("::", "."),
        }
    }

    /// The dotted path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Qualify a key produced by the function `fn_name`.
    ///
    /// Functions outside the `key_of_` convention get their key back untouched.
    pub fn qualify(&self, fn_name: &str, key: &str) -> String {
        match short_name(fn_name) {
            Some(short) => format!("{}.{}.{}", self.path, short, key),
            None => key.to_string(),
        }
    }

    /// Wrap a key generator so its output is qualified on every call.
    pub fn wrap<F>(&self, fn_name: &str, generator: F) -> KeyGenerator<F> {
        KeyGenerator {
            prefix: short_name(fn_name).map(|short| format!("{}.{}.", self.path, short)),
            generator,
        }
    }
}

fn short_name(fn_name: &str) -> Option<&str> {
    fn_name
        .strip_prefix(KEY_FN_PREFIX)
        .filter(|short| !short.is_empty())
}

/// A key generator bound to a namespace.
#[derive(Debug, Clone)]
pub struct KeyGenerator<F> {
    prefix: Option<String>,
    generator: F,
}

impl<F> KeyGenerator<F> {
    /// Produce the qualified key for `args`.
    pub fn key<A>(&self, args: A) -> String
    where
        F: Fn(A) -> String,
    {
        let key = (self.generator)(args);
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key,
        }
    }

    /// Whether the wrapped function follows the `key_of_` convention.
    pub fn is_namespaced(&self) -> bool {
        self.prefix.is_some()
    }
}

/// Declare a unit struct whose associated functions are namespaced key generators.
///
/// Every function body must evaluate to a `String`. Functions named
/// `key_of_<name>` have their result qualified with the calling module's path;
/// other functions are emitted unchanged.
#[macro_export]
macro_rules! key_group {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident;
        $(
            $(#[$fmeta:meta])*
            $fvis:vis fn $fname:ident ( $($arg:ident : $ty:ty),* $(,)? ) -> String $body:block
        )*
    ) => {
        $(#[$meta])*
        $vis struct $name;

        impl $name {
            $(
                $(#[$fmeta])*
                $fvis fn $fname($($arg: $ty),*) -> String {
                    let key: String = (|| -> String { $body })();
                    $crate::cache::KeyNamespace::new(module_path!())
                        .qualify(stringify!($fname), &key)
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    mod albums {
        crate::key_group! {
            pub struct Keys;

            pub fn key_of_summary(id: u64) -> String {
                format!("{}_v1", id)
            }

            pub fn plain(id: u64) -> String {
                format!("plain:{}", id)
            }
        }
    }

    mod artists {
        crate::key_group! {
            pub struct Keys;

            pub fn key_of_summary(id: u64) -> String {
                format!("{}_v1", id)
            }
        }
    }

    #[test]
    fn test_namespace_path_uses_dots() {
        let ns = KeyNamespace::new("app::cache_keys");
        assert_eq!(ns.path(), "app.cache_keys");
        assert_eq!(ns.qualify("key_of_test_cache_key", "1_v1"), "app.cache_keys.test_cache_key.1_v1");
    }

    #[test]
    fn test_non_matching_names_pass_through() {
        let ns = KeyNamespace::new("app");
        assert_eq!(ns.qualify("build_key", "raw"), "raw");
        assert_eq!(ns.qualify("key_of_", "raw"), "raw");
    }

    #[test]
    fn test_wrap_is_stable() {
        let ns = KeyNamespace::new("app::albums");
        let generator = ns.wrap("key_of_album", |id: u32| format!("{}_v1", id));
        assert!(generator.is_namespaced());
        assert_eq!(generator.key(4), "app.albums.album.4_v1");
        assert_eq!(generator.key(4), generator.key(4));

        let untouched = ns.wrap("helper", |id: u32| id.to_string());
        assert!(!untouched.is_namespaced());
        assert_eq!(untouched.key(4), "4");
    }

    #[test]
    fn test_key_group_qualifies_with_module_path() {
        let expected = format!(
            "{}.albums.summary.7_v1",
            module_path!().replace("::", ".")
        );
        assert_eq!(albums::Keys::key_of_summary(7), expected);
        assert_eq!(albums::Keys::plain(7), "plain:7");
    }

    #[test]
    fn test_same_short_name_in_different_scopes_differs() {
        assert_ne!(albums::Keys::key_of_summary(1), artists::Keys::key_of_summary(1));
    }
}
