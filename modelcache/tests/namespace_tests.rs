//! Key generator namespacing.

use modelcache::{key_group, KeyNamespace};

key_group! {
    struct CacheKey;

    fn key_of_test_cache_key(id: u64) -> String {
        format!("{}_v1", id)
    }

    fn unrelated(id: u64) -> String {
        format!("raw_{}", id)
    }
}

mod artists {
    modelcache::key_group! {
        pub struct CacheKey;

        pub fn key_of_test_cache_key(id: u64) -> String {
            format!("{}_v1", id)
        }
    }
}

#[test]
fn test_cache_decorator() {
    assert_eq!(
        CacheKey::key_of_test_cache_key(1),
        "namespace_tests.test_cache_key.1_v1"
    );
}

#[test]
fn test_non_matching_functions_are_untouched() {
    assert_eq!(CacheKey::unrelated(1), "raw_1");
}

#[test]
fn test_same_short_name_in_another_scope_differs() {
    let here = CacheKey::key_of_test_cache_key(1);
    let there = artists::CacheKey::key_of_test_cache_key(1);
    assert_ne!(here, there);
    assert_eq!(there, "namespace_tests.artists.test_cache_key.1_v1");
}

#[test]
fn test_wrapped_generator_matches_macro() {
    let generator = KeyNamespace::new(module_path!())
        .wrap("key_of_test_cache_key", |id: u64| format!("{}_v1", id));
    assert_eq!(generator.key(1), CacheKey::key_of_test_cache_key(1));
    assert_eq!(generator.key(1), generator.key(1));
}
