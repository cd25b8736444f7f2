//! Per-fiber key/value store
//!
//! Each fiber carries an [`Environment`] for the lifetime of one body.
//! Phase handlers use it to stash ambient state on Save and bring it back
//! on Restore; application code reaches it through the runtime.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// String-keyed heterogeneous map owned by a single fiber.
#[derive(Default)]
pub struct Environment {
    entries: HashMap<String, Box<dyn Any>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, returning whatever was there before.
    pub fn store<T: Any>(&mut self, key: impl Into<String>, value: T) -> Option<Box<dyn Any>> {
        self.entries.insert(key.into(), Box::new(value))
    }

    /// Borrow the value under `key` if present and of type `T`.
    pub fn load<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn load_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.entries.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Remove and return the value under `key`.
    ///
    /// An entry of a different type is left in place.
    pub fn take<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.entries.get(key).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        self.entries
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Box<dyn Any>> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_load() {
        let mut env = Environment::new();
        assert!(env.is_empty());
        assert!(env.store("depth", 3u32).is_none());
        assert_eq!(env.load::<u32>("depth"), Some(&3));
        assert!(env.load::<String>("depth").is_none());
        *env.load_mut::<u32>("depth").unwrap() += 1;
        assert_eq!(env.load::<u32>("depth"), Some(&4));
    }

    #[test]
    fn test_store_replaces() {
        let mut env = Environment::new();
        env.store("k", "one".to_string());
        let old = env.store("k", "two".to_string()).unwrap();
        assert_eq!(old.downcast_ref::<String>().unwrap(), "one");
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn test_take_checks_type() {
        let mut env = Environment::new();
        env.store("k", 9i64);
        assert!(env.take::<u8>("k").is_none());
        assert!(env.contains("k"));
        assert_eq!(env.take::<i64>("k"), Some(9));
        assert!(!env.contains("k"));
    }

    #[test]
    fn test_keys_sorted_in_debug() {
        let mut env = Environment::new();
        env.store("b", ());
        env.store("a", ());
        assert_eq!(env.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(format!("{:?}", env), r#"{"a", "b"}"#);
        env.clear();
        assert!(env.is_empty());
    }
}
