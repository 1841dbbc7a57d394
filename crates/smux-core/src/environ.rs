//! Owned environment-variable sets.
//!
//! A project owns an `Environ` that seeds the environment of sessions
//! created inside it. Entries are kept sorted by name so listings are
//! deterministic.

use std::collections::BTreeMap;

/// An ordered set of environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environ {
    vars: BTreeMap<String, String>,
}

impl Environ {
    /// Creates an empty environment set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable, replacing any existing value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Removes a variable.
    pub fn unset(&mut self, name: &str) {
        self.vars.remove(name);
    }

    /// Looks up a variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Copies every entry from `other` into this set, overwriting
    /// existing values.
    pub fn merge(&mut self, other: &Environ) {
        for (name, value) in &other.vars {
            self.vars.insert(name.clone(), value.clone());
        }
    }

    /// Iterates entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True if no variables are set.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_unset() {
        let mut env = Environ::new();
        env.set("PATH", "/usr/bin");
        assert_eq!(env.get("PATH"), Some("/usr/bin"));

        env.set("PATH", "/bin");
        assert_eq!(env.get("PATH"), Some("/bin"));

        env.unset("PATH");
        assert_eq!(env.get("PATH"), None);
    }

    #[test]
    fn test_merge_overwrites() {
        let mut base = Environ::new();
        base.set("A", "1");
        base.set("B", "2");

        let mut overlay = Environ::new();
        overlay.set("B", "3");
        overlay.set("C", "4");

        base.merge(&overlay);
        assert_eq!(base.get("A"), Some("1"));
        assert_eq!(base.get("B"), Some("3"));
        assert_eq!(base.get("C"), Some("4"));
    }

    #[test]
    fn test_iteration_is_name_ordered() {
        let mut env = Environ::new();
        env.set("ZZ", "");
        env.set("AA", "");
        let names: Vec<_> = env.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(names, vec!["AA", "ZZ"]);
    }
}
