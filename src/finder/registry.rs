use super::handlers::PrimitiveKind;
use crate::config::FinderConfig;
use crate::prelude::*;
use std::collections::BTreeMap;
use std::fmt;

/// glibc entry points a thread sits in while it waits, with and without the
/// internal aliases `.symtab` exposes.
pub const DEFAULT_BLOCKING_FUNCTIONS: &[(&str, PrimitiveKind)] = &[
    ("__GI___pthread_mutex_lock", PrimitiveKind::Mutex),
    ("___pthread_mutex_lock", PrimitiveKind::Mutex),
    ("__pthread_mutex_lock", PrimitiveKind::Mutex),
    ("pthread_mutex_lock", PrimitiveKind::Mutex),
    ("___pthread_mutex_timedlock", PrimitiveKind::Mutex),
    ("pthread_mutex_timedlock", PrimitiveKind::Mutex),
    ("pthread_mutex_clocklock", PrimitiveKind::Mutex),
    ("__GI___pthread_rwlock_wrlock", PrimitiveKind::RwlockWriter),
    ("___pthread_rwlock_wrlock", PrimitiveKind::RwlockWriter),
    ("__pthread_rwlock_wrlock", PrimitiveKind::RwlockWriter),
    ("pthread_rwlock_wrlock", PrimitiveKind::RwlockWriter),
    ("pthread_rwlock_timedwrlock", PrimitiveKind::RwlockWriter),
    ("pthread_rwlock_clockwrlock", PrimitiveKind::RwlockWriter),
    ("__GI___pthread_rwlock_rdlock", PrimitiveKind::RwlockReader),
    ("___pthread_rwlock_rdlock", PrimitiveKind::RwlockReader),
    ("__pthread_rwlock_rdlock", PrimitiveKind::RwlockReader),
    ("pthread_rwlock_rdlock", PrimitiveKind::RwlockReader),
    ("pthread_rwlock_timedrdlock", PrimitiveKind::RwlockReader),
    ("pthread_rwlock_clockrdlock", PrimitiveKind::RwlockReader),
    ("__libc_do_syscall", PrimitiveKind::Syscall),
    ("syscall", PrimitiveKind::Syscall),
];

/// Which function names count as blocking, and how each is handled.
///
/// Built once before a scan and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, PrimitiveKind>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        DEFAULT_BLOCKING_FUNCTIONS
            .iter()
            .fold(Self::empty(), |registry, (name, kind)| {
                registry.with(name, *kind)
            })
    }
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// The default registrations, adjusted by the user configuration.
    pub fn from_config(config: &FinderConfig) -> Self {
        let mut registry = Self::default();

        for name in &config.disabled_functions {
            if registry.handlers.remove(name).is_none() {
                warn!("Cannot disable {name}: it is not a known blocking function");
            }
        }
        for (name, kind) in &config.blocking_functions {
            if let Some(previous) = registry.handlers.insert(name.clone(), *kind) {
                debug!("Overriding {name}: {previous} -> {kind}");
            }
        }

        trace!("Blocking functions: {registry:?}");
        registry
    }

    pub fn with(mut self, name: &str, kind: PrimitiveKind) -> Self {
        self.handlers.insert(name.to_owned(), kind);
        self
    }

    pub fn get(&self, name: &str) -> Option<PrimitiveKind> {
        self.handlers.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, PrimitiveKind)> {
        self.handlers
            .iter()
            .map(|(name, kind)| (name.as_str(), *kind))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Display for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, kind) in self.iter() {
            writeln!(f, "{name} -> {kind}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_kind() {
        let registry = HandlerRegistry::default();
        assert_eq!(registry.len(), DEFAULT_BLOCKING_FUNCTIONS.len());
        for kind in PrimitiveKind::ALL {
            assert!(registry.iter().any(|(_, k)| k == kind), "{kind}");
        }
        assert_eq!(
            registry.get("___pthread_rwlock_rdlock"),
            Some(PrimitiveKind::RwlockReader)
        );
        assert_eq!(
            registry.get("__GI___pthread_rwlock_wrlock"),
            Some(PrimitiveKind::RwlockWriter)
        );
        assert_eq!(
            registry.get("__GI___pthread_rwlock_rdlock"),
            Some(PrimitiveKind::RwlockReader)
        );
        assert!(!registry.contains("__lll_lock_wait"));
    }

    #[test]
    fn test_from_config() {
        let config: FinderConfig = serde_yaml::from_str(
            r#"
blocking-functions:
  my_spin_lock: mutex
  syscall: rwlock-reader
disabled-functions:
  - __libc_do_syscall
  - not_registered
"#,
        )
        .unwrap();

        let registry = HandlerRegistry::from_config(&config);
        assert_eq!(registry.get("my_spin_lock"), Some(PrimitiveKind::Mutex));
        assert_eq!(registry.get("syscall"), Some(PrimitiveKind::RwlockReader));
        assert!(!registry.contains("__libc_do_syscall"));
        assert_eq!(registry.len(), DEFAULT_BLOCKING_FUNCTIONS.len());
    }

    #[test]
    fn test_display() {
        let registry = HandlerRegistry::empty()
            .with("syscall", PrimitiveKind::Syscall)
            .with("pthread_mutex_lock", PrimitiveKind::Mutex);
        insta::assert_snapshot!(registry.to_string(), @r"
        pthread_mutex_lock -> mutex
        syscall -> syscall
        ");
    }
}
