//! Allowlisted passthrough to native cache store commands.
//!
//! Only commands named in the [`CommandAllowlist`] can be reached. The
//! allowlist is shared and may be extended or narrowed at runtime; every
//! guard and clone holding it sees the change immediately.
//!
//! Resolution distinguishes two failures:
//! - [`CommandError::NotSupported`]: the name is not allowlisted
//! - [`CommandError::NotImplemented`]: allowlisted, but the backend has no handler

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use modelcache_core::{CacheConfig, CacheResult, CommandError, Scalar};
use tracing::{trace, warn};

use super::traits::{NativeCommands, Reply};

/// Shared, runtime-mutable set of exposed command names.
///
/// Names are stored lowercase in insertion order.
#[derive(Debug, Clone, Default)]
pub struct CommandAllowlist {
    names: Arc<RwLock<Vec<String>>>,
}

impl CommandAllowlist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowlist = Self::default();
        for name in names {
            allowlist.push(name.as_ref());
        }
        allowlist
    }

    /// Allowlist configured by `config.supported_commands`.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(&config.supported_commands)
    }

    /// Expose another command. Returns false if it was already present.
    pub fn push(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return false;
        }
        let mut names = self.write();
        if names.contains(&name) {
            false
        } else {
            names.push(name);
            true
        }
    }

    /// Stop exposing a command. Returns true if it was present.
    pub fn remove(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        let mut names = self.write();
        let before = names.len();
        names.retain(|n| *n != name);
        names.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        self.read().contains(&name)
    }

    /// Snapshot of the allowlisted names.
    pub fn names(&self) -> Vec<String> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Every mutation is a single push or retain, so a panicking holder
    // cannot leave the list half-updated.
    fn read(&self) -> RwLockReadGuard<'_, Vec<String>> {
        match self.names.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("command allowlist lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<String>> {
        match self.names.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("command allowlist lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Resolves allowlisted command names against a backend.
pub struct CommandGuard<C: NativeCommands> {
    allowlist: CommandAllowlist,
    client: Arc<C>,
}

impl<C: NativeCommands> Clone for CommandGuard<C> {
    fn clone(&self) -> Self {
        Self {
            allowlist: self.allowlist.clone(),
            client: Arc::clone(&self.client),
        }
    }
}

impl<C: NativeCommands> CommandGuard<C> {
    pub fn new(allowlist: CommandAllowlist, client: Arc<C>) -> Self {
        Self { allowlist, client }
    }

    pub fn allowlist(&self) -> &CommandAllowlist {
        &self.allowlist
    }

    /// Resolve `name` to a callable command.
    pub fn command(&self, name: &str) -> CacheResult<BoundCommand<'_, C>> {
        let name = name.trim().to_lowercase();

        if !self.allowlist.contains(&name) {
            trace!(command = %name, "command rejected: not allowlisted");
            return Err(CommandError::NotSupported { command: name }.into());
        }
        if !self.client.implements(&name) {
            trace!(command = %name, "command rejected: backend has no handler");
            return Err(CommandError::NotImplemented { command: name }.into());
        }

        Ok(BoundCommand {
            name,
            client: &self.client,
        })
    }

    /// Resolve and invoke `name` in one step.
    pub async fn call(&self, name: &str, args: &[Scalar]) -> CacheResult<Reply> {
        self.command(name)?.call(args).await
    }
}

/// A resolved command bound to its backend.
pub struct BoundCommand<'a, C: NativeCommands> {
    name: String,
    client: &'a Arc<C>,
}

impl<C: NativeCommands> BoundCommand<'_, C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the command. Arguments and reply pass through unchanged.
    pub async fn call(&self, args: &[Scalar]) -> CacheResult<Reply> {
        trace!(command = %self.name, args = args.len(), "dispatching native command");
        self.client.execute(&self.name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use modelcache_core::CacheError;

    struct EchoClient;

    #[async_trait]
    impl NativeCommands for EchoClient {
        fn implements(&self, command: &str) -> bool {
            matches!(command, "echo" | "scard")
        }

        async fn execute(&self, _command: &str, args: &[Scalar]) -> CacheResult<Reply> {
            Ok(Reply::Int(args.len() as i64))
        }
    }

    fn guard(names: &[&str]) -> CommandGuard<EchoClient> {
        CommandGuard::new(CommandAllowlist::new(names), Arc::new(EchoClient))
    }

    #[test]
    fn test_allowlist_is_lowercase_and_deduplicated() {
        let allowlist = CommandAllowlist::new(["SCARD", "scard", " echo "]);
        assert_eq!(allowlist.names(), vec!["scard".to_string(), "echo".to_string()]);
        assert!(allowlist.contains("Echo"));
        assert!(!allowlist.push("ECHO"));
        assert!(allowlist.remove("echo"));
        assert!(!allowlist.contains("echo"));
    }

    #[test]
    fn test_allowlist_is_shared_between_clones() {
        let allowlist = CommandAllowlist::default();
        let other = allowlist.clone();
        other.push("hstrlen");
        assert!(allowlist.contains("hstrlen"));
    }

    #[test]
    fn test_allowlist_survives_poisoned_lock() {
        let allowlist = CommandAllowlist::new(["scard"]);
        let names = Arc::clone(&allowlist.names);
        let result = std::thread::spawn(move || {
            let _guard = names.write().expect("lock should be free");
            panic!("holder panics");
        })
        .join();
        assert!(result.is_err());
        assert!(allowlist.names.is_poisoned());

        assert!(allowlist.contains("scard"));
        assert!(allowlist.push("hstrlen"));
        assert_eq!(allowlist.len(), 2);
        assert!(allowlist.remove("scard"));
    }

    #[tokio::test]
    async fn test_allowlisted_command_resolves_after_poisoned_lock() {
        let guard = guard(&["echo"]);
        let names = Arc::clone(&guard.allowlist().names);
        let _ = std::thread::spawn(move || {
            let _guard = names.write().expect("lock should be free");
            panic!("holder panics");
        })
        .join();

        let reply = guard.call("echo", &[]).await.expect("echo should resolve");
        assert_eq!(reply, Reply::Int(0));
    }

    #[tokio::test]
    async fn test_unlisted_command_is_not_supported() {
        let guard = guard(&["scard"]);
        let err = guard.call("tests", &[]).await.unwrap_err();
        assert_eq!(
            err,
            CacheError::Command(CommandError::NotSupported {
                command: "tests".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_listed_but_unhandled_command_is_not_implemented() {
        let guard = guard(&["scard"]);
        guard.allowlist().push("hstrlen");
        let err = guard.call("hstrlen", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::Command(CommandError::NotImplemented { .. })
        ));
    }

    #[tokio::test]
    async fn test_bound_command_passes_args_through() {
        let guard = guard(&["echo"]);
        let command = guard.command("ECHO").expect("echo should resolve");
        assert_eq!(command.name(), "echo");
        let reply = command
            .call(&[Scalar::from("a"), Scalar::from(1i64)])
            .await
            .expect("call should succeed");
        assert_eq!(reply, Reply::Int(2));
    }
}
