//! Render target provider seam
//!
//! A render target is the display surface (a buffer, optionally shown in a
//! window) that one component instance owns while it is mounted. Providers
//! live in the host integration; [`MemoryTargets`] keeps everything in memory.

use crate::error::RenderError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque handle to an allocated surface
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetHandle {
    pub id: u64,
    pub key: String,
}

/// Allocates and writes display surfaces keyed by an opaque id
#[async_trait]
pub trait RenderTarget: Send + Sync {
    /// Allocate a surface for `key`; a live key must be rejected
    async fn create(&self, key: &str) -> Result<TargetHandle, RenderError>;

    /// Replace the whole content of the surface
    async fn set_lines(&self, handle: &TargetHandle, lines: Vec<String>) -> Result<(), RenderError>;

    async fn close(&self, handle: &TargetHandle) -> Result<(), RenderError>;

    async fn exists(&self, key: &str) -> bool;
}

#[derive(Debug, Default)]
struct Surface {
    key: String,
    lines: Vec<String>,
    writes: u64,
}

/// In-memory render targets
#[derive(Debug)]
pub struct MemoryTargets {
    surfaces: Mutex<HashMap<u64, Surface>>,
    by_key: Mutex<HashMap<String, u64>>,
    next_id: AtomicU64,
    write_failure: Mutex<Option<String>>,
}

impl Default for MemoryTargets {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTargets {
    pub fn new() -> Self {
        Self {
            surfaces: Mutex::new(HashMap::new()),
            by_key: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            write_failure: Mutex::new(None),
        }
    }

    /// Current content of the surface allocated for `key`
    pub fn lines(&self, key: &str) -> Option<Vec<String>> {
        let id = *self.by_key.lock().get(key)?;
        self.surfaces.lock().get(&id).map(|s| s.lines.clone())
    }

    /// Number of full writes the surface for `key` has received
    pub fn write_count(&self, key: &str) -> u64 {
        let Some(id) = self.by_key.lock().get(key).copied() else {
            return 0;
        };
        self.surfaces.lock().get(&id).map_or(0, |s| s.writes)
    }

    pub fn len(&self) -> usize {
        self.surfaces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.lock().is_empty()
    }

    /// Make following writes fail with `message`
    pub fn fail_writes(&self, message: impl Into<String>) {
        *self.write_failure.lock() = Some(message.into());
    }

    pub fn recover(&self) {
        *self.write_failure.lock() = None;
    }
}

#[async_trait]
impl RenderTarget for MemoryTargets {
    async fn create(&self, key: &str) -> Result<TargetHandle, RenderError> {
        let mut by_key = self.by_key.lock();
        if by_key.contains_key(key) {
            return Err(RenderError::AlreadyAllocated(key.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        by_key.insert(key.to_string(), id);
        self.surfaces.lock().insert(
            id,
            Surface {
                key: key.to_string(),
                ..Surface::default()
            },
        );

        Ok(TargetHandle {
            id,
            key: key.to_string(),
        })
    }

    async fn set_lines(&self, handle: &TargetHandle, lines: Vec<String>) -> Result<(), RenderError> {
        if let Some(message) = self.write_failure.lock().clone() {
            return Err(RenderError::Provider(message));
        }

        let mut surfaces = self.surfaces.lock();
        let surface = surfaces
            .get_mut(&handle.id)
            .ok_or(RenderError::UnknownHandle(handle.id))?;
        surface.lines = lines;
        surface.writes += 1;
        Ok(())
    }

    async fn close(&self, handle: &TargetHandle) -> Result<(), RenderError> {
        let surface = self
            .surfaces
            .lock()
            .remove(&handle.id)
            .ok_or(RenderError::UnknownHandle(handle.id))?;
        self.by_key.lock().remove(&surface.key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        self.by_key.lock().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_write_close() {
        let targets = MemoryTargets::new();

        let handle = targets.create("counter").await.unwrap();
        assert!(targets.exists("counter").await);

        targets
            .set_lines(&handle, vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(targets.lines("counter").unwrap(), vec!["a", "b"]);
        assert_eq!(targets.write_count("counter"), 1);

        targets.close(&handle).await.unwrap();
        assert!(!targets.exists("counter").await);
        assert!(targets.lines("counter").is_none());
        assert!(targets.is_empty());
    }

    #[tokio::test]
    async fn test_double_allocation_rejected() {
        let targets = MemoryTargets::new();
        targets.create("k").await.unwrap();

        let err = targets.create("k").await.unwrap_err();
        assert_eq!(err, RenderError::AlreadyAllocated("k".to_string()));
        assert_eq!(targets.len(), 1);
    }

    #[tokio::test]
    async fn test_key_reusable_after_close() {
        let targets = MemoryTargets::new();
        let first = targets.create("k").await.unwrap();
        targets.close(&first).await.unwrap();

        let second = targets.create("k").await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let targets = MemoryTargets::new();
        let bogus = TargetHandle {
            id: 99,
            key: "nope".to_string(),
        };

        assert_eq!(
            targets.set_lines(&bogus, vec![]).await.unwrap_err(),
            RenderError::UnknownHandle(99)
        );
        assert_eq!(
            targets.close(&bogus).await.unwrap_err(),
            RenderError::UnknownHandle(99)
        );
    }

    #[tokio::test]
    async fn test_write_failure_mode() {
        let targets = MemoryTargets::new();
        let handle = targets.create("k").await.unwrap();

        targets.fail_writes("buffer wiped");
        assert!(matches!(
            targets.set_lines(&handle, vec![]).await,
            Err(RenderError::Provider(_))
        ));

        targets.recover();
        assert!(targets.set_lines(&handle, vec![]).await.is_ok());
    }
}
