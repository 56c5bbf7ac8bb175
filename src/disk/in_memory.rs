//! An in-memory [`Disk`] implementation
//!
//! Volumes are [`HashMap`]s of path to bytes, all wrapped by a single [`Mutex`]. Nothing fancy around performance.
//! It is used for development, the `ecq simulate` command and tests, which is why it supports a capacity limit,
//! an artificial latency and [`Fault`] injection.
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tracing::instrument;

use super::{fault::Fault, Disk, DiskError, FailureKind, FileInfo, Result, VolumeInfo};

/// Type alias for the files held by a single volume
type Volume = HashMap<String, Bytes>;

#[derive(Debug, Default)]
struct State {
    volumes: HashMap<String, Volume>,
    used_bytes: u64,
    fault: Fault,
    n_calls: usize,
}

/// The InMemory [`Disk`] definition
#[derive(Clone, Debug, Default)]
pub struct InMemory {
    inner: Arc<Mutex<State>>,
    capacity: Option<u64>,
    latency: Option<Duration>,
}

impl InMemory {
    /// Constructs a disk that fails with [`FailureKind::DiskFull`] once `capacity` bytes are stored
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity: Some(capacity),
            ..Default::default()
        }
    }

    /// Every call sleeps for `latency` before touching the disk state
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replaces the currently injected [`Fault`]
    pub fn inject(&self, fault: Fault) -> Result<()> {
        let mut guard = self.acquire_lock()?;
        guard.fault = fault;
        Ok(())
    }

    /// Number of [`Disk`] calls received so far, including the ones that failed
    pub fn n_calls(&self) -> usize {
        self.acquire_lock().map(|guard| guard.n_calls).unwrap_or(0)
    }

    /// Flips the bits of the first byte stored at `path`. Used to simulate bitrot.
    pub fn corrupt(&self, volume: &str, path: &str) -> Result<()> {
        let mut guard = self.acquire_lock()?;
        let file = guard
            .volumes
            .get_mut(volume)
            .ok_or(DiskError::from(FailureKind::VolumeNotFound))?
            .get_mut(path)
            .ok_or(DiskError::from(FailureKind::FileNotFound))?;

        let mut corrupted = file.to_vec();
        if let Some(first) = corrupted.first_mut() {
            *first = !*first;
        }
        *file = Bytes::from(corrupted);

        Ok(())
    }

    /// private function used to acquire a lock over the [`State`].
    /// A poisoned mutex means the disk can no longer be trusted, so it is reported as [`FailureKind::FaultyDisk`]
    fn acquire_lock(&self) -> Result<MutexGuard<State>> {
        match self.inner.lock() {
            Ok(guard) => Ok(guard),
            Err(_) => Err(DiskError::new(
                FailureKind::FaultyDisk,
                "Unable to acquire lock for InMemory disk - poisoned...",
            )),
        }
    }

    /// Applies the configured latency, counts the call and fails if a fault is active
    async fn begin(&self) -> Result<MutexGuard<State>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut guard = self.acquire_lock()?;
        guard.n_calls += 1;
        if guard.fault.is_active() {
            return Err(DiskError::new(guard.fault.kind, "injected fault"));
        }

        Ok(guard)
    }
}

fn volume_not_found(volume: &str) -> DiskError {
    DiskError::new(
        FailureKind::VolumeNotFound,
        format!("volume {} does not exist", volume),
    )
}

fn file_not_found(volume: &str, path: &str) -> DiskError {
    DiskError::new(
        FailureKind::FileNotFound,
        format!("{}/{} does not exist", volume, path),
    )
}

#[async_trait]
impl Disk for InMemory {
    #[instrument(name = "disk::in_memory::make_volume", level = "debug", skip(self))]
    async fn make_volume(&self, volume: &str) -> Result<()> {
        let mut guard = self.begin().await?;
        if guard.volumes.contains_key(volume) {
            return Err(DiskError::new(
                FailureKind::VolumeExists,
                format!("volume {} already exists", volume),
            ));
        }

        guard.volumes.insert(volume.to_string(), Volume::default());
        Ok(())
    }

    #[instrument(name = "disk::in_memory::stat_volume", level = "debug", skip(self))]
    async fn stat_volume(&self, volume: &str) -> Result<VolumeInfo> {
        let guard = self.begin().await?;
        if !guard.volumes.contains_key(volume) {
            return Err(volume_not_found(volume));
        }

        Ok(VolumeInfo {
            name: volume.to_string(),
        })
    }

    #[instrument(name = "disk::in_memory::delete_volume", level = "debug", skip(self))]
    async fn delete_volume(&self, volume: &str) -> Result<()> {
        let mut guard = self.begin().await?;
        match guard.volumes.get(volume).map(|files| files.len()) {
            None => Err(volume_not_found(volume)),
            Some(n_files) if n_files > 0 => Err(DiskError::new(
                FailureKind::VolumeNotEmpty,
                format!("volume {} still holds {} files", volume, n_files),
            )),
            Some(_) => {
                guard.volumes.remove(volume);
                Ok(())
            }
        }
    }

    #[instrument(name = "disk::in_memory::write_all", level = "debug", skip(self, data))]
    async fn write_all(&self, volume: &str, path: &str, data: Bytes) -> Result<()> {
        let mut guard = self.begin().await?;
        let replaced = guard
            .volumes
            .get(volume)
            .ok_or_else(|| volume_not_found(volume))?
            .get(path)
            .map(|old| old.len() as u64)
            .unwrap_or(0);

        let used_bytes = guard.used_bytes - replaced + data.len() as u64;
        if let Some(capacity) = self.capacity {
            if used_bytes > capacity {
                return Err(DiskError::new(
                    FailureKind::DiskFull,
                    format!("{} bytes needed, capacity is {}", used_bytes, capacity),
                ));
            }
        }

        guard.used_bytes = used_bytes;
        guard
            .volumes
            .get_mut(volume)
            .ok_or_else(|| volume_not_found(volume))?
            .insert(path.to_string(), data);
        Ok(())
    }

    #[instrument(name = "disk::in_memory::read_all", level = "debug", skip(self))]
    async fn read_all(&self, volume: &str, path: &str) -> Result<Bytes> {
        let guard = self.begin().await?;
        guard
            .volumes
            .get(volume)
            .ok_or_else(|| volume_not_found(volume))?
            .get(path)
            .cloned()
            .ok_or_else(|| file_not_found(volume, path))
    }

    #[instrument(name = "disk::in_memory::stat_file", level = "debug", skip(self))]
    async fn stat_file(&self, volume: &str, path: &str) -> Result<FileInfo> {
        let guard = self.begin().await?;
        let data = guard
            .volumes
            .get(volume)
            .ok_or_else(|| volume_not_found(volume))?
            .get(path)
            .ok_or_else(|| file_not_found(volume, path))?;

        Ok(FileInfo {
            volume: volume.to_string(),
            path: path.to_string(),
            size: data.len() as u64,
        })
    }

    #[instrument(name = "disk::in_memory::delete_file", level = "debug", skip(self))]
    async fn delete_file(&self, volume: &str, path: &str) -> Result<()> {
        let mut guard = self.begin().await?;
        let removed = guard
            .volumes
            .get_mut(volume)
            .ok_or_else(|| volume_not_found(volume))?
            .remove(path)
            .ok_or_else(|| file_not_found(volume, path))?;

        guard.used_bytes -= removed.len() as u64;
        Ok(())
    }

    #[instrument(name = "disk::in_memory::delete_prefix", level = "debug", skip(self))]
    async fn delete_prefix(&self, volume: &str, prefix: &str) -> Result<()> {
        let mut guard = self.begin().await?;
        let dir = format!("{}/", prefix);
        let files = guard
            .volumes
            .get_mut(volume)
            .ok_or_else(|| volume_not_found(volume))?;

        let mut removed = 0;
        let mut freed = 0;
        files.retain(|name, data| {
            let doomed = name.starts_with(&dir);
            if doomed {
                removed += 1;
                freed += data.len() as u64;
            }
            !doomed
        });

        if removed == 0 {
            return Err(file_not_found(volume, prefix));
        }

        guard.used_bytes -= freed;
        Ok(())
    }

    #[instrument(name = "disk::in_memory::rename_file", level = "debug", skip(self))]
    async fn rename_file(&self, volume: &str, src: &str, dst: &str) -> Result<()> {
        let mut guard = self.begin().await?;
        let files = guard
            .volumes
            .get_mut(volume)
            .ok_or_else(|| volume_not_found(volume))?;

        let data = files
            .remove(src)
            .ok_or_else(|| file_not_found(volume, src))?;
        let replaced = files.insert(dst.to_string(), data);

        if let Some(replaced) = replaced {
            guard.used_bytes -= replaced.len() as u64;
        }
        Ok(())
    }
}
