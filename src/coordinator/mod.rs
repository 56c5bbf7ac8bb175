//! Module that contains the [`ErasureCoordinator`]: it issues every operation to all disks of an erasure set,
//! collects one [`crate::disk::Outcome`] per slot and turns them into a single verdict using [`crate::quorum`].
//!
//! Multipart uploads additionally merge their per-part checksums with [`crate::checksum::reconcile`] before
//! persisting new upload metadata.
//!
//! # Layout on each disk
//!  - objects are stored at `<volume>/<object>`
//!  - uploads live under `<volume>/.multipart/<object>/<upload_id>/` holding `upload.json` and one `part.<n>` per part
//!  - every write first lands on `<volume>/.tmp/<id>` and is renamed over its final path once a write quorum holds it
//!
//! Object names under `.multipart/` or `.tmp/` are rejected.
use bytes::{Bytes, BytesMut};
use futures::{future::join_all, stream::FuturesUnordered, Future, StreamExt};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{event, instrument, Level};

use crate::{
    checksum::{reconcile, ChecksumAlgorithm, ChecksumCollection, PartChecksum},
    config::{Config, DiskConfig, ErasureConfig},
    disk::{
        self, fault::Fault, in_memory::InMemory, Disk, DiskError, FailureKind, FileInfo,
        OutcomeSet, VolumeInfo,
    },
    error::{Error, Result},
    quorum::{pick_quorum_value, tally, IgnoreSet},
    region::{validate_location_constraint, RegionConfig},
    utils::generate_random_ascii_string,
};

/// type alias to a [`Disk`] that can be shared between concurrent calls
pub type DiskHandle = Arc<dyn Disk>;

/// Failures that do not vote on reads: a missing, faulty or slow disk says nothing about whether a volume or file exists
pub const READ_IGNORED_ERRS: &[FailureKind] = &[
    FailureKind::DiskNotFound,
    FailureKind::FaultyDisk,
    FailureKind::DiskTimeout,
];

/// Every disk votes on writes
pub const WRITE_IGNORED_ERRS: &[FailureKind] = &[];

const MULTIPART_PREFIX: &str = ".multipart";
const TMP_PREFIX: &str = ".tmp";
const RESERVED_PREFIXES: &[&str] = &[MULTIPART_PREFIX, TMP_PREFIX];
const UPLOAD_METADATA_FILE: &str = "upload.json";
const UPLOAD_ID_LEN: usize = 32;

/// Metadata persisted on every disk for an in-progress multipart upload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub object: String,
    pub upload_id: String,
    pub checksums: ChecksumCollection,
}

fn upload_dir(object: &str, upload_id: &str) -> String {
    format!("{}/{}/{}", MULTIPART_PREFIX, object, upload_id)
}

fn upload_metadata_path(object: &str, upload_id: &str) -> String {
    format!("{}/{}", upload_dir(object, upload_id), UPLOAD_METADATA_FILE)
}

pub fn part_name(part_number: u32) -> String {
    format!("part.{}", part_number)
}

fn part_path(object: &str, upload_id: &str, part_number: u32) -> String {
    format!("{}/{}", upload_dir(object, upload_id), part_name(part_number))
}

fn tmp_path() -> String {
    format!("{}/{}", TMP_PREFIX, generate_random_ascii_string(UPLOAD_ID_LEN))
}

fn check_object_name(object: &str) -> Result<()> {
    let reserved = RESERVED_PREFIXES.iter().any(|prefix| {
        object
            .strip_prefix(prefix)
            .map_or(false, |rest| rest.is_empty() || rest.starts_with('/'))
    });

    if reserved {
        return Err(Error::InvalidRequest {
            reason: format!("object name {} is reserved", object),
        });
    }

    Ok(())
}

pub struct ErasureCoordinator {
    /// One entry per disk slot. `None` is a slot whose disk is offline.
    disks: Vec<Option<DiskHandle>>,
    config: ErasureConfig,
    region: RegionConfig,
    /// Serializes the metadata updates of each in-progress upload, keyed by `<volume>/<upload dir>`
    upload_locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl std::fmt::Debug for ErasureCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasureCoordinator")
            .field("n_disks", &self.disks.len())
            .field("config", &self.config)
            .field("region", &self.region)
            .finish()
    }
}

impl ErasureCoordinator {
    /// Constructs a new [`ErasureCoordinator`]
    ///
    /// # Error
    /// Returns [`Error::InvalidConfig`] if the quorum thresholds don't fit the number of disks
    pub fn new(
        disks: Vec<Option<DiskHandle>>,
        config: ErasureConfig,
        region: RegionConfig,
    ) -> Result<Self> {
        config.validate(disks.len())?;

        Ok(Self {
            disks,
            config,
            region,
            upload_locks: AsyncMutex::new(HashMap::new()),
        })
    }

    /// Builds the disks described by `config`. Every disk is an [`InMemory`] one.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut disks: Vec<Option<DiskHandle>> = Vec::with_capacity(config.disks.len());
        for disk_config in config.disks.iter() {
            match disk_config {
                DiskConfig::InMemory { capacity, fault } => {
                    let disk = match capacity {
                        Some(capacity) => InMemory::with_capacity(*capacity),
                        None => InMemory::default(),
                    };
                    if let Some(kind) = fault {
                        disk.inject(Fault::always(*kind))?;
                    }
                    disks.push(Some(Arc::new(disk)));
                }
                DiskConfig::Offline => disks.push(None),
            }
        }

        Self::new(disks, config.erasure, config.region.clone())
    }

    pub fn n_disks(&self) -> usize {
        self.disks.len()
    }

    /// Issues `op` to every disk concurrently and returns one result per slot, in slot order.
    ///
    /// Offline slots are answered with [`FailureKind::DiskNotFound`] and disks that miss the deadline
    /// with [`FailureKind::DiskTimeout`], so the result always has exactly one entry per slot.
    async fn fan_out<T, F, Fut>(&self, op: F) -> Vec<disk::Result<T>>
    where
        F: Fn(DiskHandle) -> Fut,
        Fut: Future<Output = disk::Result<T>>,
    {
        let deadline = Duration::from_millis(self.config.disk_timeout_ms);
        let mut futures = FuturesUnordered::new();
        for (slot, disk) in self.disks.iter().enumerate() {
            let call = disk.clone().map(&op);
            futures.push(async move {
                let result = match call {
                    None => Err(DiskError::new(
                        FailureKind::DiskNotFound,
                        format!("disk slot {} is offline", slot),
                    )),
                    Some(call) => tokio::time::timeout(deadline, call)
                        .await
                        .unwrap_or_else(|_| {
                            Err(DiskError::new(
                                FailureKind::DiskTimeout,
                                format!("disk slot {} did not answer within {:?}", slot, deadline),
                            ))
                        }),
                };
                (slot, result)
            });
        }

        let mut results: Vec<disk::Result<T>> = (0..self.disks.len())
            .map(|slot| {
                Err(DiskError::new(
                    FailureKind::DiskTimeout,
                    format!("no answer from disk slot {}", slot),
                ))
            })
            .collect();
        while let Some((slot, result)) = futures.next().await {
            results[slot] = result;
        }

        results
    }

    /// Runs `op` on the disks whose result is a success. Used to roll back partially applied writes.
    async fn undo<T, F, Fut>(&self, results: &[disk::Result<T>], op: F)
    where
        F: Fn(DiskHandle) -> Fut,
        Fut: Future<Output = disk::Result<()>>,
    {
        let calls = self
            .disks
            .iter()
            .zip(results.iter())
            .filter(|(_, result)| result.is_ok())
            .filter_map(|(disk, _)| disk.clone())
            .map(&op);

        for result in join_all(calls).await {
            if let Err(err) = result {
                event!(Level::WARN, "Unable to roll back a partial write: {:?}", err);
            }
        }
    }

    /// Reduces `results` into a single verdict.
    ///
    /// - a quorum on a failure kind is returned as [`Error::Disk`]
    /// - a quorum on success is only accepted if at least `threshold` disks are part of it
    /// - anything else is [`Error::QuorumNotReached`]
    fn verdict<T>(
        &self,
        operation: &str,
        results: &[disk::Result<T>],
        ignore: &IgnoreSet,
        threshold: usize,
    ) -> Result<()> {
        if results.len() != self.disks.len() {
            return Err(Error::InvalidState {
                reason: format!(
                    "{} collected {} outcomes for {} disk slots",
                    operation,
                    results.len(),
                    self.disks.len()
                ),
            });
        }

        let outcomes = OutcomeSet::from_results(results);
        let reduction = tally(&outcomes, ignore);
        event!(
            Level::DEBUG,
            "{} outcomes: {:?} - reduction: {:?}",
            operation,
            outcomes,
            reduction
        );

        if let Some(kind) = reduction.error() {
            let err = results
                .iter()
                .filter_map(|result| result.as_ref().err())
                .find(|err| err.kind == kind)
                .cloned()
                .unwrap_or_else(|| kind.into());
            event!(Level::WARN, "{} failed on a quorum of disks: {:?}", operation, err);
            return Err(Error::Disk(err));
        }

        if reduction.meets(threshold) {
            return Ok(());
        }

        event!(
            Level::WARN,
            "{}: quorum not reached - {:?}",
            operation,
            reduction
        );
        Err(Error::QuorumNotReached {
            operation: operation.to_string(),
            reason: format!(
                "largest agreement was {:?} on {} of {} counted disks, {} successes required",
                reduction.leader(),
                reduction.max_count(),
                reduction.considered(),
                threshold
            ),
        })
    }

    fn write_verdict<T>(&self, operation: &str, results: &[disk::Result<T>]) -> Result<()> {
        self.verdict(
            operation,
            results,
            &IgnoreSet::from_kinds(WRITE_IGNORED_ERRS),
            self.config.write_quorum,
        )
    }

    /// Reduces a read and returns the value returned by most disks, as long as at least `read_quorum` disks returned it
    fn read_value<T: PartialEq>(
        &self,
        operation: &str,
        results: Vec<disk::Result<T>>,
    ) -> Result<T> {
        self.verdict(
            operation,
            &results,
            &IgnoreSet::from_kinds(READ_IGNORED_ERRS),
            self.config.read_quorum,
        )?;

        let (value, count) = pick_quorum_value(results.into_iter().filter_map(|r| r.ok()))
            .ok_or_else(|| Error::Logic {
                reason: format!("{} reached a success quorum without successes", operation),
            })?;

        if count < self.config.read_quorum {
            event!(
                Level::WARN,
                "{}: disks disagree on the content, only {} copies match",
                operation,
                count
            );
            return Err(Error::QuorumNotReached {
                operation: operation.to_string(),
                reason: format!(
                    "only {} disks returned the same content, {} required",
                    count, self.config.read_quorum
                ),
            });
        }

        Ok(value)
    }

    /// Writes `data` to a temporary path on every disk and, once a write quorum holds it, renames it over `path`.
    ///
    /// A write that fails before the rename only removes its temporary copies, so whatever `path` held before is intact.
    async fn write_committed(
        &self,
        operation: &str,
        volume: &str,
        path: &str,
        data: Bytes,
    ) -> Result<()> {
        let tmp = tmp_path();
        let tmp = tmp.as_str();
        let results = self
            .fan_out(move |disk| {
                let data = data.clone();
                async move { disk.write_all(volume, tmp, data).await }
            })
            .await;

        if let Err(err) = self.write_verdict(operation, &results) {
            self.undo(&results, move |disk| async move {
                disk.delete_file(volume, tmp).await
            })
            .await;
            return Err(err);
        }

        let results = self
            .fan_out(move |disk| async move { disk.rename_file(volume, tmp, path).await })
            .await;

        if let Err(err) = self.write_verdict(operation, &results) {
            let leftovers = self
                .fan_out(move |disk| async move { disk.delete_file(volume, tmp).await })
                .await;
            event!(
                Level::DEBUG,
                "{}: dropped temporary copies {:?}",
                operation,
                OutcomeSet::from_results(&leftovers)
            );
            return Err(err);
        }

        Ok(())
    }

    /// Returns the lock guarding the metadata of one upload
    async fn upload_lock(
        &self,
        volume: &str,
        object: &str,
        upload_id: &str,
    ) -> Arc<AsyncMutex<()>> {
        let key = format!("{}/{}", volume, upload_dir(object, upload_id));
        self.upload_locks
            .lock()
            .await
            .entry(key)
            .or_default()
            .clone()
    }

    async fn forget_upload_lock(&self, volume: &str, object: &str, upload_id: &str) {
        let key = format!("{}/{}", volume, upload_dir(object, upload_id));
        self.upload_locks.lock().await.remove(&key);
    }

    #[instrument(name = "coordinator::make_volume", level = "info", skip(self))]
    pub async fn make_volume(&self, volume: &str) -> Result<()> {
        let results = self
            .fan_out(move |disk| async move { disk.make_volume(volume).await })
            .await;

        if let Err(err) = self.write_verdict("MakeVolume", &results) {
            self.undo(&results, move |disk| async move {
                disk.delete_volume(volume).await
            })
            .await;
            return Err(err);
        }

        Ok(())
    }

    /// Validates the request's location constraint against the configured region, then creates the volume
    pub async fn create_volume(
        &self,
        volume: &str,
        location_constraint: &[u8],
        content_length: i64,
    ) -> Result<()> {
        validate_location_constraint(&self.region, location_constraint, content_length)?;
        self.make_volume(volume).await
    }

    #[instrument(name = "coordinator::stat_volume", level = "info", skip(self))]
    pub async fn stat_volume(&self, volume: &str) -> Result<VolumeInfo> {
        let results = self
            .fan_out(move |disk| async move { disk.stat_volume(volume).await })
            .await;

        self.read_value("StatVolume", results)
    }

    #[instrument(name = "coordinator::delete_volume", level = "info", skip(self))]
    pub async fn delete_volume(&self, volume: &str) -> Result<()> {
        let results = self
            .fan_out(move |disk| async move { disk.delete_volume(volume).await })
            .await;

        self.write_verdict("DeleteVolume", &results)
    }

    #[instrument(name = "coordinator::put_object", level = "info", skip(self, data))]
    pub async fn put_object(&self, volume: &str, object: &str, data: Bytes) -> Result<()> {
        check_object_name(object)?;
        self.write_committed("PutObject", volume, object, data).await
    }

    #[instrument(name = "coordinator::get_object", level = "info", skip(self))]
    pub async fn get_object(&self, volume: &str, object: &str) -> Result<Bytes> {
        let results = self
            .fan_out(move |disk| async move { disk.read_all(volume, object).await })
            .await;

        self.read_value("GetObject", results)
    }

    #[instrument(name = "coordinator::stat_object", level = "info", skip(self))]
    pub async fn stat_object(&self, volume: &str, object: &str) -> Result<FileInfo> {
        let results = self
            .fan_out(move |disk| async move { disk.stat_file(volume, object).await })
            .await;

        self.read_value("StatObject", results)
    }

    #[instrument(name = "coordinator::delete_object", level = "info", skip(self))]
    pub async fn delete_object(&self, volume: &str, object: &str) -> Result<()> {
        check_object_name(object)?;
        let results = self
            .fan_out(move |disk| async move { disk.delete_file(volume, object).await })
            .await;

        self.write_verdict("DeleteObject", &results)
    }

    async fn write_upload_metadata(&self, volume: &str, metadata: &UploadMetadata) -> Result<()> {
        let serialized = Bytes::from(serde_json::to_vec(metadata)?);
        let path = upload_metadata_path(&metadata.object, &metadata.upload_id);
        self.write_committed("WriteUploadMetadata", volume, &path, serialized).await
    }

    async fn read_upload_metadata(
        &self,
        volume: &str,
        object: &str,
        upload_id: &str,
    ) -> Result<UploadMetadata> {
        let path = upload_metadata_path(object, upload_id);
        let path = path.as_str();
        let results = self
            .fan_out(move |disk| async move { disk.read_all(volume, path).await })
            .await;

        let serialized = self.read_value("ReadUploadMetadata", results)?;
        serde_json::from_slice(&serialized).map_err(|err| Error::InvalidState {
            reason: format!("upload metadata for {} is corrupted: {}", upload_id, err),
        })
    }

    /// Starts a multipart upload and returns its id
    #[instrument(name = "coordinator::new_multipart_upload", level = "info", skip(self))]
    pub async fn new_multipart_upload(&self, volume: &str, object: &str) -> Result<String> {
        check_object_name(object)?;
        let metadata = UploadMetadata {
            object: object.to_string(),
            upload_id: generate_random_ascii_string(UPLOAD_ID_LEN),
            checksums: ChecksumCollection::default(),
        };

        self.write_upload_metadata(volume, &metadata).await?;
        event!(Level::DEBUG, "started upload {}", metadata.upload_id);

        Ok(metadata.upload_id)
    }

    /// Writes one part and merges its checksum into the upload metadata.
    ///
    /// Other parts may be written concurrently, so the metadata is read again once the part data landed,
    /// under the upload's lock. The merge keeps the freshly computed checksum for this part and takes
    /// every other part from the metadata that was just read.
    #[instrument(name = "coordinator::put_object_part", level = "info", skip(self, data))]
    pub async fn put_object_part(
        &self,
        volume: &str,
        object: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartChecksum> {
        let snapshot = self.read_upload_metadata(volume, object, upload_id).await?;

        let active_part = part_name(part_number);
        let checksum =
            PartChecksum::compute(active_part.as_str(), ChecksumAlgorithm::Crc32c, &data);

        let path = part_path(object, upload_id, part_number);
        self.write_committed("PutObjectPart", volume, &path, data).await?;

        let lock = self.upload_lock(volume, object, upload_id).await;
        let _guard = lock.lock().await;

        let current = snapshot.checksums.with(checksum.clone());
        let durable = self.read_upload_metadata(volume, object, upload_id).await?;
        let merged = reconcile(&current, &durable.checksums, &active_part);
        event!(
            Level::DEBUG,
            "{} merged checksums: {:?}",
            active_part,
            merged
        );

        self.write_upload_metadata(
            volume,
            &UploadMetadata {
                checksums: merged,
                ..durable
            },
        )
        .await?;

        Ok(checksum)
    }

    /// Returns the checksums recorded so far for an upload
    pub async fn list_parts(
        &self,
        volume: &str,
        object: &str,
        upload_id: &str,
    ) -> Result<ChecksumCollection> {
        Ok(self
            .read_upload_metadata(volume, object, upload_id)
            .await?
            .checksums)
    }

    /// Reads one part from every disk, counting copies that don't match `checksum` as [`FailureKind::FileCorrupted`]
    async fn read_verified_part(
        &self,
        volume: &str,
        object: &str,
        upload_id: &str,
        part_number: u32,
        checksum: &PartChecksum,
    ) -> Result<Bytes> {
        let algorithm: ChecksumAlgorithm =
            checksum.algorithm.parse().map_err(|_| Error::InvalidState {
                reason: format!(
                    "{} was hashed with unsupported algorithm {}",
                    checksum.part_name, checksum.algorithm
                ),
            })?;
        let expected = checksum.hash.as_str();

        let path = part_path(object, upload_id, part_number);
        let path = path.as_str();
        let results = self
            .fan_out(move |disk| async move {
                disk.read_all(volume, path).await.and_then(|data| {
                    if algorithm.digest(&data) == expected {
                        Ok(data)
                    } else {
                        Err(DiskError::new(
                            FailureKind::FileCorrupted,
                            format!("{}/{} does not match its checksum", volume, path),
                        ))
                    }
                })
            })
            .await;

        self.read_value("ReadObjectPart", results)
    }

    /// Concatenates `part_numbers` (in the given order) into the final object and drops the upload
    #[instrument(name = "coordinator::complete_multipart_upload", level = "info", skip(self))]
    pub async fn complete_multipart_upload(
        &self,
        volume: &str,
        object: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<FileInfo> {
        if part_numbers.is_empty() {
            return Err(Error::InvalidRequest {
                reason: "a multipart upload needs at least one part".to_string(),
            });
        }

        let lock = self.upload_lock(volume, object, upload_id).await;
        let _guard = lock.lock().await;
        let metadata = self.read_upload_metadata(volume, object, upload_id).await?;

        let mut data = BytesMut::new();
        for part_number in part_numbers.iter().copied() {
            let checksum = metadata
                .checksums
                .get(&part_name(part_number))
                .ok_or_else(|| Error::InvalidRequest {
                    reason: format!("part {} was never uploaded", part_number),
                })?;

            let part = self
                .read_verified_part(volume, object, upload_id, part_number, checksum)
                .await?;
            data.extend_from_slice(&part);
        }

        let size = data.len() as u64;
        self.put_object(volume, object, data.freeze()).await?;

        if let Err(err) = self.remove_upload(volume, object, upload_id).await {
            // the object is already durable at this point, leftovers are only wasted space
            event!(
                Level::WARN,
                "Unable to remove upload {} after completion: {:?}",
                upload_id,
                err
            );
        }
        self.forget_upload_lock(volume, object, upload_id).await;

        Ok(FileInfo {
            volume: volume.to_string(),
            path: object.to_string(),
            size,
        })
    }

    #[instrument(name = "coordinator::abort_multipart_upload", level = "info", skip(self))]
    pub async fn abort_multipart_upload(
        &self,
        volume: &str,
        object: &str,
        upload_id: &str,
    ) -> Result<()> {
        let lock = self.upload_lock(volume, object, upload_id).await;
        let _guard = lock.lock().await;

        self.remove_upload(volume, object, upload_id).await?;
        self.forget_upload_lock(volume, object, upload_id).await;
        Ok(())
    }

    async fn remove_upload(&self, volume: &str, object: &str, upload_id: &str) -> Result<()> {
        let dir = upload_dir(object, upload_id);
        let dir = dir.as_str();
        let results = self
            .fan_out(move |disk| async move { disk.delete_prefix(volume, dir).await })
            .await;

        self.write_verdict("AbortMultipartUpload", &results)
    }
}

#[cfg(test)]
mod tests {
    use super::{DiskHandle, ErasureCoordinator};
    use crate::{
        config::ErasureConfig,
        disk::{fault::Fault, in_memory::InMemory, Disk, FailureKind},
        error::Error,
        region::RegionConfig,
    };
    use bytes::Bytes;
    use quickcheck::Arbitrary;
    use rand::Rng;
    use std::{sync::Arc, time::Duration};

    const VOLUME: &str = "bucket";

    fn coordinator(disks: &[InMemory], offline: usize) -> ErasureCoordinator {
        let mut handles: Vec<Option<DiskHandle>> = disks
            .iter()
            .map(|disk| Some(Arc::new(disk.clone()) as DiskHandle))
            .collect();
        handles.extend((0..offline).map(|_| None));

        let mut config = ErasureConfig::for_disks(handles.len());
        config.disk_timeout_ms = 100;
        ErasureCoordinator::new(handles, config, RegionConfig::default()).unwrap()
    }

    fn disks(n: usize) -> Vec<InMemory> {
        (0..n).map(|_| InMemory::default()).collect()
    }

    #[tokio::test]
    async fn test_put_get_with_an_offline_disk() {
        let disks = disks(3);
        let coordinator = coordinator(&disks, 1);

        coordinator.make_volume(VOLUME).await.unwrap();
        coordinator
            .put_object(VOLUME, "object", Bytes::from("value"))
            .await
            .unwrap();

        assert_eq!(
            coordinator.get_object(VOLUME, "object").await.unwrap(),
            Bytes::from("value")
        );
        assert_eq!(
            coordinator.stat_object(VOLUME, "object").await.unwrap().size,
            5
        );
    }

    #[tokio::test]
    async fn test_volume_not_found_ignores_missing_disks() {
        let disks = disks(3);
        let coordinator = coordinator(&disks, 2);

        let err = coordinator.stat_volume(VOLUME).await.err().unwrap();
        assert_eq!(err.failure_kind(), Some(FailureKind::VolumeNotFound));
    }

    #[tokio::test]
    async fn test_write_without_majority() {
        let disks = disks(2);
        let coordinator = coordinator(&disks, 2);

        let err = coordinator.make_volume(VOLUME).await.err().unwrap();
        assert!(err.is_quorum_not_reached());

        // the volumes that were created got rolled back
        for disk in disks.iter() {
            assert!(disk.stat_volume(VOLUME).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_write_failure_quorum() {
        let disks = disks(4);
        for disk in disks.iter().take(3) {
            disk.inject(Fault::always(FailureKind::DiskFull)).unwrap();
        }
        let coordinator = coordinator(&disks, 0);

        let err = coordinator.make_volume(VOLUME).await.err().unwrap();
        match err {
            Error::Disk(err) => assert_eq!(err.kind, FailureKind::DiskFull),
            _ => {
                panic!("Unexpected err {}", err);
            }
        }
    }

    #[tokio::test]
    async fn test_success_majority_below_read_quorum() {
        let disks = disks(4);
        let coordinator = coordinator(&disks, 0);
        coordinator.make_volume(VOLUME).await.unwrap();

        // 3 faulty disks are ignored, leaving a single successful vote
        for disk in disks.iter().take(3) {
            disk.inject(Fault::always(FailureKind::FaultyDisk)).unwrap();
        }

        let err = coordinator.stat_volume(VOLUME).await.err().unwrap();
        assert!(err.is_quorum_not_reached());
    }

    #[tokio::test]
    async fn test_slow_disks_time_out() {
        let slow = Duration::from_millis(500);
        let disks = vec![
            InMemory::default(),
            InMemory::default().with_latency(slow),
            InMemory::default().with_latency(slow),
        ];
        let coordinator = coordinator(&disks, 0);

        let err = coordinator.make_volume(VOLUME).await.err().unwrap();
        assert_eq!(err.failure_kind(), Some(FailureKind::DiskTimeout));
    }

    #[tokio::test]
    async fn test_diverging_copies() {
        let disks = disks(4);
        let coordinator = coordinator(&disks, 0);
        coordinator.make_volume(VOLUME).await.unwrap();

        for (i, disk) in disks.iter().enumerate() {
            disk.write_all(VOLUME, "object", Bytes::from(format!("value {}", i % 2)))
                .await
                .unwrap();
        }

        // two copies of "value 0" are enough for a read quorum of 2
        let value = coordinator.get_object(VOLUME, "object").await.unwrap();
        assert_eq!(value, Bytes::from("value 0"));

        for (i, disk) in disks.iter().enumerate().take(3) {
            disk.write_all(VOLUME, "object", Bytes::from(format!("value {}", i + 2)))
                .await
                .unwrap();
        }

        // every disk succeeds but no two of them agree on the content
        let err = coordinator.get_object(VOLUME, "object").await.err().unwrap();
        assert!(err.is_quorum_not_reached());
    }

    #[tokio::test]
    async fn test_create_volume_checks_region() {
        let disks = disks(3);
        let coordinator = coordinator(&disks, 0);

        let body = br#"{"location_constraint": "eu-west-1"}"#;
        let err = coordinator
            .create_volume(VOLUME, body, body.len() as i64)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::LocationConstraint(_)));

        coordinator.create_volume(VOLUME, b"", 0).await.unwrap();
        coordinator.stat_volume(VOLUME).await.unwrap();
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let disks = disks(4);
        let coordinator = coordinator(&disks, 0);
        coordinator.make_volume(VOLUME).await.unwrap();

        let upload_id = coordinator
            .new_multipart_upload(VOLUME, "object")
            .await
            .unwrap();
        let checksum_2 = coordinator
            .put_object_part(VOLUME, "object", &upload_id, 2, Bytes::from("world"))
            .await
            .unwrap();
        coordinator
            .put_object_part(VOLUME, "object", &upload_id, 1, Bytes::from("hello "))
            .await
            .unwrap();

        let parts = coordinator
            .list_parts(VOLUME, "object", &upload_id)
            .await
            .unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts.get("part.2"), Some(&checksum_2));

        let info = coordinator
            .complete_multipart_upload(VOLUME, "object", &upload_id, &[1, 2])
            .await
            .unwrap();
        assert_eq!(info.size, 11);
        assert_eq!(
            coordinator.get_object(VOLUME, "object").await.unwrap(),
            Bytes::from("hello world")
        );

        // the upload is gone
        let err = coordinator
            .list_parts(VOLUME, "object", &upload_id)
            .await
            .err()
            .unwrap();
        assert_eq!(err.failure_kind(), Some(FailureKind::FileNotFound));
    }

    #[tokio::test]
    async fn test_complete_with_unknown_part() {
        let disks = disks(3);
        let coordinator = coordinator(&disks, 0);
        coordinator.make_volume(VOLUME).await.unwrap();

        let upload_id = coordinator
            .new_multipart_upload(VOLUME, "object")
            .await
            .unwrap();
        coordinator
            .put_object_part(VOLUME, "object", &upload_id, 1, Bytes::from("data"))
            .await
            .unwrap();

        let err = coordinator
            .complete_multipart_upload(VOLUME, "object", &upload_id, &[1, 3])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidRequest { .. }));

        let err = coordinator
            .complete_multipart_upload(VOLUME, "object", &upload_id, &[])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_part_for_unknown_upload() {
        let disks = disks(3);
        let coordinator = coordinator(&disks, 0);
        coordinator.make_volume(VOLUME).await.unwrap();

        let err = coordinator
            .put_object_part(VOLUME, "object", "missing", 1, Bytes::from("data"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.failure_kind(), Some(FailureKind::FileNotFound));
    }

    #[tokio::test]
    async fn test_delete_object_leaves_nested_objects() {
        let disks = disks(3);
        let coordinator = coordinator(&disks, 0);
        coordinator.make_volume(VOLUME).await.unwrap();
        coordinator
            .put_object(VOLUME, "photos", Bytes::from("album"))
            .await
            .unwrap();
        coordinator
            .put_object(VOLUME, "photos/cat.png", Bytes::from("cat"))
            .await
            .unwrap();

        coordinator.delete_object(VOLUME, "photos").await.unwrap();

        assert_eq!(
            coordinator.get_object(VOLUME, "photos/cat.png").await.unwrap(),
            Bytes::from("cat")
        );
        let err = coordinator.get_object(VOLUME, "photos").await.err().unwrap();
        assert_eq!(err.failure_kind(), Some(FailureKind::FileNotFound));
    }

    #[tokio::test]
    async fn test_failed_put_removes_only_its_own_copies() {
        let disks = disks(4);
        let coordinator = coordinator(&disks, 0);
        coordinator.make_volume(VOLUME).await.unwrap();

        for disk in disks.iter().take(3) {
            disk.inject(Fault::always(FailureKind::FaultyDisk)).unwrap();
        }
        let err = coordinator
            .put_object(VOLUME, "object", Bytes::from("value"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.failure_kind(), Some(FailureKind::FaultyDisk));

        // the healthy disk got its temporary copy rolled back, leaving the volume empty
        disks[3].delete_volume(VOLUME).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_parts_are_all_recorded() {
        let latency = Duration::from_millis(5);
        let disks: Vec<InMemory> = (0..3)
            .map(|_| InMemory::default().with_latency(latency))
            .collect();
        let coordinator = coordinator(&disks, 0);
        coordinator.make_volume(VOLUME).await.unwrap();
        let upload_id = coordinator
            .new_multipart_upload(VOLUME, "object")
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            coordinator.put_object_part(VOLUME, "object", &upload_id, 1, Bytes::from("hello ")),
            coordinator.put_object_part(VOLUME, "object", &upload_id, 2, Bytes::from("world")),
        );
        first.unwrap();
        second.unwrap();

        let parts = coordinator
            .list_parts(VOLUME, "object", &upload_id)
            .await
            .unwrap();
        assert_eq!(parts.len(), 2);
        assert!(parts.get("part.1").is_some());
        assert!(parts.get("part.2").is_some());

        coordinator
            .complete_multipart_upload(VOLUME, "object", &upload_id, &[1, 2])
            .await
            .unwrap();
        assert_eq!(
            coordinator.get_object(VOLUME, "object").await.unwrap(),
            Bytes::from("hello world")
        );
    }

    #[tokio::test]
    async fn test_reserved_object_names() {
        let disks = disks(3);
        let coordinator = coordinator(&disks, 0);
        coordinator.make_volume(VOLUME).await.unwrap();
        let upload_id = coordinator
            .new_multipart_upload(VOLUME, "object")
            .await
            .unwrap();

        for object in [".multipart", ".multipart/object", ".tmp/abc"] {
            let err = coordinator
                .put_object(VOLUME, object, Bytes::from("value"))
                .await
                .err()
                .unwrap();
            assert!(matches!(err, Error::InvalidRequest { .. }));

            let err = coordinator.delete_object(VOLUME, object).await.err().unwrap();
            assert!(matches!(err, Error::InvalidRequest { .. }));
        }

        // the pending upload survived
        assert!(coordinator
            .list_parts(VOLUME, "object", &upload_id)
            .await
            .unwrap()
            .is_empty());

        // names that only share the leading characters are regular objects
        coordinator
            .put_object(VOLUME, ".multipartial", Bytes::from("value"))
            .await
            .unwrap();
    }

    #[derive(Debug, Clone)]
    struct ErasureSetShape {
        online: usize,
        offline: usize,
    }

    impl Arbitrary for ErasureSetShape {
        fn arbitrary(_: &mut quickcheck::Gen) -> Self {
            let mut rng = rand::thread_rng();
            let n_disks = rng.gen_range(1..=8);
            let offline = rng.gen_range(0..=n_disks);

            Self {
                online: n_disks - offline,
                offline,
            }
        }
    }

    // the verdict of a write depends only on how many slots answer, never on which ones
    #[quickcheck_async::tokio]
    async fn write_verdict_follows_the_majority(shape: ErasureSetShape) {
        let disks = disks(shape.online);
        let coordinator = coordinator(&disks, shape.offline);
        let n_disks = shape.online + shape.offline;

        let result = coordinator.make_volume(VOLUME).await;
        if shape.online > n_disks / 2 {
            assert!(result.is_ok());
        } else if shape.offline > n_disks / 2 {
            assert_eq!(
                result.err().unwrap().failure_kind(),
                Some(FailureKind::DiskNotFound)
            );
        } else {
            assert!(result.err().unwrap().is_quorum_not_reached());
        }
    }
}
