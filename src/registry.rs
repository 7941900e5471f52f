use crate::part::{PartInfo, Partition, TMP_PART_PREFIX};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

/// Manifest listing the table's live parts
const PARTS_MANIFEST_FILE: &str = "parts.json";

/// Set of part names that are currently participating in a merge.
///
/// Busy parts stay visible in snapshots, but the merge predicate refuses
/// them, so two workers never chew on the same part.
type BusySet = HashSet<Arc<str>>;

struct Inner {
    ordered: BTreeMap<(Partition, u64), Arc<PartInfo>>,
    by_name: HashMap<Arc<str>, (Partition, u64)>,
    busy: BusySet,
}

impl Inner {
    fn insert(&mut self, part: Arc<PartInfo>) {
        let key = (part.partition(), part.min_block_id());
        self.by_name.insert(part.name.clone(), key);
        self.ordered.insert(key, part);
    }

    fn remove(&mut self, name: &Arc<str>) {
        if let Some(key) = self.by_name.remove(name) {
            self.ordered.remove(&key);
        }
    }
}

/// Catalog of the live parts of one table.
///
/// The registry is the only shared mutable structure of the engine: parts
/// themselves are immutable and `Arc`-shared. All mutations go through a
/// single writer lock and are persisted into an atomically rewritten JSON
/// manifest, so a crash at any moment leaves either the old or the new part
/// set on disk.
pub struct PartRegistry {
    path: PathBuf,
    inner: RwLock<Inner>,
    next_block_id: AtomicU64,
}

impl PartRegistry {
    /// Creates an empty registry at the given table path
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn create_new<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let registry = Self {
            path,
            inner: RwLock::new(Inner {
                ordered: BTreeMap::new(),
                by_name: HashMap::with_capacity(100),
                busy: HashSet::with_capacity(10),
            }),
            next_block_id: AtomicU64::new(0),
        };
        registry.persist(&registry.inner.read().expect("lock is poisoned"))?;

        Ok(registry)
    }

    /// Recovers a registry from its manifest, loading every part's descriptor
    /// and primary index. Orphaned temporary part directories are deleted.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn recover<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();

        for dir_entry in fs::read_dir(&path)? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name();

            if file_name.to_string_lossy().starts_with(TMP_PART_PREFIX) {
                log::debug!(
                    "Removing orphaned temporary part {}",
                    dir_entry.path().display()
                );
                fs::remove_dir_all(dir_entry.path())?;
            }
        }

        let manifest = fs::read_to_string(path.join(PARTS_MANIFEST_FILE))?;
        let names: Vec<String> = serde_json::from_str(&manifest).expect("deserialize error");

        let mut inner = Inner {
            ordered: BTreeMap::new(),
            by_name: HashMap::with_capacity(names.len()),
            busy: HashSet::with_capacity(10),
        };

        let mut max_block_id = 0;

        for name in names {
            let part = PartInfo::load(path.join(&name))?;
            max_block_id = max_block_id.max(part.max_block_id());
            inner.insert(Arc::new(part));
        }

        log::debug!("Recovered {} parts from manifest", inner.ordered.len());

        Ok(Self {
            path,
            inner: RwLock::new(inner),
            next_block_id: AtomicU64::new(max_block_id),
        })
    }

    /// The table path this registry persists under
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, inner: &Inner) -> crate::Result<()> {
        log::trace!("Writing parts manifest to {}", self.path.display());

        let names: Vec<&str> = inner.ordered.values().map(|p| &*p.name).collect();

        // NOTE: Serialization can't fail here
        #[allow(clippy::expect_used)]
        let json = serde_json::to_string_pretty(&names).expect("should serialize");

        // NOTE: The writer lock serializes mutations, but the system could
        // crash mid-write, so the manifest goes through a staged file and a
        // rename; truncating or overwriting in place could leave a torn
        // manifest that strands every part on recovery
        let mut staged = tempfile::NamedTempFile::new_in(&self.path)?;
        staged.write_all(json.as_bytes())?;

        let manifest = staged
            .persist(self.path.join(PARTS_MANIFEST_FILE))
            .map_err(std::io::Error::from)?;
        manifest.sync_all()?;

        Ok(())
    }

    /// Ordered view of the live parts: by partition, then block range.
    ///
    /// The returned list is a consistent copy; it never blocks writers once
    /// taken.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<PartInfo>> {
        let inner = self.inner.read().expect("lock is poisoned");
        inner.ordered.values().cloned().collect()
    }

    /// Number of live parts
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock is poisoned").ordered.len()
    }

    /// Returns `true` if there are no parts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocates the next block id for a bulk insert
    pub fn next_block_id(&self) -> u64 {
        self.next_block_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publishes a freshly written part
    ///
    /// # Errors
    ///
    /// Will return `Err(Conflict)` if a part of the same name is already live.
    pub fn add_part(&self, part: PartInfo) -> crate::Result<Arc<PartInfo>> {
        let mut inner = self.inner.write().expect("lock is poisoned");

        if inner.by_name.contains_key(&part.name) {
            return Err(crate::Error::Conflict);
        }

        let part = Arc::new(part);
        inner.insert(part.clone());
        self.persist(&inner)?;

        Ok(part)
    }

    /// Atomically replaces a merged set of parts with the part that
    /// supersedes them.
    ///
    /// # Errors
    ///
    /// Will return `Err(Conflict)` if any of the old parts is no longer live;
    /// in that case nothing is changed.
    pub fn replace_parts(
        &self,
        old: &[Arc<PartInfo>],
        new: PartInfo,
    ) -> crate::Result<Arc<PartInfo>> {
        let mut inner = self.inner.write().expect("lock is poisoned");

        if old.iter().any(|part| !inner.by_name.contains_key(&part.name)) {
            return Err(crate::Error::Conflict);
        }

        for part in old {
            log::trace!("Retiring part {}", part.name);
            inner.remove(&part.name);
        }

        let new = Arc::new(new);
        log::trace!("Publishing part {}", new.name);
        inner.insert(new.clone());

        // NOTE: This is really important
        // Write the manifest without the retired parts first
        // Otherwise their folders get deleted while still referenced!
        self.persist(&inner)?;

        Ok(new)
    }

    /// Whether the part currently participates in a merge
    #[must_use]
    pub fn is_busy(&self, name: &str) -> bool {
        self.inner
            .read()
            .expect("lock is poisoned")
            .busy
            .contains(name)
    }

    /// Marks parts busy for the lifetime of the returned guard.
    ///
    /// Returns `None` if any of them is already busy (another worker was
    /// faster); in that case nothing is marked.
    #[must_use]
    pub fn mark_busy(self: &Arc<Self>, names: &[Arc<str>]) -> Option<BusyGuard> {
        let mut inner = self.inner.write().expect("lock is poisoned");

        if names.iter().any(|name| inner.busy.contains(name)) {
            return None;
        }

        for name in names {
            inner.busy.insert(name.clone());
        }

        Some(BusyGuard {
            registry: self.clone(),
            names: names.to_vec(),
        })
    }

    fn unmark_busy(&self, names: &[Arc<str>]) {
        let mut inner = self.inner.write().expect("lock is poisoned");

        for name in names {
            inner.busy.remove(name);
        }
    }
}

/// Scoped busy marking; dropping the guard releases the parts
pub struct BusyGuard {
    registry: Arc<PartRegistry>,
    names: Vec<Arc<str>>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.registry.unmark_busy(&self.names);
    }
}
