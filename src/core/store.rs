//! Configuration store
//!
//! Holds the active [`Configuration`] behind an `Arc` that is swapped, never
//! mutated, so readers always see a whole snapshot. Writers are serialized by
//! a dedicated lock and follow a fixed sequence: credential, validation,
//! persistence, swap, notification. Any failure returns before the swap and
//! the previous snapshot stays active.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::{
    core::{
        error::{GatewayError, GatewayResult, ValidationError},
        persistence::ConfigPersistence,
    },
    protocol::settings::Configuration,
};

pub struct ConfigStore {
    current: RwLock<Arc<Configuration>>,
    write_lock: Mutex<()>,
    persistence: Box<dyn ConfigPersistence>,
    password: String,
    max_entries: usize,
    subscribers: Mutex<Vec<flume::Sender<Arc<Configuration>>>>,
}

impl ConfigStore {
    /// Loads the persisted configuration, or creates and persists the
    /// defaults on first boot.
    pub fn open(
        persistence: Box<dyn ConfigPersistence>,
        password: impl Into<String>,
        max_entries: usize,
    ) -> GatewayResult<Self> {
        let initial = match persistence.load()? {
            Some(config) => {
                if let Err(err) = config.validate() {
                    // Still served over HTTP so the operator can fix it; the
                    // engine refuses to poll it.
                    log::error!("Persisted configuration does not validate: {err}");
                }
                config
            }
            None => {
                let config = Configuration::default();
                persistence.save(&config)?;
                log::info!("Created default configuration");
                config
            }
        };

        Ok(Self {
            current: RwLock::new(Arc::new(initial)),
            write_lock: Mutex::new(()),
            persistence,
            password: password.into(),
            max_entries,
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Current snapshot. Never blocks on a write in progress for longer than
    /// the pointer swap.
    pub fn read(&self) -> Arc<Configuration> {
        Arc::clone(&*self.current.read())
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Fails closed: a missing credential is rejected the same way as a
    /// wrong one.
    pub fn verify_credential(&self, credential: Option<&str>) -> GatewayResult<()> {
        match credential {
            Some(offered) if constant_time_eq(offered.as_bytes(), self.password.as_bytes()) => {
                Ok(())
            }
            _ => {
                log::warn!("Configuration write rejected: bad or missing credential");
                Err(GatewayError::Authentication)
            }
        }
    }

    /// Replaces the whole configuration.
    ///
    /// Concurrent writers queue on the write lock; the last one to get through
    /// wins. Subscribers receive the new snapshot after it is persisted and
    /// active.
    pub fn write(
        &self,
        candidate: Configuration,
        credential: Option<&str>,
    ) -> GatewayResult<Arc<Configuration>> {
        let _guard = self.write_lock.lock();

        self.verify_credential(credential)?;

        if candidate.items.len() > self.max_entries {
            let err = ValidationError::TooManyEntries {
                count: candidate.items.len(),
                max: self.max_entries,
            };
            log::warn!("Configuration write rejected: {err}");
            return Err(err.into());
        }
        if let Err(err) = candidate.validate() {
            log::warn!("Configuration write rejected: {err}");
            return Err(err.into());
        }

        if let Err(err) = self.persistence.save(&candidate) {
            log::error!("Configuration write failed, keeping previous snapshot: {err}");
            return Err(err);
        }

        let snapshot = Arc::new(candidate);
        *self.current.write() = Arc::clone(&snapshot);
        log::info!(
            "Configuration replaced: {} mapping entries, baud {}, port {}",
            snapshot.items.len(),
            snapshot.settings.baud,
            snapshot.settings.port
        );

        self.subscribers
            .lock()
            .retain(|tx| tx.send(Arc::clone(&snapshot)).is_ok());

        Ok(snapshot)
    }

    /// Channel receiving every snapshot installed after this call.
    pub fn subscribe(&self) -> flume::Receiver<Arc<Configuration>> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        mapping::{MappingEntry, MappingTable},
        settings::DeviceSettings,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryPersistence {
        saved: Mutex<Option<Configuration>>,
        saves: AtomicUsize,
        fail: AtomicBool,
    }

    impl ConfigPersistence for Arc<MemoryPersistence> {
        fn load(&self) -> GatewayResult<Option<Configuration>> {
            Ok(self.saved.lock().clone())
        }

        fn save(&self, config: &Configuration) -> GatewayResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(GatewayError::Io("disk full".to_string()));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.saved.lock() = Some(config.clone());
            Ok(())
        }
    }

    fn open_store() -> (ConfigStore, Arc<MemoryPersistence>) {
        let persistence = Arc::new(MemoryPersistence::default());
        let store = ConfigStore::open(Box::new(Arc::clone(&persistence)), "secret", 8).unwrap();
        (store, persistence)
    }

    fn candidate(entries: Vec<MappingEntry>) -> Configuration {
        Configuration::new(
            DeviceSettings {
                baud: 19200,
                ..Default::default()
            },
            MappingTable::new(entries),
        )
    }

    #[test]
    fn test_first_boot_persists_defaults() {
        let (store, persistence) = open_store();
        assert_eq!(*store.read(), Configuration::default());
        assert_eq!(persistence.saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let (store, persistence) = open_store();
        let config = candidate(vec![
            MappingEntry::new(1, 0, 5, 0),
            MappingEntry::new(2, 0, 3, 6),
            MappingEntry::new(1, 0, 5, 20),
        ]);

        store.write(config.clone(), Some("secret")).unwrap();
        assert_eq!(*store.read(), config);
        assert_eq!(persistence.saved.lock().clone(), Some(config));
    }

    #[test]
    fn test_bad_credential_leaves_snapshot() {
        let (store, _) = open_store();
        let before = store.read();

        let result = store.write(candidate(vec![]), Some("wrong"));
        assert!(matches!(result, Err(GatewayError::Authentication)));
        let result = store.write(candidate(vec![]), None);
        assert!(matches!(result, Err(GatewayError::Authentication)));
        assert_eq!(store.read(), before);
    }

    #[test]
    fn test_overlap_leaves_snapshot_and_disk() {
        let (store, persistence) = open_store();
        let before = store.read();

        let result = store.write(
            candidate(vec![MappingEntry::new(1, 0, 5, 0), MappingEntry::new(1, 0, 3, 5)]),
            Some("secret"),
        );
        assert!(matches!(
            result,
            Err(GatewayError::Validation(ValidationError::Overlap { .. }))
        ));
        assert_eq!(store.read(), before);
        assert_eq!(persistence.saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_persistence_failure_keeps_previous_snapshot() {
        let (store, persistence) = open_store();
        let before = store.read();
        persistence.fail.store(true, Ordering::SeqCst);

        let result = store.write(candidate(vec![MappingEntry::new(1, 0, 1, 0)]), Some("secret"));
        assert!(matches!(result, Err(GatewayError::Io(_))));
        assert_eq!(store.read(), before);
    }

    #[test]
    fn test_same_write_twice_is_idempotent() {
        let (store, persistence) = open_store();
        let config = candidate(vec![MappingEntry::new(4, 100, 10, 50)]);

        store.write(config.clone(), Some("secret")).unwrap();
        let first = persistence.saved.lock().clone();
        store.write(config.clone(), Some("secret")).unwrap();
        assert_eq!(persistence.saved.lock().clone(), first);
        assert_eq!(*store.read(), config);
    }

    #[test]
    fn test_entry_limit_enforced() {
        let (store, _) = open_store();
        let entries = (0..9).map(|i| MappingEntry::new(1, 0, 1, i * 2)).collect();
        assert!(matches!(
            store.write(candidate(entries), Some("secret")),
            Err(GatewayError::Validation(ValidationError::TooManyEntries { .. }))
        ));
    }

    #[test]
    fn test_subscribers_receive_new_snapshot() {
        let (store, _) = open_store();
        let updates = store.subscribe();
        let config = candidate(vec![MappingEntry::new(1, 0, 2, 0)]);

        assert!(store.write(candidate(vec![]), Some("nope")).is_err());
        assert!(updates.try_recv().is_err());

        store.write(config.clone(), Some("secret")).unwrap();
        assert_eq!(*updates.try_recv().unwrap(), config);
    }

    #[test]
    fn test_reopen_loads_saved_configuration() {
        let persistence = Arc::new(MemoryPersistence::default());
        let config = candidate(vec![MappingEntry::new(9, 1, 1, 1)]);
        {
            let store =
                ConfigStore::open(Box::new(Arc::clone(&persistence)), "secret", 8).unwrap();
            store.write(config.clone(), Some("secret")).unwrap();
        }
        let store = ConfigStore::open(Box::new(Arc::clone(&persistence)), "secret", 8).unwrap();
        assert_eq!(*store.read(), config);
    }

    #[test]
    fn test_concurrent_writers_serialize() {
        let (store, _) = open_store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..4u16)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let config = candidate(vec![MappingEntry::new(1, 0, 1, i)]);
                    store.write(config, Some("secret")).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let table = store.read();
        assert_eq!(table.items.len(), 1);
        assert!(table.items.entries()[0].tcp_address < 4);
    }
}
