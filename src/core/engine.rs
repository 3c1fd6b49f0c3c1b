//! Gateway poll engine
//!
//! Walks the active mapping table once per cycle, reading every entry from
//! its RS485 slave and storing the values in the [`RegisterMirror`] at the
//! entry's TCP offset. The serial bus sits behind a mutex so at most one
//! transaction is ever outstanding, no matter who asks.
//!
//! New configurations arrive on a channel from the configuration store and
//! are adopted at the start of the next cycle; a cycle in flight finishes
//! against the table it started with.

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::{
    core::mirror::RegisterMirror,
    protocol::{
        mapping::MappingEntry, modbus::chunk_reads, settings::Configuration,
    },
};

/// Half-duplex register transport to the RS485 slaves.
pub trait RegisterBus: Send {
    fn read_holding_registers(
        &mut self,
        slave_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>>;

    fn set_baud_rate(&mut self, _baud: u32) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    /// Wall-clock duration of the last complete cycle
    pub last_cycle_ms: u64,
    pub cycles: u64,
    /// Failed transactions during the last cycle
    pub failed_reads: u64,
}

pub struct PollEngine {
    bus: Mutex<Box<dyn RegisterBus>>,
    mirror: Arc<RegisterMirror>,
    active: Mutex<Arc<Configuration>>,
    updates: flume::Receiver<Arc<Configuration>>,
    stats: Mutex<CycleStats>,
    /// Set while the active table fails validation
    suspended: AtomicBool,
}

/// Overlapping or out-of-range entries would race each other in the mirror,
/// so such a table is never polled.
fn table_is_pollable(config: &Configuration) -> bool {
    match config.validate() {
        Ok(()) => true,
        Err(err) => {
            log::error!("Active table is invalid, polling suspended until a valid one is saved: {err}");
            false
        }
    }
}

impl PollEngine {
    pub fn new(
        bus: Box<dyn RegisterBus>,
        mirror: Arc<RegisterMirror>,
        initial: Arc<Configuration>,
        updates: flume::Receiver<Arc<Configuration>>,
    ) -> Self {
        let suspended = AtomicBool::new(!table_is_pollable(&initial));
        Self {
            bus: Mutex::new(bus),
            mirror,
            active: Mutex::new(initial),
            updates,
            stats: Mutex::new(CycleStats::default()),
            suspended,
        }
    }

    pub fn mirror(&self) -> &Arc<RegisterMirror> {
        &self.mirror
    }

    pub fn stats(&self) -> CycleStats {
        *self.stats.lock()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> Arc<Configuration> {
        Arc::clone(&*self.active.lock())
    }

    /// Switches to the newest pending configuration, if any.
    ///
    /// Mirror ranges belonging to entries that disappeared are zeroed so
    /// TCP clients do not keep reading values nobody refreshes.
    fn adopt_pending(&self) -> Arc<Configuration> {
        let mut active = self.active.lock();
        let Some(next) = self.updates.try_iter().last() else {
            return Arc::clone(&*active);
        };

        for old in active.items.iter() {
            if !next.items.iter().any(|e| e == old) {
                self.mirror.clear(old.tcp_address, old.length);
            }
        }

        if next.settings.baud != active.settings.baud {
            match self.bus.lock().set_baud_rate(next.settings.baud) {
                Ok(()) => log::info!("Serial link switched to {} baud", next.settings.baud),
                Err(err) => log::warn!("Failed to switch baud rate: {err}"),
            }
        }

        log::info!(
            "Poll engine adopted new table with {} entries",
            next.items.len()
        );
        self.suspended
            .store(!table_is_pollable(&next), Ordering::SeqCst);
        *active = Arc::clone(&next);
        next
    }

    fn poll_entry(&self, entry: &MappingEntry) -> u64 {
        let mut failed = 0;
        for (address, count) in chunk_reads(entry.register_address, entry.length) {
            let offset = address - entry.register_address;
            let result = self
                .bus
                .lock()
                .read_holding_registers(entry.slave_id, address, count);
            match result {
                Ok(values) => match entry.tcp_address.checked_add(offset) {
                    Some(target) => self.mirror.write(target, &values),
                    None => log::warn!("Entry for slave {} runs past TCP offset 65535", entry.slave_id),
                },
                Err(err) => {
                    failed += 1;
                    log::warn!(
                        "Read of slave {} registers {}..+{} failed: {err}",
                        entry.slave_id,
                        address,
                        count
                    );
                }
            }
        }
        failed
    }

    /// Polls every entry of the active table once.
    pub fn run_cycle(&self) -> CycleStats {
        let config = self.adopt_pending();
        let started = Instant::now();

        let failed_reads = if self.is_suspended() {
            0
        } else {
            config.items.iter().map(|e| self.poll_entry(e)).sum()
        };

        let mut stats = self.stats.lock();
        stats.last_cycle_ms = started.elapsed().as_millis() as u64;
        stats.cycles += 1;
        stats.failed_reads = failed_reads;
        log::debug!(
            "Poll cycle {} finished in {} ms ({} failed reads)",
            stats.cycles,
            stats.last_cycle_ms,
            failed_reads
        );
        *stats
    }

    /// Runs cycles until `stop_rx` fires or its sender goes away, pausing
    /// `interval` between cycles.
    pub fn run(&self, interval: Duration, stop_rx: flume::Receiver<()>) {
        log::info!("Poll engine started (interval {} ms)", interval.as_millis());
        loop {
            self.run_cycle();
            match stop_rx.recv_timeout(interval) {
                Err(flume::RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("Poll engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mapping::MappingTable;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every read with `slave * 1000 + register`.
    #[derive(Clone, Default)]
    struct CountingBus {
        calls: Arc<AtomicUsize>,
        baud: Arc<Mutex<Option<u32>>>,
        failing_slave: Option<u8>,
    }

    impl RegisterBus for CountingBus {
        fn read_holding_registers(&mut self, slave: u8, address: u16, count: u16) -> Result<Vec<u16>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_slave == Some(slave) {
                return Err(anyhow!("timeout"));
            }
            Ok((address..address + count)
                .map(|r| slave as u16 * 1000 + r)
                .collect())
        }

        fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
            *self.baud.lock() = Some(baud);
            Ok(())
        }
    }

    fn config(entries: Vec<MappingEntry>) -> Arc<Configuration> {
        Arc::new(Configuration::new(Default::default(), MappingTable::new(entries)))
    }

    fn engine(bus: CountingBus, initial: Arc<Configuration>) -> (PollEngine, flume::Sender<Arc<Configuration>>) {
        let (tx, rx) = flume::unbounded();
        let engine = PollEngine::new(Box::new(bus), Arc::new(RegisterMirror::new()), initial, rx);
        (engine, tx)
    }

    #[test]
    fn test_cycle_fills_mirror_at_tcp_offsets() {
        let bus = CountingBus::default();
        let (engine, _tx) = engine(
            bus.clone(),
            config(vec![MappingEntry::new(1, 10, 2, 0), MappingEntry::new(2, 0, 3, 6)]),
        );

        let stats = engine.run_cycle();
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.failed_reads, 0);
        assert_eq!(bus.calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.mirror().read(0, 2), Some(vec![1010, 1011]));
        assert_eq!(engine.mirror().read(6, 3), Some(vec![2000, 2001, 2002]));
    }

    #[test]
    fn test_long_entry_is_chunked() {
        let bus = CountingBus::default();
        let (engine, _tx) = engine(bus.clone(), config(vec![MappingEntry::new(1, 0, 300, 1000)]));

        engine.run_cycle();
        assert_eq!(bus.calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.mirror().read(1000 + 299, 1), Some(vec![1299]));
        assert_eq!(engine.mirror().read(1000 + 125, 1), Some(vec![1125]));
    }

    #[test]
    fn test_failed_slave_does_not_stop_cycle() {
        let bus = CountingBus {
            failing_slave: Some(2),
            ..Default::default()
        };
        let (engine, _tx) = engine(
            bus.clone(),
            config(vec![MappingEntry::new(2, 0, 1, 0), MappingEntry::new(3, 0, 1, 1)]),
        );

        let stats = engine.run_cycle();
        assert_eq!(stats.failed_reads, 1);
        assert_eq!(engine.mirror().read(0, 2), Some(vec![0, 3000]));
    }

    #[test]
    fn test_new_table_adopted_at_cycle_start() {
        let bus = CountingBus::default();
        let (engine, tx) = engine(bus.clone(), config(vec![MappingEntry::new(1, 0, 2, 0)]));
        engine.run_cycle();
        assert_eq!(engine.mirror().read(0, 2), Some(vec![1000, 1001]));

        let mut next = Configuration::new(Default::default(), MappingTable::new(vec![MappingEntry::new(5, 0, 1, 10)]));
        next.settings.baud = 38400;
        tx.send(Arc::new(next)).unwrap();
        assert_eq!(engine.active().items.len(), 1);
        assert_eq!(engine.active().items.entries()[0].slave_id, 1);

        engine.run_cycle();
        assert_eq!(engine.active().items.entries()[0].slave_id, 5);
        assert_eq!(*bus.baud.lock(), Some(38400));
        // Old range no longer refreshed, so it was cleared.
        assert_eq!(engine.mirror().read(0, 2), Some(vec![0, 0]));
        assert_eq!(engine.mirror().read(10, 1), Some(vec![5000]));
    }

    #[test]
    fn test_run_stops_on_signal() {
        let bus = CountingBus::default();
        let (engine, _tx) = engine(bus.clone(), config(vec![MappingEntry::new(1, 0, 1, 0)]));
        let engine = Arc::new(engine);
        let (stop_tx, stop_rx) = flume::bounded(1);

        let runner = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.run(Duration::from_millis(5), stop_rx))
        };
        std::thread::sleep(Duration::from_millis(30));
        stop_tx.send(()).unwrap();
        runner.join().unwrap();

        assert!(engine.stats().cycles >= 1);
    }

    #[test]
    fn test_invalid_table_is_not_polled() {
        let bus = CountingBus::default();
        let overlapping = config(vec![MappingEntry::new(1, 0, 5, 0), MappingEntry::new(2, 0, 3, 4)]);
        let (engine, tx) = engine(bus.clone(), overlapping);
        assert!(engine.is_suspended());

        let stats = engine.run_cycle();
        assert_eq!(stats.cycles, 1);
        assert_eq!(bus.calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.mirror().read(0, 8), Some(vec![0; 8]));

        tx.send(config(vec![MappingEntry::new(2, 0, 3, 4)])).unwrap();
        engine.run_cycle();
        assert!(!engine.is_suspended());
        assert_eq!(bus.calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.mirror().read(4, 3), Some(vec![2000, 2001, 2002]));
    }
}
