//! Shutdown registry mapping VM id → auto-shutdown deadline.
//!
//! Shared between the request handlers and the sweep loop. Clones share the
//! same map. The lock is never held across an `.await`: callers read or
//! mutate, release, then talk to the hypervisor.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use pvekeep_core::{VmId, VmInfo};

use crate::policy;

/// When a VM will be shut down, and how many hours of delay that represents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShutdownEntry {
    pub deadline: DateTime<Utc>,
    pub total_delay_hours: f64,
}

impl ShutdownEntry {
    /// Deadlines are inclusive: an entry whose deadline equals `now` is due.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline <= now
    }
}

/// Stamp issued whenever an entry is created or replaced. A delay keeps the
/// stamp; start, reset and adoption issue a new one. Stamps only grow.
pub type Generation = u64;

/// Outcome of reconciling the registry against a VM listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Running VMs that had no entry and now do.
    pub adopted: Vec<VmId>,
    /// Entries removed because their VM is missing or not running.
    pub dropped: Vec<VmId>,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    entry: ShutdownEntry,
    generation: Generation,
}

#[derive(Default)]
struct Slots {
    by_vm: HashMap<VmId, Slot>,
    issued: Generation,
}

impl Slots {
    fn issue(&mut self) -> Generation {
        self.issued += 1;
        self.issued
    }

    fn place(&mut self, vmid: VmId, entry: ShutdownEntry) {
        let generation = self.issue();
        self.by_vm.insert(vmid, Slot { entry, generation });
    }

    /// Track every running VM that has no entry yet, anchoring its deadline
    /// to its uptime.
    fn adopt(&mut self, vms: &[VmInfo], now: DateTime<Utc>) -> Vec<VmId> {
        let mut adopted = Vec::new();
        for vm in vms.iter().filter(|vm| vm.is_running()) {
            if !self.by_vm.contains_key(&vm.vmid) {
                self.place(vm.vmid, policy::anchored_entry(vm.uptime, now));
                adopted.push(vm.vmid);
            }
        }
        adopted
    }
}

#[derive(Clone, Default)]
pub struct ShutdownRegistry {
    slots: Arc<Mutex<Slots>>,
}

impl ShutdownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, vmid: VmId) -> Option<ShutdownEntry> {
        self.lock().by_vm.get(&vmid).map(|slot| slot.entry)
    }

    pub fn contains(&self, vmid: VmId) -> bool {
        self.lock().by_vm.contains_key(&vmid)
    }

    /// Current stamp of the entry for `vmid`.
    pub fn generation(&self, vmid: VmId) -> Option<Generation> {
        self.lock().by_vm.get(&vmid).map(|slot| slot.generation)
    }

    /// Latest stamp issued so far. Every entry that exists now carries a
    /// stamp at or below it; anything created afterwards is above it.
    pub fn watermark(&self) -> Generation {
        self.lock().issued
    }

    /// Insert or replace the entry for `vmid` under a new stamp.
    pub fn upsert(&self, vmid: VmId, entry: ShutdownEntry) {
        self.lock().place(vmid, entry);
    }

    pub fn remove(&self, vmid: VmId) -> Option<ShutdownEntry> {
        self.lock().by_vm.remove(&vmid).map(|slot| slot.entry)
    }

    /// Remove the entry only if it still carries `generation`.
    ///
    /// The sweep uses this once a shutdown call returns: a delay that landed
    /// meanwhile kept the stamp and is removed with the entry, while an
    /// entry re-created by a concurrent start or reset survives.
    pub fn remove_if_generation(&self, vmid: VmId, generation: Generation) -> bool {
        let mut slots = self.lock();
        match slots.by_vm.get(&vmid) {
            Some(slot) if slot.generation == generation => {
                slots.by_vm.remove(&vmid);
                true
            }
            _ => false,
        }
    }

    /// Read-modify-write under one lock acquisition. `f` sees the current
    /// entry (if any) and returns the replacement, which is also returned.
    /// An existing entry keeps its stamp; a new one gets a fresh stamp.
    pub fn update<F>(&self, vmid: VmId, f: F) -> ShutdownEntry
    where
        F: FnOnce(Option<&ShutdownEntry>) -> ShutdownEntry,
    {
        let mut slots = self.lock();
        match slots.by_vm.get_mut(&vmid) {
            Some(slot) => {
                slot.entry = f(Some(&slot.entry));
                slot.entry
            }
            None => {
                let next = f(None);
                slots.place(vmid, next);
                next
            }
        }
    }

    /// Insert the entry built by `f` unless `vmid` is already tracked.
    /// Returns true if an entry was inserted.
    pub fn insert_if_absent<F>(&self, vmid: VmId, f: F) -> bool
    where
        F: FnOnce() -> ShutdownEntry,
    {
        let mut slots = self.lock();
        if slots.by_vm.contains_key(&vmid) {
            return false;
        }
        slots.place(vmid, f());
        true
    }

    /// Bring the registry in line with a full listing of the node.
    ///
    /// `listed_at` is the watermark taken before the listing was requested.
    /// Entries stamped at or below it whose VM is absent from `vms` or not
    /// running are dropped; newer entries were written after the listing
    /// started and are kept. Untracked running VMs are then adopted.
    pub fn reconcile(
        &self,
        vms: &[VmInfo],
        listed_at: Generation,
        now: DateTime<Utc>,
    ) -> Reconciliation {
        let running: HashSet<VmId> = vms
            .iter()
            .filter(|vm| vm.is_running())
            .map(|vm| vm.vmid)
            .collect();

        let mut slots = self.lock();
        let mut dropped: Vec<VmId> = slots
            .by_vm
            .iter()
            .filter(|(vmid, slot)| slot.generation <= listed_at && !running.contains(vmid))
            .map(|(vmid, _)| *vmid)
            .collect();
        dropped.sort_unstable();
        for vmid in &dropped {
            slots.by_vm.remove(vmid);
        }

        let adopted = slots.adopt(vms, now);
        Reconciliation { adopted, dropped }
    }

    /// Entries due at `now`, with the stamp each carried when read.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<(VmId, Generation)> {
        let mut due: Vec<_> = self
            .lock()
            .by_vm
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(now))
            .map(|(vmid, slot)| (*vmid, slot.generation))
            .collect();
        due.sort_unstable_by_key(|(vmid, _)| *vmid);
        due
    }

    /// Point-in-time copy of every entry.
    pub fn snapshot(&self) -> Vec<(VmId, ShutdownEntry)> {
        let mut all: Vec<_> = self
            .lock()
            .by_vm
            .iter()
            .map(|(id, slot)| (*id, slot.entry))
            .collect();
        all.sort_unstable_by_key(|(id, _)| *id);
        all
    }

    pub fn len(&self) -> usize {
        self.lock().by_vm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().by_vm.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().expect("registry lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pvekeep_core::VmPowerState;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn entry_at(deadline: DateTime<Utc>) -> ShutdownEntry {
        ShutdownEntry {
            deadline,
            total_delay_hours: 6.0,
        }
    }

    fn vm(vmid: VmId, status: VmPowerState, uptime: u64) -> VmInfo {
        VmInfo {
            vmid,
            status,
            uptime,
            ..Default::default()
        }
    }

    #[test]
    fn expiry_is_inclusive() {
        let entry = entry_at(t0());
        assert!(entry.is_expired(t0()));
        assert!(entry.is_expired(t0() + Duration::seconds(1)));
        assert!(!entry.is_expired(t0() - Duration::seconds(1)));
    }

    #[test]
    fn upsert_get_remove() {
        let reg = ShutdownRegistry::new();
        assert!(reg.is_empty());

        reg.upsert(100, entry_at(t0()));
        assert_eq!(reg.get(100), Some(entry_at(t0())));
        assert!(reg.contains(100));

        reg.upsert(100, entry_at(t0() + Duration::hours(1)));
        assert_eq!(reg.len(), 1);

        assert!(reg.remove(100).is_some());
        assert!(reg.remove(100).is_none());
        assert!(reg.get(100).is_none());
    }

    #[test]
    fn clones_share_state() {
        let reg = ShutdownRegistry::new();
        let other = reg.clone();
        other.upsert(7, entry_at(t0()));
        assert!(reg.contains(7));
    }

    #[test]
    fn remove_if_generation_spares_replaced_entry() {
        let reg = ShutdownRegistry::new();
        reg.upsert(1, entry_at(t0()));
        reg.upsert(2, entry_at(t0()));
        let first = reg.generation(1).unwrap();
        let second = reg.generation(2).unwrap();

        // Delay keeps the stamp.
        reg.update(1, |cur| policy::apply_delay(cur, t0()));
        assert_eq!(reg.generation(1), Some(first));
        // Start replaces the entry.
        reg.upsert(2, entry_at(t0() + Duration::hours(6)));
        assert_ne!(reg.generation(2), Some(second));

        assert!(reg.remove_if_generation(1, first));
        assert!(!reg.remove_if_generation(2, second));
        assert!(!reg.remove_if_generation(3, first));
        assert!(!reg.contains(1));
        assert!(reg.contains(2));
    }

    #[test]
    fn due_lists_expired_with_stamps() {
        let reg = ShutdownRegistry::new();
        reg.upsert(3, entry_at(t0()));
        reg.upsert(1, entry_at(t0() - Duration::minutes(1)));
        reg.upsert(2, entry_at(t0() + Duration::seconds(1)));

        let due = reg.due(t0());
        assert_eq!(
            due,
            vec![
                (1, reg.generation(1).unwrap()),
                (3, reg.generation(3).unwrap())
            ]
        );
    }

    #[test]
    fn update_sees_current_entry() {
        let reg = ShutdownRegistry::new();
        let first = reg.update(5, |cur| {
            assert!(cur.is_none());
            entry_at(t0())
        });
        let second = reg.update(5, |cur| {
            assert_eq!(cur, Some(&first));
            entry_at(t0() + Duration::hours(6))
        });
        assert_eq!(reg.get(5), Some(second));
    }

    #[test]
    fn insert_if_absent_does_not_overwrite() {
        let reg = ShutdownRegistry::new();
        assert!(reg.insert_if_absent(9, || entry_at(t0())));
        assert!(!reg.insert_if_absent(9, || entry_at(t0() + Duration::hours(1))));
        assert_eq!(reg.get(9), Some(entry_at(t0())));
    }

    #[test]
    fn reconcile_adopts_untracked_running_only() {
        let reg = ShutdownRegistry::new();
        let kept = entry_at(t0() + Duration::hours(12));
        reg.upsert(101, kept);

        let vms = vec![
            vm(100, VmPowerState::Running, 7 * 3600),
            vm(101, VmPowerState::Running, 3600),
            vm(102, VmPowerState::Stopped, 0),
        ];
        let rec = reg.reconcile(&vms, reg.watermark(), t0());

        assert_eq!(rec.adopted, vec![100]);
        assert!(rec.dropped.is_empty());
        assert_eq!(reg.get(101), Some(kept));
        assert!(!reg.contains(102));
        assert_eq!(
            reg.get(100).unwrap().deadline,
            t0() + Duration::hours(2) + Duration::minutes(10)
        );
    }

    #[test]
    fn reconcile_drops_stopped_and_missing() {
        let reg = ShutdownRegistry::new();
        reg.upsert(100, entry_at(t0()));
        reg.upsert(101, entry_at(t0() + Duration::hours(1)));
        reg.update(999, |cur| policy::apply_delay(cur, t0()));

        let listed_at = reg.watermark();
        let vms = vec![
            vm(100, VmPowerState::Stopped, 0),
            vm(101, VmPowerState::Running, 3600),
            vm(102, VmPowerState::Running, 7 * 3600),
        ];
        let rec = reg.reconcile(&vms, listed_at, t0());

        assert_eq!(rec.dropped, vec![100, 999]);
        assert_eq!(rec.adopted, vec![102]);
        assert_eq!(reg.get(101), Some(entry_at(t0() + Duration::hours(1))));
        let ids: Vec<_> = reg.snapshot().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![101, 102]);
    }

    #[test]
    fn reconcile_keeps_entries_newer_than_listing() {
        let reg = ShutdownRegistry::new();
        reg.upsert(100, entry_at(t0()));
        let listed_at = reg.watermark();

        // Started while the listing was in flight; the listing still says stopped.
        reg.upsert(100, entry_at(t0() + Duration::hours(6)));
        reg.upsert(200, entry_at(t0() + Duration::hours(6)));

        let vms = vec![vm(100, VmPowerState::Stopped, 0)];
        let rec = reg.reconcile(&vms, listed_at, t0());

        assert!(rec.dropped.is_empty());
        assert!(reg.contains(100));
        assert!(reg.contains(200));
    }

    #[test]
    fn reconcile_on_empty_listing_drops_everything_old() {
        let reg = ShutdownRegistry::new();
        reg.upsert(1, entry_at(t0()));
        reg.upsert(2, entry_at(t0()));

        let rec = reg.reconcile(&[], reg.watermark(), t0());

        assert_eq!(rec.dropped, vec![1, 2]);
        assert!(rec.adopted.is_empty());
        assert!(reg.is_empty());
    }

    #[test]
    fn snapshot_is_sorted_copy() {
        let reg = ShutdownRegistry::new();
        reg.upsert(300, entry_at(t0()));
        reg.upsert(100, entry_at(t0()));
        reg.upsert(200, entry_at(t0()));

        let snap = reg.snapshot();
        reg.remove(100);

        let ids: Vec<_> = snap.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![100, 200, 300]);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let reg = ShutdownRegistry::new();
        reg.upsert(1, entry_at(t0()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        reg.update(1, |cur| policy::apply_delay(cur, t0()));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let entry = reg.get(1).unwrap();
        assert_eq!(entry.deadline, t0() + Duration::hours(6 * 400));
        assert_eq!(entry.total_delay_hours, 6.0 + 6.0 * 400.0);
    }
}
