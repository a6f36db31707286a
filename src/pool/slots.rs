//! Pool slot bookkeeping.
//!
//! Slots are numbered `1..=pool_size` and double as the participant number
//! handed to the worker occupying them (participant index = slot − 1).

use super::proc::WorkerProc;
use nix::unistd::Pid;

/// Mapping from pool slot to the worker currently occupying it.
#[derive(Debug)]
pub struct WorkerSlots {
    slots: Vec<Option<WorkerProc>>,
}

impl WorkerSlots {
    /// `pool_size` vacant slots.
    pub fn new(pool_size: usize) -> Self {
        Self {
            slots: vec![None; pool_size],
        }
    }

    /// Number of occupied slots.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Put `proc` into `slot`, returning whoever was there before.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is outside `1..=len()`.
    pub fn occupy(&mut self, slot: usize, proc: WorkerProc) -> Option<WorkerProc> {
        self.slots[slot - 1].replace(proc)
    }

    /// Slot currently held by `pid`.
    pub fn find(&self, pid: Pid) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|p| p.pid() == pid))
            .map(|i| i + 1)
    }

    /// Mark `slot` vacant.
    pub fn vacate(&mut self, slot: usize) -> Option<WorkerProc> {
        self.slots.get_mut(slot.checked_sub(1)?)?.take()
    }

    /// Occupied slots with their workers.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &WorkerProc)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|p| (i + 1, p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: i32, record: usize) -> WorkerProc {
        WorkerProc::new(Pid::from_raw(pid), record)
    }

    #[test]
    fn test_new_slots_are_vacant() {
        let mut slots = WorkerSlots::new(3);
        assert_eq!(slots.live(), 0);
        assert!(slots.vacate(1).is_none());
        assert_eq!(slots.occupied().count(), 0);
    }

    #[test]
    fn test_occupy_and_find() {
        let mut slots = WorkerSlots::new(3);
        assert!(slots.occupy(1, proc(100, 0)).is_none());
        assert!(slots.occupy(3, proc(300, 2)).is_none());

        assert_eq!(slots.live(), 2);
        assert_eq!(slots.find(Pid::from_raw(300)), Some(3));
        assert_eq!(slots.find(Pid::from_raw(100)), Some(1));
        assert_eq!(slots.find(Pid::from_raw(200)), None);
    }

    #[test]
    fn test_respawn_replaces_identity() {
        let mut slots = WorkerSlots::new(2);
        slots.occupy(2, proc(100, 0));
        let previous = slots.occupy(2, proc(101, 5)).unwrap();
        assert_eq!(previous.pid(), Pid::from_raw(100));

        // The old pid no longer maps to the slot.
        assert_eq!(slots.find(Pid::from_raw(100)), None);
        assert_eq!(slots.find(Pid::from_raw(101)), Some(2));
        let (slot, current) = slots.occupied().next().unwrap();
        assert_eq!((slot, current.record()), (2, 5));
    }

    #[test]
    fn test_vacate() {
        let mut slots = WorkerSlots::new(2);
        slots.occupy(1, proc(100, 0));
        assert_eq!(slots.vacate(1).unwrap().pid(), Pid::from_raw(100));
        assert!(slots.vacate(1).is_none());
        assert!(slots.vacate(0).is_none());
        assert!(slots.vacate(9).is_none());
        assert_eq!(slots.live(), 0);
    }

    #[test]
    fn test_occupied_reports_slot_numbers() {
        let mut slots = WorkerSlots::new(3);
        slots.occupy(2, proc(200, 1));
        let occupied: Vec<_> = slots.occupied().map(|(slot, p)| (slot, p.pid())).collect();
        assert_eq!(occupied, vec![(2, Pid::from_raw(200))]);
    }
}
