//! Fixed-capacity registry of active network interfaces.
//!
//! One record per live interface, keyed by a small slot index that doubles
//! as the correlation id handed to the engine. The table enforces the role
//! rules up front so conflicting lifecycles fail before any hardware is
//! touched.

use crate::eloop::LoopTask;

/// Maximum number of simultaneously active interfaces.
pub const DEVICE_CAPACITY: usize = 2;

/// Longest interface name accepted, in bytes.
pub const IFNAME_MAX: usize = 16;

/// Hardware role of one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceRole {
    Station,
    AccessPoint,
    Mesh,
}

impl InterfaceRole {
    /// Which engine loop role serves this interface. Mesh shares the
    /// station-side engine.
    pub fn loop_task(self) -> LoopTask {
        match self {
            Self::Station | Self::Mesh => LoopTask::Station,
            Self::AccessPoint => LoopTask::AccessPoint,
        }
    }
}

impl std::fmt::Display for InterfaceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Station => write!(f, "station"),
            Self::AccessPoint => write!(f, "access-point"),
            Self::Mesh => write!(f, "mesh"),
        }
    }
}

/// Lifecycle state of one record. Absent records simply do not exist in
/// the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    Creating,
    Running,
    Stopping,
}

/// Errors from table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    CapacityExceeded,
    /// A conflicting role already occupies the table.
    RoleConflict(&'static str),
    InvalidName(&'static str),
    NotFound,
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapacityExceeded => write!(f, "interface table is full"),
            Self::RoleConflict(detail) => write!(f, "role conflict: {}", detail),
            Self::InvalidName(detail) => write!(f, "invalid interface name: {}", detail),
            Self::NotFound => write!(f, "no such interface"),
        }
    }
}

impl std::error::Error for TableError {}

/// One row of the table.
#[derive(Debug, Clone)]
pub struct InterfaceRecord {
    /// Slot index, reused as the engine-side correlation id.
    pub slot: usize,
    pub name: String,
    pub role: InterfaceRole,
    pub state: InterfaceState,
    /// Whether an engine instance is bound to this interface yet.
    pub engine_attached: bool,
}

/// The registry itself. Callers guard it with a short-lived lock; nothing
/// here blocks.
pub struct DeviceTable {
    slots: [Option<InterfaceRecord>; DEVICE_CAPACITY],
}

impl DeviceTable {
    pub fn new() -> Self {
        Self {
            slots: [None, None],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterfaceRecord> {
        self.slots.iter().flatten()
    }

    /// Whether `role` may be added right now. Each role exists at most
    /// once; mesh and access-point exclude each other.
    pub fn precheck(&self, role: InterfaceRole) -> Result<(), TableError> {
        if self.len() >= DEVICE_CAPACITY {
            return Err(TableError::CapacityExceeded);
        }
        for record in self.iter() {
            if record.role == role {
                return Err(TableError::RoleConflict("role already active"));
            }
            match (record.role, role) {
                (InterfaceRole::Mesh, InterfaceRole::AccessPoint)
                | (InterfaceRole::AccessPoint, InterfaceRole::Mesh) => {
                    return Err(TableError::RoleConflict(
                        "mesh and access-point are exclusive",
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Insert a record in the `Creating` state. Runs the precheck again so
    /// insertion stays safe even if the caller skipped it.
    pub fn insert(&mut self, name: &str, role: InterfaceRole) -> Result<usize, TableError> {
        if name.is_empty() {
            return Err(TableError::InvalidName("empty"));
        }
        if name.len() > IFNAME_MAX {
            return Err(TableError::InvalidName("too long"));
        }
        self.precheck(role)?;
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(InterfaceRecord {
                    slot,
                    name: name.to_owned(),
                    role,
                    state: InterfaceState::Creating,
                    engine_attached: false,
                });
                return Ok(slot);
            }
        }
        Err(TableError::CapacityExceeded)
    }

    pub fn get(&self, slot: usize) -> Option<&InterfaceRecord> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut InterfaceRecord> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub fn find_role(&self, role: InterfaceRole) -> Option<&InterfaceRecord> {
        self.iter().find(|record| record.role == role)
    }

    /// Remove and return the record in `slot`.
    pub fn remove(&mut self, slot: usize) -> Option<InterfaceRecord> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Whether another attached record shares `task`'s engine, i.e. whether
    /// removing `slot` leaves that engine with work to do.
    pub fn other_attached_for_task(&self, slot: usize, task: LoopTask) -> bool {
        self.iter().any(|record| {
            record.slot != slot && record.engine_attached && record.role.loop_task() == task
        })
    }

}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Capacity & Role Tests ====================

    #[test]
    fn capacity_is_never_exceeded() {
        let mut table = DeviceTable::new();
        table.insert("wlan0", InterfaceRole::Station).unwrap();
        table.insert("ap0", InterfaceRole::AccessPoint).unwrap();
        assert_eq!(table.len(), DEVICE_CAPACITY);
        assert_eq!(
            table.insert("mesh0", InterfaceRole::Mesh),
            Err(TableError::CapacityExceeded)
        );
    }

    #[test]
    fn duplicate_roles_are_rejected() {
        let mut table = DeviceTable::new();
        table.insert("wlan0", InterfaceRole::Station).unwrap();
        assert_eq!(
            table.insert("wlan1", InterfaceRole::Station),
            Err(TableError::RoleConflict("role already active"))
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn mesh_and_access_point_are_exclusive() {
        let mut table = DeviceTable::new();
        table.insert("mesh0", InterfaceRole::Mesh).unwrap();
        assert!(matches!(
            table.insert("ap0", InterfaceRole::AccessPoint),
            Err(TableError::RoleConflict(_))
        ));
    }

    #[test]
    fn station_and_access_point_coexist() {
        let mut table = DeviceTable::new();
        table.insert("wlan0", InterfaceRole::Station).unwrap();
        assert!(table.insert("ap0", InterfaceRole::AccessPoint).is_ok());
    }

    #[test]
    fn create_destroy_sweep_respects_invariants() {
        let mut table = DeviceTable::new();
        for _ in 0..8 {
            let station = table.insert("wlan0", InterfaceRole::Station).unwrap();
            let ap = table.insert("ap0", InterfaceRole::AccessPoint).unwrap();
            assert!(table.len() <= DEVICE_CAPACITY);
            assert!(table.insert("wlan1", InterfaceRole::Station).is_err());
            table.remove(station).unwrap();
            table.remove(ap).unwrap();
        }
        assert!(table.is_empty());
    }

    // ==================== Record Tests ====================

    #[test]
    fn slot_index_is_stable_identity() {
        let mut table = DeviceTable::new();
        let station = table.insert("wlan0", InterfaceRole::Station).unwrap();
        let ap = table.insert("ap0", InterfaceRole::AccessPoint).unwrap();
        assert_ne!(station, ap);
        table.remove(station);
        // The freed slot is reused; the surviving record keeps its id.
        let mesh = table.insert("mesh0", InterfaceRole::Mesh).unwrap();
        assert_eq!(mesh, station);
        assert_eq!(table.get(ap).unwrap().name, "ap0");
    }

    #[test]
    fn name_bounds_are_enforced() {
        let mut table = DeviceTable::new();
        assert!(table.insert("", InterfaceRole::Station).is_err());
        assert!(table
            .insert(&"x".repeat(IFNAME_MAX + 1), InterfaceRole::Station)
            .is_err());
    }

    #[test]
    fn other_attached_tracks_shared_engine() {
        let mut table = DeviceTable::new();
        let station = table.insert("wlan0", InterfaceRole::Station).unwrap();
        let mesh = table.insert("mesh0", InterfaceRole::Mesh).unwrap();
        table.get_mut(station).unwrap().engine_attached = true;
        table.get_mut(mesh).unwrap().engine_attached = true;
        assert!(table.other_attached_for_task(station, LoopTask::Station));
        table.get_mut(mesh).unwrap().engine_attached = false;
        assert!(!table.other_attached_for_task(station, LoopTask::Station));
    }
}
