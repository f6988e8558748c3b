// Box registry and enumerator.
//
// Boxes live in one arena per backend, in discovery order. Each box-type slot
// keeps the arena indices of its instances, so a box is addressed by
// (backend, type index, ordinal) and never holds a reference back to its
// type. A registry is stamped with a generation; handles minted by one
// registry are rejected by every other.

use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uncore_raw::{Backend, BoxType};

use crate::error::{Result, UncoreError};
use crate::uncore::backend::{ConfigSpace, DeviceBus, DeviceLocation};
use crate::uncore::platform::PlatformProfile;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Stable reference to one enumerated box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxHandle {
    generation: u64,
    backend: Backend,
    type_index: usize,
    ordinal: u32,
}

impl BoxHandle {
    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn type_index(&self) -> usize {
        self.type_index
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }
}

impl fmt::Display for BoxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} type {} box {} (generation {})",
            self.backend, self.type_index, self.ordinal, self.generation
        )
    }
}

/// One physical instance of a box type
pub struct UncoreBox<D> {
    ordinal: u32,
    type_index: usize,
    /// Present exactly for windowed boxes
    device: Option<D>,
    lock: Mutex<()>,
}

impl<D: ConfigSpace> UncoreBox<D> {
    fn new(box_type: &BoxType, type_index: usize, ordinal: u32, device: Option<D>) -> Result<Self> {
        let actual = if device.is_some() {
            Backend::Windowed
        } else {
            Backend::Local
        };
        if actual != box_type.backend {
            return Err(UncoreError::BackendMismatch {
                name: box_type.name,
                expected: box_type.backend,
                actual,
            });
        }

        Ok(Self {
            ordinal,
            type_index,
            device,
            lock: Mutex::new(()),
        })
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn type_index(&self) -> usize {
        self.type_index
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    pub fn location(&self) -> Option<DeviceLocation> {
        self.device.as_ref().map(ConfigSpace::location)
    }

    /// Serializes register sequences on this box
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

struct TypeSlot {
    box_type: &'static BoxType,
    members: Vec<usize>,
}

/// All boxes of one backend
pub struct BackendArena<D> {
    backend: Backend,
    types: Vec<TypeSlot>,
    boxes: Vec<UncoreBox<D>>,
}

impl<D: ConfigSpace> BackendArena<D> {
    fn new(backend: Backend, types: &'static [BoxType]) -> Result<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(types.len())
            .map_err(|e| UncoreError::Allocation(format!("{backend} box-type table: {e}")))?;
        slots.extend(types.iter().map(|box_type| TypeSlot {
            box_type,
            members: Vec::new(),
        }));

        Ok(Self {
            backend,
            types: slots,
            boxes: Vec::new(),
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn box_count(&self) -> usize {
        self.boxes.len()
    }

    pub fn box_type(&self, type_index: usize) -> Option<&'static BoxType> {
        self.types.get(type_index).map(|slot| slot.box_type)
    }

    /// Number of live instances of a type
    pub fn instances(&self, type_index: usize) -> usize {
        self.types
            .get(type_index)
            .map(|slot| slot.members.len())
            .unwrap_or(0)
    }

    pub fn get(&self, type_index: usize, ordinal: u32) -> Option<&UncoreBox<D>> {
        let slot = self.types.get(type_index)?;
        let index = *slot.members.get(ordinal as usize)?;
        self.boxes.get(index).filter(|b| b.ordinal == ordinal)
    }

    /// Append a box; its ordinal is the current length of the type's list
    fn push(&mut self, type_index: usize, device: Option<D>) -> Result<u32> {
        let backend = self.backend;
        let slot = self.types.get_mut(type_index).ok_or_else(|| {
            UncoreError::InvalidConfiguration(format!(
                "{backend} box type {type_index} is not in the active table"
            ))
        })?;

        let ordinal = slot.members.len() as u32;
        let uncore_box = UncoreBox::new(slot.box_type, type_index, ordinal, device)?;

        self.boxes
            .try_reserve(1)
            .and_then(|_| slot.members.try_reserve(1))
            .map_err(|e| {
                UncoreError::Allocation(format!("{} box {}: {}", slot.box_type.name, ordinal, e))
            })?;

        slot.members.push(self.boxes.len());
        self.boxes.push(uncore_box);
        Ok(ordinal)
    }

    fn is_bound(&self, location: &DeviceLocation) -> bool {
        self.boxes
            .iter()
            .any(|b| b.location().as_ref() == Some(location))
    }

    /// Remove every box in reverse discovery order, releasing devices.
    /// Returns `(type index, ordinal)` of each box in release order.
    fn teardown(&mut self) -> Vec<(usize, u32)> {
        let mut released = Vec::with_capacity(self.boxes.len());
        while let Some(uncore_box) = self.boxes.pop() {
            let slot = &mut self.types[uncore_box.type_index];
            slot.members.pop();
            tracing::debug!("Removing {}#{}", slot.box_type.name, uncore_box.ordinal);
            released.push((uncore_box.type_index, uncore_box.ordinal));
        }
        released
    }
}

pub struct BoxRegistry<D> {
    generation: u64,
    local: BackendArena<D>,
    windowed: BackendArena<D>,
}

impl<D: ConfigSpace> BoxRegistry<D> {
    /// Run both enumeration passes against the profile's tables
    pub fn enumerate<B>(profile: &PlatformProfile, bus: &B) -> Result<Self>
    where
        B: DeviceBus<Device = D>,
    {
        let windowed = enumerate_windowed(profile, bus)?;
        let local = enumerate_local(profile)?;

        Ok(Self {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            local,
            windowed,
        })
    }

    pub fn arena(&self, backend: Backend) -> &BackendArena<D> {
        match backend {
            Backend::Local => &self.local,
            Backend::Windowed => &self.windowed,
        }
    }

    pub fn handle(&self, backend: Backend, type_index: usize, ordinal: u32) -> BoxHandle {
        BoxHandle {
            generation: self.generation,
            backend,
            type_index,
            ordinal,
        }
    }

    /// Resolve a handle, rejecting ones from another registry or unknown boxes
    pub fn resolve(&self, handle: &BoxHandle) -> Result<(&'static BoxType, &UncoreBox<D>)> {
        if handle.generation != self.generation {
            return Err(UncoreError::InvalidHandle(*handle));
        }

        let arena = self.arena(handle.backend);
        match (
            arena.box_type(handle.type_index),
            arena.get(handle.type_index, handle.ordinal),
        ) {
            (Some(box_type), Some(uncore_box)) => Ok((box_type, uncore_box)),
            _ => Err(UncoreError::InvalidHandle(*handle)),
        }
    }

    /// Handles of a type's boxes in ordinal order
    pub fn boxes(&self, backend: Backend, type_index: usize) -> BoxIter {
        BoxIter {
            generation: self.generation,
            backend,
            type_index,
            next: 0,
            end: self.arena(backend).instances(type_index) as u32,
        }
    }

    /// Release every box; nothing from this registry is usable afterwards
    pub fn teardown(mut self) -> usize {
        let released = self.windowed.teardown().len() + self.local.teardown().len();
        tracing::info!("Uncore registry torn down, {} boxes released", released);
        released
    }
}

fn enumerate_local<D: ConfigSpace>(profile: &PlatformProfile) -> Result<BackendArena<D>> {
    let types = profile.box_types(Backend::Local);
    let mut arena = BackendArena::new(Backend::Local, types)?;

    let populated = types.iter().enumerate().try_for_each(|(type_index, box_type)| {
        for _ in 0..box_type.num_boxes {
            arena.push(type_index, None)?;
        }
        Ok(())
    });

    if let Err(e) = populated {
        arena.teardown();
        return Err(e);
    }

    tracing::info!(
        "MSR enumeration: {} boxes across {} types",
        arena.box_count(),
        arena.type_count()
    );
    Ok(arena)
}

fn enumerate_windowed<B: DeviceBus>(
    profile: &PlatformProfile,
    bus: &B,
) -> Result<BackendArena<B::Device>> {
    let mut arena = BackendArena::new(Backend::Windowed, profile.box_types(Backend::Windowed))?;

    let populated = profile.device_matches().iter().try_for_each(|entry| {
        let Some(box_type) = arena.box_type(entry.type_index) else {
            return Err(UncoreError::InvalidConfiguration(format!(
                "device {:04x}:{:04x} maps to box type {} outside the PCI table",
                entry.vendor, entry.device, entry.type_index
            )));
        };

        let device = bus
            .find_devices(entry.vendor, entry.device)
            .into_iter()
            .find(|d| !arena.is_bound(&d.location()));

        // Not all SKUs populate every device
        let Some(device) = device else {
            tracing::debug!(
                "{} device {:04x}:{:04x} not present, skipping",
                box_type.name,
                entry.vendor,
                entry.device
            );
            return Ok(());
        };

        let location = device.location();
        let ordinal = arena.push(entry.type_index, Some(device))?;
        tracing::debug!("Bound {} to {}#{}", location, box_type.name, ordinal);
        Ok(())
    });

    if let Err(e) = populated {
        arena.teardown();
        return Err(e);
    }

    tracing::info!(
        "PCI enumeration: {} boxes across {} types",
        arena.box_count(),
        arena.type_count()
    );
    Ok(arena)
}

/// Lazy, restartable walk over a type's boxes
#[derive(Debug, Clone)]
pub struct BoxIter {
    generation: u64,
    backend: Backend,
    type_index: usize,
    next: u32,
    end: u32,
}

impl Iterator for BoxIter {
    type Item = BoxHandle;

    fn next(&mut self) -> Option<BoxHandle> {
        if self.next >= self.end {
            return None;
        }
        let handle = BoxHandle {
            generation: self.generation,
            backend: self.backend,
            type_index: self.type_index,
            ordinal: self.next,
        };
        self.next += 1;
        Some(handle)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BoxIter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::sim::{SimBus, SimDevice};
    use crate::uncore::platform::{select_platform, PlatformId};
    use uncore_raw::arch::haswell_ep::{msr, pci};
    use uncore_raw::DeviceMatch;

    static TWO_HA_IDS: &[DeviceMatch] = &[
        DeviceMatch::new(0x8086, 0x2F30, 0, 0),
        DeviceMatch::new(0x8086, 0x2F38, 0, 1),
    ];
    static HA_ONLY: &[BoxType] = &[pci::HA];

    static BAD_IDS: &[DeviceMatch] = &[DeviceMatch::new(0x8086, 0x2F30, 7, 0)];

    // A windowed table entry with no device bound to it
    static MISBOUND: &[BoxType] = &[msr::PCUBOX];

    fn haswell() -> PlatformProfile {
        select_platform(PlatformId::HaswellEp)
    }

    #[test]
    fn test_local_enumeration_matches_declared_counts() {
        let registry = BoxRegistry::enumerate(&haswell(), &SimBus::new()).unwrap();
        let arena = registry.arena(Backend::Local);

        for (index, box_type) in msr::MSR_BOXES.iter().enumerate() {
            assert_eq!(arena.instances(index) as u32, box_type.num_boxes);
        }
        assert_eq!(arena.box_count(), 1 + 1 + 4 + 18);
    }

    #[test]
    fn test_local_ordinals_in_order() {
        let registry = BoxRegistry::enumerate(&haswell(), &SimBus::new()).unwrap();
        let ordinals: Vec<u32> = registry
            .boxes(Backend::Local, 3)
            .map(|h| h.ordinal())
            .collect();
        assert_eq!(ordinals, (0..18).collect::<Vec<_>>());
    }

    #[test]
    fn test_windowed_ordinal_follows_discovery_order() {
        let profile = PlatformProfile::new(PlatformId::HaswellEp, &[], HA_ONLY, TWO_HA_IDS);
        let mut bus = SimBus::new();
        // The second HA sits at a lower bus address than the first
        let mut second = SimDevice::location_for(0x2F38, 0);
        second.bus = 0x3F;
        bus.add(SimDevice::new(second));
        bus.add(SimDevice::new(SimDevice::location_for(0x2F30, 1)));

        let registry = BoxRegistry::enumerate(&profile, &bus).unwrap();
        let arena = registry.arena(Backend::Windowed);
        assert_eq!(arena.instances(0), 2);
        assert_eq!(arena.get(0, 0).unwrap().location().unwrap().device_id, 0x2F30);
        assert_eq!(arena.get(0, 1).unwrap().location().unwrap().device_id, 0x2F38);
    }

    #[test]
    fn test_absent_device_is_skipped() {
        let profile = PlatformProfile::new(PlatformId::HaswellEp, &[], HA_ONLY, TWO_HA_IDS);
        let mut bus = SimBus::new();
        bus.add(SimDevice::new(SimDevice::location_for(0x2F38, 4)));

        let registry = BoxRegistry::enumerate(&profile, &bus).unwrap();
        let handles: Vec<_> = registry.boxes(Backend::Windowed, 0).collect();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].ordinal(), 0);

        let (_, uncore_box) = registry.resolve(&handles[0]).unwrap();
        assert_eq!(uncore_box.location(), Some(SimDevice::location_for(0x2F38, 4)));
    }

    #[test]
    fn test_duplicate_ids_bind_distinct_devices() {
        static SAME_TWICE: &[DeviceMatch] = &[
            DeviceMatch::new(0x8086, 0x2F30, 0, 0),
            DeviceMatch::new(0x8086, 0x2F30, 0, 1),
        ];
        let profile = PlatformProfile::new(PlatformId::HaswellEp, &[], HA_ONLY, SAME_TWICE);
        let mut bus = SimBus::new();
        bus.add(SimDevice::new(SimDevice::location_for(0x2F30, 0)));
        bus.add(SimDevice::new(SimDevice::location_for(0x2F30, 1)));

        let registry = BoxRegistry::enumerate(&profile, &bus).unwrap();
        let arena = registry.arena(Backend::Windowed);
        assert_ne!(
            arena.get(0, 0).unwrap().location(),
            arena.get(0, 1).unwrap().location()
        );
    }

    #[test]
    fn test_bad_type_index_fails_enumeration() {
        let profile = PlatformProfile::new(PlatformId::HaswellEp, &[], HA_ONLY, BAD_IDS);
        let bus = SimBus::from_profile(&profile);
        let result = BoxRegistry::enumerate(&profile, &bus);
        assert!(matches!(result, Err(UncoreError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_backend_mismatch_rejected_at_creation() {
        static IDS: &[DeviceMatch] = &[DeviceMatch::new(0x8086, 0x2F30, 0, 0)];
        let profile = PlatformProfile::new(PlatformId::HaswellEp, &[], MISBOUND, IDS);
        let bus = SimBus::from_profile(&profile);
        let result = BoxRegistry::enumerate(&profile, &bus);
        assert!(matches!(result, Err(UncoreError::BackendMismatch { .. })));
    }

    #[test]
    fn test_unknown_platform_has_no_types() {
        let profile = select_platform(PlatformId::Unknown(0));
        let registry: BoxRegistry<SimDevice> =
            BoxRegistry::enumerate(&profile, &SimBus::new()).unwrap();
        assert_eq!(registry.arena(Backend::Local).type_count(), 0);
        assert_eq!(registry.arena(Backend::Windowed).type_count(), 0);
        assert_eq!(registry.boxes(Backend::Local, 0).count(), 0);
    }

    #[test]
    fn test_handles_from_other_registry_are_invalid() {
        let first = BoxRegistry::enumerate(&haswell(), &SimBus::new()).unwrap();
        let stale = first.boxes(Backend::Local, 0).next().unwrap();
        let second = BoxRegistry::enumerate(&haswell(), &SimBus::new()).unwrap();

        assert!(first.resolve(&stale).is_ok());
        assert!(matches!(
            second.resolve(&stale),
            Err(UncoreError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_box_iter_is_restartable() {
        let registry = BoxRegistry::enumerate(&haswell(), &SimBus::new()).unwrap();
        let iter = registry.boxes(Backend::Local, 2);
        assert_eq!(iter.len(), 4);
        assert_eq!(iter.clone().count(), 4);
        assert_eq!(iter.count(), 4);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let profile = haswell();
        let bus = SimBus::from_profile(&profile);
        let registry = BoxRegistry::enumerate(&profile, &bus).unwrap();
        let expected = registry.arena(Backend::Local).box_count()
            + registry.arena(Backend::Windowed).box_count();
        assert_eq!(registry.teardown(), expected);
    }

    #[test]
    fn test_teardown_runs_in_reverse_discovery_order() {
        let mut registry = BoxRegistry::enumerate(&haswell(), &SimBus::new()).unwrap();
        let released = registry.local.teardown();

        assert_eq!(released.len(), 24);
        // Last C-box out first, the single U-box last
        assert_eq!(released.first(), Some(&(3, 17)));
        assert_eq!(released.last(), Some(&(0, 0)));
        assert_eq!(registry.arena(Backend::Local).box_count(), 0);
        assert_eq!(registry.arena(Backend::Local).instances(3), 0);
    }

    #[test]
    fn test_teardown_drops_device_references() {
        let profile = PlatformProfile::new(PlatformId::HaswellEp, &[], HA_ONLY, TWO_HA_IDS);
        let mut bus = SimBus::new();
        let first = bus.add(SimDevice::new(SimDevice::location_for(0x2F30, 0)));
        let second = bus.add(SimDevice::new(SimDevice::location_for(0x2F38, 1)));

        let mut registry = BoxRegistry::enumerate(&profile, &bus).unwrap();
        // Local handle, bus copy and the box's copy
        assert_eq!(first.share_count(), 3);

        let released = registry.windowed.teardown();
        assert_eq!(released, vec![(0, 1), (0, 0)]);
        assert_eq!(first.share_count(), 2);
        assert_eq!(second.share_count(), 2);
    }
}
