// Uncore box layer.
//
// Uncore owns the enumerated boxes of one platform profile and routes every
// operation to the register transport of the box it targets. Per box the
// expected sequence is init_box, enable_box, then any number of
// enable_event / disable_event pairs, and disable_box to freeze. The order is
// a contract, not checked: every call is a plain register transaction.

pub mod backend;
pub mod dump;
pub mod event;
pub mod platform;
pub mod registry;

pub use backend::{ConfigSpace, DeviceBus, DeviceLocation, LocalRegisters, RegisterWindow};
pub use dump::{BoxEntry, EnumerationDump, TypeEntry};
pub use event::Event;
pub use platform::{select_platform, PlatformId, PlatformProfile};
pub use registry::{BoxHandle, BoxIter, BoxRegistry};

use uncore_raw::{Backend, BoxType};

use crate::error::{Result, UncoreError};

/// One counter value read from one box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSample {
    pub box_type: &'static str,
    pub backend: Backend,
    pub ordinal: u32,
    /// `None` for the fixed-function counter
    pub counter: Option<u32>,
    pub value: u64,
}

pub struct Uncore<L, D> {
    profile: PlatformProfile,
    local: L,
    registry: BoxRegistry<D>,
}

impl<L: LocalRegisters, D: ConfigSpace> Uncore<L, D> {
    /// Enumerate both backends of `profile`
    pub fn enumerate<B>(profile: PlatformProfile, local: L, bus: &B) -> Result<Self>
    where
        B: DeviceBus<Device = D>,
    {
        let registry = BoxRegistry::enumerate(&profile, bus)?;
        let uncore = Self {
            profile,
            local,
            registry,
        };

        let dump = uncore.dump();
        tracing::info!(
            "Enumerated {} uncore boxes on {}",
            dump.total_boxes(),
            dump.platform
        );
        for line in dump.to_string().lines() {
            tracing::info!("{}", line);
        }

        Ok(uncore)
    }

    pub fn platform(&self) -> PlatformId {
        self.profile.id()
    }

    pub fn profile(&self) -> &PlatformProfile {
        &self.profile
    }

    pub fn box_types(&self, backend: Backend) -> &'static [BoxType] {
        self.profile.box_types(backend)
    }

    /// Look up a box type by display name, case-insensitively
    pub fn find_type(&self, name: &str) -> Option<(Backend, usize)> {
        [Backend::Local, Backend::Windowed]
            .into_iter()
            .find_map(|backend| {
                self.box_types(backend)
                    .iter()
                    .position(|t| t.name.eq_ignore_ascii_case(name))
                    .map(|index| (backend, index))
            })
    }

    /// Boxes of one type, in ordinal order
    pub fn for_each_box(&self, backend: Backend, type_index: usize) -> BoxIter {
        self.registry.boxes(backend, type_index)
    }

    /// Every box of every type, windowed boxes first
    pub fn all_boxes(&self) -> impl Iterator<Item = BoxHandle> + '_ {
        [Backend::Windowed, Backend::Local]
            .into_iter()
            .flat_map(move |backend| {
                (0..self.box_types(backend).len())
                    .flat_map(move |index| self.for_each_box(backend, index))
            })
    }

    pub fn box_type(&self, handle: &BoxHandle) -> Result<&'static BoxType> {
        self.registry.resolve(handle).map(|(box_type, _)| box_type)
    }

    pub fn location(&self, handle: &BoxHandle) -> Result<Option<DeviceLocation>> {
        self.registry.resolve(handle).map(|(_, b)| b.location())
    }

    fn with_box<T, F>(&self, handle: &BoxHandle, op: F) -> Result<T>
    where
        F: FnOnce(&RegisterWindow<'_, L, D>, &BoxType, u32) -> Result<T>,
    {
        let (box_type, uncore_box) = self.registry.resolve(handle)?;
        let window = match uncore_box.device() {
            Some(device) => RegisterWindow::Windowed(device),
            None => RegisterWindow::Local(&self.local),
        };

        let _guard = uncore_box.lock();
        op(&window, box_type, uncore_box.ordinal())
    }

    pub fn init_box(&self, handle: &BoxHandle) -> Result<()> {
        self.with_box(handle, |window, box_type, ordinal| {
            backend::init_box(window, box_type, ordinal)
        })
    }

    pub fn enable_box(&self, handle: &BoxHandle) -> Result<()> {
        self.with_box(handle, |window, box_type, ordinal| {
            backend::enable_box(window, box_type, ordinal)
        })
    }

    pub fn disable_box(&self, handle: &BoxHandle) -> Result<()> {
        self.with_box(handle, |window, box_type, ordinal| {
            backend::disable_box(window, box_type, ordinal)
        })
    }

    /// Start the fixed-function counter; no-op when the type has none
    pub fn enable_fixed_counter(&self, handle: &BoxHandle) -> Result<()> {
        self.with_box(handle, |window, box_type, ordinal| {
            backend::enable_fixed_counter(window, box_type, ordinal)
        })
    }

    pub fn disable_fixed_counter(&self, handle: &BoxHandle) -> Result<()> {
        self.with_box(handle, |window, box_type, ordinal| {
            backend::disable_fixed_counter(window, box_type, ordinal)
        })
    }

    /// Arm `event` on this box. Counter limits are the caller's to respect.
    pub fn enable_event(&self, handle: &BoxHandle, event: &Event) -> Result<()> {
        self.with_box(handle, |window, _, _| backend::enable_event(window, event))
    }

    pub fn disable_event(&self, handle: &BoxHandle, event: &Event) -> Result<()> {
        self.with_box(handle, |window, _, _| backend::disable_event(window, event))
    }

    /// Raw value of programmable counter `counter`, masked to its width
    pub fn read_counter(&self, handle: &BoxHandle, counter: u32) -> Result<u64> {
        self.with_box(handle, |window, box_type, ordinal| {
            let addr = box_type.counter_addr(ordinal, counter).ok_or_else(|| {
                UncoreError::InvalidConfiguration(format!(
                    "{} has {} counters, counter {} does not exist",
                    box_type.name, box_type.num_counters, counter
                ))
            })?;
            Ok(window.read_counter(addr)? & box_type.counter_mask())
        })
    }

    /// Raw value of the fixed-function counter; 0 when the type has none
    pub fn read_fixed_counter(&self, handle: &BoxHandle) -> Result<u64> {
        self.with_box(handle, |window, box_type, ordinal| {
            match box_type.fixed_ctr_addr(ordinal) {
                Some(addr) => Ok(window.read_counter(addr)? & box_type.fixed_counter_mask()),
                None => Ok(0),
            }
        })
    }

    /// Read every counter of every box
    pub fn sample_counters(&self) -> Result<Vec<CounterSample>> {
        let mut samples = Vec::new();

        for handle in self.all_boxes() {
            let box_type = self.box_type(&handle)?;
            let sample = |counter, value| CounterSample {
                box_type: box_type.name,
                backend: handle.backend(),
                ordinal: handle.ordinal(),
                counter,
                value,
            };

            for counter in 0..box_type.num_counters {
                samples.push(sample(Some(counter), self.read_counter(&handle, counter)?));
            }
            if box_type.fixed_ctr.is_some() {
                samples.push(sample(None, self.read_fixed_counter(&handle)?));
            }
        }

        Ok(samples)
    }

    pub fn dump(&self) -> EnumerationDump {
        let entries = |backend: Backend| -> Vec<TypeEntry> {
            let arena = self.registry.arena(backend);
            self.box_types(backend)
                .iter()
                .enumerate()
                .map(|(type_index, box_type)| TypeEntry {
                    name: box_type.name,
                    declared: box_type.num_boxes,
                    boxes: (0..arena.instances(type_index) as u32)
                        .filter_map(|ordinal| arena.get(type_index, ordinal))
                        .map(|b| BoxEntry {
                            ordinal: b.ordinal(),
                            location: b.location(),
                        })
                        .collect(),
                })
                .collect()
        };

        EnumerationDump {
            platform: self.platform(),
            windowed: entries(Backend::Windowed),
            local: entries(Backend::Local),
        }
    }

    /// Release all boxes and device references
    pub fn teardown(self) -> usize {
        self.registry.teardown()
    }
}
