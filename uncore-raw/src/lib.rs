//! # uncore-raw
//!
//! Box-type descriptors and register layouts for Intel Xeon uncore
//! performance monitoring.
//!
//! Uncore PMON units ("boxes") are reached through one of two transports:
//! model-specific registers, or the configuration space of a PCI function.
//! This crate describes both as plain data ([`BoxType`], [`DeviceMatch`]) so
//! the runtime can drive either through the same operation set.
//!
//! ## Features
//!
//! Select the platform tables via feature flags:
//! - `haswell-ep` (default) - Haswell-EP/EX tables
//!
//! ## Usage
//!
//! ```ignore
//! use uncore_raw::arch::haswell_ep;
//! use uncore_raw::{EventSelect, RegisterLayout};
//!
//! let cbox = &haswell_ep::MSR_BOXES[3];
//! let ctl = cbox.event_ctl_addr(0, 0).unwrap();
//! let value = EventSelect::new(0x34, 0x03).to_raw();
//! ```

pub mod arch;
pub mod box_type;
pub mod control;
pub mod register;

pub use box_type::{Backend, BoxType, DeviceMatch};
pub use control::{BoxControl, EventSelect, FixedControl};
pub use register::{RegisterError, RegisterLayout};
