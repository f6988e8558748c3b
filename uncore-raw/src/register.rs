//! Generic register abstractions for type-safe PMON programming

/// Errors reported when a register layout holds values the hardware rejects
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("field {field} value {value:#x} exceeds {bits} bits")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        bits: u32,
    },

    #[error("bits {bits:#x} are outside the event mask {mask:#x}")]
    OutsideEventMask { bits: u64, mask: u64 },

    #[error("invalid field combination: {0}")]
    InvalidCombination(&'static str),
}

/// Trait for register layouts that can be converted to/from raw register values
///
/// The same layout is used for MSRs (64-bit) and for PCI configuration space
/// registers, which are written as the low 32 bits.
///
/// # Example
///
/// ```ignore
/// use uncore_raw::register::RegisterLayout;
///
/// #[derive(Debug, Default)]
/// struct MyControl {
///     enable: bool,
///     threshold: u8,
/// }
///
/// impl RegisterLayout for MyControl {
///     fn to_raw(&self) -> u64 {
///         (if self.enable { 1 } else { 0 })
///             | ((self.threshold as u64) << 8)
///     }
///
///     fn from_raw(value: u64) -> Self {
///         Self {
///             enable: (value & 1) != 0,
///             threshold: ((value >> 8) & 0xFF) as u8,
///         }
///     }
/// }
/// ```
pub trait RegisterLayout: Sized {
    /// Convert this layout to a raw register value
    fn to_raw(&self) -> u64;

    /// Parse a raw register value into this layout
    fn from_raw(value: u64) -> Self;

    /// Validate that the fields are within the ranges the hardware accepts
    fn validate(&self) -> Result<(), RegisterError> {
        Ok(())
    }
}
