use uncore_raw::{BoxType, EventSelect, RegisterLayout};

use crate::error::{Result, UncoreError};

/// What a counter should count, and how to switch it on and off
///
/// Addresses are interpreted by the backend of the box the event is applied
/// to: absolute MSRs for local boxes, configuration-space offsets for
/// windowed ones. The same event may be applied to any number of boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Event select register receiving `enable` / `disable`
    pub ctl: u64,
    /// Counter register the event accumulates into
    pub ctr: u64,
    /// Complete control value that arms the event
    pub enable: u64,
    /// Complete control value that silences it without losing the count
    pub disable: u64,
}

impl Event {
    pub fn new(ctl: u64, ctr: u64, enable: u64, disable: u64) -> Self {
        Self {
            ctl,
            ctr,
            enable,
            disable,
        }
    }

    /// Event on counter `counter` of box `ordinal`, encoded from `select`
    pub fn for_counter(
        box_type: &BoxType,
        ordinal: u32,
        counter: u32,
        select: EventSelect,
    ) -> Result<Self> {
        let (Some(ctl), Some(ctr)) = (
            box_type.event_ctl_addr(ordinal, counter),
            box_type.counter_addr(ordinal, counter),
        ) else {
            return Err(UncoreError::InvalidConfiguration(format!(
                "{} has {} counters, counter {} does not exist",
                box_type.name, box_type.num_counters, counter
            )));
        };

        select.validate()?;
        select.check_threshold(box_type.threshold_bits)?;
        select.check_mask(box_type.event_mask)?;

        let enable = EventSelect {
            enable: true,
            ..select
        };

        Ok(Self::new(
            ctl,
            ctr,
            enable.to_raw(),
            enable.disabled().to_raw(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uncore_raw::arch::haswell_ep::{msr, pci};
    use uncore_raw::RegisterError;

    #[test]
    fn test_cbox_event_addresses() {
        let event = Event::for_counter(&msr::CBOX, 1, 2, EventSelect::new(0x34, 0x03)).unwrap();
        assert_eq!(event.ctl, 0xE13);
        assert_eq!(event.ctr, 0xE1A);
        assert_eq!(event.enable, 0x0040_0334);
        assert_eq!(event.disable, 0x0000_0334);
    }

    #[test]
    fn test_imc_event_offsets() {
        let event = Event::for_counter(&pci::IMC, 5, 3, EventSelect::new(0x04, 0x03)).unwrap();
        assert_eq!(event.ctl, 0xE4);
        assert_eq!(event.ctr, 0xB8);
    }

    #[test]
    fn test_counter_out_of_range() {
        let result = Event::for_counter(&msr::UBOX, 0, 2, EventSelect::new(0x01, 0));
        assert!(matches!(result, Err(UncoreError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_event_mask_is_enforced() {
        let restricted = BoxType {
            event_mask: 0xFF,
            ..msr::PCUBOX
        };
        let result = Event::for_counter(&restricted, 0, 0, EventSelect::new(0x01, 0x01));
        assert!(matches!(
            result,
            Err(UncoreError::RegisterError(RegisterError::OutsideEventMask { .. }))
        ));
    }

    #[test]
    fn test_threshold_wider_than_box_is_rejected() {
        let select = EventSelect {
            threshold: 0x20,
            ..EventSelect::new(0x0B, 0)
        };
        assert!(Event::for_counter(&msr::CBOX, 0, 0, select).is_ok());
        assert!(matches!(
            Event::for_counter(&msr::PCUBOX, 0, 0, select),
            Err(UncoreError::RegisterError(RegisterError::FieldOverflow { bits: 5, .. }))
        ));
    }

    #[test]
    fn test_invert_without_threshold_is_rejected() {
        let select = EventSelect {
            invert: true,
            ..EventSelect::new(0x34, 0x03)
        };
        assert!(matches!(
            Event::for_counter(&msr::CBOX, 0, 0, select),
            Err(UncoreError::RegisterError(RegisterError::InvalidCombination(_)))
        ));
    }
}
