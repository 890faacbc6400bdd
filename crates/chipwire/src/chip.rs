//! Chip identities, default master clocks and the slot registry.
//!
//! A [`ChipRegistry`] maps each chip type to the physical output slot it
//! occupies on the hardware module, if any. It is configured once before
//! playback begins and is read-only during playback. Writes addressed to
//! an unassigned chip are dropped silently; that is the normal situation
//! for a module with fewer chips than the log references, not an error.

/// Sound chips this player knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chip {
    Sn76489,
    Ym2413,
    Ym2612,
    Ym2151,
    Ym2203,
    Ym2608,
    Ym3812,
    Ym3526,
    Y8950,
    Ymf262,
    Ay8910,
    WonderSwan,
}

/// All chips, in registry index order.
pub(crate) const ALL_CHIPS: [Chip; 12] = [
    Chip::Sn76489,
    Chip::Ym2413,
    Chip::Ym2612,
    Chip::Ym2151,
    Chip::Ym2203,
    Chip::Ym2608,
    Chip::Ym3812,
    Chip::Ym3526,
    Chip::Y8950,
    Chip::Ymf262,
    Chip::Ay8910,
    Chip::WonderSwan,
];

impl Chip {
    /// Display name, matching the conventional part number.
    pub fn name(self) -> &'static str {
        match self {
            Chip::Sn76489 => "SN76489",
            Chip::Ym2413 => "YM2413",
            Chip::Ym2612 => "YM2612",
            Chip::Ym2151 => "YM2151",
            Chip::Ym2203 => "YM2203",
            Chip::Ym2608 => "YM2608",
            Chip::Ym3812 => "YM3812",
            Chip::Ym3526 => "YM3526",
            Chip::Y8950 => "Y8950",
            Chip::Ymf262 => "YMF262",
            Chip::Ay8910 => "AY8910",
            Chip::WonderSwan => "WonderSwan",
        }
    }

    /// Default master clock in Hz, used when the log's header carries no
    /// clock for the chip and as the reference clock of transcode
    /// targets.
    pub fn default_clock(self) -> u32 {
        match self {
            Chip::Sn76489 => 3_579_545,
            Chip::Ym2413 => 3_579_545,
            Chip::Ym2612 => 7_670_454,
            Chip::Ym2151 => 3_579_545,
            Chip::Ym2203 => 4_000_000,
            Chip::Ym2608 => 7_987_200,
            Chip::Ym3812 => 3_579_545,
            Chip::Ym3526 => 3_579_545,
            Chip::Y8950 => 3_579_545,
            Chip::Ymf262 => 14_318_180,
            Chip::Ay8910 => 1_789_773,
            Chip::WonderSwan => 3_072_000,
        }
    }

    fn index(self) -> usize {
        ALL_CHIPS.iter().position(|c| *c == self).unwrap_or(0)
    }
}

impl std::fmt::Display for Chip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Chip type to physical slot mapping.
///
/// Slots are small integers (0 or 1 on the supported modules). A chip
/// with no entry is not installed.
#[derive(Debug, Clone, Default)]
pub struct ChipRegistry {
    slots: [Option<u8>; ALL_CHIPS.len()],
}

impl ChipRegistry {
    /// Create an empty registry with no chips assigned.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `chip` to physical `slot`.
    pub fn assign(&mut self, chip: Chip, slot: u8) {
        self.slots[chip.index()] = Some(slot);
    }

    /// Remove the assignment for `chip`.
    pub fn unassign(&mut self, chip: Chip) {
        self.slots[chip.index()] = None;
    }

    /// The physical slot for `chip`, or `None` if it is not installed.
    pub fn slot_for(&self, chip: Chip) -> Option<u8> {
        self.slots[chip.index()]
    }

    /// True when `chip` has a slot assignment.
    pub fn has(&self, chip: Chip) -> bool {
        self.slot_for(chip).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_assign_and_lookup() {
        let mut reg = ChipRegistry::new();
        reg.assign(Chip::Ym2151, 0);
        reg.assign(Chip::Ay8910, 1);
        assert_eq!(reg.slot_for(Chip::Ym2151), Some(0));
        assert_eq!(reg.slot_for(Chip::Ay8910), Some(1));
        assert_eq!(reg.slot_for(Chip::Ym2612), None);
        assert!(!reg.has(Chip::Sn76489));
    }

    #[test]
    fn test_registry_unassign() {
        let mut reg = ChipRegistry::new();
        reg.assign(Chip::Ym2151, 0);
        reg.unassign(Chip::Ym2151);
        assert!(!reg.has(Chip::Ym2151));
    }
}
