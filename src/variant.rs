use serde::Deserialize;

/// Lowest address soft-parser code may occupy. Addresses below it name hard shells.
pub const MIN_PC: u16 = 0x20;

pub const DEST_GOSUB_BIT: u16 = 0x8000;
pub const DEST_RELATIVE_BIT: u16 = 0x4000;
pub const DEST_SIGN_BIT: u16 = 0x0400;

/// Hardware revision of the parsing coprocessor.
///
/// The two revisions differ in address-field width, in the reserved sentinel
/// addresses, in which opcodes exist, and in whether destination words carry
/// gosub/relative flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Dpaa1,
    #[default]
    Dpaa2,
}

impl Variant {
    pub const fn address_mask(self) -> u16 {
        match self {
            Variant::Dpaa1 => 0x03FF,
            Variant::Dpaa2 => 0x07FF,
        }
    }

    pub const fn max_pc(self) -> u16 {
        match self {
            Variant::Dpaa1 => 0x03FD,
            Variant::Dpaa2 => 0x07FD,
        }
    }

    pub const fn return_to_hard_shell(self) -> u16 {
        match self {
            Variant::Dpaa1 => 0x03FE,
            Variant::Dpaa2 => 0x07FE,
        }
    }

    pub const fn end_parsing(self) -> u16 {
        match self {
            Variant::Dpaa1 => 0x03FF,
            Variant::Dpaa2 => 0x07FF,
        }
    }

    /// Bits a destination field may have set.
    pub const fn legal_destination_bits(self) -> u16 {
        match self {
            Variant::Dpaa1 => 0x03FF,
            Variant::Dpaa2 => DEST_GOSUB_BIT | DEST_RELATIVE_BIT | DEST_SIGN_BIT | 0x07FF,
        }
    }

    /// Whether destination words carry the G/L/S flag bits.
    pub const fn has_destination_flags(self) -> bool {
        matches!(self, Variant::Dpaa2)
    }

    /// Number of addressable frame attribute flags; zero when the revision has
    /// no FAF instructions.
    pub const fn faf_bits(self) -> u8 {
        match self {
            Variant::Dpaa1 => 0,
            Variant::Dpaa2 => 112,
        }
    }

    pub const fn is_sentinel(self, address: u16) -> bool {
        address == self.return_to_hard_shell() || address == self.end_parsing()
    }

    /// Whether `address` (below [`MIN_PC`]) names a hard shell of this revision.
    pub const fn is_valid_shell(self, address: u16) -> bool {
        match self {
            Variant::Dpaa1 => address <= 0x0F,
            Variant::Dpaa2 => address <= 0x13 || address == 0x1E || address == 0x1F,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Variant::Dpaa1 => "dpaa1",
            Variant::Dpaa2 => "dpaa2",
        }
    }
}
