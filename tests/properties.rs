use rand::{Rng, SeedableRng, rngs::StdRng};
use sparser::{
    Decoder, Instruction, Simulator, StatusCode, Termination, Variant,
    decoder::{catalog, find_opcode},
    memory::Program,
    variant::{DEST_RELATIVE_BIT, DEST_SIGN_BIT, MIN_PC},
};

const CASES: usize = 20_000;

fn decode(variant: Variant, words: &[u16]) -> Option<Instruction> {
    let program = Program::from_words(MIN_PC, words.to_vec());
    Decoder::new(&program, variant).decode_instruction(MIN_PC).ok()
}

/// An opcode word drawn from a random catalog entry, with random operand bits.
fn opcode_word(rng: &mut StdRng, variant: Variant) -> u16 {
    let entries = catalog(variant);
    let entry = entries[rng.random_range(0..entries.len())];
    entry.pattern | rng.random::<u16>() & !entry.mask
}

/// Operand word that usually passes destination checks.
fn operand_word(rng: &mut StdRng, variant: Variant) -> u16 {
    let word = rng.random::<u16>();
    if rng.random_bool(0.8) {
        word & variant.legal_destination_bits()
    } else {
        word
    }
}

/// Per-word masks of the bits the decoder reads: flipping any one of them
/// changes what `words` decodes to.
fn defined_bits(variant: Variant, words: &[u16], instruction: &Instruction) -> Vec<u16> {
    let mut masks = vec![0u16; instruction.len()];
    for (index, mask) in masks.iter_mut().enumerate() {
        for bit in 0..16 {
            let mut flipped = words.to_vec();
            flipped[index] ^= 1 << bit;
            let same = decode(variant, &flipped).is_some_and(|other| {
                other.len() == instruction.len() && other.kind == instruction.kind
            });
            if !same {
                *mask |= 1 << bit;
            }
        }
    }
    masks
}

#[test]
fn reencoding_reproduces_every_decoded_bit() {
    let mut rng = StdRng::seed_from_u64(0x5EED_0001);
    for variant in [Variant::Dpaa1, Variant::Dpaa2] {
        let mut decoded = 0;
        for _ in 0..CASES {
            let mut words = vec![opcode_word(&mut rng, variant)];
            words.extend((0..4).map(|_| operand_word(&mut rng, variant)));
            let Some(instruction) = decode(variant, &words) else {
                continue;
            };
            decoded += 1;

            let encoded = instruction.kind.encode(variant);
            assert_eq!(encoded.len(), instruction.len(), "{variant:?} {words:04x?}");
            assert_eq!(find_opcode(variant, encoded[0]), Some(instruction.opcode));
            let masks = defined_bits(variant, &words, &instruction);
            for (index, mask) in masks.iter().enumerate() {
                assert_eq!(
                    encoded[index] & mask,
                    words[index] & mask,
                    "{variant:?} {words:04x?} -> {encoded:04x?}, word {index}"
                );
            }
            let again = decode(variant, &encoded)
                .unwrap_or_else(|| panic!("{variant:?}: {encoded:04x?} no longer decodes"));
            assert_eq!(again.kind, instruction.kind, "{variant:?} {words:04x?}");
        }
        assert!(decoded > CASES / 4, "{variant:?}: only {decoded} decoded");
    }
}

/// Where a jump at `MIN_PC` to `field` must land, or `None` when it must be
/// rejected.
fn expected_target(variant: Variant, field: u16, advance: bool, end: u16) -> Option<u16> {
    if field & !variant.legal_destination_bits() != 0 {
        return None;
    }
    let address = field & variant.address_mask();
    let target = if field & DEST_RELATIVE_BIT != 0 {
        let offset = address & !DEST_SIGN_BIT;
        if offset == 0 {
            return None;
        }
        if field & DEST_SIGN_BIT != 0 {
            MIN_PC.checked_sub(offset)?
        } else {
            MIN_PC + offset
        }
    } else {
        if !variant.is_sentinel(address) && address == MIN_PC && !advance {
            return None;
        }
        address
    };
    if !variant.is_sentinel(target) && target > end {
        return None;
    }
    if target < MIN_PC && !variant.is_valid_shell(target) {
        return None;
    }
    Some(target)
}

#[test]
fn jumps_land_where_the_resolution_rules_say() {
    let mut rng = StdRng::seed_from_u64(0x5EED_0002);
    let variant = Variant::Dpaa2;
    for _ in 0..CASES {
        let advance = rng.random_bool(0.5);
        let field = operand_word(&mut rng, variant);
        let padding = rng.random_range(0..0x60);
        let mut words = vec![0x1800 | advance as u16, field];
        words.resize(2 + padding, 0x0000);
        let end = MIN_PC + words.len() as u16;

        let mut sim = Simulator::new(variant);
        sim.init();
        sim.set_frame(&[0; 32]).unwrap();
        sim.set_header_base(3).unwrap();
        sim.set_cycle_limit(1).unwrap();
        let code: Vec<u8> = words.iter().flat_map(|word| word.to_be_bytes()).collect();
        let report = sim.run(MIN_PC, &code).unwrap();

        match expected_target(variant, field, advance, end) {
            None => {
                assert_eq!(report.status, StatusCode::InvalidDestination, "{field:#06x}");
                assert_eq!(report.pc, MIN_PC);
                assert_eq!(sim.header_base(), 3, "rejected jump moved the window");
            }
            Some(target) => {
                assert_eq!(report.pc, target, "{field:#06x}");
                if target < MIN_PC || variant.is_sentinel(target) {
                    assert_eq!(report.status, StatusCode::HardShellCalled);
                    assert_eq!(sim.return_pc(), 0);
                } else {
                    assert_eq!(report.termination, Termination::LimitExceeded);
                }
            }
        }
    }
}
