use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use goblin::{
    Object,
    elf::{Elf, section_header},
};

const ELF_MAGIC: &[u8] = b"\x7fELF";

/// How a byte-code file is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    /// ELF when the magic matches, else hex text when it parses, else raw.
    #[default]
    Auto,
    /// Raw big-endian instruction words.
    Bin,
    /// Whitespace or comma separated 16-bit hex words; `#` starts a comment.
    Hex,
    /// A symbol or section of an ELF object.
    Elf,
}

pub fn load_bytecode(path: &Path, format: Format, symbol: Option<&str>) -> Result<Vec<u8>> {
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    decode_bytecode(&data, format, symbol).with_context(|| format!("loading {}", path.display()))
}

pub fn decode_bytecode(data: &[u8], format: Format, symbol: Option<&str>) -> Result<Vec<u8>> {
    match format {
        Format::Bin => Ok(data.to_vec()),
        Format::Hex => parse_hex_words(std::str::from_utf8(data).context("hex input is not UTF-8")?),
        Format::Elf => extract_elf(data, symbol),
        Format::Auto if data.starts_with(ELF_MAGIC) => extract_elf(data, symbol),
        Format::Auto => match std::str::from_utf8(data).map(parse_hex_words) {
            Ok(Ok(bytes)) => Ok(bytes),
            _ => Ok(data.to_vec()),
        },
    }
}

/// Parses hex text into big-endian byte-code.
pub fn parse_hex_words(text: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default();
        for token in line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
        {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            if digits.is_empty() || digits.len() > 4 {
                bail!("line {}: {token:?} is not a 16-bit word", number + 1);
            }
            let word = u16::from_str_radix(digits, 16)
                .with_context(|| format!("line {}: invalid word {token:?}", number + 1))?;
            bytes.extend_from_slice(&word.to_be_bytes());
        }
    }
    Ok(bytes)
}

/// Reads the bytes of symbol `name`, or of the section called `name` when no
/// symbol matches.
pub fn extract_elf(data: &[u8], name: Option<&str>) -> Result<Vec<u8>> {
    let elf = match Object::parse(data)? {
        Object::Elf(elf) => elf,
        other => bail!("Unsupported object format: {other:?}"),
    };
    let Some(name) = name else {
        bail!("ELF input needs a symbol or section name");
    };

    if let Some(bytes) = symbol_bytes(&elf, data, name)? {
        return Ok(bytes);
    }
    for section in &elf.section_headers {
        if elf.shdr_strtab.get_at(section.sh_name) == Some(name) {
            return file_slice(data, section.sh_offset, section.sh_size, name);
        }
    }
    bail!("no symbol or section named {name:?}")
}

fn symbol_bytes(elf: &Elf, data: &[u8], name: &str) -> Result<Option<Vec<u8>>> {
    let Some(sym) = elf
        .syms
        .iter()
        .find(|sym| elf.strtab.get_at(sym.st_name) == Some(name))
    else {
        return Ok(None);
    };
    let Some(section) = elf.section_headers.get(sym.st_shndx) else {
        bail!("symbol {name:?} has no section");
    };
    if section.sh_type == section_header::SHT_NOBITS {
        bail!("symbol {name:?} lives in a section without file contents");
    }
    // Relocatable objects hold section-relative values with sh_addr == 0.
    let Some(relative) = sym.st_value.checked_sub(section.sh_addr) else {
        bail!(
            "symbol {name:?} at {:#x} lies before its section at {:#x}",
            sym.st_value,
            section.sh_addr
        );
    };
    let Some(offset) = section.sh_offset.checked_add(relative) else {
        bail!(
            "symbol {name:?} offset {relative:#x} overflows its section at file offset {:#x}",
            section.sh_offset
        );
    };
    file_slice(data, offset, sym.st_size, name).map(Some)
}

fn file_slice(data: &[u8], offset: u64, size: u64, name: &str) -> Result<Vec<u8>> {
    let range = usize::try_from(offset).ok().zip(usize::try_from(size).ok());
    let end = range.and_then(|(start, size)| Some(start..start.checked_add(size)?));
    match end.and_then(|range| data.get(range)) {
        Some(bytes) => Ok(bytes.to_vec()),
        None => bail!(
            "{name:?} at offset {offset:#x} with size {size:#x} exceeds file ({} bytes)",
            data.len()
        ),
    }
}
