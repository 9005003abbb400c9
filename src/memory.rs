use crate::error::ParameterError;

pub const PARAMETER_ARRAY_SIZE: usize = 64;
pub const PARSE_ARRAY_SIZE: usize = 128;
pub const MAX_FRAME_LEN: usize = 256;

/// Offset of the parse-result record inside the parse array.
pub const PARSE_RESULT_OFFSET: usize = 16;

const NEXT_HEADER: usize = PARSE_RESULT_OFFSET;
const FAF_EXTENSION: usize = 18;
const FAF_BASE: usize = 20;
const FAF_BASE_BYTES: usize = 12;
const GROSS_RUNNING_SUM: usize = 52;
const RUNNING_SUM: usize = 54;
const PARSE_ERROR_CODE: usize = 56;

/// Frame attribute flags held by the parse-result record.
pub const FAF_FLAGS: u8 = 112;

/// Value of a header offset that no shell has written.
pub const OFFSET_UNSET: u8 = 0xFF;

/// Byte-code loaded at a fixed word address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    base: u16,
    words: Vec<u16>,
}

impl Program {
    /// Splits big-endian bytes into words. A trailing odd byte becomes the
    /// high half of a final word.
    pub fn from_bytes(base: u16, bytes: &[u8]) -> Self {
        let words = bytes
            .chunks(2)
            .map(|chunk| match chunk {
                [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                [hi] => u16::from_be_bytes([*hi, 0]),
                _ => 0,
            })
            .collect();
        Self { base, words }
    }

    pub fn from_words(base: u16, words: Vec<u16>) -> Self {
        Self { base, words }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    /// One past the last word address.
    pub fn end(&self) -> usize {
        self.base as usize + self.words.len()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains(&self, address: u16) -> bool {
        address >= self.base && (address as usize) < self.end()
    }

    pub fn read_word(&self, address: u16) -> Option<u16> {
        self.read_words(address, 1).map(|words| words[0])
    }

    pub fn read_words(&self, address: u16, count: usize) -> Option<&[u16]> {
        let start = address.checked_sub(self.base)? as usize;
        self.words.get(start..start.checked_add(count)?)
    }
}

/// The packet being parsed. Bytes past `len` read as zero up to
/// [`MAX_FRAME_LEN`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl Frame {
    /// Callers validate the length; longer input is truncated.
    pub fn new(data: &[u8]) -> Self {
        let len = data.len().min(MAX_FRAME_LEN);
        let mut bytes = [0u8; MAX_FRAME_LEN];
        bytes[..len].copy_from_slice(&data[..len]);
        Self { bytes, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn window(&self, start: usize, len: usize) -> Result<&[u8], ParameterError> {
        let end = start + len;
        self.bytes
            .get(start..end)
            .ok_or(ParameterError::FrameWindow { start, end })
    }
}

/// Named single-byte header offsets of the parse-result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderOffset {
    Shim1,
    Shim2,
    Ip1Pid,
    Ethernet,
    LlcSnap,
    VlanTci1,
    VlanTciN,
    LastEtype,
    Pppoe,
    Mpls1,
    MplsN,
    L3,
    IpnOrMinEncap,
    Gre,
    L4,
    L5,
    RoutingHeader1,
    RoutingHeader2,
    NextHeaderOffset,
    Ipv6Fragment,
    NextHeaderBeforeIpv6Fragment,
    IpnPid,
}

impl HeaderOffset {
    pub const ALL: [HeaderOffset; 22] = [
        HeaderOffset::Shim1,
        HeaderOffset::Shim2,
        HeaderOffset::Ip1Pid,
        HeaderOffset::Ethernet,
        HeaderOffset::LlcSnap,
        HeaderOffset::VlanTci1,
        HeaderOffset::VlanTciN,
        HeaderOffset::LastEtype,
        HeaderOffset::Pppoe,
        HeaderOffset::Mpls1,
        HeaderOffset::MplsN,
        HeaderOffset::L3,
        HeaderOffset::IpnOrMinEncap,
        HeaderOffset::Gre,
        HeaderOffset::L4,
        HeaderOffset::L5,
        HeaderOffset::RoutingHeader1,
        HeaderOffset::RoutingHeader2,
        HeaderOffset::NextHeaderOffset,
        HeaderOffset::Ipv6Fragment,
        HeaderOffset::NextHeaderBeforeIpv6Fragment,
        HeaderOffset::IpnPid,
    ];

    /// Byte position inside the parse array.
    pub const fn position(self) -> usize {
        match self {
            HeaderOffset::NextHeaderBeforeIpv6Fragment => 57,
            HeaderOffset::IpnPid => 58,
            other => 32 + other as usize,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            HeaderOffset::Shim1 => "shim_offset_1",
            HeaderOffset::Shim2 => "shim_offset_2",
            HeaderOffset::Ip1Pid => "ip_1_pid_offset",
            HeaderOffset::Ethernet => "eth_offset",
            HeaderOffset::LlcSnap => "llc_snap_offset",
            HeaderOffset::VlanTci1 => "vlan_tci1_offset",
            HeaderOffset::VlanTciN => "vlan_tcin_offset",
            HeaderOffset::LastEtype => "last_etype_offset",
            HeaderOffset::Pppoe => "pppoe_offset",
            HeaderOffset::Mpls1 => "mpls_offset_1",
            HeaderOffset::MplsN => "mpls_offset_n",
            HeaderOffset::L3 => "l3_offset",
            HeaderOffset::IpnOrMinEncap => "ipn_or_minencap_offset",
            HeaderOffset::Gre => "gre_offset",
            HeaderOffset::L4 => "l4_offset",
            HeaderOffset::L5 => "l5_offset",
            HeaderOffset::RoutingHeader1 => "routing_hdr_offset1",
            HeaderOffset::RoutingHeader2 => "routing_hdr_offset2",
            HeaderOffset::NextHeaderOffset => "nxt_hdr_offset",
            HeaderOffset::Ipv6Fragment => "ipv6_frag_offset",
            HeaderOffset::NextHeaderBeforeIpv6Fragment => "nxt_hdr_before_ipv6_frag_ext",
            HeaderOffset::IpnPid => "ip_n_pid_offset",
        }
    }
}

/// The parse array (RA): a parse-result record at [`PARSE_RESULT_OFFSET`]
/// followed by scratch bytes. Multi-byte fields are big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseArray {
    bytes: [u8; PARSE_ARRAY_SIZE],
}

impl Default for ParseArray {
    /// The template every run starts from: zeroes with all header offsets unset.
    fn default() -> Self {
        let mut array = Self::zeroed();
        for offset in HeaderOffset::ALL {
            array.set_header_offset(offset, OFFSET_UNSET);
        }
        array
    }
}

impl ParseArray {
    pub fn zeroed() -> Self {
        Self {
            bytes: [0; PARSE_ARRAY_SIZE],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copies `data` over the start of the array. Callers bound the length.
    pub fn load(&mut self, data: &[u8]) {
        let len = data.len().min(PARSE_ARRAY_SIZE);
        self.bytes[..len].copy_from_slice(&data[..len]);
    }

    pub fn read(&self, start: usize, len: usize) -> &[u8] {
        &self.bytes[start..start + len]
    }

    pub fn write(&mut self, start: usize, data: &[u8]) {
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    pub fn next_header(&self) -> u16 {
        u16::from_be_bytes([self.bytes[NEXT_HEADER], self.bytes[NEXT_HEADER + 1]])
    }

    pub fn set_next_header(&mut self, value: u16) {
        self.write(NEXT_HEADER, &value.to_be_bytes());
    }

    pub fn header_offset(&self, offset: HeaderOffset) -> u8 {
        self.bytes[offset.position()]
    }

    pub fn set_header_offset(&mut self, offset: HeaderOffset, value: u8) {
        self.bytes[offset.position()] = value;
    }

    pub fn gross_running_sum(&self) -> u16 {
        u16::from_be_bytes([
            self.bytes[GROSS_RUNNING_SUM],
            self.bytes[GROSS_RUNNING_SUM + 1],
        ])
    }

    pub fn running_sum(&self) -> u16 {
        u16::from_be_bytes([self.bytes[RUNNING_SUM], self.bytes[RUNNING_SUM + 1]])
    }

    pub fn parse_error_code(&self) -> u8 {
        self.bytes[PARSE_ERROR_CODE]
    }

    /// Byte position and mask of frame attribute flag `index`.
    ///
    /// Flags 0..96 live in the base region, 96..112 in the extension region
    /// that precedes it. Bit 0 of each byte is its most significant bit.
    pub fn faf_position(index: u8) -> (usize, u8) {
        let byte = index as usize / 8;
        let position = if byte < FAF_BASE_BYTES {
            FAF_BASE + byte
        } else {
            FAF_EXTENSION + byte - FAF_BASE_BYTES
        };
        (position, 0x80 >> (index % 8))
    }

    pub fn faf(&self, index: u8) -> bool {
        let (position, mask) = Self::faf_position(index);
        self.bytes[position] & mask != 0
    }

    pub fn set_faf(&mut self, index: u8, value: bool) {
        let (position, mask) = Self::faf_position(index);
        if value {
            self.bytes[position] |= mask;
        } else {
            self.bytes[position] &= !mask;
        }
    }
}
