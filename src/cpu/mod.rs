use std::fmt;

use tracing::{debug, info, trace, warn};

use crate::decoder::{Decoder, Wr};
use crate::error::{Fault, SimError};
use crate::memory::{
    Frame, MAX_FRAME_LEN, PARAMETER_ARRAY_SIZE, PARSE_ARRAY_SIZE, ParseArray, Program,
};
use crate::shell::{ProtocolJump, Shell};
use crate::variant::{MIN_PC, Variant};

mod dest;
mod exec;
mod trace;

pub use trace::{Effect, Step, StepText};

/// Largest accepted cycle limit.
pub const MAX_CYCLE_LIMIT: u16 = 0x1FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusCode {
    #[default]
    Ok,
    HardShellCalled,
    InvalidOpcode,
    InvalidDestination,
    InvalidParameter,
    LimitExceeded,
}

impl StatusCode {
    pub const fn code(self) -> i32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::HardShellCalled => 1,
            StatusCode::InvalidOpcode => -1,
            StatusCode::InvalidDestination => -2,
            StatusCode::InvalidParameter => -3,
            StatusCode::LimitExceeded => -4,
        }
    }

    pub const fn is_error(self) -> bool {
        self.code() < 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusCode::Ok => "OK",
            StatusCode::HardShellCalled => "HARD_HXS_CALLED",
            StatusCode::InvalidOpcode => "INVALID_OPCODE",
            StatusCode::InvalidDestination => "INVALID_DESTINATION",
            StatusCode::InvalidParameter => "INVALID_PARAMETER",
            StatusCode::LimitExceeded => "LIMIT_EXCEEDED",
        };
        f.write_str(s)
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// A jump below `MIN_PC` handed control to a hard shell.
    Shell(Shell),
    Protocol(ProtocolJump),
    ReturnToHardShell,
    EndParsing,
    /// The byte-code ran out without a terminal instruction.
    EndOfCode,
    LimitExceeded,
    Fault(Fault),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Shell(shell) => write!(f, "jump to hard HXS {}", shell.name()),
            Termination::Protocol(jump) => write!(
                f,
                "L{} next header {} handed to {}",
                jump.class.layer(),
                jump.protocol,
                jump.shell_name()
            ),
            Termination::ReturnToHardShell => f.write_str("return to hard HXS"),
            Termination::EndParsing => f.write_str("end parsing"),
            Termination::EndOfCode => f.write_str("end of code"),
            Termination::LimitExceeded => f.write_str("cycle limit exceeded"),
            Termination::Fault(fault) => write!(f, "{fault}"),
        }
    }
}

/// Which optional inputs were supplied rather than defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputFlags {
    pub parse_array: bool,
    pub parameters: bool,
    pub header_base: bool,
    pub cycle_limit: bool,
    pub frame: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub variant: Variant,
    pub simulated: bool,
    pub status: StatusCode,
    pub termination: Termination,
    pub pc: u16,
    pub executed_count: u16,
    pub steps: Vec<Step>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        !self.status.is_error()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "{}", step.display(self.variant))?;
        }
        write!(
            f,
            "status: {} ({}), {}, pc 0x{:03x}",
            self.status,
            self.status.code(),
            self.termination,
            self.pc
        )
    }
}

/// Machine state of the soft parser.
///
/// A fresh instance is uninitialized: every setter and [`Simulator::run`]
/// fails with [`SimError::NotInitialized`] until [`Simulator::init`] is
/// called. [`Simulator::disassemble`] needs no initialization.
#[derive(Debug, Clone)]
pub struct Simulator {
    variant: Variant,
    initialized: bool,
    inputs: InputFlags,
    pc: u16,
    hb: u16,
    wo: u16,
    wr: [u64; 2],
    parameters: [u8; PARAMETER_ARRAY_SIZE],
    parse_array: ParseArray,
    frame: Frame,
    return_pc: u16,
    cycle_limit: u16,
    executed_count: u16,
    status: StatusCode,
    pc_start: u16,
    pc_end: u16,
    lcv: u32,
    simulating: bool,
    effects: Vec<Effect>,
    stop: Option<Termination>,
}

impl Simulator {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            initialized: false,
            inputs: InputFlags::default(),
            pc: 0,
            hb: 0,
            wo: 0,
            wr: [0; 2],
            parameters: [0; PARAMETER_ARRAY_SIZE],
            parse_array: ParseArray::default(),
            frame: Frame::new(&[]),
            return_pc: 0,
            cycle_limit: 0,
            executed_count: 0,
            status: StatusCode::Ok,
            pc_start: 0,
            pc_end: 0,
            lcv: 0,
            simulating: false,
            effects: Vec::new(),
            stop: None,
        }
    }

    /// Resets the machine to defaults and marks it initialized.
    pub fn init(&mut self) {
        *self = Self {
            initialized: true,
            ..Self::new(self.variant)
        };
    }

    fn ensure_initialized(&self) -> Result<(), SimError> {
        if !self.initialized {
            return Err(SimError::NotInitialized);
        }
        Ok(())
    }

    /// Reloads the default parse-result template.
    pub fn init_parse_array(&mut self) -> Result<(), SimError> {
        self.ensure_initialized()?;
        self.parse_array = ParseArray::default();
        self.inputs.parse_array = false;
        Ok(())
    }

    /// Copies `bytes` over the start of the parse array.
    pub fn set_parse_array(&mut self, bytes: &[u8]) -> Result<(), SimError> {
        self.ensure_initialized()?;
        if bytes.len() > PARSE_ARRAY_SIZE {
            return Err(SimError::ParseArrayLength {
                len: bytes.len(),
                max: PARSE_ARRAY_SIZE,
            });
        }
        self.parse_array.load(bytes);
        self.inputs.parse_array = true;
        Ok(())
    }

    /// Copies the first `size` bytes of `bytes` to `parameters[offset..]`.
    pub fn set_parameters(&mut self, bytes: &[u8], offset: usize, size: usize) -> Result<(), SimError> {
        self.ensure_initialized()?;
        let Some(end) = offset
            .checked_add(size)
            .filter(|end| *end <= PARAMETER_ARRAY_SIZE)
        else {
            return Err(SimError::ParameterRange {
                offset,
                size,
                limit: PARAMETER_ARRAY_SIZE,
            });
        };
        if bytes.len() < size {
            return Err(SimError::ParameterSource {
                available: bytes.len(),
                size,
            });
        }
        self.parameters[offset..end].copy_from_slice(&bytes[..size]);
        self.inputs.parameters = true;
        Ok(())
    }

    pub fn set_frame(&mut self, bytes: &[u8]) -> Result<(), SimError> {
        self.ensure_initialized()?;
        if bytes.is_empty() || bytes.len() > MAX_FRAME_LEN {
            return Err(SimError::FrameLength {
                len: bytes.len(),
                max: MAX_FRAME_LEN,
            });
        }
        self.frame = Frame::new(bytes);
        self.inputs.frame = true;
        Ok(())
    }

    pub fn set_header_base(&mut self, hb: u16) -> Result<(), SimError> {
        self.ensure_initialized()?;
        self.hb = hb;
        self.inputs.header_base = true;
        Ok(())
    }

    /// Zero disables the limit.
    pub fn set_cycle_limit(&mut self, limit: u16) -> Result<(), SimError> {
        self.ensure_initialized()?;
        if limit > MAX_CYCLE_LIMIT {
            return Err(SimError::CycleLimit {
                limit,
                max: MAX_CYCLE_LIMIT,
            });
        }
        self.cycle_limit = limit;
        self.inputs.cycle_limit = true;
        Ok(())
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Switches the hardware revision. Machine state is kept.
    pub fn set_variant(&mut self, variant: Variant) {
        self.variant = variant;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn inputs(&self) -> InputFlags {
        self.inputs
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn header_base(&self) -> u16 {
        self.hb
    }

    pub fn window_offset(&self) -> u16 {
        self.wo
    }

    pub fn wr(&self, wr: Wr) -> u64 {
        self.wr[wr.index()]
    }

    pub fn return_pc(&self) -> u16 {
        self.return_pc
    }

    pub fn parameters(&self) -> &[u8; PARAMETER_ARRAY_SIZE] {
        &self.parameters
    }

    pub fn parse_array(&self) -> &ParseArray {
        &self.parse_array
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn cycle_limit(&self) -> u16 {
        self.cycle_limit
    }

    pub fn executed_count(&self) -> u16 {
        self.executed_count
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn lcv(&self) -> u32 {
        self.lcv
    }

    pub fn code_window(&self) -> (u16, u16) {
        (self.pc_start, self.pc_end)
    }

    /// Decodes `bytecode` loaded at `start_pc` without executing it. Jumps
    /// are not followed; every instruction falls through to the next.
    pub fn disassemble(&mut self, start_pc: u16, bytecode: &[u8]) -> Result<RunReport, SimError> {
        let program = self.load(start_pc, bytecode)?;
        self.simulating = false;
        self.status = StatusCode::Ok;
        Ok(self.run_program(&program))
    }

    /// Executes `bytecode` loaded at `start_pc` against the configured inputs.
    pub fn run(&mut self, start_pc: u16, bytecode: &[u8]) -> Result<RunReport, SimError> {
        self.ensure_initialized()?;
        if !self.inputs.frame {
            return Err(SimError::NoFrame);
        }
        let program = self.load(start_pc, bytecode)?;
        self.simulating = true;
        self.wo = 0;
        self.wr = [0; 2];
        self.return_pc = 0;
        self.status = StatusCode::Ok;
        self.executed_count = 1;
        Ok(self.run_program(&program))
    }

    fn load(&mut self, start_pc: u16, bytecode: &[u8]) -> Result<Program, SimError> {
        let max = self.variant.max_pc();
        if !(MIN_PC..max).contains(&start_pc) {
            return Err(SimError::StartPc {
                pc: start_pc,
                min: MIN_PC,
                max,
            });
        }
        if bytecode.is_empty() {
            return Err(SimError::EmptyProgram);
        }
        let program = Program::from_bytes(start_pc, bytecode);
        if program.end() >= max as usize {
            return Err(SimError::EndPc {
                end: program.end(),
                max,
            });
        }
        self.pc_start = start_pc;
        self.pc_end = program.end() as u16;
        self.pc = start_pc;
        self.stop = None;
        Ok(program)
    }

    fn run_program(&mut self, program: &Program) -> RunReport {
        let decoder = Decoder::new(program, self.variant);
        let mut steps = Vec::new();
        let termination = loop {
            let counter = self
                .simulating
                .then_some((self.executed_count, self.cycle_limit));
            let instruction = match decoder.decode_instruction(self.pc) {
                Ok(instruction) => instruction,
                Err(fault) => {
                    steps.push(Step {
                        address: self.pc,
                        counter,
                        words: program.read_word(self.pc).into_iter().collect(),
                        instruction: None,
                        effects: Vec::new(),
                        fault: Some(fault.clone()),
                    });
                    break self.fail(fault);
                }
            };
            debug!(
                pc = instruction.address,
                "{}",
                instruction.kind.mnemonic(self.variant)
            );

            let result = if self.simulating {
                self.execute(&instruction)
            } else {
                self.pc = instruction.end();
                Ok(())
            };
            let effects = std::mem::take(&mut self.effects);
            for effect in &effects {
                trace!("{effect}");
            }
            steps.push(Step {
                address: instruction.address,
                counter,
                words: instruction.words.clone(),
                instruction: Some(instruction),
                effects,
                fault: result.as_ref().err().cloned(),
            });
            if let Err(fault) = result {
                break self.fail(fault);
            }
            if let Some(stop) = self.stop.take() {
                break stop;
            }
            if self.simulating {
                self.executed_count = self.executed_count.wrapping_add(1);
                if self.cycle_limit != 0 && self.executed_count - 1 >= self.cycle_limit {
                    self.status = StatusCode::LimitExceeded;
                    warn!(limit = self.cycle_limit, "cycle limit exceeded");
                    break Termination::LimitExceeded;
                }
            }
            if self.pc >= self.pc_end {
                break Termination::EndOfCode;
            }
        };
        info!(status = %self.status, pc = self.pc, "{termination}");
        RunReport {
            variant: self.variant,
            simulated: self.simulating,
            status: self.status,
            termination,
            pc: self.pc,
            executed_count: self.executed_count,
            steps,
        }
    }

    fn fail(&mut self, fault: Fault) -> Termination {
        warn!(pc = self.pc, "{fault}");
        self.status = fault.status();
        Termination::Fault(fault)
    }

    /// Ends the run successfully after the current instruction.
    fn finish(&mut self, termination: Termination) {
        self.status = StatusCode::HardShellCalled;
        self.stop = Some(termination);
    }

    fn record(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Input summary and hex dumps of the parameter array, parse array and frame.
    pub fn dump_inputs(&self) -> InputDump<'_> {
        InputDump { sim: self }
    }
}

pub struct InputDump<'a> {
    sim: &'a Simulator,
}

fn source(set: bool) -> &'static str {
    if set { "Set" } else { "Default" }
}

fn hex_dump(f: &mut fmt::Formatter<'_>, title: &str, bytes: &[u8]) -> fmt::Result {
    writeln!(f, "{title} ({} bytes):", bytes.len())?;
    for (row, chunk) in bytes.chunks(16).enumerate() {
        write!(f, "  {:04x}:", row * 16)?;
        for byte in chunk {
            write!(f, " {byte:02x}")?;
        }
        writeln!(f)?;
    }
    Ok(())
}

impl fmt::Display for InputDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sim = self.sim;
        let inputs = sim.inputs;
        writeln!(f, "Parse Array      : {} used.", source(inputs.parse_array))?;
        writeln!(f, "Parameter Array  : {} used.", source(inputs.parameters))?;
        writeln!(
            f,
            "Header Base      : {} used (0x{:x}).",
            source(inputs.header_base),
            sim.hb
        )?;
        writeln!(
            f,
            "Cycle Limit      : {} used ({}).",
            source(inputs.cycle_limit),
            sim.cycle_limit
        )?;
        writeln!(f, "Frame            : {} bytes.", sim.frame.len())?;
        hex_dump(f, "PA", &sim.parameters)?;
        hex_dump(f, "RA", sim.parse_array.as_bytes())?;
        hex_dump(f, "Frame", sim.frame.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|word| word.to_be_bytes()).collect()
    }

    fn simulator() -> Simulator {
        let mut sim = Simulator::new(Variant::Dpaa2);
        sim.init();
        sim.set_frame(&[0u8; 64]).unwrap();
        sim
    }

    #[test]
    fn setters_require_init() {
        let mut sim = Simulator::new(Variant::Dpaa2);
        assert_eq!(sim.set_header_base(4), Err(SimError::NotInitialized));
        assert_eq!(sim.set_frame(&[1]), Err(SimError::NotInitialized));
        assert_eq!(sim.set_parameters(&[1], 0, 1), Err(SimError::NotInitialized));
        assert_eq!(sim.set_cycle_limit(1), Err(SimError::NotInitialized));
        assert_eq!(sim.set_parse_array(&[0]), Err(SimError::NotInitialized));
        assert_eq!(sim.init_parse_array(), Err(SimError::NotInitialized));
        assert_eq!(sim.run(0x20, &[0, 0]).unwrap_err(), SimError::NotInitialized);
    }

    #[test]
    fn setters_fail_closed() {
        let mut sim = simulator();
        assert!(sim.set_parameters(&[0xAA; 8], 60, 8).is_err());
        assert_eq!(sim.parameters()[60..], [0; 4]);
        assert!(sim.set_frame(&[]).is_err());
        assert!(sim.set_frame(&[0; MAX_FRAME_LEN + 1]).is_err());
        assert_eq!(sim.frame().len(), 64);
        assert!(sim.set_cycle_limit(MAX_CYCLE_LIMIT + 1).is_err());
        assert_eq!(sim.cycle_limit(), 0);
        sim.set_parameters(&[1, 2, 3], 62, 2).unwrap();
        assert_eq!(sim.parameters()[62..], [1, 2]);
        assert!(sim.inputs().parameters);
    }

    #[test]
    fn parameter_offset_near_usize_max_is_out_of_range() {
        let mut sim = simulator();
        assert_eq!(
            sim.set_parameters(&[1], usize::MAX, 1),
            Err(SimError::ParameterRange {
                offset: usize::MAX,
                size: 1,
                limit: PARAMETER_ARRAY_SIZE,
            })
        );
        assert!(sim.set_parameters(&[1], 1, usize::MAX).is_err());
        assert!(!sim.inputs().parameters);
    }

    #[test]
    fn run_requires_frame() {
        let mut sim = Simulator::new(Variant::Dpaa2);
        sim.init();
        assert_eq!(sim.run(0x20, &[0, 0]).unwrap_err(), SimError::NoFrame);
    }

    #[test]
    fn start_and_end_pc_bounds() {
        let mut sim = simulator();
        assert!(matches!(sim.disassemble(0x1F, &[0, 0]), Err(SimError::StartPc { .. })));
        assert!(matches!(sim.disassemble(0x7FD, &[0, 0]), Err(SimError::StartPc { .. })));
        assert!(matches!(sim.disassemble(0x7FC, &[0, 0]), Err(SimError::EndPc { .. })));
        assert!(matches!(sim.disassemble(0x20, &[]), Err(SimError::EmptyProgram)));
    }

    #[test]
    fn falls_off_end_of_code() {
        let mut sim = simulator();
        let report = sim.run(0x20, &words(&[0x0000, 0x0000])).unwrap();
        assert_eq!(report.status, StatusCode::Ok);
        assert_eq!(report.termination, Termination::EndOfCode);
        assert_eq!(report.pc, 0x22);
        assert_eq!(report.steps.len(), 2);
    }

    #[test]
    fn nop_nop_end_parsing() {
        let mut sim = simulator();
        let report = sim.run(0x20, &words(&[0x0000, 0x0000, 0x1800, 0x07FF])).unwrap();
        assert!(report.is_success());
        assert_eq!(report.status, StatusCode::HardShellCalled);
        assert_eq!(report.termination, Termination::EndParsing);
        assert_eq!(sim.pc(), 0x7FF);
        assert_eq!(sim.executed_count(), 3);
    }

    #[test]
    fn cycle_limit_stops_after_exactly_limit_instructions() {
        let mut sim = simulator();
        sim.set_cycle_limit(3).unwrap();
        // NOP; NOP; JUMP 0x20
        let report = sim.run(0x20, &words(&[0x0000, 0x0000, 0x1800, 0x0020])).unwrap();
        assert_eq!(report.status, StatusCode::LimitExceeded);
        assert_eq!(report.termination, Termination::LimitExceeded);
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.pc, 0x20);
    }

    #[test]
    fn unknown_opcode_stops_run() {
        let mut sim = simulator();
        let report = sim.run(0x20, &words(&[0x0000, 0x4000])).unwrap();
        assert_eq!(report.status, StatusCode::InvalidOpcode);
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[1].words, [0x4000]);
        assert!(!report.is_success());
    }

    #[test]
    fn disassembly_walks_past_jumps() {
        let mut sim = Simulator::new(Variant::Dpaa2);
        let report = sim
            .disassemble(0x20, &words(&[0x1800, 0x07FF, 0x0007, 0x0044]))
            .unwrap();
        assert_eq!(report.status, StatusCode::Ok);
        assert_eq!(report.termination, Termination::EndOfCode);
        assert_eq!(report.steps.len(), 3);
        assert!(report.steps.iter().all(|step| step.effects.is_empty()));
    }

    #[test]
    fn disassembly_still_validates_fields() {
        let mut sim = Simulator::new(Variant::Dpaa2);
        let report = sim.disassemble(0x20, &words(&[0x0000, 0x0300 | 120])).unwrap();
        assert_eq!(report.status, StatusCode::InvalidParameter);
    }

    #[test]
    fn run_keeps_header_base_and_resets_registers() {
        let mut sim = simulator();
        sim.set_header_base(6).unwrap();
        // LD_SV_TO_WO 4; ADVANCE_HB_BY_WO
        sim.run(0x20, &words(&[0x0604, 0x0002])).unwrap();
        assert_eq!(sim.header_base(), 10);
        assert_eq!(sim.window_offset(), 0);
        sim.run(0x20, &words(&[0x0000])).unwrap();
        assert_eq!(sim.header_base(), 10);
    }

    #[test]
    fn input_dump_reports_sources() {
        let mut sim = simulator();
        sim.set_header_base(0x0E).unwrap();
        let dump = sim.dump_inputs().to_string();
        assert!(dump.contains("Parse Array      : Default used."));
        assert!(dump.contains("Header Base      : Set used (0xe)."));
        assert!(dump.contains("Frame (64 bytes):"));
    }
}
