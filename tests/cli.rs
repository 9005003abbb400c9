use std::{fs, path::PathBuf};

use assert_cmd::Command;
use libtest_mimic::{Arguments, Failed, Trial};
use tempfile::TempDir;

fn main() {
    let args = Arguments::from_args();
    let trials = vec![
        Trial::test("help_lists_subcommands", help_lists_subcommands),
        Trial::test("sim_needs_a_frame", sim_needs_a_frame),
        Trial::test("frame_flag_overrides_scenario", frame_flag_overrides_scenario),
        Trial::test("malformed_frame_is_a_usage_error", malformed_frame_is_a_usage_error),
        Trial::test("raw_binary_input", raw_binary_input),
        Trial::test("faf_flag_steers_jump", faf_flag_steers_jump),
        Trial::test("start_pc_out_of_range", start_pc_out_of_range),
        Trial::test("show_inputs_dump", show_inputs_dump),
        Trial::test("missing_file_reports_path", missing_file_reports_path),
    ];
    libtest_mimic::run(&args, trials).exit();
}

fn sparser() -> Command {
    let mut cmd = Command::cargo_bin("sparser").expect("sparser binary");
    cmd.env_remove("RUST_LOG");
    cmd
}

/// A workspace holding `program.sph` with the given hex words.
fn program(words: &str) -> Result<(TempDir, PathBuf), Failed> {
    let dir = TempDir::new()?;
    let path = dir.path().join("program.sph");
    fs::write(&path, words)?;
    Ok((dir, path))
}

fn stdout_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn help_lists_subcommands() -> Result<(), Failed> {
    let output = sparser().arg("--help").output()?;
    let stdout = stdout_of(&output);
    if !output.status.success() || !stdout.contains("disasm") || !stdout.contains("sim") {
        return Err(format!("unexpected help output:\n{stdout}").into());
    }
    Ok(())
}

fn sim_needs_a_frame() -> Result<(), Failed> {
    let (_dir, path) = program("0000")?;
    let output = sparser().arg("sim").arg(&path).output()?;
    let stderr = stderr_of(&output);
    if output.status.success() || !stderr.contains("Error: no frame set for simulation") {
        return Err(format!("expected missing frame error, got:\n{stderr}").into());
    }
    Ok(())
}

fn frame_flag_overrides_scenario() -> Result<(), Failed> {
    // Load frame byte 1 into WR0, then stop.
    let (dir, path) = program("878e\n1800 07ff\n")?;
    let scenario = dir.path().join("scenario.json");
    fs::write(&scenario, r#"{ "frame": "00 11", "cycle_limit": 9 }"#)?;

    let output = sparser()
        .arg("sim")
        .arg(&path)
        .arg("--scenario")
        .arg(&scenario)
        .args(["--frame", "00:42"])
        .output()?;
    let stdout = stdout_of(&output);
    if !output.status.success() {
        return Err(format!("run failed:\n{stdout}{}", stderr_of(&output)).into());
    }
    for needle in [
        "020[1:9]: 878e",
        "WR0 = 0x00000000-00000042",
        "status: HARD_HXS_CALLED (1), end parsing, pc 0x7ff",
    ] {
        if !stdout.contains(needle) {
            return Err(format!("missing {needle:?} in:\n{stdout}").into());
        }
    }
    Ok(())
}

fn malformed_frame_is_a_usage_error() -> Result<(), Failed> {
    let (_dir, path) = program("0000")?;
    let output = sparser()
        .arg("sim")
        .arg(&path)
        .args(["--frame", "0g"])
        .output()?;
    if output.status.code() != Some(2) {
        return Err(format!("expected usage error, got {:?}", output.status.code()).into());
    }
    Ok(())
}

fn raw_binary_input() -> Result<(), Failed> {
    let dir = TempDir::new()?;
    let path = dir.path().join("program.bin");
    fs::write(&path, [0x00, 0x06, 0x00, 0x04])?;
    let output = sparser()
        .arg("disasm")
        .arg(&path)
        .args(["--format", "bin", "--pc", "0x100"])
        .output()?;
    let stdout = stdout_of(&output);
    let expected = "100: 0006 ____ ____ ____ ____ ONES_CMP_WR1_TO_WR0;\n\
                    101: 0004 ____ ____ ____ ____ ZERO_WR0;\n\
                    status: OK (0), end of code, pc 0x102\n";
    if stdout != expected {
        return Err(format!("unexpected listing:\n{stdout}").into());
    }
    Ok(())
}

fn faf_flag_steers_jump() -> Result<(), Failed> {
    let (_dir, path) = program("0c05 07ff\n0000\n")?;

    let taken = sparser()
        .arg("sim")
        .arg(&path)
        .args(["--frame", "00", "--faf", "5"])
        .output()?;
    let stdout = stdout_of(&taken);
    if !stdout.ends_with("status: HARD_HXS_CALLED (1), end parsing, pc 0x7ff\n") {
        return Err(format!("flag set but jump not taken:\n{stdout}").into());
    }

    let skipped = sparser()
        .arg("sim")
        .arg(&path)
        .args(["--frame", "00"])
        .output()?;
    let stdout = stdout_of(&skipped);
    if !stdout.ends_with("status: OK (0), end of code, pc 0x023\n") {
        return Err(format!("flag clear but jump taken:\n{stdout}").into());
    }
    Ok(())
}

fn start_pc_out_of_range() -> Result<(), Failed> {
    let (_dir, path) = program("0000")?;
    let output = sparser()
        .args(["--variant", "dpaa1", "disasm"])
        .arg(&path)
        .args(["--pc", "0x3fd"])
        .output()?;
    let stderr = stderr_of(&output);
    if output.status.success() || !stderr.contains("start pc 0x3fd outside 0x20..0x3fd") {
        return Err(format!("expected start pc error, got:\n{stderr}").into());
    }
    Ok(())
}

fn show_inputs_dump() -> Result<(), Failed> {
    let (_dir, path) = program("0000")?;
    let output = sparser()
        .arg("sim")
        .arg(&path)
        .args(["--frame", "0102", "--header-base", "4", "--show-inputs"])
        .output()?;
    let stdout = stdout_of(&output);
    for needle in [
        "Parse Array      : Default used.",
        "Header Base      : Set used (0x4).",
        "Frame            : 2 bytes.",
        "  0000: 01 02",
    ] {
        if !stdout.contains(needle) {
            return Err(format!("missing {needle:?} in:\n{stdout}").into());
        }
    }
    Ok(())
}

fn missing_file_reports_path() -> Result<(), Failed> {
    let output = sparser().args(["disasm", "does-not-exist.sph"]).output()?;
    let stderr = stderr_of(&output);
    if output.status.success() || !stderr.contains("reading does-not-exist.sph") {
        return Err(format!("expected read error, got:\n{stderr}").into());
    }
    Ok(())
}
