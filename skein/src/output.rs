//! Result files: the machine format (one record per line) and the readable report with code
//! snippets.

use std::{
    fmt::Write as _,
    fs,
    io,
    path::{Path, PathBuf},
};

use skein_core::{Finding, Severity, TraceRef};

/// File names inside the output directory.
pub const MACHINE_FILE: &str = "results_machine.log";
pub const READABLE_FILE: &str = "results_readable.log";

/// Lines of surrounding code quoted per operand in the readable report.
const SNIPPET_CONTEXT: u32 = 2;

// RESULT WRITER
// ================================================================================================

/// Writes both result files, most severe findings first.
///
/// `min_severity` drops findings below the given level (the `noWarning`/`noInfo` flags).
pub fn write_results(
    dir: &Path,
    findings: &[Finding],
    min_severity: Severity,
) -> io::Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(dir)?;
    let mut kept: Vec<&Finding> =
        findings.iter().filter(|finding| finding.severity <= min_severity).collect();
    kept.sort_by_key(|finding| finding.severity);

    let machine_path = dir.join(MACHINE_FILE);
    let mut machine = String::new();
    for finding in &kept {
        machine.push_str(&finding.machine_line());
        machine.push('\n');
    }
    fs::write(&machine_path, machine)?;

    let readable_path = dir.join(READABLE_FILE);
    let mut readable = String::new();
    for (index, finding) in kept.iter().enumerate() {
        render_readable(&mut readable, index + 1, finding);
    }
    fs::write(&readable_path, readable)?;

    Ok((machine_path, readable_path))
}

fn render_readable(out: &mut String, number: usize, finding: &Finding) {
    let _ = writeln!(out, "{number}. [{}] {}", finding.severity, finding.kind.headline());
    if let Some(note) = &finding.note {
        let _ = writeln!(out, "   note: {note}");
    }
    for operand in &finding.operands {
        let _ = writeln!(out, "   -> {operand}");
        if let Some(snippet) = snippet(operand) {
            out.push_str(&snippet);
        }
    }
    out.push('\n');
}

/// Quotes the operand's source line with surrounding context; silently degrades to the bare
/// `file:line` reference when the file is not readable from here.
fn snippet(operand: &TraceRef) -> Option<String> {
    let content = fs::read_to_string(operand.file.as_ref()).ok()?;
    let target = operand.line;
    let first = target.saturating_sub(SNIPPET_CONTEXT).max(1);
    let mut out = String::new();
    for (idx, line) in content.lines().enumerate() {
        let line_no = idx as u32 + 1;
        if line_no < first || line_no > target + SNIPPET_CONTEXT {
            continue;
        }
        let marker = if line_no == target { ">" } else { " " };
        let _ = writeln!(out, "      {marker} {line_no:>4} | {line}");
    }
    Some(out)
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use skein_core::{EventId, FindingKind, RoutineId};

    use super::*;

    fn finding(kind: FindingKind) -> Finding {
        Finding::new(
            kind,
            vec![TraceRef::new(
                EventId::new(RoutineId::new(1), 0),
                std::sync::Arc::from("no/such/file.go"),
                3,
            )],
        )
    }

    #[test]
    fn machine_file_orders_by_severity_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let findings = vec![
            finding(FindingKind::ConcurrentRecv),
            finding(FindingKind::SendOnClosed),
        ];
        let (machine_path, readable_path) =
            write_results(dir.path(), &findings, Severity::Information).unwrap();

        let machine = fs::read_to_string(machine_path).unwrap();
        let lines: Vec<&str> = machine.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("send_on_closed;Critical;"));
        for line in lines {
            Finding::parse_machine_line(line).unwrap();
        }
        assert!(fs::read_to_string(readable_path).unwrap().contains("send on closed channel"));
    }

    #[test]
    fn severity_filter_drops_low_findings() {
        let dir = tempfile::tempdir().unwrap();
        let findings = vec![
            finding(FindingKind::ConcurrentRecv),
            finding(FindingKind::SendOnClosed),
        ];
        let (machine_path, _) =
            write_results(dir.path(), &findings, Severity::Critical).unwrap();
        let machine = fs::read_to_string(machine_path).unwrap();
        assert_eq!(machine.lines().count(), 1);
    }
}
