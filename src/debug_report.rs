use entity_resolver::{Diagnostic, ResolutionReport, RoundMetrics};
use serde_json::Value;

mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";

    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    pub struct Palette {
        enabled: bool,
    }

    impl Palette {
        pub fn new(enabled: bool) -> Self {
            Self { enabled }
        }

        pub fn paint(&self, s: impl AsRef<str>, color: &str) -> String {
            if self.enabled { format!("{}{}{}", color, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn bold(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", BOLD, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn dim(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", DIM, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }
    }
}

pub fn print_report(report: &ResolutionReport, color: bool) {
    let palette = ansi::Palette::new(color);
    println!(
        "\n{}",
        palette.bold(palette.paint(format!("⚙  Resolved {} records", report.configuration.len()), ansi::CYAN))
    );

    println!("\n{}", palette.paint("━━━ Rounds ━━━", ansi::GRAY));
    for (idx, round) in report.metrics.rounds.iter().enumerate() {
        print_round(idx + 1, round, &palette);
    }

    println!("\n{}", palette.paint("━━━ Records ━━━", ansi::GRAY));
    if report.configuration.is_empty() {
        println!("{}", palette.dim("  No records produced"));
        println!("\n{}", palette.paint("Possible reasons:", ansi::YELLOW));
        println!("  • No probe matched the bus fixture");
        println!("  • Templates were skipped (see diagnostics)");
        println!("\n{}", palette.dim("  Tip: Set RUST_LOG=entity_resolver=debug to trace probe evaluation"));
    } else {
        print_records(report, &palette);
    }

    println!("\n{}", palette.paint("━━━ Changes ━━━", ansi::GRAY));
    let changes = &report.changes;
    if changes.is_empty() {
        println!("{}", palette.dim("  No changes"));
    }
    for (label, ids, color) in
        [("+", &changes.added, ansi::GREEN), ("~", &changes.updated, ansi::YELLOW), ("-", &changes.removed, ansi::RED)]
    {
        for id in ids {
            println!("  {} {}", palette.paint(label, color), id);
        }
    }

    if !report.diagnostics.is_empty() {
        println!("\n{}", palette.paint("━━━ Diagnostics ━━━", ansi::GRAY));
        for diagnostic in &report.diagnostics {
            let color = match diagnostic {
                Diagnostic::UnmatchedTemplate { .. } => ansi::GRAY,
                Diagnostic::InvalidTemplate { .. } | Diagnostic::MalformedProbe { .. } => ansi::RED,
                _ => ansi::YELLOW,
            };
            println!("  {} {}", palette.paint("•", color), diagnostic);
        }
    }

    println!("\n{}", palette.paint("━━━ Timing ━━━", ansi::GRAY));
    println!(
        "  Total: {}  │  Snapshot: {}  │  Rounds: {}",
        palette.paint(format!("{:?}", report.metrics.total), ansi::GREEN),
        palette.paint(format!("{:?}", report.metrics.snapshot), ansi::CYAN),
        palette.dim(report.metrics.rounds.len().to_string()),
    );
    println!();
}

fn print_round(number: usize, round: &RoundMetrics, palette: &ansi::Palette) {
    println!(
        "  {} {}  {}",
        palette.paint(format!("Round {number}:"), ansi::BLUE),
        if round.names_passed.is_empty() {
            palette.dim("✗ fixed point")
        } else {
            palette.paint(format!("✓ {} passed", round.names_passed.len()), ansi::GREEN)
        },
        palette.dim(format!(
            "interfaces {} │ objects {} (+{} dropped) │ evaluated {} │ written {} │ {:?}",
            round.interfaces_requested,
            round.objects_fetched,
            round.objects_dropped,
            round.templates_evaluated,
            round.records_written,
            round.duration
        )),
    );

    for name in round.names_passed.iter().take(5) {
        println!("    {}", palette.paint(name, ansi::CYAN));
    }
    if round.names_passed.len() > 5 {
        println!("    {}", palette.dim(format!("... +{} more", round.names_passed.len() - 5)));
    }
}

fn print_records(report: &ResolutionReport, palette: &ansi::Palette) {
    for (id, record) in report.configuration.iter() {
        let name = record.get("Name").and_then(Value::as_str).unwrap_or("<unnamed>");
        let record_type = record.get("Type").and_then(Value::as_str).unwrap_or("Chassis");
        let marker =
            if report.new_records.contains(id) { palette.paint("new", ansi::GREEN) } else { palette.dim("kept") };
        println!(
            "  {} {} {} {}",
            palette.bold(palette.paint(name, ansi::GREEN)),
            palette.dim("│"),
            palette.paint(record_type, ansi::BLUE),
            marker,
        );

        let exposes = record.get("Exposes").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
        println!(
            "      {} {}  {} {}",
            palette.dim("id:"),
            palette.paint(id, ansi::YELLOW),
            palette.dim("│ exposes:"),
            exposes.len()
        );
        for expose in exposes {
            let name = expose.get("Name").and_then(Value::as_str).unwrap_or("<unnamed>");
            let kind = expose.get("Type").and_then(Value::as_str).unwrap_or("?");
            println!("        {} {}", palette.paint(kind, ansi::CYAN), palette.dim(name));
        }
    }
}
