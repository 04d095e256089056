//! `sounder thresholds`: print the builtin rule table for reference.

use colored::Colorize;

use crate::domain::thresholds::ThresholdTable;

pub fn run() -> anyhow::Result<()> {
    let table = ThresholdTable::builtin();
    println!("{}", "builtin bottleneck thresholds".bold());
    println!(
        "  {:<9} {:<22} {:>8}  {:<9} issue",
        "domain", "metric", "trigger", "severity"
    );
    for rule in table.rules() {
        let trigger = format!("{} {}", rule.op.symbol(), format_limit(rule.limit));
        // Manual padding; ANSI color codes would throw off format widths.
        let pad = " ".repeat(9usize.saturating_sub(rule.severity.as_str().len()));
        println!(
            "  {:<9} {:<22} {:>8}  {}{} {}",
            rule.domain.as_str(),
            rule.metric,
            trigger,
            rule.severity.colorized(),
            pad,
            rule.issue
        );
    }
    Ok(())
}

fn format_limit(limit: f64) -> String {
    if limit.fract().abs() < f64::EPSILON {
        format!("{limit:.0}")
    } else {
        format!("{limit:.1}")
    }
}
