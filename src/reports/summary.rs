//! Long-window summary: deduplicated candidate lists plus a fixed roadmap.

use crate::reports::aggregate::dedup_by_summary;
use crate::store::Record;

const DELEGATE_LIMIT: usize = 25;
const AUTOMATE_LIMIT: usize = 25;
const HIRE_LIMIT: usize = 15;

const NO_CANDIDATES: &str = "• no clear candidates";

const ROADMAP: &[&str] = &[
    "• Week 1: collect messages and record recurring tasks",
    "• Week 2: delegate routine tasks and write checklists",
    "• Week 3: roll out 1–2 automations and set KPIs for the people doing the work",
    "• Week 4: adjust roles or hire, then track progress against the metrics",
];

const CLOSING: &str =
    "Reply with your niche and key processes to get a more specific roadmap.";

/// Build the summary for records covering the last `days` days.
pub fn build_long_summary(records: &[Record], days: u32) -> String {
    if records.is_empty() {
        return format!("No messages in the last {days} days.");
    }

    let delegate = dedup_by_summary(records.iter().filter(|r| r.delegate_candidate));
    let automate = dedup_by_summary(records.iter().filter(|r| r.automate_candidate));
    let hire = dedup_by_summary(records.iter().filter(|r| r.hire_candidate));

    let mut lines: Vec<String> = vec![format!("🧠 Diagnostic summary for {days} days")];

    push_section(&mut lines, "1) ✅ Tasks to delegate:", &delegate, DELEGATE_LIMIT);
    push_section(&mut lines, "2) ⚙️ Automation recommendations:", &automate, AUTOMATE_LIMIT);
    push_section(&mut lines, "3) 👥 Hiring recommendations:", &hire, HIRE_LIMIT);

    lines.push("\n4) 🗺️ Roadmap out of day-to-day operations (draft):".to_string());
    lines.extend(ROADMAP.iter().map(|s| s.to_string()));
    lines.push(format!("\n{CLOSING}"));

    lines.join("\n")
}

fn push_section(lines: &mut Vec<String>, title: &str, items: &[&Record], limit: usize) {
    lines.push(format!("\n{title}"));
    if items.is_empty() {
        lines.push(NO_CANDIDATES.to_string());
        return;
    }
    for r in items.iter().take(limit) {
        lines.push(format!("• {}", r.summary.trim()));
    }
}
