//! Daily digest.

use crate::classify::Urgency;
use crate::reports::aggregate::count_by;
use crate::store::Record;

const TOP_CATEGORIES: usize = 8;
const CANDIDATE_LIMIT: usize = 7;
const IMPORTANT_LIMIT: usize = 10;

/// Build the digest for records covering the last `hours` hours.
pub fn build_daily_digest(records: &[Record], hours: u32) -> String {
    if records.is_empty() {
        return format!("No messages in the last {hours} hours.");
    }

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!(
        "📊 Daily report ({hours}h)\nTotal messages: {}\n",
        records.len()
    ));

    lines.push("Categories:".to_string());
    for (category, n) in count_by(records, |r| r.category.as_str())
        .into_iter()
        .take(TOP_CATEGORIES)
    {
        lines.push(format!("• {category}: {n}"));
    }

    lines.push("\nUrgency:".to_string());
    for (urgency, n) in count_by(records, |r| r.urgency.as_str()) {
        lines.push(format!("• {urgency}: {n}"));
    }

    let delegate: Vec<&Record> = records.iter().filter(|r| r.delegate_candidate).collect();
    let automate: Vec<&Record> = records.iter().filter(|r| r.automate_candidate).collect();
    let hire: Vec<&Record> = records.iter().filter(|r| r.hire_candidate).collect();

    lines.push(candidate_block("🧩 Delegate", &delegate));
    lines.push(candidate_block("⚙️ Automate", &automate));
    lines.push(candidate_block("👥 Hire", &hire));

    lines.push("\n📝 Important (high urgency):".to_string());
    let important: Vec<&Record> = records
        .iter()
        .filter(|r| r.urgency == Urgency::High)
        .take(IMPORTANT_LIMIT)
        .collect();
    if important.is_empty() {
        lines.push("• none".to_string());
    } else {
        for r in important {
            lines.push(format!("• {}: {}", r.topic, r.summary));
        }
    }

    lines.join("\n")
}

fn candidate_block(title: &str, items: &[&Record]) -> String {
    if items.is_empty() {
        return format!("\n{title}: none");
    }
    let shown = items.len().min(CANDIDATE_LIMIT);
    let mut out = format!("\n{title} (top {shown}):");
    for r in &items[..shown] {
        out.push_str(&format!("\n• {} — {}", r.topic, r.summary));
    }
    out
}
