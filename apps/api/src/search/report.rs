//! Report Renderer: ranked opportunities to a Markdown document.

use crate::search::normalizer::Opportunity;

pub const REPORT_TITLE: &str = "# NaviSmart AI Opportunity Search Results";
const UNTITLED: &str = "Untitled";
const NO_SCORE: &str = "-";

/// Renders the title line followed by one numbered entry per opportunity.
/// Summary and source lines are omitted when empty; entries end with a blank line.
pub fn render_report(items: &[Opportunity]) -> String {
    let mut lines = vec![REPORT_TITLE.to_string(), String::new()];

    for (i, item) in items.iter().enumerate() {
        let title = if item.title.is_empty() {
            UNTITLED
        } else {
            item.title.as_str()
        };
        let score = item
            .score
            .map(|s| format!("{:.0}", s + 0.0))
            .unwrap_or_else(|| NO_SCORE.to_string());

        lines.push(format!("{}. {title} (Score: {score})", i + 1));
        if !item.summary.is_empty() {
            lines.push(format!("   - {}", item.summary));
        }
        if !item.source.is_empty() {
            lines.push(format!("   - Source: {}", item.source));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}
