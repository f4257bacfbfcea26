use crate::store::Summary;

use super::history::test_row;

/// Headline figures plus recent activity.
pub fn render_dashboard(summary: &Summary) -> String {
    let mut out = String::new();
    out.push_str(&format!("Total Patients    {}\n", summary.total_patients));
    out.push_str(&format!("Tests Conducted   {}\n", summary.tests_conducted));
    out.push_str(&format!("Stroke Detected   {}\n", summary.stroke_detected));
    match summary.mean_probability {
        Some(p) => out.push_str(&format!("Mean Probability  {:.1}%\n", p * 100.0)),
        None => out.push_str("Mean Probability  -\n"),
    }

    out.push_str("\nRecent Activity\n");
    if summary.recent.is_empty() {
        out.push_str("  No tests recorded yet.\n");
    }
    for test in &summary.recent {
        out.push_str("  ");
        out.push_str(&test_row(test));
        out.push('\n');
    }
    out
}
