use crate::records::{AudioTest, Patient};

/// One-line summary of a test, used in lists.
pub fn test_row(test: &AudioTest) -> String {
    format!(
        "{:<14} {:<10} {:<8} {:>5.1}%  {}",
        test.id,
        test.patient_id,
        test.predicted_label.as_str(),
        test.stroke_probability * 100.0,
        test.created_at.format("%Y-%m-%d %H:%M")
    )
}

pub fn render_history(tests: &[&AudioTest]) -> String {
    if tests.is_empty() {
        return "No tests recorded.\n".into();
    }
    let mut out = format!(
        "{:<14} {:<10} {:<8} {:>6}  {}\n",
        "TEST", "PATIENT", "RESULT", "PROB", "DATE"
    );
    for test in tests {
        out.push_str(&test_row(test));
        out.push('\n');
    }
    out.push_str(&format!("{} Records\n", tests.len()));
    out
}

/// Full report for one test.
pub fn render_test_detail(test: &AudioTest, patient: Option<&Patient>) -> String {
    let result = test.result();
    let b = &result.biomarkers;
    let who = patient
        .map(|p| format!("{} ({})", p.name, p.id))
        .unwrap_or_else(|| test.patient_id.clone());
    let mut out = String::new();
    out.push_str(&format!("Test          {}\n", test.id));
    out.push_str(&format!("Patient       {who}\n"));
    out.push_str(&format!(
        "Recorded      {} by {}\n",
        test.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        test.user_id
    ));
    out.push_str(&format!(
        "Result        {} ({:.1}% stroke probability)\n",
        result.predicted_label,
        result.stroke_probability * 100.0
    ));
    out.push_str("Biomarkers\n");
    out.push_str(&format!("  Jitter          {:.2} %\n", b.jitter));
    out.push_str(&format!("  Shimmer         {:.2} %\n", b.shimmer));
    out.push_str(&format!("  HNR             {:.1} dB\n", b.hnr));
    out.push_str(&format!("  Speaking rate   {:.1} syl/s\n", b.speaking_rate));
    out.push_str(&format!("  Pauses          {:.0} /min\n", b.pause_frequency));
    out.push_str(&format!("Reasoning     {}\n", result.reasoning));
    out.push_str(&format!("Audio         {}\n", test.audio_url));
    out.push_str(&format!(
        "Model         {} ({:?})\n",
        test.model_version, test.device_type
    ));
    out
}
