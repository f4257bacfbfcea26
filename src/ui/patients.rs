use crate::records::Patient;

pub fn render_patients(patients: &[&Patient]) -> String {
    if patients.is_empty() {
        return "No patients found.\n".into();
    }
    let mut out = format!(
        "{:<10} {:<24} {:>4}  {:<8} {}\n",
        "ID", "NAME", "AGE", "GENDER", "STATUS"
    );
    for p in patients {
        out.push_str(&format!(
            "{:<10} {:<24} {:>4}  {:<8} {}\n",
            p.id, p.name, p.age, p.gender, p.diagnosis_status
        ));
    }
    out
}
