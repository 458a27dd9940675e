use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const TOTAL_STAGES: usize = 10;

/// Fixed, ordered pipeline a student application moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum CanonicalStage {
    #[serde(rename = "preparation")]
    Preparation,
    #[serde(rename = "translation_ready")]
    TranslationReady,
    #[serde(rename = "university_application_submitted")]
    UniversityApplicationSubmitted,
    #[serde(rename = "accepted")]
    Accepted,
    #[serde(rename = "visa_application")]
    VisaApplicationPhase,
    #[serde(rename = "process")]
    ProcessPhase,
    #[serde(rename = "visa_appointment")]
    VisaAppointmentScheduled,
    #[serde(rename = "visa_waiting")]
    VisaWaitingPhase,
    #[serde(rename = "germany")]
    GermanyPhase,
    #[serde(rename = "completed")]
    Completed,
}

impl CanonicalStage {
    pub const ALL: [CanonicalStage; TOTAL_STAGES] = [
        Self::Preparation,
        Self::TranslationReady,
        Self::UniversityApplicationSubmitted,
        Self::Accepted,
        Self::VisaApplicationPhase,
        Self::ProcessPhase,
        Self::VisaAppointmentScheduled,
        Self::VisaWaitingPhase,
        Self::GermanyPhase,
        Self::Completed,
    ];

    /// 1-based position in the pipeline.
    pub fn ordinal(self) -> usize {
        match self {
            Self::Preparation => 1,
            Self::TranslationReady => 2,
            Self::UniversityApplicationSubmitted => 3,
            Self::Accepted => 4,
            Self::VisaApplicationPhase => 5,
            Self::ProcessPhase => 6,
            Self::VisaAppointmentScheduled => 7,
            Self::VisaWaitingPhase => 8,
            Self::GermanyPhase => 9,
            Self::Completed => 10,
        }
    }

    /// Label written by current advisor forms.
    pub fn label(self) -> &'static str {
        match self {
            Self::Preparation => "Hazırlık Aşaması",
            Self::TranslationReady => "Tercümeler Hazır",
            Self::UniversityApplicationSubmitted => "Üniversite Başvurusu Yapıldı",
            Self::Accepted => "Kabul Alındı",
            Self::VisaApplicationPhase => "Vize Başvuru Aşaması",
            Self::ProcessPhase => "Süreç Aşaması",
            Self::VisaAppointmentScheduled => "Vize Randevusu Alındı",
            Self::VisaWaitingPhase => "Vize Bekleme Aşaması",
            Self::GermanyPhase => "Almanya Aşaması",
            Self::Completed => "Süreç Tamamlandı",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Preparation => "preparation",
            Self::TranslationReady => "translation_ready",
            Self::UniversityApplicationSubmitted => "university_application_submitted",
            Self::Accepted => "accepted",
            Self::VisaApplicationPhase => "visa_application",
            Self::ProcessPhase => "process",
            Self::VisaAppointmentScheduled => "visa_appointment",
            Self::VisaWaitingPhase => "visa_waiting",
            Self::GermanyPhase => "germany",
            Self::Completed => "completed",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.key() == key)
    }
}

// Historical spellings still present in older records. Canonical labels are
// added on top of these when the table is built.
const LEGACY_ALIASES: &[(&str, CanonicalStage)] = &[
    ("Hazırlık", CanonicalStage::Preparation),
    ("HAZIRLIK", CanonicalStage::Preparation),
    ("Evrak Hazırlık", CanonicalStage::Preparation),
    ("Evrak Toplama", CanonicalStage::Preparation),
    ("Yeni Kayıt", CanonicalStage::Preparation),
    ("Tercüme", CanonicalStage::TranslationReady),
    ("TERCÜME", CanonicalStage::TranslationReady),
    ("Tercümeler Hazırlandı", CanonicalStage::TranslationReady),
    ("Tercümeler Tamam", CanonicalStage::TranslationReady),
    ("Başvuru Yapıldı", CanonicalStage::UniversityApplicationSubmitted),
    ("Üniversite Başvurusu", CanonicalStage::UniversityApplicationSubmitted),
    ("ÜNİVERSİTE BAŞVURUSU", CanonicalStage::UniversityApplicationSubmitted),
    ("Üni Başvuru", CanonicalStage::UniversityApplicationSubmitted),
    ("Kabul", CanonicalStage::Accepted),
    ("KABUL", CanonicalStage::Accepted),
    ("Kabul Geldi", CanonicalStage::Accepted),
    ("Vize Başvurusu", CanonicalStage::VisaApplicationPhase),
    ("VİZE BAŞVURU", CanonicalStage::VisaApplicationPhase),
    ("Vize Başvurusu Yapılacak", CanonicalStage::VisaApplicationPhase),
    ("Süreç", CanonicalStage::ProcessPhase),
    ("SÜREÇTE", CanonicalStage::ProcessPhase),
    ("İşlemde", CanonicalStage::ProcessPhase),
    ("Randevu Alındı", CanonicalStage::VisaAppointmentScheduled),
    ("Vize Randevu", CanonicalStage::VisaAppointmentScheduled),
    ("VİZE RANDEVU", CanonicalStage::VisaAppointmentScheduled),
    ("Vize Bekleme", CanonicalStage::VisaWaitingPhase),
    ("Vize Bekleniyor", CanonicalStage::VisaWaitingPhase),
    ("VİZE BEKLEME", CanonicalStage::VisaWaitingPhase),
    ("Almanya", CanonicalStage::GermanyPhase),
    ("ALMANYA", CanonicalStage::GermanyPhase),
    ("Almanyada", CanonicalStage::GermanyPhase),
    ("Tamamlandı", CanonicalStage::Completed),
    ("TAMAMLANDI", CanonicalStage::Completed),
    ("BİTEN", CanonicalStage::Completed),
    ("biten", CanonicalStage::Completed),
];

fn stage_table() -> &'static BTreeMap<&'static str, CanonicalStage> {
    static TABLE: OnceLock<BTreeMap<&'static str, CanonicalStage>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut m: BTreeMap<&'static str, CanonicalStage> =
            LEGACY_ALIASES.iter().copied().collect();
        for s in CanonicalStage::ALL {
            m.insert(s.label(), s);
        }
        m
    })
}

/// Every label the table recognizes, in lookup order.
pub fn known_labels() -> impl Iterator<Item = (&'static str, CanonicalStage)> {
    stage_table().iter().map(|(k, v)| (*k, *v))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalized {
    pub stage: CanonicalStage,
    /// False when a non-empty label missed the table and fell back.
    pub recognized: bool,
}

pub fn normalize_detailed(label: Option<&str>) -> Normalized {
    match label {
        None | Some("") => Normalized {
            stage: CanonicalStage::Preparation,
            recognized: true,
        },
        Some(l) => match stage_table().get(l) {
            Some(stage) => Normalized {
                stage: *stage,
                recognized: true,
            },
            None => Normalized {
                stage: CanonicalStage::Preparation,
                recognized: false,
            },
        },
    }
}

/// Exact, case-sensitive lookup. Missing, empty and unknown labels all land
/// on `Preparation` so a record always renders.
pub fn normalize(label: Option<&str>) -> CanonicalStage {
    normalize_detailed(label).stage
}

pub fn progress(stage: CanonicalStage) -> u8 {
    let pct = (stage.ordinal() as f64) / (TOTAL_STAGES as f64) * 100.0;
    pct.round() as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StepStatus {
    Completed,
    Current,
    Pending,
}

pub fn stage_status(current: CanonicalStage, target: CanonicalStage) -> StepStatus {
    // The step equal to the current stage is "current" even on the last step.
    match target.ordinal().cmp(&current.ordinal()) {
        std::cmp::Ordering::Less => StepStatus::Completed,
        std::cmp::Ordering::Equal => StepStatus::Current,
        std::cmp::Ordering::Greater => StepStatus::Pending,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    pub stage: CanonicalStage,
    pub label: &'static str,
    pub ordinal: usize,
    pub progress: u8,
    pub status: StepStatus,
}

pub fn pipeline(current: CanonicalStage) -> Vec<PipelineStep> {
    CanonicalStage::ALL
        .iter()
        .map(|s| PipelineStep {
            stage: *s,
            label: s.label(),
            ordinal: s.ordinal(),
            progress: progress(*s),
            status: stage_status(current, *s),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCount {
    pub stage: CanonicalStage,
    pub label: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub total: usize,
    pub unmapped: usize,
    pub average_progress: f64,
    pub stages: Vec<StageCount>,
}

pub fn summarize<'a, I>(labels: I) -> StageSummary
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut counts = [0usize; TOTAL_STAGES];
    let mut total = 0usize;
    let mut unmapped = 0usize;
    let mut progress_sum = 0u64;
    for label in labels {
        let n = normalize_detailed(label);
        if !n.recognized {
            unmapped += 1;
        }
        counts[n.stage.ordinal() - 1] += 1;
        progress_sum += u64::from(progress(n.stage));
        total += 1;
    }
    let average_progress = if total > 0 {
        progress_sum as f64 / total as f64
    } else {
        0.0
    };
    StageSummary {
        total,
        unmapped,
        average_progress,
        stages: CanonicalStage::ALL
            .iter()
            .map(|s| StageCount {
                stage: *s,
                label: s.label(),
                count: counts[s.ordinal() - 1],
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_label_maps_into_the_pipeline() {
        let mut n = 0;
        for (label, stage) in known_labels() {
            assert_eq!(normalize(Some(label)), stage, "label {label}");
            assert!(CanonicalStage::ALL.contains(&stage));
            n += 1;
        }
        assert_eq!(n, LEGACY_ALIASES.len() + TOTAL_STAGES);
    }

    #[test]
    fn missing_and_empty_labels_start_at_preparation() {
        assert_eq!(normalize(None), CanonicalStage::Preparation);
        assert_eq!(normalize(Some("")), CanonicalStage::Preparation);
        assert!(normalize_detailed(Some("")).recognized);
    }

    #[test]
    fn unknown_label_falls_back_without_error() {
        let n = normalize_detailed(Some("Bilinmeyen Durum"));
        assert_eq!(n.stage, CanonicalStage::Preparation);
        assert!(!n.recognized);
        // Lookup is case-sensitive.
        assert!(!normalize_detailed(Some("kabul")).recognized);
    }

    #[test]
    fn completed_variants() {
        for l in ["BİTEN", "biten", "Süreç Tamamlandı"] {
            assert_eq!(normalize(Some(l)), CanonicalStage::Completed, "{l}");
        }
    }

    #[test]
    fn canonical_labels_round_trip() {
        for s in CanonicalStage::ALL {
            assert_eq!(normalize(Some(s.label())), s);
            assert_eq!(CanonicalStage::from_key(s.key()), Some(s));
        }
    }

    #[test]
    fn progress_bounds_and_monotonic() {
        assert_eq!(progress(CanonicalStage::Preparation), 10);
        assert_eq!(progress(CanonicalStage::VisaApplicationPhase), 50);
        assert_eq!(progress(CanonicalStage::Completed), 100);
        for w in CanonicalStage::ALL.windows(2) {
            assert!(w[0].ordinal() < w[1].ordinal());
            assert!(progress(w[0]) <= progress(w[1]));
        }
    }

    #[test]
    fn current_step_is_never_completed() {
        let cur = CanonicalStage::Accepted;
        assert_eq!(
            stage_status(cur, CanonicalStage::TranslationReady),
            StepStatus::Completed
        );
        assert_eq!(stage_status(cur, cur), StepStatus::Current);
        assert_eq!(
            stage_status(cur, CanonicalStage::GermanyPhase),
            StepStatus::Pending
        );
        let last = pipeline(CanonicalStage::Completed);
        assert_eq!(last[9].status, StepStatus::Current);
        assert!(last[..9].iter().all(|s| s.status == StepStatus::Completed));
    }

    #[test]
    fn summary_counts_unmapped_labels() {
        let s = summarize([Some("Kabul"), Some("garbage"), None, Some("biten")]);
        assert_eq!(s.total, 4);
        assert_eq!(s.unmapped, 1);
        assert_eq!(s.stages[0].count, 2);
        assert_eq!(s.stages[3].count, 1);
        assert_eq!(s.stages[9].count, 1);
        assert!((s.average_progress - 40.0).abs() < 1e-9);
    }
}
