use std::collections::HashMap;

use lazy_static::lazy_static;
use shared::{DiseaseClass, SeverityLevel};
use strum::IntoEnumIterator;

/// Guidance returned to the caller for a clean bill of health. Records keep a
/// null recommendation in this case; this string lives on the wire only.
pub const HEALTHY_ADVICE: &str = "No treatment needed. Continue regular plant care.";

/// Severity-specialized treatment table. Low entries lean preventive, Medium
/// entries match field guidance for an established infection, High entries
/// assume the plant may not be salvageable.
static TREATMENT_TABLE: &[(DiseaseClass, SeverityLevel, &str)] = &[
    (
        DiseaseClass::BacterialSpot,
        SeverityLevel::Low,
        "Remove the few spotted leaves and avoid overhead watering. Monitor for spread.",
    ),
    (
        DiseaseClass::BacterialSpot,
        SeverityLevel::Medium,
        "Apply copper-based bactericide. Avoid overhead watering.",
    ),
    (
        DiseaseClass::BacterialSpot,
        SeverityLevel::High,
        "Apply copper-based bactericide weekly and prune heavily infected growth. Disinfect tools between cuts.",
    ),
    (
        DiseaseClass::EarlyBlight,
        SeverityLevel::Low,
        "Remove affected lower leaves and mulch the soil line. Begin preventive fungicide if weather stays humid.",
    ),
    (
        DiseaseClass::EarlyBlight,
        SeverityLevel::Medium,
        "Apply fungicide containing chlorothalonil or copper. Remove affected leaves.",
    ),
    (
        DiseaseClass::EarlyBlight,
        SeverityLevel::High,
        "Apply chlorothalonil fungicide on a tight schedule and strip infected foliage. Destroy debris after harvest.",
    ),
    (
        DiseaseClass::LateBlight,
        SeverityLevel::Low,
        "Apply fungicide immediately and isolate the plant. Late blight spreads fast even from small lesions.",
    ),
    (
        DiseaseClass::LateBlight,
        SeverityLevel::Medium,
        "Apply fungicide immediately. Remove and destroy affected plants.",
    ),
    (
        DiseaseClass::LateBlight,
        SeverityLevel::High,
        "Remove and destroy the plant; do not compost it. Treat neighboring plants with fungicide at once.",
    ),
    (
        DiseaseClass::LeafMold,
        SeverityLevel::Low,
        "Improve air circulation and reduce humidity. Usually no fungicide needed at this stage.",
    ),
    (
        DiseaseClass::LeafMold,
        SeverityLevel::Medium,
        "Improve air circulation. Apply fungicide if severe.",
    ),
    (
        DiseaseClass::LeafMold,
        SeverityLevel::High,
        "Apply fungicide, thin the canopy aggressively, and ventilate. Remove the worst-affected leaves.",
    ),
    (
        DiseaseClass::SeptoriaLeafSpot,
        SeverityLevel::Low,
        "Remove spotted leaves and water at the base only. Watch the lower canopy.",
    ),
    (
        DiseaseClass::SeptoriaLeafSpot,
        SeverityLevel::Medium,
        "Remove affected leaves. Apply fungicide preventively.",
    ),
    (
        DiseaseClass::SeptoriaLeafSpot,
        SeverityLevel::High,
        "Apply fungicide on a weekly schedule and strip infected foliage. Rotate crops next season.",
    ),
    (
        DiseaseClass::SpiderMites,
        SeverityLevel::Low,
        "Rinse foliage with a strong water spray and raise humidity. Check leaf undersides in a few days.",
    ),
    (
        DiseaseClass::SpiderMites,
        SeverityLevel::Medium,
        "Spray with insecticidal soap or horticultural oil, covering leaf undersides. Repeat after 5-7 days.",
    ),
    (
        DiseaseClass::SpiderMites,
        SeverityLevel::High,
        "Apply miticide and discard heavily webbed foliage. Consider predatory mites for lasting control.",
    ),
    (
        DiseaseClass::TargetSpot,
        SeverityLevel::Low,
        "Improve plant spacing for air circulation and remove spotted leaves.",
    ),
    (
        DiseaseClass::TargetSpot,
        SeverityLevel::Medium,
        "Apply fungicide and improve plant spacing for air circulation.",
    ),
    (
        DiseaseClass::TargetSpot,
        SeverityLevel::High,
        "Apply fungicide on a tight schedule and prune for airflow. Remove badly lesioned leaves.",
    ),
    (
        DiseaseClass::MosaicVirus,
        SeverityLevel::Low,
        "No cure available. Isolate the plant, disinfect tools, and watch for spread.",
    ),
    (
        DiseaseClass::MosaicVirus,
        SeverityLevel::Medium,
        "No cure available. Remove infected plants to prevent spread.",
    ),
    (
        DiseaseClass::MosaicVirus,
        SeverityLevel::High,
        "No cure available. Remove and destroy the plant immediately; wash hands and tools before touching others.",
    ),
    (
        DiseaseClass::YellowLeafCurlVirus,
        SeverityLevel::Low,
        "Control whitefly vectors with sticky traps and netting. Monitor nearby plants.",
    ),
    (
        DiseaseClass::YellowLeafCurlVirus,
        SeverityLevel::Medium,
        "Control whitefly vectors. Remove infected plants.",
    ),
    (
        DiseaseClass::YellowLeafCurlVirus,
        SeverityLevel::High,
        "Remove and destroy infected plants and treat the area for whiteflies before replanting.",
    ),
];

lazy_static! {
    static ref TREATMENTS: HashMap<(DiseaseClass, SeverityLevel), &'static str> = {
        let mut map = HashMap::new();
        for (disease, severity, advice) in TREATMENT_TABLE {
            map.insert((*disease, *severity), *advice);
        }
        map
    };
}

/// Looks up treatment for a diagnosed `(disease, severity)` pair. Unknown
/// combinations fail soft with `None`; the diagnosis itself stands.
pub fn recommend(disease: DiseaseClass, severity: SeverityLevel) -> Option<String> {
    TREATMENTS
        .get(&(disease, severity))
        .map(|advice| advice.to_string())
}

/// Startup check: every disease in the taxonomy must carry advice for every
/// reportable severity. A gap here is a deployment defect, not a runtime
/// condition, so boot should refuse to proceed.
pub fn validate_table() -> Result<(), String> {
    let mut missing = Vec::new();
    for disease in DiseaseClass::iter().filter(|d| !d.is_healthy()) {
        for severity in [SeverityLevel::Low, SeverityLevel::Medium, SeverityLevel::High] {
            if !TREATMENTS.contains_key(&(disease, severity)) {
                missing.push(format!("({disease}, {severity})"));
            }
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("treatment table is missing: {}", missing.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_the_full_taxonomy() {
        assert_eq!(validate_table(), Ok(()));
    }

    #[test]
    fn known_pair_resolves() {
        let advice = recommend(DiseaseClass::EarlyBlight, SeverityLevel::Medium).unwrap();
        assert!(advice.contains("chlorothalonil"));
    }

    #[test]
    fn unknown_pair_fails_soft() {
        // Healthy never reaches the composer's diseased path; the lookup
        // still must not panic or invent advice.
        assert_eq!(recommend(DiseaseClass::Healthy, SeverityLevel::High), None);
        assert_eq!(
            recommend(DiseaseClass::EarlyBlight, SeverityLevel::None),
            None
        );
    }
}
