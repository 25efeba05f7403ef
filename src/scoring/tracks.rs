use log::warn;

/// ClinGen gene-disease validity weights (Track B). Matching is
/// case-insensitive; anything unrecognized is treated as `Unknown`.
pub fn clingen_weight(classification: &str) -> f64 {
    match classification.trim().to_lowercase().as_str() {
        "definitive" => 1.0,
        "strong" => 0.8,
        "moderate" => 0.6,
        "limited" => 0.3,
        "disputed" => 0.1,
        "refuted" => 0.0,
        "no evidence" => 0.0,
        "unknown" => 0.5,
        other => {
            warn!("Unrecognized ClinGen classification {other:?}, weighing as Unknown");
            0.5
        }
    }
}

/// GenCC submission weights (Track C). Submissions arrive in mixed case.
/// Unrecognized strings weigh zero but still count toward the submission
/// total.
pub fn gencc_weight(classification: &str) -> f64 {
    match classification.trim().to_lowercase().as_str() {
        "definitive" => 1.0,
        "strong" => 0.8,
        "moderate" => 0.6,
        "supportive" => 0.5,
        "limited" => 0.3,
        "animal model" | "animal model only" => 0.2,
        "disputed" | "disputed evidence" => 0.1,
        "refuted" | "refuted evidence" => 0.0,
        "no known disease relationship" => 0.0,
        other => {
            warn!("Unrecognized GenCC classification {other:?}, weighing zero");
            0.0
        }
    }
}

/// Track C raw score for one gene from its list of GenCC submissions:
///
/// * quality: `Σ w² / Σ w · 0.5`
/// * quantity: `min(1, √(n/5)) · 0.3`
/// * confidence: share of Definitive/Strong submissions `· 0.2`
pub fn gencc_raw_score(classifications: &[String]) -> f64 {
    let n = classifications.len();
    if n == 0 {
        return 0.0;
    }
    let weights: Vec<f64> = classifications.iter().map(|c| gencc_weight(c)).collect();
    let weight_sum: f64 = weights.iter().sum();
    let square_sum: f64 = weights.iter().map(|w| w * w).sum();

    let quality = if weight_sum > 0.0 {
        square_sum / weight_sum * 0.5
    } else {
        0.0
    };
    let quantity = (n as f64 / 5.0).sqrt().min(1.0) * 0.3;
    let confident = classifications
        .iter()
        .filter(|c| {
            let c = c.trim().to_lowercase();
            c == "definitive" || c == "strong"
        })
        .count();
    let confidence = confident as f64 / n as f64 * 0.2;

    quality + quantity + confidence
}
