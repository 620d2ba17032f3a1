use super::AnalysisResult;
use serde::Deserialize;

pub const HEURISTIC_CONFIDENCE: u8 = 60;
const HEURISTIC_BLURRY_SCORE: u8 = 70;
const HEURISTIC_SHARP_SCORE: u8 = 20;

// Models are loose with the schema: scores come back as floats, fields go
// missing. A missing `hasPeople` counts as "people present" so nothing is
// suggested for deletion on a guess.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnalysis {
    #[serde(default)]
    is_blurry: bool,
    #[serde(default)]
    is_screenshot: bool,
    #[serde(default)]
    blur_score: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default = "default_has_people")]
    has_people: bool,
}

fn default_has_people() -> bool {
    true
}

fn to_percent(value: Option<f64>) -> u8 {
    match value {
        Some(v) if v.is_finite() => v.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

impl From<RawAnalysis> for AnalysisResult {
    fn from(raw: RawAnalysis) -> Self {
        Self {
            is_blurry: raw.is_blurry,
            blur_score: to_percent(raw.blur_score),
            is_screenshot: raw.is_screenshot,
            has_people: raw.has_people,
            confidence: to_percent(raw.confidence),
        }
    }
}

/// Return the first balanced `{...}` block in `text`. Braces inside JSON
/// string literals are not counted.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Keyword sniffing over a free-text answer.
pub fn heuristic_result(text: &str) -> AnalysisResult {
    let lower = text.to_lowercase();
    let is_blurry = lower.contains("blurry");

    AnalysisResult {
        is_blurry,
        blur_score: if is_blurry {
            HEURISTIC_BLURRY_SCORE
        } else {
            HEURISTIC_SHARP_SCORE
        },
        is_screenshot: lower.contains("screenshot"),
        has_people: ["people", "person", "human"]
            .iter()
            .any(|word| lower.contains(word)),
        confidence: HEURISTIC_CONFIDENCE,
    }
}

/// Turn a model's textual answer into a result. Never fails: anything that
/// is not a usable JSON object goes through the keyword heuristic.
pub fn parse_answer(text: &str) -> AnalysisResult {
    let parsed = extract_json_object(text)
        .and_then(|json| serde_json::from_str::<RawAnalysis>(json).ok());

    match parsed {
        Some(raw) => raw.into(),
        None => {
            log::warn!("Model answer had no usable JSON object, using keyword heuristic");
            heuristic_result(text)
        }
    }
}
