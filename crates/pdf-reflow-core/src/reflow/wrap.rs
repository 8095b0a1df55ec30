use super::metrics::FontMetrics;

/// Tolerance for float noise when comparing measured widths
pub(crate) const WIDTH_EPSILON: f32 = 1e-3;

/// Lines produced by greedy word wrapping
#[derive(Debug, Clone, PartialEq)]
pub struct Wrapped {
    pub lines: Vec<String>,
    /// Width of the widest line at the wrapping size
    pub widest: f32,
    /// Some single word is wider than the available width
    pub overlong: bool,
}

/// Greedy measured word wrap.
///
/// Words are never split: a word that does not fit on its own still gets a
/// line to itself and sets `overlong`.
pub fn wrap_words<M: FontMetrics + ?Sized>(text: &str, font: &M, size: f32, max_width: f32) -> Wrapped {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut overlong = false;

    for word in text.split_whitespace() {
        if font.text_width(word, size) > max_width + WIDTH_EPSILON {
            overlong = true;
        }

        if current.is_empty() {
            current.push_str(word);
            continue;
        }

        let candidate_width = font.text_width(&current, size)
            + font.text_width(" ", size)
            + font.text_width(word, size);
        if candidate_width <= max_width + WIDTH_EPSILON {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }

    let widest = lines
        .iter()
        .map(|l| font.text_width(l, size))
        .fold(0.0_f32, f32::max);

    Wrapped {
        lines,
        widest,
        overlong,
    }
}
