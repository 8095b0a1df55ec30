//! Fitting translated text into the box of the fragment it replaces.
//!
//! The engine tries font sizes from the original size downwards and wraps
//! the text greedily at each one. The first (largest) size whose wrapped
//! block fits inside the box wins. When nothing fits, the minimum size is
//! used anyway and the result is flagged so the overflow can be reported.

mod metrics;
mod wrap;

pub use metrics::{Face, FontMetrics, FontSet, StandardFont};
pub use wrap::{Wrapped, wrap_words};

use serde::Serialize;
use tracing::debug;

use crate::config::ReflowConfig;
use crate::fragment::{Fragment, FragmentId};
use wrap::WIDTH_EPSILON;

/// Upper bound on candidate sizes tried per fragment
const MAX_CANDIDATES: usize = 512;

/// Layout chosen for one fragment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReflowResult {
    pub fragment_id: FragmentId,
    pub chosen_font_size: f32,
    pub wrapped_lines: Vec<String>,
    /// `false` when even the minimum size overflows the box
    pub fits: bool,
    /// Index into the `FontSet` used for measuring
    pub face: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReflowEngine {
    config: ReflowConfig,
}

impl ReflowEngine {
    pub const fn new(config: ReflowConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &ReflowConfig {
        &self.config
    }

    /// Font sizes to try, largest first.
    ///
    /// Sizes step down from `original` while above the minimum, then the
    /// minimum itself. Text already at or below the minimum is never upsized.
    pub fn candidate_sizes(&self, original: f32) -> Vec<f32> {
        let min = self.config.min_font_size;
        if !original.is_finite() || original <= min {
            return vec![if original.is_finite() { original } else { min }];
        }

        let step = self.config.size_step;
        let mut sizes = Vec::new();
        if step > 0.0 {
            for i in 0..MAX_CANDIDATES {
                #[allow(clippy::cast_precision_loss)]
                let size = step.mul_add(-(i as f32), original);
                if size <= min {
                    break;
                }
                sizes.push(size);
            }
        } else {
            sizes.push(original);
        }
        sizes.push(min);
        sizes
    }

    /// Height of `lines` lines at `size`: one em for the first line plus a
    /// line pitch for each following one
    #[allow(clippy::cast_precision_loss)]
    pub fn block_height(&self, size: f32, lines: usize) -> f32 {
        if lines == 0 {
            return 0.0;
        }
        let pitch = size * self.config.line_height_factor;
        pitch.mul_add((lines - 1) as f32, size)
    }

    /// Choose the font size and line breaks for `text` inside `fragment.bbox`.
    pub fn fit(&self, fragment: &Fragment, text: &str, fonts: &FontSet) -> ReflowResult {
        let face_index = fonts.face_for(&fragment.font_family, text);
        let face = fonts.face(face_index);
        let candidates = self.candidate_sizes(fragment.font_size);

        if text.trim().is_empty() {
            return ReflowResult {
                fragment_id: fragment.id,
                chosen_font_size: candidates[0],
                wrapped_lines: Vec::new(),
                fits: true,
                face: face_index,
            };
        }

        let inset = self.config.inset;
        let usable_width = (fragment.bbox.width() - 2.0 * inset).max(0.0);
        let usable_height = (fragment.bbox.height() - 2.0 * inset).max(0.0);

        let mut last = None;
        for &size in &candidates {
            let wrapped = wrap_words(text, face, size, usable_width);

            // width first: an overlong word can never be fixed by more lines
            let width_ok = !wrapped.overlong && wrapped.widest <= usable_width + WIDTH_EPSILON;
            let height_ok =
                self.block_height(size, wrapped.lines.len()) <= usable_height + WIDTH_EPSILON;

            if width_ok && height_ok {
                return ReflowResult {
                    fragment_id: fragment.id,
                    chosen_font_size: size,
                    wrapped_lines: wrapped.lines,
                    fits: true,
                    face: face_index,
                };
            }
            last = Some((size, wrapped));
        }

        let (size, wrapped) = last.unwrap_or_else(|| {
            let size = self.config.min_font_size;
            (size, wrap_words(text, face, size, usable_width))
        });
        debug!(
            "{} overflows its box at {:.1}pt ({} lines)",
            fragment.id,
            size,
            wrapped.lines.len()
        );

        ReflowResult {
            fragment_id: fragment.id,
            chosen_font_size: size,
            wrapped_lines: wrapped.lines,
            fits: false,
            face: face_index,
        }
    }
}
