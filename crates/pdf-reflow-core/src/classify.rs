//! Prose versus formula classification of extracted fragments.
//!
//! Fragments that look like mathematics, symbols or numbers are stamped
//! nowhere: their original glyphs stay on the page untouched. Everything else
//! is sent for translation.

use crate::config::ClassifierConfig;

/// Fragments with fewer non-whitespace characters are never translated
pub const MIN_TRANSLATABLE_CHARS: usize = 4;

/// Outcome of classifying one fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentClass {
    Prose,
    Formula,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: FragmentClass,
    /// Density landed exactly on the threshold; resolved as `Formula`
    pub ambiguous: bool,
}

impl Classification {
    const fn prose() -> Self {
        Self {
            class: FragmentClass::Prose,
            ambiguous: false,
        }
    }

    const fn formula() -> Self {
        Self {
            class: FragmentClass::Formula,
            ambiguous: false,
        }
    }
}

/// Pure text classifier parameterized by the formula density threshold
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    formula_ratio: f64,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

impl Classifier {
    pub const fn new(config: &ClassifierConfig) -> Self {
        Self {
            formula_ratio: config.formula_ratio,
        }
    }

    pub const fn with_ratio(formula_ratio: f64) -> Self {
        Self { formula_ratio }
    }

    pub fn classify(&self, text: &str) -> Classification {
        let visible = text.chars().filter(|c| !c.is_whitespace()).count();
        if visible < MIN_TRANSLATABLE_CHARS {
            return Classification::formula();
        }

        if !text.chars().any(char::is_alphabetic) {
            return Classification::formula();
        }

        let density = symbolic_density(text);
        if (density - self.formula_ratio).abs() < f64::EPSILON {
            return Classification {
                class: FragmentClass::Formula,
                ambiguous: true,
            };
        }
        if density > self.formula_ratio {
            Classification::formula()
        } else {
            Classification::prose()
        }
    }

    pub fn is_formula(&self, text: &str) -> bool {
        self.classify(text).class == FragmentClass::Formula
    }
}

/// Share of non-whitespace characters that read as notation.
///
/// Isolated single-character tokens count as symbolic (variables, indices,
/// stray digits) except the English words `a`, `A` and `I`.
#[allow(clippy::cast_precision_loss)]
pub fn symbolic_density(text: &str) -> f64 {
    let mut total = 0usize;
    let mut symbolic = 0usize;

    for token in text.split_whitespace() {
        let len = token.chars().count();
        total += len;

        if len == 1 && !matches!(token, "a" | "A" | "I") {
            symbolic += 1;
        } else {
            symbolic += token.chars().filter(|&c| is_symbolic_char(c)).count();
        }
    }

    if total == 0 {
        return 0.0;
    }
    symbolic as f64 / total as f64
}

/// Operators, relations, arrows, Greek, super/subscripts and notation marks
pub fn is_symbolic_char(c: char) -> bool {
    matches!(
        c,
        '=' | '+' | '-' | '*' | '/' | '^' | '_' | '<' | '>' | '|' | '~'
            | '\u{00AC}' // not sign
            | '\u{00B1}' // plus-minus
            | '\u{00B2}' | '\u{00B3}' | '\u{00B9}'
            | '\u{00D7}' // multiplication
            | '\u{00F7}' // division
            | '\u{02B0}'..='\u{02FF}' // spacing modifier letters
            | '\u{0300}'..='\u{036F}' // combining diacritics
            | '\u{0370}'..='\u{03FF}' // Greek
            | '\u{1F00}'..='\u{1FFF}' // Greek extended
            | '\u{2032}'..='\u{2037}' // primes
            | '\u{2070}'..='\u{209F}' // super/subscripts
            | '\u{20D0}'..='\u{20FF}' // combining marks for symbols
            | '\u{2190}'..='\u{21FF}' // arrows
            | '\u{2200}'..='\u{22FF}' // mathematical operators
            | '\u{2300}'..='\u{23FF}' // misc technical
            | '\u{27C0}'..='\u{27FF}'
            | '\u{2900}'..='\u{2AFF}'
            | '\u{1D400}'..='\u{1D7FF}' // mathematical alphanumerics
    )
}
