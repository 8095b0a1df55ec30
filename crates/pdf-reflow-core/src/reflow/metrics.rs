//! Font metrics used to measure translated text before it is stamped.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::pdf::TrueTypeFont;
use crate::util;

/// Horizontal metrics of a font face.
pub trait FontMetrics {
    /// Family name used to match fragments against faces
    fn family(&self) -> &str;

    /// Advance width of `c` in em units (1.0 = one font size)
    fn advance(&self, c: char) -> f32;

    /// Width of `text` at `size`; the sum of advances, no kerning
    fn text_width(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|c| self.advance(c)).sum::<f32>() * size
    }
}

/// PDF base-14 fonts that need no embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardFont {
    Helvetica,
}

impl StandardFont {
    /// PostScript name for the font dictionary
    pub const fn base_font(self) -> &'static str {
        match self {
            Self::Helvetica => "Helvetica",
        }
    }

    /// WinAnsi code for `c`, if the encoding has one
    pub fn encode(c: char) -> Option<u8> {
        let code = u32::from(c);
        match code {
            0x20..=0x7E | 0xA0..=0xFF => u8::try_from(code).ok(),
            _ => match c {
                '€' => Some(0x80),
                '‚' => Some(0x82),
                '„' => Some(0x84),
                '…' => Some(0x85),
                '‘' => Some(0x91),
                '’' => Some(0x92),
                '“' => Some(0x93),
                '”' => Some(0x94),
                '•' => Some(0x95),
                '–' => Some(0x96),
                '—' => Some(0x97),
                _ => None,
            },
        }
    }
}

/// Helvetica AFM widths for WinAnsi 0x20..=0x7E, in 1/1000 em
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];

impl FontMetrics for StandardFont {
    fn family(&self) -> &str {
        self.base_font()
    }

    fn advance(&self, c: char) -> f32 {
        let milli = match c {
            ' '..='~' => HELVETICA_ASCII[(u32::from(c) - 0x20) as usize],
            '\u{A0}' => 278,
            '\u{C0}'..='\u{DE}' => 722,
            '—' | '…' => 1000,
            '‘' | '’' | '‚' => 222,
            '“' | '”' | '„' => 333,
            '•' => 350,
            // '?' substitutes for anything WinAnsi cannot encode
            _ => 556,
        };
        f32::from(milli) / 1000.0
    }
}

/// A face that can both be measured and rendered
#[derive(Debug, Clone)]
pub enum Face {
    Standard(StandardFont),
    TrueType(Arc<TrueTypeFont>),
}

impl FontMetrics for Face {
    fn family(&self) -> &str {
        match self {
            Self::Standard(f) => f.family(),
            Self::TrueType(f) => f.family(),
        }
    }

    fn advance(&self, c: char) -> f32 {
        match self {
            Self::Standard(f) => f.advance(c),
            Self::TrueType(f) => f.advance(c),
        }
    }
}

impl Face {
    /// Whether the face can draw `c`. Whitespace is always drawable.
    pub fn can_draw(&self, c: char) -> bool {
        c.is_whitespace()
            || match self {
                Self::Standard(_) => StandardFont::encode(c).is_some(),
                Self::TrueType(f) => f.has_glyph(c),
            }
    }

    /// Distinct characters of `text` the face cannot draw, in order of appearance
    pub fn missing_chars(&self, text: &str) -> Vec<char> {
        let mut missing = Vec::new();
        for c in text.chars() {
            if !self.can_draw(c) && !missing.contains(&c) {
                missing.push(c);
            }
        }
        missing
    }
}

/// Ordered faces available for measuring and stamping. Index 0 is the default.
#[derive(Debug, Clone)]
pub struct FontSet {
    faces: Vec<Face>,
}

impl Default for FontSet {
    fn default() -> Self {
        Self::new(Face::Standard(StandardFont::Helvetica))
    }
}

impl FontSet {
    pub fn new(default: Face) -> Self {
        Self {
            faces: vec![default],
        }
    }

    /// The TrueType font at `path` as default face, Helvetica as a fallback
    pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self> {
        let font = TrueTypeFont::from_file(path)?;
        let mut set = Self::new(Face::TrueType(Arc::new(font)));
        set.push(Face::Standard(StandardFont::Helvetica));
        Ok(set)
    }

    /// The first installed system font that loads, with Helvetica as a
    /// fallback face. Helvetica alone when no system font is usable.
    pub fn system() -> Self {
        for path in util::system_font_paths() {
            match Self::from_font_file(&path) {
                Ok(set) => {
                    debug!("Using system font {}", path.display());
                    return set;
                }
                Err(e) => debug!("Skipping {}: {e}", path.display()),
            }
        }
        warn!("No system TrueType font found, only WinAnsi text can be stamped");
        Self::default()
    }

    /// Add a face and return its index
    pub fn push(&mut self, face: Face) -> usize {
        self.faces.push(face);
        self.faces.len() - 1
    }

    /// Index of the face matching `family`, or 0.
    ///
    /// Subset prefixes (`ABCDEF+`) are ignored and a face matches when the
    /// fragment's family starts with the face's family, case-insensitively.
    pub fn resolve(&self, family: &str) -> usize {
        let wanted = strip_subset_prefix(family).to_lowercase();
        if wanted.is_empty() {
            return 0;
        }

        self.faces
            .iter()
            .position(|f| f.family().to_lowercase() == wanted)
            .or_else(|| {
                self.faces.iter().position(|f| {
                    let fam = f.family().to_lowercase();
                    !fam.is_empty() && wanted.starts_with(&fam)
                })
            })
            .unwrap_or(0)
    }

    /// Face for stamping `text` in a fragment set in `family`: the matching
    /// face when it can draw every character, otherwise the first face that
    /// can, otherwise the matching face anyway.
    pub fn face_for(&self, family: &str, text: &str) -> usize {
        let matched = self.resolve(family);
        let covers = |face: &Face| text.chars().all(|c| face.can_draw(c));
        if covers(self.face(matched)) {
            return matched;
        }
        self.faces.iter().position(covers).unwrap_or(matched)
    }

    /// Face at `index`, falling back to the default
    pub fn face(&self, index: usize) -> &Face {
        self.faces.get(index).unwrap_or(&self.faces[0])
    }

    pub fn default_face(&self) -> &Face {
        &self.faces[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Face> {
        self.faces.iter()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

fn strip_subset_prefix(family: &str) -> &str {
    match family.split_once('+') {
        Some((prefix, rest)) if prefix.len() == 6 && prefix.chars().all(|c| c.is_ascii_uppercase()) => rest,
        _ => family,
    }
}
