//! TrueType font loading and embedding for stamped text.
//!
//! Text in a non-Latin target language needs a font that has its glyphs.
//! A TrueType file given by the user is parsed once, measured through
//! [`FontMetrics`], and embedded once per output document as a composite
//! font so any character the font covers can be drawn.
//!
//! # PDF Font Structure
//!
//! - **Type0 font**: the top-level font dictionary (Identity-H encoding) that references:
//!   - **CIDFont**: glyph metrics (`W` array) and references:
//!     - **FontDescriptor**: font metadata (flags, bounding box, etc.)
//!     - **FontFile2**: the embedded TrueType font program
//!   - **ToUnicode CMap**: maps glyph IDs back to Unicode for copy/paste

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use ttf_parser::{Face, name_id};

use crate::error::{Error, Result};
use crate::reflow::FontMetrics;

/// bfchar blocks are limited to 100 entries
const CMAP_CHUNK: usize = 100;

/// A parsed TrueType font with precomputed Unicode to glyph mapping.
pub struct TrueTypeFont {
    data: Vec<u8>,
    family: String,
    postscript_name: String,
    units_per_em: u16,
    /// char -> (glyph id, advance in font units)
    glyphs: HashMap<char, (u16, u16)>,
    notdef_advance: u16,
    ascender: i16,
    descender: i16,
    cap_height: i16,
    bbox: [i16; 4],
}

impl TrueTypeFont {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| Error::FontLoad(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let face = Face::parse(&data, 0)
            .map_err(|e| Error::FontLoad(format!("Failed to parse font: {e}")))?;

        let units_per_em = face.units_per_em();
        if units_per_em == 0 {
            return Err(Error::FontLoad("Font has zero units per em".to_string()));
        }

        let mut glyphs = HashMap::new();
        if let Some(cmap) = face.tables().cmap {
            for subtable in cmap.subtables {
                if !subtable.is_unicode() {
                    continue;
                }
                subtable.codepoints(|cp| {
                    if let Some(c) = char::from_u32(cp)
                        && let Some(gid) = subtable.glyph_index(cp)
                    {
                        let advance = face.glyph_hor_advance(gid).unwrap_or(0);
                        glyphs.entry(c).or_insert((gid.0, advance));
                    }
                });
            }
        }
        if glyphs.is_empty() {
            return Err(Error::FontLoad("Font has no Unicode cmap".to_string()));
        }

        let name = |id: u16| {
            face.names()
                .into_iter()
                .filter(|n| n.name_id == id)
                .find_map(|n| n.to_string())
                .filter(|s| !s.trim().is_empty())
        };
        let family = name(name_id::FAMILY).unwrap_or_else(|| "Embedded".to_string());
        let postscript_name: String = name(name_id::POST_SCRIPT_NAME)
            .unwrap_or_else(|| family.clone())
            .chars()
            .filter(|c| c.is_ascii_graphic() && !"()<>[]{}/%#".contains(*c))
            .collect();

        let global = face.global_bounding_box();
        let notdef_advance = face.glyph_hor_advance(ttf_parser::GlyphId(0)).unwrap_or(0);

        let font = Self {
            family,
            postscript_name: if postscript_name.is_empty() {
                "EmbeddedFont".to_string()
            } else {
                postscript_name
            },
            units_per_em,
            glyphs,
            notdef_advance,
            ascender: face.ascender(),
            descender: face.descender(),
            cap_height: face.capital_height().unwrap_or_else(|| face.ascender()),
            bbox: [global.x_min, global.y_min, global.x_max, global.y_max],
            data: Vec::new(),
        };

        Ok(Self { data, ..font })
    }

    pub fn postscript_name(&self) -> &str {
        &self.postscript_name
    }

    /// Get the glyph ID for a character, falling back to .notdef (0) if not found.
    pub fn glyph_id(&self, c: char) -> u16 {
        self.glyphs.get(&c).map_or(0, |&(gid, _)| gid)
    }

    pub fn has_glyph(&self, c: char) -> bool {
        self.glyphs.contains_key(&c)
    }

    /// Text as a hex string of big-endian glyph IDs (Identity-H), without brackets
    pub fn encode_hex(&self, text: &str) -> String {
        text.chars().fold(String::with_capacity(text.len() * 4), |mut acc, c| {
            let _ = write!(acc, "{:04X}", self.glyph_id(c));
            acc
        })
    }

    fn advance_units(&self, c: char) -> u16 {
        self.glyphs.get(&c).map_or(self.notdef_advance, |&(_, adv)| adv)
    }

    /// Scale a font-unit width to PDF's 1000-unit system.
    fn scale_width(&self, width: u16) -> i64 {
        (i64::from(width) * 1000) / i64::from(self.units_per_em)
    }

    /// Add the font program and dictionaries to `doc`, returning the Type0 font id.
    pub fn embed(&self, doc: &mut Document) -> ObjectId {
        let font_file_id = self.create_font_file(doc);
        let descriptor_id = self.create_font_descriptor(doc, font_file_id);
        let cid_font_id = self.create_cid_font(doc, descriptor_id);
        let to_unicode_id = self.create_to_unicode_cmap(doc);

        let dict = Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type0".to_vec())),
            ("BaseFont", Object::Name(self.postscript_name.as_bytes().to_vec())),
            ("Encoding", Object::Name(b"Identity-H".to_vec())),
            ("DescendantFonts", Object::Array(vec![Object::Reference(cid_font_id)])),
            ("ToUnicode", Object::Reference(to_unicode_id)),
        ]);
        doc.add_object(Object::Dictionary(dict))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn create_font_file(&self, doc: &mut Document) -> ObjectId {
        let mut dict = Dictionary::new();
        dict.set("Length1", Object::Integer(self.data.len() as i64));

        let stream = Stream::new(dict, self.data.clone()).with_compression(true);
        doc.add_object(Object::Stream(stream))
    }

    fn create_font_descriptor(&self, doc: &mut Document, font_file_id: ObjectId) -> ObjectId {
        let dict = Dictionary::from_iter([
            ("Type", Object::Name(b"FontDescriptor".to_vec())),
            ("FontName", Object::Name(self.postscript_name.as_bytes().to_vec())),
            (
                "FontFamily",
                Object::String(self.family.as_bytes().to_vec(), StringFormat::Literal),
            ),
            ("Flags", Object::Integer(32)), // Nonsymbolic
            (
                "FontBBox",
                Object::Array(self.bbox.iter().map(|&v| Object::Integer(i64::from(v))).collect()),
            ),
            ("ItalicAngle", Object::Integer(0)),
            ("Ascent", Object::Integer(i64::from(self.ascender))),
            ("Descent", Object::Integer(i64::from(self.descender))),
            ("CapHeight", Object::Integer(i64::from(self.cap_height))),
            ("StemV", Object::Integer(80)),
            ("FontFile2", Object::Reference(font_file_id)),
        ]);
        doc.add_object(Object::Dictionary(dict))
    }

    fn create_cid_font(&self, doc: &mut Document, descriptor_id: ObjectId) -> ObjectId {
        let default_width = self.scale_width(self.advance_units(' '));

        let dict = Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"CIDFontType2".to_vec())),
            ("BaseFont", Object::Name(self.postscript_name.as_bytes().to_vec())),
            (
                "CIDSystemInfo",
                Object::Dictionary(Dictionary::from_iter([
                    ("Registry", Object::String(b"Adobe".to_vec(), StringFormat::Literal)),
                    ("Ordering", Object::String(b"Identity".to_vec(), StringFormat::Literal)),
                    ("Supplement", Object::Integer(0)),
                ])),
            ),
            ("FontDescriptor", Object::Reference(descriptor_id)),
            ("DW", Object::Integer(default_width)),
            ("W", Object::Array(self.build_widths_array())),
            ("CIDToGIDMap", Object::Name(b"Identity".to_vec())),
        ]);
        doc.add_object(Object::Dictionary(dict))
    }

    /// `W` array: `[gid [w1 w2 ...]]` for each run of consecutive glyph ids
    fn build_widths_array(&self) -> Vec<Object> {
        let gid_widths: BTreeMap<u16, i64> = self
            .glyphs
            .values()
            .map(|&(gid, adv)| (gid, self.scale_width(adv)))
            .collect();

        let mut result = Vec::new();
        let mut iter = gid_widths.iter().peekable();

        while let Some((&first_gid, &first_width)) = iter.next() {
            let mut widths = vec![Object::Integer(first_width)];
            let mut expected_next = u32::from(first_gid) + 1;

            while let Some(&(&gid, &width)) = iter.peek() {
                if u32::from(gid) != expected_next {
                    break;
                }
                widths.push(Object::Integer(width));
                expected_next += 1;
                iter.next();
            }

            result.push(Object::Integer(i64::from(first_gid)));
            result.push(Object::Array(widths));
        }

        result
    }

    /// bfchar CMap from each glyph back to the lowest character mapped to it
    fn create_to_unicode_cmap(&self, doc: &mut Document) -> ObjectId {
        let mut by_gid: BTreeMap<u16, char> = BTreeMap::new();
        for (&c, &(gid, _)) in &self.glyphs {
            by_gid
                .entry(gid)
                .and_modify(|existing| *existing = (*existing).min(c))
                .or_insert(c);
        }

        let mut cmap = String::from(
            "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
             /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
             /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
             1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
        );

        let entries: Vec<(u16, char)> = by_gid.into_iter().collect();
        for chunk in entries.chunks(CMAP_CHUNK) {
            let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
            for &(gid, c) in chunk {
                let mut utf16 = [0u16; 2];
                let units = c.encode_utf16(&mut utf16);
                let hex: String = units.iter().map(|u| format!("{u:04X}")).collect();
                let _ = writeln!(cmap, "<{gid:04X}> <{hex}>");
            }
            cmap.push_str("endbfchar\n");
        }

        cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");

        let stream = Stream::new(Dictionary::new(), cmap.into_bytes()).with_compression(true);
        doc.add_object(Object::Stream(stream))
    }
}

impl FontMetrics for TrueTypeFont {
    fn family(&self) -> &str {
        &self.family
    }

    fn advance(&self, c: char) -> f32 {
        f32::from(self.advance_units(c)) / f32::from(self.units_per_em)
    }
}

impl std::fmt::Debug for TrueTypeFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrueTypeFont")
            .field("family", &self.family)
            .field("postscript_name", &self.postscript_name)
            .field("units_per_em", &self.units_per_em)
            .field("glyphs", &self.glyphs.len())
            .finish_non_exhaustive()
    }
}

/// A minimal TrueType font (head, hhea, maxp, hmtx, cmap format 12):
/// glyph `i + 1` draws `chars[i]`, glyph `g` advances `500 + 10 * g`
/// units of a 1000-unit em.
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) fn synthetic_font(chars: &[char]) -> Vec<u8> {
    let num_glyphs = u16::try_from(chars.len() + 1).unwrap();

    let mut head = Vec::new();
    head.extend(0x0001_0000_u32.to_be_bytes()); // version
    head.extend(0x0001_0000_u32.to_be_bytes()); // revision
    head.extend(0_u32.to_be_bytes()); // checksum adjustment
    head.extend(0x5F0F_3CF5_u32.to_be_bytes()); // magic
    head.extend(0_u16.to_be_bytes()); // flags
    head.extend(1000_u16.to_be_bytes()); // units per em
    head.extend([0_u8; 16]); // created, modified
    for v in [0_i16, -200, 1000, 800] {
        head.extend(v.to_be_bytes());
    }
    head.extend([0_u8; 6]); // mac style, lowest ppem, direction hint
    head.extend(0_u16.to_be_bytes()); // short loca
    head.extend(0_u16.to_be_bytes()); // glyph data format

    let mut hhea = Vec::new();
    hhea.extend(0x0001_0000_u32.to_be_bytes());
    for v in [800_i16, -200, 0] {
        hhea.extend(v.to_be_bytes());
    }
    hhea.extend([0_u8; 24]);
    hhea.extend(num_glyphs.to_be_bytes());

    let mut maxp = Vec::new();
    maxp.extend(0x0000_5000_u32.to_be_bytes());
    maxp.extend(num_glyphs.to_be_bytes());

    let mut hmtx = Vec::new();
    for gid in 0..num_glyphs {
        hmtx.extend((500 + 10 * gid).to_be_bytes());
        hmtx.extend(0_i16.to_be_bytes());
    }

    let mut groups: Vec<(u32, u32)> = chars
        .iter()
        .enumerate()
        .map(|(i, &c)| (u32::from(c), u32::try_from(i + 1).unwrap()))
        .collect();
    groups.sort_unstable();
    let group_count = u32::try_from(groups.len()).unwrap();

    let mut cmap = Vec::new();
    cmap.extend(0_u16.to_be_bytes()); // version
    cmap.extend(1_u16.to_be_bytes()); // one encoding record
    cmap.extend(0_u16.to_be_bytes()); // platform: Unicode
    cmap.extend(4_u16.to_be_bytes()); // encoding: full repertoire
    cmap.extend(12_u32.to_be_bytes()); // subtable offset
    cmap.extend(12_u16.to_be_bytes()); // format
    cmap.extend(0_u16.to_be_bytes());
    cmap.extend((16 + 12 * group_count).to_be_bytes());
    cmap.extend(0_u32.to_be_bytes()); // language
    cmap.extend(group_count.to_be_bytes());
    for (cp, gid) in groups {
        cmap.extend(cp.to_be_bytes());
        cmap.extend(cp.to_be_bytes());
        cmap.extend(gid.to_be_bytes());
    }

    // table records sorted by tag
    let tables: [(&[u8; 4], Vec<u8>); 5] = [
        (b"cmap", cmap),
        (b"head", head),
        (b"hhea", hhea),
        (b"hmtx", hmtx),
        (b"maxp", maxp),
    ];

    let header_len = 12 + 16 * tables.len();
    let mut font = Vec::new();
    font.extend(0x0001_0000_u32.to_be_bytes());
    font.extend(u16::try_from(tables.len()).unwrap().to_be_bytes());
    font.extend([0_u8; 6]);

    let mut body: Vec<u8> = Vec::new();
    for (tag, data) in &tables {
        font.extend(**tag);
        font.extend(0_u32.to_be_bytes());
        font.extend(u32::try_from(header_len + body.len()).unwrap().to_be_bytes());
        font.extend(u32::try_from(data.len()).unwrap().to_be_bytes());
        body.extend(data);
        while body.len() % 4 != 0 {
            body.push(0);
        }
    }
    font.extend(body);
    font
}
