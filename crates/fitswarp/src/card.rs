//! FITS header cards: parsing, formatting and keyword lookups.
//!
//! A header is kept as a plain `Vec<Card>` in file order. The typed
//! astrometry view lives in [`crate::header::ImageHeader`]; this module only
//! knows about 80-byte records and their values.

use core::str;

use crate::block::{BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE, HEADER_PAD_BYTE};
use crate::error::{Error, Result};

// ── Types ──

/// A parsed FITS header value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// FITS logical value (`T` or `F`).
    Logical(bool),
    /// FITS integer value.
    Integer(i64),
    /// FITS floating-point value.
    Float(f64),
    /// FITS character string (content between single quotes, trailing blanks removed).
    String(String),
}

impl Value {
    /// Numeric value, promoting integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer value. Floats with no fractional part are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }
}

/// A parsed FITS header card (one 80-byte keyword record).
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// The 8-byte keyword name, ASCII, left-justified, space-padded.
    pub keyword: [u8; 8],
    /// The parsed value, if this card has a value indicator (`= ` in bytes 8..10).
    pub value: Option<Value>,
    /// An optional comment string.
    pub comment: Option<String>,
}

impl Card {
    /// Build a valued card from a keyword name.
    pub fn new(name: &str, value: Value) -> Self {
        Card {
            keyword: keyword_bytes(name),
            value: Some(value),
            comment: None,
        }
    }

    /// Return the keyword as a trimmed UTF-8 string.
    pub fn keyword_str(&self) -> &str {
        let end = self
            .keyword
            .iter()
            .rposition(|&b| b != b' ')
            .map(|i| i + 1)
            .unwrap_or(0);
        str::from_utf8(&self.keyword[..end]).unwrap_or("")
    }

    /// Returns `true` if this card is the END keyword.
    pub fn is_end(&self) -> bool {
        &self.keyword == b"END     "
    }

    /// Returns `true` if this is a blank card (keyword is all spaces).
    pub fn is_blank(&self) -> bool {
        self.keyword.iter().all(|&b| b == b' ')
    }
}

/// Pad a keyword name to 8 bytes with trailing ASCII spaces.
pub fn keyword_bytes(name: &str) -> [u8; 8] {
    let mut buf = [b' '; 8];
    let bytes = name.as_bytes();
    let len = bytes.len().min(8);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

// ── Parsing ──

const COMMENTARY_KEYWORDS: [&[u8; 8]; 3] = [b"COMMENT ", b"HISTORY ", b"        "];

/// Parse a single 80-byte FITS header card.
pub fn parse_card(card_bytes: &[u8; CARD_SIZE]) -> Result<Card> {
    let mut keyword = [b' '; 8];
    keyword.copy_from_slice(&card_bytes[..8]);

    for &b in &keyword {
        match b {
            b'A'..=b'Z' | b'0'..=b'9' | b' ' | b'-' | b'_' => {}
            _ => return Err(Error::InvalidKeyword),
        }
    }

    if &keyword == b"END     " {
        return Ok(Card {
            keyword,
            value: None,
            comment: None,
        });
    }

    let has_value = !COMMENTARY_KEYWORDS.contains(&&keyword)
        && card_bytes[8] == b'='
        && card_bytes[9] == b' ';

    if has_value {
        if let Some((val, comment)) = parse_value(&card_bytes[10..]) {
            return Ok(Card {
                keyword,
                value: Some(val),
                comment: comment.map(String::from),
            });
        }
    }

    let text = str::from_utf8(&card_bytes[8..])
        .map_err(|_| Error::invalid_header("non-ASCII card text"))?
        .trim_end();
    Ok(Card {
        keyword,
        value: None,
        comment: (!text.is_empty()).then(|| String::from(text)),
    })
}

/// Parse the 70-byte value field (bytes 10..80) of a card.
///
/// Returns the value and the comment following the ` /` separator.
pub fn parse_value(field: &[u8]) -> Option<(Value, Option<&str>)> {
    let start = field.iter().position(|&b| b != b' ')?;
    let field = &field[start..];

    if field[0] == b'\'' {
        return parse_string(field);
    }

    let (val_part, comment) = split_comment(field);
    let text = str::from_utf8(val_part).ok()?.trim();
    if text.is_empty() {
        return None;
    }

    match text {
        "T" => return Some((Value::Logical(true), comment)),
        "F" => return Some((Value::Logical(false), comment)),
        _ => {}
    }

    if !text.contains(['.', 'E', 'e', 'D', 'd']) {
        if let Ok(n) = text.parse::<i64>() {
            return Some((Value::Integer(n), comment));
        }
    }

    let normalized = text.replace('D', "E").replace('d', "e");
    normalized
        .parse::<f64>()
        .ok()
        .map(|f| (Value::Float(f), comment))
}

/// String values start with a quote; `''` inside is a literal quote.
fn parse_string(field: &[u8]) -> Option<(Value, Option<&str>)> {
    let mut value = String::new();
    let mut i = 1;
    while i < field.len() {
        if field[i] == b'\'' {
            if field.get(i + 1) == Some(&b'\'') {
                value.push('\'');
                i += 2;
                continue;
            }
            i += 1;
            break;
        }
        value.push(field[i] as char);
        i += 1;
    }
    let (_, comment) = split_comment(&field[i.min(field.len())..]);
    Some((Value::String(value.trim_end().to_string()), comment))
}

/// Split at the first ` /`, tolerating a missing space after the slash.
fn split_comment(field: &[u8]) -> (&[u8], Option<&str>) {
    let Some(idx) = field.windows(2).position(|w| w == b" /") else {
        return (field, None);
    };
    let mut comment_start = idx + 2;
    if field.get(comment_start) == Some(&b' ') {
        comment_start += 1;
    }
    let comment = str::from_utf8(&field[comment_start..])
        .ok()
        .map(str::trim_end)
        .filter(|s| !s.is_empty());
    (&field[..idx], comment)
}

/// Parse consecutive 2880-byte header blocks until the END card is found.
///
/// Returns the cards (END excluded) and the number of header bytes consumed,
/// always a multiple of [`BLOCK_SIZE`].
pub fn parse_header_blocks(data: &[u8]) -> Result<(Vec<Card>, usize)> {
    let num_blocks = data.len() / BLOCK_SIZE;
    if num_blocks == 0 {
        return Err(Error::UnexpectedEof);
    }

    let mut cards = Vec::new();
    for block_idx in 0..num_blocks {
        let block_start = block_idx * BLOCK_SIZE;
        for card_idx in 0..CARDS_PER_BLOCK {
            let card_start = block_start + card_idx * CARD_SIZE;
            let card_bytes: &[u8; CARD_SIZE] = data[card_start..card_start + CARD_SIZE]
                .try_into()
                .map_err(|_| Error::UnexpectedEof)?;
            let card = parse_card(card_bytes)?;
            if card.is_end() {
                return Ok((cards, (block_idx + 1) * BLOCK_SIZE));
            }
            cards.push(card);
        }
    }

    Err(Error::UnexpectedEof)
}

// ── Writing ──

/// Serialize a [`Card`] into an 80-byte FITS card image.
pub fn format_card(card: &Card) -> [u8; CARD_SIZE] {
    let mut buf = [b' '; CARD_SIZE];
    buf[..8].copy_from_slice(&card.keyword);

    match &card.value {
        Some(value) => {
            buf[8] = b'=';
            let field = &mut buf[10..];
            let end = format_value(value, field);
            if let Some(comment) = &card.comment {
                let start = end + 1;
                if start + 3 < field.len() {
                    field[start] = b'/';
                    let text = comment.as_bytes();
                    let room = field.len() - (start + 2);
                    let len = text.len().min(room);
                    field[start + 2..start + 2 + len].copy_from_slice(&text[..len]);
                }
            }
        }
        None => {
            if let Some(comment) = &card.comment {
                let text = comment.as_bytes();
                let len = text.len().min(CARD_SIZE - 8);
                buf[8..8 + len].copy_from_slice(&text[..len]);
            }
        }
    }

    buf
}

/// Write a value into the 70-byte field; returns the index just past it.
///
/// Numbers and logicals are right-justified to column 30; strings start at
/// column 11 and are padded to at least eight characters.
fn format_value(value: &Value, field: &mut [u8]) -> usize {
    let text = match value {
        Value::Logical(b) => String::from(if *b { "T" } else { "F" }),
        Value::Integer(n) => n.to_string(),
        Value::Float(f) => format_float(*f),
        Value::String(s) => return write_string(s, field),
    };
    let bytes = text.as_bytes();
    let len = bytes.len().min(20);
    field[20 - len..20].copy_from_slice(&bytes[..len]);
    20
}

fn format_float(f: f64) -> String {
    if f == 0.0 {
        return String::from("0.0");
    }
    let mut precision = 15usize;
    loop {
        let s = format!("{:.prec$E}", f, prec = precision);
        if s.len() <= 20 || precision == 0 {
            return s;
        }
        precision -= 1;
    }
}

fn write_string(s: &str, field: &mut [u8]) -> usize {
    let last = field.len() - 1;
    let mut pos = 0;
    field[pos] = b'\'';
    pos += 1;
    for b in s.bytes() {
        let width = if b == b'\'' { 2 } else { 1 };
        if pos + width > last {
            break;
        }
        field[pos] = b;
        if b == b'\'' {
            field[pos + 1] = b'\'';
        }
        pos += width;
    }
    while pos < 9 {
        field[pos] = b' ';
        pos += 1;
    }
    field[pos] = b'\'';
    pos + 1
}

/// Serialize cards into complete header blocks.
///
/// Appends the END card and pads the final block with spaces.
pub fn serialize_header(cards: &[Card]) -> Vec<u8> {
    let total_cards = cards.len() + 1;
    let total_bytes = total_cards.div_ceil(CARDS_PER_BLOCK) * BLOCK_SIZE;
    let mut buf = vec![HEADER_PAD_BYTE; total_bytes];

    for (i, card) in cards.iter().enumerate() {
        let offset = i * CARD_SIZE;
        buf[offset..offset + CARD_SIZE].copy_from_slice(&format_card(card));
    }
    let end_offset = cards.len() * CARD_SIZE;
    buf[end_offset..end_offset + 3].copy_from_slice(b"END");
    buf
}

// ── Lookups ──

/// First card carrying `name`.
pub fn find_card<'a>(cards: &'a [Card], name: &str) -> Option<&'a Card> {
    let key = keyword_bytes(name);
    cards.iter().find(|c| c.keyword == key)
}

pub fn contains(cards: &[Card], name: &str) -> bool {
    find_card(cards, name).is_some()
}

/// Numeric keyword value; integers are promoted.
pub fn find_float(cards: &[Card], name: &str) -> Option<f64> {
    find_card(cards, name)?.value.as_ref()?.as_f64()
}

pub fn find_int(cards: &[Card], name: &str) -> Option<i64> {
    find_card(cards, name)?.value.as_ref()?.as_i64()
}

pub fn find_string<'a>(cards: &'a [Card], name: &str) -> Option<&'a str> {
    match find_card(cards, name)?.value.as_ref()? {
        Value::String(s) => Some(s.trim()),
        _ => None,
    }
}

pub fn find_bool(cards: &[Card], name: &str) -> Option<bool> {
    match find_card(cards, name)?.value.as_ref()? {
        Value::Logical(b) => Some(*b),
        _ => None,
    }
}

// ── Editing ──

/// Replace the value of `name` in place, or append a new card.
///
/// The comment of an existing card is kept.
pub fn set_value(cards: &mut Vec<Card>, name: &str, value: Value) {
    let key = keyword_bytes(name);
    match cards.iter_mut().find(|c| c.keyword == key) {
        Some(card) => card.value = Some(value),
        None => cards.push(Card {
            keyword: key,
            value: Some(value),
            comment: None,
        }),
    }
}

/// Insert or replace `name` directly after the card named `after`.
pub fn set_value_after(cards: &mut Vec<Card>, after: &str, name: &str, value: Value) {
    let key = keyword_bytes(name);
    if let Some(card) = cards.iter_mut().find(|c| c.keyword == key) {
        card.value = Some(value);
        return;
    }
    let anchor = keyword_bytes(after);
    let idx = cards
        .iter()
        .position(|c| c.keyword == anchor)
        .map(|i| i + 1)
        .unwrap_or(cards.len());
    cards.insert(
        idx,
        Card {
            keyword: key,
            value: Some(value),
            comment: None,
        },
    );
}

/// Remove every card named `name`.
pub fn remove_keyword(cards: &mut Vec<Card>, name: &str) {
    let key = keyword_bytes(name);
    cards.retain(|c| c.keyword != key);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_card(s: &str) -> [u8; CARD_SIZE] {
        let mut buf = [b' '; CARD_SIZE];
        let bytes = s.as_bytes();
        let len = bytes.len().min(CARD_SIZE);
        buf[..len].copy_from_slice(&bytes[..len]);
        buf
    }

    // ---- Parsing ----

    #[test]
    fn parse_card_string_value() {
        let c = parse_card(&make_card("CTYPE1  = 'RA---TAN'           / projection")).unwrap();
        assert_eq!(c.keyword_str(), "CTYPE1");
        assert_eq!(c.value, Some(Value::String(String::from("RA---TAN"))));
        assert_eq!(c.comment.as_deref(), Some("projection"));
    }

    #[test]
    fn parse_card_integer_and_float() {
        let c = parse_card(&make_card("BITPIX  =                   -32 / IEEE float")).unwrap();
        assert_eq!(c.value, Some(Value::Integer(-32)));
        let c = parse_card(&make_card("CDELT1  =      -2.777777778D-04")).unwrap();
        match c.value {
            Some(Value::Float(f)) => assert!((f + 2.777777778e-4).abs() < 1e-15),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn parse_card_logical() {
        let c = parse_card(&make_card("SIMPLE  =                    T")).unwrap();
        assert_eq!(c.value, Some(Value::Logical(true)));
    }

    #[test]
    fn parse_card_embedded_quote() {
        let c = parse_card(&make_card("OBJECT  = 'Barnard''s star'")).unwrap();
        assert_eq!(c.value, Some(Value::String(String::from("Barnard's star"))));
    }

    #[test]
    fn parse_card_comment_without_space() {
        let c = parse_card(&make_card("NAXIS   =                    2 /number of axes")).unwrap();
        assert_eq!(c.value, Some(Value::Integer(2)));
        assert_eq!(c.comment.as_deref(), Some("number of axes"));
    }

    #[test]
    fn parse_card_history_has_no_value() {
        let c = parse_card(&make_card("HISTORY = not a value")).unwrap();
        assert!(c.value.is_none());
        assert_eq!(c.comment.as_deref(), Some("= not a value"));
    }

    #[test]
    fn parse_card_rejects_lowercase_keyword() {
        assert!(matches!(
            parse_card(&make_card("naxis   =                    2")),
            Err(Error::InvalidKeyword)
        ));
    }

    #[test]
    fn parse_header_stops_at_end() {
        let cards = vec![
            Card::new("SIMPLE", Value::Logical(true)),
            Card::new("BITPIX", Value::Integer(16)),
            Card::new("NAXIS", Value::Integer(0)),
        ];
        let bytes = serialize_header(&cards);
        let (parsed, consumed) = parse_header_blocks(&bytes).unwrap();
        assert_eq!(consumed, BLOCK_SIZE);
        assert_eq!(parsed, cards);
    }

    #[test]
    fn parse_header_without_end_is_eof() {
        let block = vec![b' '; BLOCK_SIZE];
        assert!(matches!(
            parse_header_blocks(&block),
            Err(Error::UnexpectedEof)
        ));
    }

    // ---- Writing ----

    #[test]
    fn format_integer_right_justified() {
        let buf = format_card(&Card::new("NAXIS1", Value::Integer(512)));
        assert_eq!(&buf[..10], b"NAXIS1  = ");
        assert_eq!(&buf[27..30], b"512");
        assert_eq!(buf[26], b' ');
    }

    #[test]
    fn format_string_padded_to_eight() {
        let buf = format_card(&Card::new("CTYPE1", Value::String("RA".into())));
        assert_eq!(&buf[10..20], b"'RA      '");
    }

    #[test]
    fn format_card_with_comment() {
        let mut card = Card::new("EQUINOX", Value::Float(2000.0));
        card.comment = Some(String::from("epoch"));
        let buf = format_card(&card);
        let text = core::str::from_utf8(&buf).unwrap();
        assert!(text.contains(" / epoch"));
        let parsed = parse_card(&buf).unwrap();
        assert_eq!(parsed.value, Some(Value::Float(2000.0)));
        assert_eq!(parsed.comment.as_deref(), Some("epoch"));
    }

    #[test]
    fn header_spills_to_second_block() {
        let cards: Vec<Card> = (0..36)
            .map(|i| Card::new(&format!("KEY{i}"), Value::Integer(i)))
            .collect();
        let bytes = serialize_header(&cards);
        assert_eq!(bytes.len(), 2 * BLOCK_SIZE);
        let (parsed, consumed) = parse_header_blocks(&bytes).unwrap();
        assert_eq!(parsed.len(), 36);
        assert_eq!(consumed, 2 * BLOCK_SIZE);
    }

    // ---- Lookups and edits ----

    #[test]
    fn lookups_promote_and_trim() {
        let cards = vec![
            Card::new("NAXIS1", Value::Integer(100)),
            Card::new("CRPIX1", Value::Float(50.5)),
            Card::new("CTYPE1", Value::String("RA---TAN  ".into())),
        ];
        assert_eq!(find_float(&cards, "NAXIS1"), Some(100.0));
        assert_eq!(find_int(&cards, "CRPIX1"), None);
        assert_eq!(find_string(&cards, "CTYPE1"), Some("RA---TAN"));
        assert!(contains(&cards, "CRPIX1"));
        assert!(!contains(&cards, "CRPIX2"));
    }

    #[test]
    fn set_and_remove() {
        let mut cards = vec![
            Card::new("SIMPLE", Value::Logical(true)),
            Card::new("BITPIX", Value::Integer(16)),
        ];
        set_value(&mut cards, "BITPIX", Value::Integer(-32));
        set_value(&mut cards, "BSCALE", Value::Float(2.0));
        assert_eq!(find_int(&cards, "BITPIX"), Some(-32));
        assert_eq!(cards.len(), 3);

        set_value_after(&mut cards, "BITPIX", "NAXIS", Value::Integer(2));
        assert_eq!(cards[2].keyword_str(), "NAXIS");

        remove_keyword(&mut cards, "BSCALE");
        assert!(!contains(&cards, "BSCALE"));
    }
}
