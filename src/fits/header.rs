//! Header cards: 80-character keyword records in 2880-byte blocks.

use super::{FitsError, BLOCK_SIZE};

pub const CARD_SIZE: usize = 80;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Logical(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Real(r) if r.fract() == 0.0 => Some(*r as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Logical(b) => Some(*b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// One header record, kept verbatim so untouched cards are written back byte for byte.
pub struct Card {
    image: String,
}

impl Card {
    fn from_image(image: &str) -> Self {
        Card {
            image: format!("{:<width$.width$}", image, width = CARD_SIZE),
        }
    }

    pub fn new(keyword: &str, value: &Value, comment: Option<&str>) -> Self {
        let field = match value {
            Value::Logical(b) => format!("{:>20}", if *b { "T" } else { "F" }),
            Value::Integer(i) => format!("{:>20}", i),
            Value::Real(r) => format!("{:>20}", format_real(*r)),
            Value::Text(s) => format!("'{:<8}'", s.replace('\'', "''")),
        };

        let mut image = format!("{:<8}= {}", keyword, field);
        if let Some(comment) = comment {
            image.push_str(" / ");
            image.push_str(comment);
        }

        Card::from_image(&image)
    }

    pub fn keyword(&self) -> &str {
        self.image[..8].trim_end()
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Parsed value, or `None` for commentary cards and undefined values.
    pub fn value(&self) -> Option<Value> {
        if &self.image[8..10] != "= " {
            return None;
        }
        parse_value(&self.image[10..])
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    /// Parses the header starting at `bytes[0]`; returns it with its padded length.
    pub fn parse(bytes: &[u8]) -> Result<(Header, usize), FitsError> {
        let mut cards = Vec::new();

        for (i, raw) in bytes.chunks_exact(CARD_SIZE).enumerate() {
            let image = std::str::from_utf8(raw)
                .ok()
                .filter(|s| s.is_ascii())
                .ok_or_else(|| FitsError::InvalidFormat("non-ASCII header card".to_string()))?;
            let card = Card::from_image(image);

            if card.keyword() == "END" {
                let used = (i + 1) * CARD_SIZE;
                return Ok((Header { cards }, padded(used)));
            }
            cards.push(card);
        }

        Err(FitsError::InvalidFormat("header has no END card".to_string()))
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn get(&self, keyword: &str) -> Option<Value> {
        self.cards
            .iter()
            .find(|c| c.keyword() == keyword)
            .and_then(Card::value)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.cards.iter().any(|c| c.keyword() == keyword)
    }

    pub fn int(&self, keyword: &str) -> Option<i64> {
        self.get(keyword).and_then(|v| v.as_i64())
    }

    pub fn real(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(|v| v.as_f64())
    }

    pub fn text(&self, keyword: &str) -> Option<String> {
        self.get(keyword).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn logical(&self, keyword: &str) -> Option<bool> {
        self.get(keyword).and_then(|v| v.as_bool())
    }

    pub fn required_int(&self, keyword: &str) -> Result<i64, FitsError> {
        self.int(keyword)
            .ok_or_else(|| FitsError::MissingKeyword(keyword.to_string()))
    }

    pub fn push(&mut self, card: Card) {
        self.cards.push(card);
    }

    /// Replaces the first card with the same keyword, or appends.
    pub fn set(&mut self, keyword: &str, value: Value, comment: Option<&str>) {
        let card = Card::new(keyword, &value, comment);
        match self.cards.iter_mut().find(|c| c.keyword() == keyword) {
            Some(existing) => *existing = card,
            None => self.cards.push(card),
        }
    }

    /// Header bytes including the END card, padded with blanks to a block boundary.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(padded((self.cards.len() + 1) * CARD_SIZE));
        for card in &self.cards {
            bytes.extend_from_slice(card.image().as_bytes());
        }
        bytes.extend_from_slice(Card::from_image("END").image.as_bytes());
        bytes.resize(padded(bytes.len()), b' ');

        bytes
    }
}

/// Rounds `len` up to a whole number of blocks.
pub fn padded(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

fn parse_value(field: &str) -> Option<Value> {
    let trimmed = field.trim_start();

    if let Some(rest) = trimmed.strip_prefix('\'') {
        return Some(Value::Text(parse_text(rest)));
    }

    let token = trimmed.split('/').next().unwrap_or("").trim();
    match token {
        "" => None,
        "T" => Some(Value::Logical(true)),
        "F" => Some(Value::Logical(false)),
        _ => token
            .parse::<i64>()
            .map(Value::Integer)
            .ok()
            .or_else(|| token.replace(['D', 'd'], "E").parse::<f64>().ok().map(Value::Real)),
    }
}

// Quoted string body; '' is an escaped quote, trailing blanks are insignificant
fn parse_text(rest: &str) -> String {
    let mut text = String::new();
    let mut chars = rest.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                text.push('\'');
            } else {
                break;
            }
        } else {
            text.push(c);
        }
    }

    text.trim_end().to_string()
}

// Real literal that always carries a decimal point and an upper-case exponent
fn format_real(value: f64) -> String {
    let repr = format!("{:?}", value);
    let repr = match repr.find('e') {
        Some(pos) if !repr[..pos].contains('.') => {
            format!("{}.0E{}", &repr[..pos], &repr[pos + 1..])
        }
        _ => repr.replace('e', "E"),
    };

    if repr.contains('.') || repr.contains('E') {
        repr
    } else {
        format!("{}.0", repr)
    }
}

// -- Tests -------------------------------------------------------------------
