//! Declared field layout of every fixed-width response record.
//!
//! Responses are sliced by byte position; each record type names its tag
//! and the spans of its fields, and [`ResponseSchema::fields`] validates a
//! response against that declaration in one place.

/// Byte offset counted from the start or the end of the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Start(usize),
    End(usize),
}

impl Bound {
    fn resolve(self, len: usize) -> Option<usize> {
        match self {
            Bound::Start(i) => (i <= len).then_some(i),
            Bound::End(i) => len.checked_sub(i),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpan {
    pub name: &'static str,
    pub from: Bound,
    pub to: Bound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseSchema {
    pub tag: &'static str,
    /// Total byte length including the trailing newline; `None` for
    /// variable-width records.
    pub len: Option<usize>,
    /// Whether the three bytes before the newline are a decimal checksum.
    pub checksum: bool,
    pub fields: &'static [FieldSpan],
}

/// Digits of the checksum trailer.
const CHECKSUM_DIGITS: usize = 3;

/// `$C` + 10-character value + 3-digit checksum + newline.
pub const COUNT: ResponseSchema = ResponseSchema {
    tag: "$C",
    len: Some(16),
    checksum: true,
    fields: &[FieldSpan {
        name: "value",
        from: Bound::Start(2),
        to: Bound::End(4),
    }],
};

/// `$F` + gate index digit + gate name + newline.
pub const GATE: ResponseSchema = ResponseSchema {
    tag: "$F",
    len: None,
    checksum: false,
    fields: &[
        FieldSpan {
            name: "index",
            from: Bound::Start(2),
            to: Bound::Start(3),
        },
        FieldSpan {
            name: "name",
            from: Bound::Start(3),
            to: Bound::End(1),
        },
    ],
};

/// `$D` + 10-character start + 10-character length + checksum + newline.
pub const ROI: ResponseSchema = ResponseSchema {
    tag: "$D",
    len: Some(26),
    checksum: true,
    fields: &[
        FieldSpan {
            name: "start",
            from: Bound::Start(2),
            to: Bound::Start(12),
        },
        FieldSpan {
            name: "length",
            from: Bound::Start(12),
            to: Bound::Start(22),
        },
    ],
};

/// `$E` + 3-digit macro code + 3-digit micro code + checksum + newline.
pub const DEVICE_ERROR: ResponseSchema = ResponseSchema {
    tag: "$E",
    len: Some(12),
    checksum: true,
    fields: &[
        FieldSpan {
            name: "macro",
            from: Bound::Start(2),
            to: Bound::Start(5),
        },
        FieldSpan {
            name: "micro",
            from: Bound::Start(5),
            to: Bound::Start(8),
        },
    ],
};

impl ResponseSchema {
    /// Check the record framing: tag, newline, fixed width and checksum.
    fn check_layout(&self, resp: &str) -> Result<(), String> {
        if !resp.starts_with(self.tag) {
            return Err(format!("expected {} record", self.tag));
        }
        if !resp.ends_with('\n') {
            return Err("record is not newline-terminated".into());
        }
        let len = resp.len();
        if let Some(want) = self.len
            && len != want
        {
            return Err(format!("record is {len} bytes, expected {want}"));
        }
        if self.checksum {
            let sum = len
                .checked_sub(CHECKSUM_DIGITS + 1)
                .and_then(|from| resp.as_bytes().get(from..len - 1));
            match sum {
                Some(digits) if digits.iter().all(u8::is_ascii_digit) => {}
                _ => return Err("checksum is not three digits".into()),
            }
        }
        Ok(())
    }

    /// Slice every declared field out of `resp`, trimmed of padding.
    pub fn fields<'a>(&self, resp: &'a str) -> Result<Vec<&'a str>, String> {
        self.check_layout(resp)?;
        let len = resp.len();
        self.fields
            .iter()
            .map(|f| {
                let (from, to) = match (f.from.resolve(len), f.to.resolve(len)) {
                    (Some(a), Some(b)) if a < b => (a, b),
                    _ => return Err(format!("response too short for field {}", f.name)),
                };
                let raw = resp
                    .get(from..to)
                    .ok_or_else(|| format!("field {} is not on a character boundary", f.name))?;
                let value = raw.trim();
                if value.is_empty() {
                    return Err(format!("field {} is empty", f.name));
                }
                Ok(value)
            })
            .collect()
    }
}
