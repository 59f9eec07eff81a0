use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

const CURRENCY_CODES: [&str; 4] = ["EUR", "USD", "GBP", "CHF"];
const CURRENCY_SYMBOLS: [char; 3] = ['€', '$', '£'];

/// Parses an amount as printed on an invoice.
///
/// Accepts `1 234,56`, `1.234,56`, `1,234.56`, `294.00 €`, `49,00 EUR` and
/// similar. Whitespace (including non-breaking spaces), currency symbols and
/// a leading or trailing currency code are ignored; any other text makes the
/// value unparseable.
///
/// When both `,` and `.` appear the last one is the decimal separator. A lone
/// separator followed by exactly three digits is a thousands separator, for
/// either character, unless the whole part is `0` (`1.234` and `1,234` are
/// both 1234; `0,125` is 0.125).
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let mut text = raw.trim();
    for code in CURRENCY_CODES {
        if let Some(rest) = strip_code(text, code) {
            text = rest.trim();
            break;
        }
    }

    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '0'..='9' | ',' | '.' | '-' => cleaned.push(c),
            c if c.is_whitespace() || CURRENCY_SYMBOLS.contains(&c) => {}
            _ => return None,
        }
    }
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.as_str()),
    };
    if !digits.starts_with(|c: char| c.is_ascii_digit()) || digits.contains('-') {
        return None;
    }

    let normalized = match (digits.rfind(','), digits.rfind('.')) {
        (Some(comma), Some(dot)) => {
            if comma > dot {
                digits.replace('.', "").replace(',', ".")
            } else {
                digits.replace(',', "")
            }
        }
        (Some(pos), None) => single_separator(digits, ',', pos),
        (None, Some(pos)) => single_separator(digits, '.', pos),
        (None, None) => digits.to_string(),
    };

    let value = Decimal::from_str(&normalized).ok()?;
    Some(if negative { -value } else { value })
}

fn strip_code<'a>(text: &'a str, code: &str) -> Option<&'a str> {
    let upper = text.to_ascii_uppercase();
    if upper.starts_with(code) {
        text.get(code.len()..)
    } else if upper.ends_with(code) {
        text.get(..text.len() - code.len())
    } else {
        None
    }
}

fn single_separator(digits: &str, sep: char, last: usize) -> String {
    let repeated = digits.matches(sep).count() > 1;
    let fraction = &digits[last + 1..];
    let whole = &digits[..last];
    if repeated || (fraction.len() == 3 && whole != "0") {
        digits.replace(sep, "")
    } else {
        digits.replace(sep, ".")
    }
}

/// Rewrites common date layouts to `YYYY-MM-DD`; anything unrecognised is
/// returned trimmed but otherwise untouched.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let formats = ["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y", "%d-%m-%Y", "%Y/%m/%d", "%Y.%m.%d"];
    for fmt in formats.iter() {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    Some(raw.to_string())
}
