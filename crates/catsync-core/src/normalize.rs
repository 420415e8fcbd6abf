//! Field normalizers for legacy free-text columns.
//!
//! Every function is total: a value that cannot be interpreted resolves to `None`
//! instead of an error, so one dirty cell never aborts a reconciliation pass.

use chrono::NaiveDate;

/// Trim and collapse internal whitespace runs into a single space.
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-preserving text normalization (names, manufacturers, agents, notes).
pub fn text(raw: Option<&str>) -> Option<String> {
    let collapsed = collapse_whitespace(raw?);
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Uppercased text normalization (codes, categories, units, channels, currencies).
pub fn upper_text(raw: Option<&str>) -> Option<String> {
    text(raw).map(|value| value.to_uppercase())
}

/// Normalized natural key of a product; blank codes have no key.
pub fn product_code(raw: Option<&str>) -> Option<String> {
    upper_text(raw)
}

/// Weight in grams. `kg` values are scaled by 1000, `g` and bare numbers are taken as grams.
pub fn weight_grams(raw: Option<&str>) -> Option<f64> {
    let compact = compact_lowercase(raw?);
    if compact.contains("kg") {
        parse_decimal(&compact.replace("kg", "").replace(',', ".")).map(|kg| kg * 1000.0)
    } else if compact.contains('g') {
        parse_decimal(&compact.replace('g', "").replace(',', "."))
    } else {
        parse_decimal(&compact.replace(',', "."))
    }
}

/// Linear dimension in centimeters.
pub fn dimension_cm(raw: Option<&str>) -> Option<f64> {
    let compact = compact_lowercase(raw?);
    parse_decimal(&compact.replace("cm", "").replace(',', "."))
}

/// Monetary text such as `"R$ 1.234,56"`, `"1,234.56"` or `"-10,5"`.
///
/// The right-most of comma/dot is the decimal separator when both appear; a lone
/// comma is decimal; repeated dots keep only the last one as decimal point.
pub fn money(raw: Option<&str>) -> Option<f64> {
    let compact: String = raw?.chars().filter(|c| !c.is_whitespace()).collect();
    if !compact.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let filtered: String = compact
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    let negative = filtered.starts_with('-');
    let mut number: String = filtered.chars().filter(|c| *c != '-').collect();

    match (number.rfind(','), number.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => {
            number = number.replace('.', "").replace(',', ".");
        }
        (Some(_), Some(_)) => number = number.replace(',', ""),
        (Some(_), None) => number = number.replace(',', "."),
        _ => {}
    }

    if number.matches('.').count() > 1 {
        if let Some((integral, fraction)) = number.rsplit_once('.') {
            number = format!("{}.{}", integral.replace('.', ""), fraction);
        }
    }

    let well_formed = match number.split_once('.') {
        Some((integral, fraction)) => is_digits(integral) && is_digits(fraction),
        None => is_digits(&number),
    };
    if !well_formed {
        return None;
    }

    let value: f64 = number.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Discount/surcharge as a fraction. Blank is `0`; `"15%"` and `"15"` both mean `0.15`.
pub fn fraction(raw: Option<&str>) -> Option<f64> {
    let compact: String = raw
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if compact.is_empty() {
        return Some(0.0);
    }

    if let Some(idx) = compact.find('%') {
        return parse_decimal(&compact[..idx].replace(',', ".")).map(|pct| pct / 100.0);
    }

    let value = parse_decimal(&compact.replace(',', "."))?;
    Some(if value > 1.0 { value / 100.0 } else { value })
}

/// Calendar date in one of the accepted legacy layouts.
///
/// Year-first: `YYYY-MM-DD`, or `YYYY/MM/DD` / `YYYY.MM.DD` (slash and dot may mix).
/// Day-first: `DD?MM?YYYY` with any of `-`, `/`, `.` as separators.
pub fn date(raw: Option<&str>) -> Option<NaiveDate> {
    let bytes = raw?.trim().as_bytes();
    if bytes.len() != 10 {
        return None;
    }

    let digits_at = |from: usize, to: usize| bytes[from..to].iter().all(u8::is_ascii_digit);
    let any_sep = |b: u8| matches!(b, b'-' | b'/' | b'.');

    let (year, month, day) = if digits_at(0, 4) && digits_at(5, 7) && digits_at(8, 10) {
        let dashed = bytes[4] == b'-' && bytes[7] == b'-';
        let slashed = matches!(bytes[4], b'/' | b'.') && matches!(bytes[7], b'/' | b'.');
        if !(dashed || slashed) {
            return None;
        }
        (number_at(bytes, 0, 4), number_at(bytes, 5, 7), number_at(bytes, 8, 10))
    } else if digits_at(0, 2) && digits_at(3, 5) && digits_at(6, 10) {
        if !(any_sep(bytes[2]) && any_sep(bytes[5])) {
            return None;
        }
        (number_at(bytes, 6, 10), number_at(bytes, 3, 5), number_at(bytes, 0, 2))
    } else {
        return None;
    };

    NaiveDate::from_ymd_opt(year as i32, month, day)
}

fn number_at(bytes: &[u8], from: usize, to: usize) -> u32 {
    bytes[from..to]
        .iter()
        .fold(0, |acc, b| acc * 10 + u32::from(b - b'0'))
}

fn compact_lowercase(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

fn is_digits(input: &str) -> bool {
    !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit())
}

/// Strict decimal parse: optional leading minus, digits and at most one dot.
fn parse_decimal(input: &str) -> Option<f64> {
    let unsigned = input.strip_prefix('-').unwrap_or(input);
    if !unsigned.bytes().any(|b| b.is_ascii_digit())
        || !unsigned.bytes().all(|b| b.is_ascii_digit() || b == b'.')
    {
        return None;
    }
    input.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn text_trims_and_collapses_whitespace() {
        assert_eq!(
            text(Some("   Teclado   Mecanico   RGB   V2   ")).as_deref(),
            Some("Teclado Mecanico RGB V2")
        );
        assert_eq!(upper_text(Some(" acessorios ")).as_deref(), Some("ACESSORIOS"));
        assert_eq!(text(Some("   ")), None);
        assert_eq!(text(None), None);
    }

    #[test]
    fn product_code_is_uppercased_and_blank_has_no_key() {
        assert_eq!(product_code(Some(" prd013 ")).as_deref(), Some("PRD013"));
        assert_eq!(product_code(Some("")), None);
        assert_eq!(product_code(Some("   ")), None);
    }

    #[test]
    fn weight_converts_units_to_grams() {
        assert_eq!(weight_grams(Some("1kg")), Some(1000.0));
        assert_eq!(weight_grams(Some("500g")), Some(500.0));
        assert_eq!(weight_grams(Some(" 1,5 KG ")), Some(1500.0));
        assert_eq!(weight_grams(Some("250")), Some(250.0));
        assert_eq!(weight_grams(Some("pesado")), None);
        assert_eq!(weight_grams(Some("nan")), None);
        assert_eq!(weight_grams(None), None);
    }

    #[test]
    fn dimensions_strip_centimeters() {
        assert_eq!(dimension_cm(Some("20cm")), Some(20.0));
        assert_eq!(dimension_cm(Some("12,5 cm")), Some(12.5));
        assert_eq!(dimension_cm(Some("abc")), None);
    }

    #[test]
    fn money_handles_locale_separators() {
        assert_eq!(money(Some("R$ 1.234,56")), Some(1234.56));
        assert_eq!(money(Some("R$ 999,90")), Some(999.9));
        assert_eq!(money(Some("1,234.56")), Some(1234.56));
        assert_eq!(money(Some("1.234.567")), Some(1234.567));
        assert_eq!(money(Some("-10,50")), Some(-10.5));
        assert_eq!(money(Some("USD 42")), Some(42.0));
    }

    #[test]
    fn money_without_digits_is_null() {
        assert_eq!(money(Some("sem preço")), None);
        assert_eq!(money(Some(" sem preço ")), None);
        assert_eq!(money(Some("")), None);
        assert_eq!(money(Some("1,")), None);
        assert_eq!(money(None), None);
    }

    #[test]
    fn fraction_interprets_percent_forms() {
        assert_eq!(fraction(None), Some(0.0));
        assert_eq!(fraction(Some("  ")), Some(0.0));
        assert_eq!(fraction(Some("15%")), Some(0.15));
        assert_eq!(fraction(Some("12,5 %")), Some(0.125));
        assert_eq!(fraction(Some("20")), Some(0.2));
        assert_eq!(fraction(Some("0,1")), Some(0.1));
        assert_eq!(fraction(Some("1")), Some(1.0));
        assert_eq!(fraction(Some("muito")), None);
    }

    #[test]
    fn dates_accept_known_layouts() {
        assert_eq!(date(Some("2025-10-21")), ymd(2025, 10, 21));
        assert_eq!(date(Some("2025/10/21")), ymd(2025, 10, 21));
        assert_eq!(date(Some("2025.10.21")), ymd(2025, 10, 21));
        assert_eq!(date(Some("21-10-2025")), ymd(2025, 10, 21));
        assert_eq!(date(Some("21/10/2025")), ymd(2025, 10, 21));
        assert_eq!(date(Some(" 21.10.2025 ")), ymd(2025, 10, 21));
    }

    #[test]
    fn dates_reject_everything_else() {
        assert_eq!(date(Some("2025-10/21")), None);
        assert_eq!(date(Some("2025-1-5")), None);
        assert_eq!(date(Some("2025-13-01")), None);
        assert_eq!(date(Some("31/02/2025")), None);
        assert_eq!(date(Some("ontem")), None);
        assert_eq!(date(Some("")), None);
        assert_eq!(date(None), None);
    }
}
