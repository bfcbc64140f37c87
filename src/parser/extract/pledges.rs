use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use super::ExtractError;

static PLEDGE_INFO: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.pledge__info").unwrap());
static MONEY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.money").unwrap());
static REWARDS_SECTION: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".NS_projects__rewards_list, .js-project-rewards").unwrap()
});
static FIRST_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]").unwrap());

/// Collect every reward tier's amount, in page order.
///
/// Returns `None` when the page has neither tiers nor a rewards section,
/// and an empty list when the section is there but holds no tiers. The
/// first bad tier fails the whole collection.
pub fn extract(document: &Html) -> Result<Option<Vec<u64>>, ExtractError> {
    let mut amounts = Vec::new();

    for (i, tier) in document.select(&PLEDGE_INFO).enumerate() {
        let money = tier
            .select(&MONEY)
            .next()
            .ok_or(ExtractError::MissingMoney(i + 1))?;
        let text: String = money.text().collect();
        amounts.push(parse_amount(&text)?);
    }

    if amounts.is_empty() && document.select(&REWARDS_SECTION).next().is_none() {
        return Ok(None);
    }

    Ok(Some(amounts))
}

/// Parse money text such as `"$1,250 pledged"` into `1250`.
///
/// Everything before the first digit is dropped. Commas, spaces and
/// `.` followed by exactly three digits are digit grouping. Once one of
/// `,` or `.` has grouped, the other is the decimal mark and ends the
/// amount, as does a lone `.` (`"$10.50"` is `10`). A space between digit
/// runs that are not a group of three is an error.
pub fn parse_amount(text: &str) -> Result<u64, ExtractError> {
    let start = FIRST_DIGIT
        .find(text)
        .ok_or_else(|| ExtractError::NoDigit(text.trim().to_string()))?
        .start();

    let chars: Vec<char> = text[start..].chars().collect();
    let mut digits = String::new();
    let mut decimal_mark = None;
    let mut i = 0;

    while let Some(&c) = chars.get(i) {
        if c.is_ascii_digit() {
            digits.push(c);
            i += 1;
            continue;
        }
        let rest = &chars[i + 1..];
        let digit_next = rest.first().is_some_and(char::is_ascii_digit);
        match c {
            ',' | '.' if decimal_mark == Some(c) => break,
            ',' if digit_next => decimal_mark = Some('.'),
            '.' if is_group(rest) => decimal_mark = Some(','),
            ' ' | '\u{a0}' | '\u{202f}' if is_group(rest) => {}
            ' ' | '\u{a0}' | '\u{202f}' if digit_next => {
                return Err(ExtractError::AmbiguousGrouping(text.trim().to_string()));
            }
            _ => break,
        }
        i += 1;
    }

    digits
        .parse::<u64>()
        .map_err(|_| ExtractError::AmountOverflow(text.trim().to_string()))
}

/// Exactly three digits, then a non-digit or the end.
fn is_group(rest: &[char]) -> bool {
    rest.len() >= 3
        && rest[..3].iter().all(char::is_ascii_digit)
        && !rest.get(3).is_some_and(char::is_ascii_digit)
}
