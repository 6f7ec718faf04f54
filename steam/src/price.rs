//! Price strings, integer cents and the marketplace's two-part fee schedule.
//!
//! Every monetary amount past this module is an [`Amount`] in minor currency
//! units; [`convert_price_string`] is the only place display strings turn into
//! numbers.
use crate::{Error, Result};
use derive_more::{Add, From, Into, Sub};
use serde::{Deserialize, Deserializer};
use std::cmp::Ordering;
use std::fmt;

/// Smallest ask the fee schedule can produce: nothing for the seller, one
/// cent for each fee.
pub const MIN_LISTING_PRICE: Amount = Amount(2);

const STEAM_FEE_PERCENT: i64 = 5;
const PUBLISHER_FEE_PERCENT: i64 = 10;
const MIN_FEE: i64 = 1;
const MAX_FEE_ITERATIONS: usize = 15;

/// Money in minor currency units (cents).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Add, Sub, From, Into,
)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Cents(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Cents(cents) => Ok(Amount(cents)),
            Raw::Text(text) => convert_price_string(&text).map_err(serde::de::Error::custom),
        }
    }
}

/// Splits a price string into its integer run, separator and fractional run,
/// skipping whatever non-digit prefix (currency symbol, code, spaces) comes first.
fn tokenize(text: &str) -> (&str, Option<char>, &str) {
    let start = text.find(|c: char| c.is_ascii_digit()).unwrap_or(text.len());
    let rest = &text[start..];

    let whole_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let (whole, rest) = rest.split_at(whole_len);

    let separator = rest.chars().next().filter(|c| matches!(c, '.' | ','));
    let rest = separator.map_or(rest, |sep| &rest[sep.len_utf8()..]);

    let fraction_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    (whole, separator, &rest[..fraction_len])
}

/// Parses a marketplace display price such as `"2,42€"`, `"USD 4,234.35"` or
/// `"2.--€"` into cents.
///
/// A fractional run longer than two digits means the separator was a
/// thousands separator; it is stripped and the string re-read until at most two
/// fractional digits remain. Dash placeholders (`"-"`, `"--"`) count as zero
/// cents. Empty input is zero.
pub fn convert_price_string(text: &str) -> Result<Amount> {
    if text.is_empty() {
        return Ok(Amount::ZERO);
    }

    let mut text = text.to_string();
    loop {
        let (whole, separator, fraction) = tokenize(&text);

        if fraction.len() > 2 {
            if let Some(sep) = separator {
                text = text.replace(sep, "");
                continue;
            }
        }

        if whole.is_empty() {
            return Err(Error::MalformedPriceString(text));
        }

        let units: i64 = whole
            .parse()
            .map_err(|_| Error::MalformedPriceString(text.clone()))?;
        let cents: i64 = if fraction.is_empty() {
            0
        } else {
            fraction
                .parse()
                .map_err(|_| Error::MalformedPriceString(text.clone()))?
        };

        return units
            .checked_mul(100)
            .and_then(|hundreds| hundreds.checked_add(cents))
            .map(Amount)
            .ok_or(Error::MalformedPriceString(text));
    }
}

/// Fees charged on a sale, split the way the marketplace reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub steam_fee: Amount,
    pub publisher_fee: Amount,
    pub money_to_ask: Amount,
    pub you_receive: Amount,
}

impl FeeBreakdown {
    pub fn fees(&self) -> Amount {
        self.steam_fee + self.publisher_fee
    }

    /// Buyer price the market displays for a listing that pays out `you_receive`.
    ///
    /// Differs from `money_to_ask` when the requested ask is not reachable by
    /// the fee schedule; the market then shows the nearest lower price.
    pub fn listed_price(&self) -> Amount {
        buyer_price(self.you_receive)
    }
}

/// What a buyer pays for a listing that pays the seller `you_receive`.
pub fn buyer_price(you_receive: Amount) -> Amount {
    Amount(forward_fees(you_receive.0).amount)
}

#[derive(Debug, Clone, Copy)]
struct ForwardFees {
    steam_fee: i64,
    publisher_fee: i64,
    amount: i64,
}

/// `floor(received * percent / 100)` without forming the product.
fn percent_of(received: i64, percent: i64) -> i64 {
    received / 100 * percent + received % 100 * percent / 100
}

/// Fees for a seller who wants to receive `received`.
fn forward_fees(received: i64) -> ForwardFees {
    let steam_fee = percent_of(received, STEAM_FEE_PERCENT).max(MIN_FEE);
    let publisher_fee = percent_of(received, PUBLISHER_FEE_PERCENT).max(MIN_FEE);
    ForwardFees {
        steam_fee,
        publisher_fee,
        amount: received
            .saturating_add(steam_fee)
            .saturating_add(publisher_fee),
    }
}

/// Search state while inverting the fee schedule.
#[derive(Clone, Copy)]
enum FeeSearch {
    Probing { received: i64, undershot: bool },
    Done(ForwardFees),
}

impl FeeSearch {
    fn step(self, ask: i64) -> Self {
        let (received, undershot) = match self {
            FeeSearch::Done(_) => return self,
            FeeSearch::Probing {
                received,
                undershot,
            } => (received, undershot),
        };

        let fees = forward_fees(received);
        match fees.amount.cmp(&ask) {
            Ordering::Equal => FeeSearch::Done(fees),
            Ordering::Greater if undershot => {
                // Forward function skipped over `ask`: keep the lower receive
                // and book the residual cents as steam fee.
                let lower = forward_fees(received - 1);
                FeeSearch::Done(ForwardFees {
                    steam_fee: lower.steam_fee + (ask - lower.amount),
                    publisher_fee: lower.publisher_fee,
                    amount: ask,
                })
            }
            Ordering::Greater => FeeSearch::Probing {
                received: received - 1,
                undershot,
            },
            Ordering::Less => FeeSearch::Probing {
                received: received + 1,
                undershot: true,
            },
        }
    }
}

/// Splits a buyer-facing `ask_price` into fees and the seller's payout.
///
/// The 5% + 10% schedule (each at least one cent, both floored) is computed off
/// the payout, so it is inverted by searching for the payout whose forward fees
/// reproduce `ask_price` exactly.
pub fn get_steam_fees_object(ask_price: Amount) -> Result<FeeBreakdown> {
    if ask_price < MIN_LISTING_PRICE {
        return Err(Error::InvalidArgument(format!(
            "ask price {ask_price} is below the minimum listing price {MIN_LISTING_PRICE}"
        )));
    }

    let ask = ask_price.0;
    // round(ask / 1.15) in integers
    let seed = ask
        .checked_mul(40)
        .and_then(|scaled| scaled.checked_add(23))
        .map(|scaled| scaled / 46)
        .ok_or_else(|| {
            Error::InvalidArgument(format!("ask price {ask_price} is too large"))
        })?;

    let mut search = FeeSearch::Probing {
        received: seed,
        undershot: false,
    };
    for _ in 0..MAX_FEE_ITERATIONS {
        search = search.step(ask);
        if matches!(search, FeeSearch::Done(_)) {
            break;
        }
    }

    let fees = match search {
        FeeSearch::Done(fees) => fees,
        FeeSearch::Probing { received, .. } => forward_fees(received),
    };

    let total_fees = fees.steam_fee + fees.publisher_fee;
    Ok(FeeBreakdown {
        steam_fee: Amount(fees.steam_fee),
        publisher_fee: Amount(fees.publisher_fee),
        money_to_ask: Amount(fees.amount),
        you_receive: Amount(fees.amount - total_fees),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cents(text: &str) -> i64 {
        convert_price_string(text).unwrap().cents()
    }

    #[test]
    fn test_convert_empty_string() {
        assert_eq!(cents(""), 0);
    }

    #[test]
    fn test_convert_string_prices() {
        for price in ["2,42€", "2,42pуб.", "2,42USD", "2,42HK$"] {
            assert_eq!(cents(price), 242, "{price}");
        }
    }

    #[test]
    fn test_convert_thousands_separator() {
        for price in [
            "4,234.35 €",
            "4,234.35 pуб.",
            "4,234.35 USD",
            "pуб. 4,234.35 €",
            "pуб.4,234.35 pуб.",
            "USD 4,234.35",
        ] {
            assert_eq!(cents(price), 423435, "{price}");
        }
        assert_eq!(cents("1.234.567,89€"), 123456789);
    }

    #[test]
    fn test_convert_dash_placeholders() {
        for price in ["2.--€", "2.-- pуб.", "2,--USD", "2.-- HK$", "2.-€", "2.- USD"] {
            assert_eq!(cents(price), 200, "{price}");
        }
    }

    #[test]
    fn test_convert_currency_prefix() {
        for price in ["€ 2,31", "pуб. 2,31", "USD 2,31", "HK$ 2,31", "2,31 €"] {
            assert_eq!(cents(price), 231, "{price}");
        }
    }

    #[test]
    fn test_convert_without_fraction() {
        assert_eq!(cents("15€"), 1500);
        assert_eq!(cents("$7"), 700);
    }

    #[test]
    fn test_convert_garbage_is_rejected() {
        assert!(matches!(
            convert_price_string("free"),
            Err(Error::MalformedPriceString(_))
        ));
        assert!(matches!(
            convert_price_string("€ ,--"),
            Err(Error::MalformedPriceString(_))
        ));
    }

    #[test]
    fn test_convert_is_idempotent_on_own_rendering() {
        for raw in [0, 5, 42, 100, 242, 423435, 99999] {
            let amount = Amount::from_cents(raw);
            assert_eq!(convert_price_string(&amount.to_string()).unwrap(), amount);
        }
    }

    #[test]
    fn test_amount_display() {
        assert_eq!(Amount::from_cents(242).to_string(), "2.42");
        assert_eq!(Amount::from_cents(5).to_string(), "0.05");
        assert_eq!(Amount::from_cents(-101).to_string(), "-1.01");
    }

    #[test]
    fn test_amount_deserializes_from_cents_or_text() {
        let amounts: Vec<Amount> = serde_json::from_str(r#"[175, "1,75€", "USD 2.-"]"#).unwrap();
        assert_eq!(
            amounts,
            vec![
                Amount::from_cents(175),
                Amount::from_cents(175),
                Amount::from_cents(200)
            ]
        );
    }

    #[test]
    fn test_get_steam_fees_object_minimum() {
        let fees = get_steam_fees_object(Amount::from_cents(3)).unwrap();
        assert_eq!(
            fees,
            FeeBreakdown {
                steam_fee: Amount::from_cents(1),
                publisher_fee: Amount::from_cents(1),
                money_to_ask: Amount::from_cents(3),
                you_receive: Amount::from_cents(1),
            }
        );
    }

    #[test]
    fn test_get_steam_fees_object_two_cents() {
        let fees = get_steam_fees_object(Amount::from_cents(2)).unwrap();
        assert_eq!(
            fees,
            FeeBreakdown {
                steam_fee: Amount::from_cents(1),
                publisher_fee: Amount::from_cents(1),
                money_to_ask: Amount::from_cents(2),
                you_receive: Amount::ZERO,
            }
        );
        assert_eq!(fees.listed_price(), Amount::from_cents(2));
    }

    #[test]
    fn test_huge_asks_are_rejected_not_overflowed() {
        let huge = convert_price_string("10000000000000000€").unwrap();
        assert_eq!(huge, Amount::from_cents(1_000_000_000_000_000_000));
        assert!(matches!(
            get_steam_fees_object(huge),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            get_steam_fees_object(Amount::from_cents(i64::MAX)),
            Err(Error::InvalidArgument(_))
        ));

        // largest ask the search accepts still reconstructs exactly
        let largest = Amount::from_cents((i64::MAX - 23) / 40);
        assert_eq!(get_steam_fees_object(largest).unwrap().money_to_ask, largest);
    }

    #[test]
    fn test_buyer_price_saturates() {
        assert_eq!(buyer_price(Amount::from_cents(158)), Amount::from_cents(180));
        assert_eq!(buyer_price(Amount::from_cents(i64::MAX)), Amount::from_cents(i64::MAX));
    }

    #[test]
    fn test_get_steam_fees_object_round_down_value() {
        let fees = get_steam_fees_object(Amount::from_cents(21)).unwrap();
        assert_eq!(fees.you_receive, Amount::from_cents(19));
        assert_eq!(fees.money_to_ask, Amount::from_cents(21));
    }

    #[test]
    fn test_get_steam_fees_object_high_value() {
        let fees = get_steam_fees_object(Amount::from_cents(58831)).unwrap();
        assert_eq!(fees.you_receive, Amount::from_cents(51159));
        assert_eq!(fees.money_to_ask, Amount::from_cents(58831));
        assert_eq!(fees.steam_fee, Amount::from_cents(2557));
        assert_eq!(fees.publisher_fee, Amount::from_cents(5115));
    }

    #[test]
    fn test_unreachable_ask_patches_steam_fee() {
        // 1079 -> 1239 and 1080 -> 1242, so 1240 is not reachable
        let fees = get_steam_fees_object(Amount::from_cents(1240)).unwrap();
        assert_eq!(fees.money_to_ask, Amount::from_cents(1240));
        assert_eq!(fees.you_receive, Amount::from_cents(1079));
        assert_eq!(fees.steam_fee, Amount::from_cents(54));
        assert_eq!(fees.publisher_fee, Amount::from_cents(107));
        assert_eq!(fees.listed_price(), Amount::from_cents(1239));
    }

    #[test]
    fn test_fees_reconstruct_every_ask() {
        for ask in 2..20_000 {
            let fees = get_steam_fees_object(Amount::from_cents(ask)).unwrap();
            assert_eq!(fees.money_to_ask.cents(), ask);
            assert_eq!(fees.you_receive + fees.fees(), fees.money_to_ask);
            assert!(fees.listed_price() <= fees.money_to_ask);
            assert!(fees.you_receive >= Amount::ZERO);
        }
        for ask in (20_000..1_000_000).step_by(997) {
            let fees = get_steam_fees_object(Amount::from_cents(ask)).unwrap();
            assert_eq!(fees.money_to_ask.cents(), ask);
        }
    }

    #[test]
    fn test_fees_reject_asks_below_minimum() {
        for ask in [-5, 0, 1] {
            assert!(matches!(
                get_steam_fees_object(Amount::from_cents(ask)),
                Err(Error::InvalidArgument(_))
            ));
        }
    }
}
