//! Cross-item totalization for reform-regime tax groups.
//!
//! The document-level `IBSCBSTot` is always recomputed from the items with
//! exact decimal addition; whatever the request declared is discarded.

use crate::document::{LineItem, ReformTotals};

/// Sum the reform-regime group of every item.
///
/// Returns `None` when no item carries the group (the totalizer is then
/// omitted from the document altogether).
pub fn accumulate_reform(items: &[LineItem]) -> Option<ReformTotals> {
    let mut groups = items.iter().filter_map(|i| i.reform.as_ref()).peekable();
    groups.peek()?;

    let mut totals = ReformTotals::default();
    for g in groups {
        totals.base += g.base;
        totals.ibs_state += g.ibs_state;
        totals.ibs_municipal += g.ibs_municipal;
        totals.cbs += g.cbs;
    }
    totals.ibs = totals.ibs_state + totals.ibs_municipal;
    Some(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ProductLine, ReformLine};
    use fiscalflow_core::{Money, Quantity, Rate, UnitValue};
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    fn money(s: &str) -> Money {
        Money::parse(s).unwrap()
    }

    fn item(n: u32, base: Money) -> LineItem {
        LineItem {
            number: n,
            product: ProductLine {
                code: format!("P{n}"),
                ean: "SEM GTIN".into(),
                description: "item".into(),
                ncm: "00000000".into(),
                cfop: "5102".into(),
                unit: "UN".into(),
                quantity: Quantity::parse("1").unwrap(),
                unit_value: UnitValue::from_decimal(base.into()),
                gross: base,
                ean_taxable: "SEM GTIN".into(),
                unit_taxable: "UN".into(),
                quantity_taxable: Quantity::parse("1").unwrap(),
                unit_value_taxable: UnitValue::from_decimal(base.into()),
                freight: Money::ZERO,
                insurance: Money::ZERO,
                discount: Money::ZERO,
                other: Money::ZERO,
                in_total: 1,
            },
            total_tax: Money::ZERO,
            icms: None,
            pis: None,
            cofins: None,
            reform: Some(ReformLine {
                cst: "000".into(),
                class_code: "000001".into(),
                base,
                ibs_state_rate: Rate::parse("0.1").unwrap(),
                ibs_state: money("0.10"),
                ibs_municipal_rate: Rate::ZERO,
                ibs_municipal: money("0.20"),
                cbs_rate: Rate::parse("0.9").unwrap(),
                cbs: money("0.30"),
            }),
        }
    }

    #[test]
    fn no_reform_group_means_no_totalizer() {
        let mut i = item(1, money("1"));
        i.reform = None;
        assert_eq!(accumulate_reform(&[]), None);
        assert_eq!(accumulate_reform(&[i]), None);
    }

    #[test]
    fn repeating_decimals_sum_exactly() {
        let items = vec![item(1, money("0.1")), item(2, money("0.2"))];
        let t = accumulate_reform(&items).unwrap();
        assert_eq!(t.base, money("0.3"));
        assert_eq!(t.ibs, money("0.60"));
        assert_eq!(t.cbs, money("0.60"));
    }

    #[test]
    fn single_item_totals_equal_the_item() {
        let t = accumulate_reform(&[item(1, money("19.99"))]).unwrap();
        assert_eq!(t.base, money("19.99"));
        assert_eq!(t.ibs_state, money("0.10"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: the totalizer base equals the integer-cent sum of item
        /// bases, from a single item up to well past a thousand.
        #[test]
        fn totalizer_has_no_drift(cents in prop::collection::vec(0i64..100_000_000i64, 1..1500)) {
            let items: Vec<LineItem> = cents
                .iter()
                .enumerate()
                .map(|(i, c)| item(i as u32 + 1, Money::from_decimal(Decimal::new(*c, 2))))
                .collect();
            let t = accumulate_reform(&items).unwrap();
            let expected: i64 = cents.iter().sum();
            prop_assert_eq!(t.base, Money::from_decimal(Decimal::new(expected, 2)));
            prop_assert_eq!(t.base, items.iter().map(|i| i.product.gross).sum::<Money>());
        }

        /// Property: tenths accumulate exactly (0.1 added n times is n/10).
        #[test]
        fn tenths_accumulate_exactly(n in 0usize..2000) {
            let items: Vec<LineItem> = (0..n).map(|i| item(i as u32 + 1, money("0.1"))).collect();
            let expected = Money::from_decimal(Decimal::new(n as i64, 1));
            match accumulate_reform(&items) {
                None => prop_assert_eq!(n, 0),
                Some(t) => prop_assert_eq!(t.base, expected),
            }
        }
    }
}
