use sparkhub_core::ServiceOffer;

/// Points charged for an offer at purchase time. Per-unit offers multiply
/// by the requested unit count first, then the percentage discount is
/// applied with the discount amount floored. A paid offer never drops below
/// one point, even at a full discount.
///
/// Callers validate `units >= 1`; non-per-unit offers ignore the count.
pub fn effective_cost(offer: &ServiceOffer, units: i64) -> i64 {
    let base = if offer.per_unit {
        offer.cost_points.saturating_mul(units)
    } else {
        offer.cost_points
    };
    let discounted = match offer.discount_pct {
        Some(pct) if pct > 0 => base - base.saturating_mul(i64::from(pct)) / 100,
        _ => base,
    };
    discounted.max(1)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rstest::rstest;
    use sparkhub_core::ServiceOffer;
    use speculoos::prelude::*;
    use uuid::Uuid;

    use super::effective_cost;

    fn offer(cost_points: i64, discount_pct: Option<i32>, per_unit: bool) -> ServiceOffer {
        let now = Utc::now();
        ServiceOffer {
            id: Uuid::new_v4(),
            name: "Featured placement".into(),
            description: "Pin a project on the front page".into(),
            cost_points,
            discount_pct,
            per_unit,
            active: true,
            available_from: None,
            available_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[rstest]
    #[case(100, None, false, 1, 100)]
    #[case(100, Some(25), false, 1, 75)]
    #[case(30, Some(33), false, 1, 21)]
    #[case(10, Some(100), false, 1, 1)]
    #[case(10, Some(0), false, 1, 10)]
    #[case(10, None, true, 7, 70)]
    #[case(10, Some(50), true, 3, 15)]
    #[case(7, Some(10), true, 3, 19)]
    fn charges_discounted_unit_price(
        #[case] cost_points: i64,
        #[case] discount_pct: Option<i32>,
        #[case] per_unit: bool,
        #[case] units: i64,
        #[case] expected: i64,
    ) {
        let offer = offer(cost_points, discount_pct, per_unit);
        assert_that!(effective_cost(&offer, units)).is_equal_to(expected);
    }

    #[test]
    fn non_per_unit_ignores_unit_count() {
        let offer = offer(40, None, false);
        assert_that!(effective_cost(&offer, 9)).is_equal_to(40);
    }
}
