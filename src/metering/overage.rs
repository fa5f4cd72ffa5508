use serde::Serialize;

use crate::resources::ResourceKind;

/// Price charged for usage beyond a resource's limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverageRate {
    pub rate: f64,
    /// Units covered by one `rate`; `None` means the rate is per unit.
    pub per: Option<f64>,
    pub unit: &'static str,
}

impl OverageRate {
    const fn per_unit(rate: f64, unit: &'static str) -> Self {
        Self {
            rate,
            per: None,
            unit,
        }
    }

    const fn per_block(rate: f64, per: f64, unit: &'static str) -> Self {
        Self {
            rate,
            per: Some(per),
            unit,
        }
    }

    /// Partial blocks are billed fractionally.
    pub fn cost(&self, excess: f64) -> f64 {
        if excess <= 0.0 {
            return 0.0;
        }
        match self.per {
            Some(per) if per > 1.0 => excess / per * self.rate,
            _ => excess * self.rate,
        }
    }

    /// Display form such as `$0.5/10K calls`.
    pub fn label(&self) -> String {
        format!("${}/{}", self.rate, self.unit)
    }
}

/// key: overage-rate-table -> static per-resource pricing
pub fn overage_rate(resource: ResourceKind) -> OverageRate {
    match resource {
        ResourceKind::StorageGb => OverageRate::per_unit(1.50, "GB/mo"),
        ResourceKind::BandwidthGb => OverageRate::per_unit(0.08, "GB"),
        ResourceKind::DatabaseGb => OverageRate::per_unit(3.00, "GB/mo"),
        ResourceKind::ApiCalls => OverageRate::per_block(0.50, 10_000.0, "10K calls"),
        ResourceKind::FileUploadsGb => OverageRate::per_unit(1.50, "GB/mo"),
        ResourceKind::Executions => OverageRate::per_block(2.00, 10_000.0, "10K executions"),
        ResourceKind::Emails => OverageRate::per_block(1.00, 1_000.0, "1K emails"),
        ResourceKind::AiQueries => OverageRate::per_unit(0.015, "query"),
        ResourceKind::Webhooks => OverageRate::per_unit(0.0, "N/A"),
    }
}

pub fn overage_cost(resource: ResourceKind, excess: f64) -> f64 {
    overage_rate(resource).cost(excess)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverageEstimate {
    pub exceeded_by: f64,
    pub overage_cost: f64,
    pub rate: f64,
}

impl OverageEstimate {
    pub const NONE: OverageEstimate = OverageEstimate {
        exceeded_by: 0.0,
        overage_cost: 0.0,
        rate: 0.0,
    };

    /// Overage for `current` usage against `limit`; zero when unlimited or within limit.
    pub fn compute(resource: ResourceKind, current: f64, limit: f64) -> Self {
        if limit == 0.0 {
            return Self::NONE;
        }
        let exceeded_by = (current - limit).max(0.0);
        if exceeded_by == 0.0 {
            return Self::NONE;
        }

        let rate = overage_rate(resource);
        Self {
            exceeded_by,
            overage_cost: round_cents(rate.cost(exceeded_by)),
            rate: rate.rate,
        }
    }
}

pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(left: f64, right: f64) -> bool {
        (left - right).abs() < 1e-9
    }

    #[test]
    fn per_block_rate_divides_without_rounding_up() {
        assert!(approx(overage_cost(ResourceKind::ApiCalls, 14_000.0), 0.70));
        assert!(approx(overage_cost(ResourceKind::Emails, 500.0), 0.50));
    }

    #[test]
    fn per_unit_rate_multiplies() {
        assert!(approx(overage_cost(ResourceKind::StorageGb, 5.0), 7.50));
        assert!(approx(overage_cost(ResourceKind::AiQueries, 200.0), 3.0));
    }

    #[test]
    fn webhooks_never_billed() {
        assert_eq!(overage_cost(ResourceKind::Webhooks, 1e9), 0.0);
    }

    #[test]
    fn estimate_is_zero_within_limit_or_unlimited() {
        assert_eq!(
            OverageEstimate::compute(ResourceKind::ApiCalls, 4_000.0, 5_000.0),
            OverageEstimate::NONE
        );
        assert_eq!(
            OverageEstimate::compute(ResourceKind::ApiCalls, 1e9, 0.0),
            OverageEstimate::NONE
        );
    }

    #[test]
    fn estimate_reports_excess_and_rounded_cost() {
        let estimate = OverageEstimate::compute(ResourceKind::ApiCalls, 64_000.0, 50_000.0);
        assert_eq!(estimate.exceeded_by, 14_000.0);
        assert_eq!(estimate.overage_cost, 0.7);
        assert_eq!(estimate.rate, 0.5);
    }

    #[test]
    fn rate_label_matches_display_form() {
        assert_eq!(overage_rate(ResourceKind::ApiCalls).label(), "$0.5/10K calls");
        assert_eq!(overage_rate(ResourceKind::StorageGb).label(), "$1.5/GB/mo");
    }
}
