use std::fmt;

use super::aggregate::Order;
use super::errors::OrderError;

// ============================================================================
// Packaging Pricer
// ============================================================================
//
// Each base packaging has an optional weight limit and a flat surcharge.
// An extra membrane wrap decorates a bag or box: validation is delegated to
// the wrapped packaging and one more unit is added to the price.
//
// ============================================================================

/// Surcharge for an extra membrane wrap on top of a bag or box.
const EXTRA_MEMBRANE_SURCHARGE: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
struct PackagingSpec {
    name: &'static str,
    weight_limit: Option<f64>,
    surcharge: f64,
}

const BAG: PackagingSpec = PackagingSpec {
    name: "bag",
    weight_limit: Some(10.0),
    surcharge: 5.0,
};

const BOX: PackagingSpec = PackagingSpec {
    name: "box",
    weight_limit: Some(20.0),
    surcharge: 20.0,
};

const MEMBRANE: PackagingSpec = PackagingSpec {
    name: "membrane",
    weight_limit: None,
    surcharge: 1.0,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Packaging {
    Bag,
    Box,
    Membrane,
    /// Extra membrane wrap around another packaging.
    ExtraMembrane(Box<Packaging>),
}

impl Packaging {
    /// Resolve a packaging choice by name, wrapping it in an extra membrane
    /// when requested. A membrane is never wrapped in another membrane.
    pub fn resolve(kind: &str, extra_membrane: bool) -> Result<Self, OrderError> {
        let base = match kind.trim().to_ascii_lowercase().as_str() {
            "bag" => Packaging::Bag,
            "box" => Packaging::Box,
            "membrane" | "membrana" => Packaging::Membrane,
            other => return Err(OrderError::UnknownPackaging(other.to_string())),
        };

        if extra_membrane && base != Packaging::Membrane {
            return Ok(Packaging::ExtraMembrane(Box::new(base)));
        }

        Ok(base)
    }

    pub fn validate(&self, weight: f64) -> Result<(), OrderError> {
        let spec = self.base_spec();

        match spec.weight_limit {
            Some(limit) if weight > limit => Err(OrderError::Overweight {
                packaging: spec.name,
                weight,
                limit,
            }),
            _ => Ok(()),
        }
    }

    pub fn price(&self, base_worth: f64) -> f64 {
        match self {
            Packaging::ExtraMembrane(inner) => inner.price(base_worth) + EXTRA_MEMBRANE_SURCHARGE,
            _ => base_worth + self.base_spec().surcharge,
        }
    }

    /// Validate the order's weight and overwrite its worth with the
    /// packaged price. The order is left untouched on failure.
    pub fn apply(&self, order: &mut Order) -> Result<(), OrderError> {
        self.validate(order.weight)?;
        order.worth = self.price(order.worth);
        Ok(())
    }

    fn base_spec(&self) -> PackagingSpec {
        match self {
            Packaging::Bag => BAG,
            Packaging::Box => BOX,
            Packaging::Membrane => MEMBRANE,
            Packaging::ExtraMembrane(inner) => inner.base_spec(),
        }
    }
}

impl fmt::Display for Packaging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packaging::ExtraMembrane(inner) => write!(f, "{} with extra membrane", inner),
            _ => f.write_str(self.base_spec().name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderParams;
    use chrono::Utc;

    #[test]
    fn test_bag_weight_limit_is_inclusive() {
        let bag = Packaging::Bag;

        assert!(bag.validate(10.0).is_ok());
        assert!(matches!(
            bag.validate(10.01),
            Err(OrderError::Overweight { packaging: "bag", .. })
        ));
    }

    #[test]
    fn test_box_weight_limit() {
        assert!(Packaging::Box.validate(20.0).is_ok());
        assert!(Packaging::Box.validate(20.5).is_err());
    }

    #[test]
    fn test_membrane_has_no_weight_limit() {
        assert!(Packaging::Membrane.validate(500.0).is_ok());
    }

    #[test]
    fn test_prices() {
        assert_eq!(Packaging::Bag.price(100.0), 105.0);
        assert_eq!(Packaging::Box.price(100.0), 120.0);
        assert_eq!(Packaging::Membrane.price(100.0), 101.0);
    }

    #[test]
    fn test_extra_membrane_decorates_box() {
        let packaging = Packaging::resolve("box", true).unwrap();

        assert_eq!(
            packaging,
            Packaging::ExtraMembrane(Box::new(Packaging::Box))
        );
        assert_eq!(packaging.price(100.0), 121.0);
        assert!(packaging.validate(20.0).is_ok());
        assert!(packaging.validate(20.01).is_err());
    }

    #[test]
    fn test_extra_membrane_ignored_for_membrane() {
        let packaging = Packaging::resolve("membrane", true).unwrap();

        assert_eq!(packaging, Packaging::Membrane);
        assert_eq!(packaging.price(100.0), 101.0);
    }

    #[test]
    fn test_display_names_resolved_packaging() {
        assert_eq!(Packaging::resolve("bag", true).unwrap().to_string(), "bag with extra membrane");
        assert_eq!(Packaging::resolve("membrane", true).unwrap().to_string(), "membrane");
        assert_eq!(Packaging::Box.to_string(), "box");
    }

    #[test]
    fn test_resolve_accepts_legacy_membrane_name() {
        assert_eq!(Packaging::resolve("membrana", false).unwrap(), Packaging::Membrane);
    }

    #[test]
    fn test_resolve_unknown_packaging() {
        let result = Packaging::resolve("crate", false);
        assert_eq!(result, Err(OrderError::UnknownPackaging("crate".to_string())));
    }

    #[test]
    fn test_apply_overwrites_worth_only_when_valid() {
        let mut order = Order::new(&OrderParams {
            recipient_id: 1,
            expiration_date: Utc::now(),
            weight: 12.0,
            worth: 100.0,
        });

        assert!(Packaging::Bag.apply(&mut order).is_err());
        assert_eq!(order.worth, 100.0);

        Packaging::Box.apply(&mut order).unwrap();
        assert_eq!(order.worth, 120.0);
    }
}
