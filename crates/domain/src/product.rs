//! Catalog product as seen by the order core.

use serde::{Deserialize, Serialize};

use crate::order::{Money, OrderItem, ProductId};

/// A catalog product together with its available stock.
///
/// The catalog itself is owned by another subsystem; the core only reads the
/// snapshot fields and decrements `available`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub article: String,
    pub price: Money,
    /// Units currently on hand.
    pub available: u32,
}

impl Product {
    pub fn new(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        article: impl Into<String>,
        price: Money,
        available: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            article: article.into(),
            price,
            available,
        }
    }

    /// Takes a price/name/article snapshot as a new order line.
    pub fn snapshot(&self, quantity: u32) -> OrderItem {
        OrderItem {
            product_id: self.id.clone(),
            name: self.name.clone(),
            article: self.article.clone(),
            price: self.price,
            quantity,
        }
    }

    /// Returns true if `quantity` units can be taken from stock.
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.available >= quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_copies_catalog_fields() {
        let product = Product::new("P-1", "Bread", "ART-1", Money::from_minor(4500), 10);
        let item = product.snapshot(3);
        assert_eq!(item.product_id, product.id);
        assert_eq!(item.name, "Bread");
        assert_eq!(item.article, "ART-1");
        assert_eq!(item.price, Money::from_minor(4500));
        assert_eq!(item.quantity, 3);
    }

    #[test]
    fn stock_check_is_inclusive() {
        let product = Product::new("P-1", "Bread", "ART-1", Money::from_minor(4500), 2);
        assert!(product.has_stock_for(2));
        assert!(!product.has_stock_for(3));
    }
}
