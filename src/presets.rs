//! Ready-made rule sets.
//!
//! - [`default_rules`]: the static set an engine starts from (and reverts to on
//!   restart).
//! - [`storefront_rules`]: a fuller storefront set used by the cookbook demo.

use crate::rule::Rule;

const ORDERS_RESOURCE: &str = "POST:/orders";
const PRODUCTS_RESOURCE: &str = "GET:/products";
const SECKILL_RESOURCE: &str = "POST:/seckill";

const DEFAULT_ORDERS_PER_SECOND: f64 = 5.0;
const DEFAULT_PRODUCTS_PER_SECOND: f64 = 200.0;
const DEFAULT_SECKILL_PER_SECOND: f64 = 50.0;

/// Order creation limited to 5 per second.
pub fn default_rules() -> Vec<Rule> {
    vec![Rule::new(ORDERS_RESOURCE, DEFAULT_ORDERS_PER_SECOND)]
}

/// Orders (5/s), product listing (200/s) and flash sales (50/s).
pub fn storefront_rules() -> Vec<Rule> {
    vec![
        Rule::new(ORDERS_RESOURCE, DEFAULT_ORDERS_PER_SECOND),
        Rule::new(PRODUCTS_RESOURCE, DEFAULT_PRODUCTS_PER_SECOND),
        Rule::new(SECKILL_RESOURCE, DEFAULT_SECKILL_PER_SECOND),
    ]
}
