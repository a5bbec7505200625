//! Resource identifiers.
//!
//! Quotas are keyed by `"{METHOD}:{ROUTE_TEMPLATE}"`, optionally followed by
//! `":{PARAM_VALUE}"` for per-parameter quotas. Keying on the route template
//! rather than the concrete path keeps `/orders/1` and `/orders/2` under the same
//! quota.
//!
//! Caller-supplied text (raw paths and parameter values) has `%` and `:`
//! percent-encoded, so it can never forge a separator.

use std::borrow::Cow;

fn escape(raw: &str) -> Cow<'_, str> {
    if !raw.contains(&[':', '%'][..]) {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Key for a method and route template, e.g. `POST:/orders`.
///
/// When the request matched no route (`route` is empty) the raw `path` is used
/// instead, escaped.
///
/// ```
/// use flowgate::resource::route_key;
/// assert_eq!(route_key("GET", "/orders/:id", "/orders/42"), "GET:/orders/:id");
/// assert_eq!(route_key("GET", "", "/nope"), "GET:/nope");
/// assert_eq!(route_key("POST", "", "/seckill:a"), "POST:/seckill%3Aa");
/// ```
pub fn route_key(method: &str, route: &str, path: &str) -> String {
    if route.is_empty() {
        return format!("{}:{}", method, escape(path));
    }
    format!("{}:{}", method, route)
}

/// Key for a method, route template and parameter value, e.g.
/// `POST:/seckill:sku-1`. The value is escaped.
pub fn param_key(method: &str, route: &str, value: &str) -> String {
    format!("{}:{}:{}", method, route, escape(value))
}

/// Per-parameter key when `value` is present and non-empty, otherwise the plain
/// route key.
pub fn param_or_route_key(method: &str, route: &str, path: &str, value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => param_key(method, route, v),
        _ => route_key(method, route, path),
    }
}

/// Derives the resource identifier of a request.
///
/// Implemented for any `Fn(&Req) -> String`, so a closure is usually enough.
pub trait ResourceExtractor<Req>: Send + Sync {
    /// Resource identifier for `req`. Must be deterministic.
    fn extract(&self, req: &Req) -> String;
}

impl<Req, F> ResourceExtractor<Req> for F
where
    F: Fn(&Req) -> String + Send + Sync,
{
    fn extract(&self, req: &Req) -> String {
        self(req)
    }
}
