use std::collections::HashMap;

/// Local already-shipped ledger.
///
/// The remote API promises idempotency per key, but the engine additionally
/// records every order whose shipment call was confirmed, so a replayed
/// `paid` event or a retried call can be answered locally without touching
/// the remote side at all. At most one `Shipped` transition can ever be
/// driven per order.
#[derive(Debug, Default)]
pub struct ShipmentLedger {
    shipped: HashMap<String, String>,
}

impl ShipmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed shipment. Returns false if the order was already
    /// present (the existing key is kept).
    pub fn record(&mut self, order_id: &str, idempotency_key: &str) -> bool {
        if self.shipped.contains_key(order_id) {
            return false;
        }
        self.shipped
            .insert(order_id.to_string(), idempotency_key.to_string());
        true
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.shipped.contains_key(order_id)
    }

    pub fn key_for(&self, order_id: &str) -> Option<&str> {
        self.shipped.get(order_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.shipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shipped.is_empty()
    }
}
