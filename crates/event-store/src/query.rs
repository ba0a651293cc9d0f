use chrono::{DateTime, Utc};

use crate::AggregateId;

/// Filter for reading events back out of the store, used by the audit
/// history endpoints and by scans over a time window.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Filter by aggregate ID.
    pub aggregate_id: Option<AggregateId>,

    /// Filter by aggregate type.
    pub aggregate_type: Option<String>,

    /// Filter by event types (any of these types).
    pub event_types: Option<Vec<String>>,

    /// Events at or after this timestamp.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Events at or before this timestamp.
    pub to_timestamp: Option<DateTime<Utc>>,

    /// Maximum number of events to return.
    pub limit: Option<usize>,

    /// Number of events to skip.
    pub offset: Option<usize>,
}

impl EventQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a specific aggregate.
    pub fn for_aggregate(aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_id: Some(aggregate_id),
            ..Default::default()
        }
    }

    /// Filters by aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Filters by event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types = Some(vec![event_type.into()]);
        self
    }

    /// Filters to events at or after this timestamp.
    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    /// Filters to events at or before this timestamp.
    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the envelope passes every filter set on this query.
    /// Pagination is not considered.
    pub fn matches(&self, event: &crate::EventEnvelope) -> bool {
        if let Some(id) = self.aggregate_id
            && event.aggregate_id != id
        {
            return false;
        }
        if let Some(ref aggregate_type) = self.aggregate_type
            && &event.aggregate_type != aggregate_type
        {
            return false;
        }
        if let Some(ref types) = self.event_types
            && !types.contains(&event.event_type)
        {
            return false;
        }
        if let Some(from) = self.from_timestamp
            && event.timestamp < from
        {
            return false;
        }
        if let Some(to) = self.to_timestamp
            && event.timestamp > to
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventEnvelope, Version};

    fn envelope(aggregate_type: &str, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type(aggregate_type)
            .event_type(event_type)
            .version(Version::first())
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(EventQuery::new().matches(&envelope("Order", "OrderCreated")));
    }

    #[test]
    fn filters_by_aggregate_and_event_type() {
        let query = EventQuery::new()
            .aggregate_type("Order")
            .event_type("FulfillmentSubmitted");

        assert!(query.matches(&envelope("Order", "FulfillmentSubmitted")));
        assert!(!query.matches(&envelope("Order", "OrderCreated")));
        assert!(!query.matches(&envelope("DesignSession", "FulfillmentSubmitted")));
    }

    #[test]
    fn filters_by_time_window() {
        let event = envelope("Order", "OrderCreated");
        let before = event.timestamp - chrono::Duration::seconds(1);
        let after = event.timestamp + chrono::Duration::seconds(1);

        assert!(EventQuery::new().from_timestamp(before).matches(&event));
        assert!(!EventQuery::new().from_timestamp(after).matches(&event));
        assert!(!EventQuery::new().to_timestamp(before).matches(&event));
    }
}
