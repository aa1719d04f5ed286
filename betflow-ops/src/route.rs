use betflow_core::{Batch, Destination, Record, Window};

/// Default key whose presence marks a user row.
pub const USER_DISCRIMINANT: &str = "user_name";

/// One record labelled with the output it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum Tagged {
    Users(serde_json::Value),
    Transactions(serde_json::Value),
}

impl Tagged {
    pub fn destination(&self) -> Destination {
        match self {
            Tagged::Users(_) => Destination::Users,
            Tagged::Transactions(_) => Destination::Transactions,
        }
    }
}

/// Splits a closed window into a users batch and a transactions batch by record shape.
///
/// Example
/// ```no_run
/// use betflow_ops::BatchRouter;
/// let router = BatchRouter::new("user_name");
/// # let _ = router;
/// ```
#[derive(Debug, Clone)]
pub struct BatchRouter {
    discriminant: String,
}

impl Default for BatchRouter {
    fn default() -> Self {
        Self::new(USER_DISCRIMINANT)
    }
}

impl BatchRouter {
    pub fn new(discriminant: impl Into<String>) -> Self {
        Self {
            discriminant: discriminant.into(),
        }
    }

    pub fn tag(&self, value: serde_json::Value) -> Tagged {
        if value.get(&self.discriminant).is_some() {
            Tagged::Users(value)
        } else {
            Tagged::Transactions(value)
        }
    }

    /// Returns `(users, transactions)`; either may be empty.
    pub fn partition(&self, window: Window, records: Vec<Record>) -> (Batch, Batch) {
        let mut users = Vec::new();
        let mut transactions = Vec::new();
        for rec in records {
            match self.tag(rec.value) {
                Tagged::Users(v) => users.push(v),
                Tagged::Transactions(v) => transactions.push(v),
            }
        }
        (
            Batch::new(Destination::Users, window, users),
            Batch::new(Destination::Transactions, window, transactions),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn window() -> Window {
        Window {
            start: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            end: DateTime::<Utc>::from_timestamp(30, 0).unwrap(),
        }
    }

    fn rec(v: serde_json::Value) -> Record {
        Record::new(DateTime::<Utc>::from_timestamp(1, 0).unwrap(), v)
    }

    #[test]
    fn tags_by_presence_of_discriminant() {
        let router = BatchRouter::default();
        assert_eq!(router.tag(json!({"uid": 1, "user_name": "A"})).destination(), Destination::Users);
        // presence is enough, even with a null value
        assert_eq!(router.tag(json!({"user_name": null})).destination(), Destination::Users);
        assert_eq!(router.tag(json!({"uid": 1, "bet_amount": 3.0})).destination(), Destination::Transactions);
        assert_eq!(router.tag(json!("not an object")).destination(), Destination::Transactions);
    }

    #[test]
    fn partition_is_total_and_disjoint() {
        let router = BatchRouter::default();
        let records = vec![
            rec(json!({"uid": 1, "user_name": "A"})),
            rec(json!({"uid": 1, "round_results": "win"})),
            rec(json!({"uid": 2, "user_name": "B"})),
            rec(json!({"uid": 2, "round_results": "loss"})),
            rec(json!({"uid": 3, "round_results": "loss"})),
        ];
        let total = records.len();
        let (users, transactions) = router.partition(window(), records);
        assert_eq!(users.len() + transactions.len(), total);
        assert_eq!(users.len(), 2);
        assert_eq!(users.destination, Destination::Users);
        assert_eq!(transactions.destination, Destination::Transactions);
        assert!(users.rows.iter().all(|r| r.get("user_name").is_some()));
        assert!(transactions.rows.iter().all(|r| r.get("user_name").is_none()));
        assert_eq!(users.window, window());
        assert_eq!(transactions.window, window());
    }

    #[test]
    fn empty_partitions_are_still_batches() {
        let router = BatchRouter::default();
        let (users, transactions) = router.partition(window(), vec![rec(json!({"uid": 9, "bet_amount": 1.0}))]);
        assert!(users.is_empty());
        assert_eq!(transactions.len(), 1);

        let (users, transactions) = router.partition(window(), Vec::new());
        assert!(users.is_empty() && transactions.is_empty());
    }

    #[test]
    fn custom_discriminant() {
        let router = BatchRouter::new("user_email");
        assert_eq!(router.tag(json!({"user_name": "A"})).destination(), Destination::Transactions);
        assert_eq!(router.tag(json!({"user_email": "a@x"})).destination(), Destination::Users);
    }
}
