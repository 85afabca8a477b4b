//! Control and event messages carried inside frames.
//!
//! Client → server: `{action: "watch", watcher, db?, collection, filters?}` and
//! `{action: "cancel", watcher}`. Server → client: `{watcher, data}` for each
//! change and `{error}` before the server closes the connection.

use bson::{doc, Bson, Document};

use crate::Error;

/// Action tag for subscribing.
pub const ACTION_WATCH: &str = "watch";

/// Action tag for unsubscribing.
pub const ACTION_CANCEL: &str = "cancel";

/// A validated request to subscribe to a collection's changes.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchRequest {
    /// Client-assigned subscription id.
    pub watcher: String,
    /// Target database; the server default applies when absent.
    pub db: Option<String>,
    /// Target collection.
    pub collection: String,
    /// Filter specification in the order the client wrote it. Empty means
    /// unfiltered.
    pub filters: Document,
}

impl WatchRequest {
    /// Create a new watch request.
    pub fn new(
        watcher: impl Into<String>,
        collection: impl Into<String>,
        filters: Document,
    ) -> Self {
        Self {
            watcher: watcher.into(),
            db: None,
            collection: collection.into(),
            filters,
        }
    }

    /// Set the target database.
    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }
}

/// A validated request to drop a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    /// Subscription id to cancel.
    pub watcher: String,
}

/// A control message sent by a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Subscribe.
    Watch(WatchRequest),
    /// Unsubscribe.
    Cancel(CancelRequest),
}

impl Action {
    /// Create a watch action.
    pub fn watch(request: WatchRequest) -> Self {
        Action::Watch(request)
    }

    /// Create a cancel action.
    pub fn cancel(watcher: impl Into<String>) -> Self {
        Action::Cancel(CancelRequest {
            watcher: watcher.into(),
        })
    }

    /// The subscription id this action refers to.
    pub fn watcher(&self) -> &str {
        match self {
            Action::Watch(request) => &request.watcher,
            Action::Cancel(request) => &request.watcher,
        }
    }

    /// Encode to the wire document shape.
    pub fn to_document(&self) -> Document {
        match self {
            Action::Watch(request) => {
                let mut doc = doc! {
                    "watcher": request.watcher.as_str(),
                    "action": ACTION_WATCH,
                };
                if let Some(db) = &request.db {
                    doc.insert("db", db.as_str());
                }
                doc.insert("collection", request.collection.as_str());
                doc.insert("filters", request.filters.clone());
                doc
            }
            Action::Cancel(request) => doc! {
                "watcher": request.watcher.as_str(),
                "action": ACTION_CANCEL,
            },
        }
    }

    /// Decode and validate a control document.
    ///
    /// Field checks run in wire order (`watcher`, `db`, `collection`,
    /// `filters`) and stop at the first failure.
    pub fn from_document(doc: &Document) -> Result<Self, Error> {
        match doc.get("action") {
            Some(Bson::String(action)) if action == ACTION_WATCH => {
                let watcher = required_string(doc, "watcher")?;
                let db = optional_string(doc, "db")?;
                let collection = required_string(doc, "collection")?;
                let filters = optional_document(doc, "filters")?;
                Ok(Action::Watch(WatchRequest {
                    watcher,
                    db,
                    collection,
                    filters,
                }))
            }
            Some(Bson::String(action)) if action == ACTION_CANCEL => {
                let watcher = required_string(doc, "watcher")?;
                Ok(Action::Cancel(CancelRequest { watcher }))
            }
            _ => Err(Error::UnknownAction),
        }
    }
}

/// A message sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// One upstream change routed to one subscription.
    Change {
        /// Subscription id.
        watcher: String,
        /// Raw change document.
        data: Document,
    },
    /// Protocol failure; the server closes the connection afterwards.
    Error {
        /// Human-readable reason.
        error: String,
    },
}

impl ServerMessage {
    /// Create a change message.
    pub fn change(watcher: impl Into<String>, data: Document) -> Self {
        ServerMessage::Change {
            watcher: watcher.into(),
            data,
        }
    }

    /// Create an error message.
    pub fn error(error: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: error.into(),
        }
    }

    /// Encode to the wire document shape.
    pub fn to_document(&self) -> Document {
        match self {
            ServerMessage::Change { watcher, data } => doc! {
                "watcher": watcher.as_str(),
                "data": data.clone(),
            },
            ServerMessage::Error { error } => doc! { "error": error.as_str() },
        }
    }

    /// Decode a server document.
    pub fn from_document(mut doc: Document) -> Result<Self, Error> {
        if let Some(error) = doc.get("error") {
            let error = match error {
                Bson::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Ok(ServerMessage::Error { error });
        }

        let watcher = match doc.get("watcher") {
            Some(Bson::String(s)) => s.clone(),
            _ => {
                return Err(Error::InvalidMessage(
                    "change message without watcher".to_string(),
                ))
            }
        };
        let data = match doc.remove("data") {
            Some(Bson::Document(data)) => data,
            _ => {
                return Err(Error::InvalidMessage(
                    "change message without data document".to_string(),
                ))
            }
        };

        Ok(ServerMessage::Change { watcher, data })
    }
}

/// Values a dynamic client treats as "not provided".
fn is_falsy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => true,
        Bson::Boolean(b) => !b,
        Bson::Int32(i) => *i == 0,
        Bson::Int64(i) => *i == 0,
        Bson::Double(f) => *f == 0.0 || f.is_nan(),
        Bson::String(s) => s.is_empty(),
        _ => false,
    }
}

fn required_string(doc: &Document, key: &str) -> Result<String, Error> {
    match doc.get(key) {
        None => Err(Error::MissingParam(key.to_string())),
        Some(value) if is_falsy(value) => Err(Error::MissingParam(key.to_string())),
        Some(Bson::String(s)) => Ok(s.clone()),
        Some(_) => Err(Error::InvalidParamType {
            key: key.to_string(),
            expected: "string",
        }),
    }
}

fn optional_string(doc: &Document, key: &str) -> Result<Option<String>, Error> {
    match doc.get(key) {
        None => Ok(None),
        Some(value) if is_falsy(value) => Ok(None),
        Some(Bson::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::InvalidParamType {
            key: key.to_string(),
            expected: "string",
        }),
    }
}

fn optional_document(doc: &Document, key: &str) -> Result<Document, Error> {
    match doc.get(key) {
        None | Some(Bson::Null) | Some(Bson::Undefined) => Ok(Document::new()),
        Some(Bson::Document(filters)) => Ok(filters.clone()),
        Some(_) => Err(Error::InvalidParamType {
            key: key.to_string(),
            expected: "object",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_roundtrip() {
        let action = Action::watch(
            WatchRequest::new("w1", "orders", doc! { "status": "open" }).with_db("shop"),
        );

        let doc = action.to_document();
        assert_eq!(doc.get_str("action").unwrap(), "watch");
        assert_eq!(doc.get_str("db").unwrap(), "shop");
        assert_eq!(Action::from_document(&doc).unwrap(), action);
    }

    #[test]
    fn test_watch_defaults() {
        let doc = doc! { "action": "watch", "watcher": "w1", "collection": "orders" };
        match Action::from_document(&doc).unwrap() {
            Action::Watch(request) => {
                assert_eq!(request.db, None);
                assert!(request.filters.is_empty());
            }
            other => panic!("expected watch, got {:?}", other),
        }
    }

    #[test]
    fn test_cancel_roundtrip() {
        let action = Action::cancel("w9");
        assert_eq!(Action::from_document(&action.to_document()).unwrap(), action);
        assert_eq!(action.watcher(), "w9");
    }

    #[test]
    fn test_missing_params() {
        let doc = doc! { "action": "watch", "collection": "orders" };
        assert_eq!(
            Action::from_document(&doc).unwrap_err().to_string(),
            "Missing params: watcher"
        );

        let doc = doc! { "action": "watch", "watcher": "w1", "collection": "" };
        assert_eq!(
            Action::from_document(&doc).unwrap_err().to_string(),
            "Missing params: collection"
        );

        let doc = doc! { "action": "cancel", "watcher": Bson::Null };
        assert_eq!(
            Action::from_document(&doc).unwrap_err().to_string(),
            "Missing params: watcher"
        );
    }

    #[test]
    fn test_wrong_types() {
        let doc = doc! { "action": "watch", "watcher": 5, "collection": "orders" };
        assert_eq!(
            Action::from_document(&doc).unwrap_err().to_string(),
            "Params type must be string: watcher"
        );

        let doc = doc! { "action": "watch", "watcher": "w1", "db": true, "collection": "c" };
        assert_eq!(
            Action::from_document(&doc).unwrap_err().to_string(),
            "Params type must be string: db"
        );

        let doc = doc! { "action": "watch", "watcher": "w1", "collection": "c", "filters": "x" };
        assert_eq!(
            Action::from_document(&doc).unwrap_err().to_string(),
            "Params type must be object: filters"
        );
    }

    #[test]
    fn test_unknown_action() {
        assert_eq!(
            Action::from_document(&doc! { "action": "drop" }),
            Err(Error::UnknownAction)
        );
        assert_eq!(Action::from_document(&doc! {}), Err(Error::UnknownAction));
    }

    #[test]
    fn test_server_messages() {
        let change = ServerMessage::change("w1", doc! { "operationType": "insert" });
        assert_eq!(
            ServerMessage::from_document(change.to_document()).unwrap(),
            change
        );

        let error = ServerMessage::error("Unknown action");
        assert_eq!(
            ServerMessage::from_document(error.to_document()).unwrap(),
            error
        );

        assert!(ServerMessage::from_document(doc! { "watcher": "w1" }).is_err());
    }

    #[test]
    fn test_filters_keep_key_order() {
        let filters = doc! {
            "total": { "$gte": 10 },
            "items": { "$in": [ { "sku": "x1", "qty": 2 } ] },
            "a": 1,
        };
        let action = Action::watch(WatchRequest::new("w1", "orders", filters.clone()));
        match Action::from_document(&action.to_document()).unwrap() {
            Action::Watch(request) => {
                let keys: Vec<&str> = request.filters.keys().map(String::as_str).collect();
                assert_eq!(keys, vec!["total", "items", "a"]);
                assert_eq!(request.filters, filters);
            }
            other => panic!("expected watch, got {:?}", other),
        }
    }

    #[test]
    fn test_falsy_params_are_missing() {
        for watcher in [Bson::Int32(0), Bson::Boolean(false), Bson::Double(0.0)] {
            let doc = doc! { "action": "watch", "watcher": watcher, "collection": "orders" };
            assert_eq!(
                Action::from_document(&doc).unwrap_err().to_string(),
                "Missing params: watcher"
            );
        }

        let doc = doc! { "action": "cancel", "watcher": 0 };
        assert_eq!(
            Action::from_document(&doc).unwrap_err().to_string(),
            "Missing params: watcher"
        );

        let doc = doc! { "action": "watch", "watcher": "w1", "db": false, "collection": "c" };
        match Action::from_document(&doc).unwrap() {
            Action::Watch(request) => assert_eq!(request.db, None),
            other => panic!("expected watch, got {:?}", other),
        }
    }
}
