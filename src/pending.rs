//! A collection of pending requests.

use crate::engine::Token;
use crate::error::{Failure, LookupResult};
use std::collections::BTreeMap;
use std::fmt;

//------------ Callback ------------------------------------------------------

/// The callback receiving the outcome of a lookup.
pub type Callback = Box<dyn FnOnce(LookupResult) + Send + 'static>;

//------------ Record --------------------------------------------------------

/// A single outstanding request.
pub struct Record {
    /// The request as submitted.
    query: String,

    /// What to call once the request is done.
    callback: Callback,
}

impl Record {
    /// Returns the request as it was submitted.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Consumes the record and hands the result to its callback.
    fn finish(self, result: LookupResult) {
        (self.callback)(result)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Record")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

//------------ PendingRequests -----------------------------------------------

/// The requests that have been handed to an engine but aren’t done yet.
///
/// Each request is kept under a token that is never handed out twice by
/// the same collection. Completing a token removes the request, so a
/// request’s callback runs at most once and a second completion for the
/// same token has no effect.
#[derive(Default)]
pub struct PendingRequests {
    /// The records ordered by token and thus by submission.
    records: BTreeMap<Token, Record>,

    /// The value of the next token.
    next: u64,
}

impl PendingRequests {
    /// Creates a new, empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether there are no pending requests.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the number of pending requests.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns whether a request is pending under `token`.
    pub fn contains(&self, token: Token) -> bool {
        self.records.contains_key(&token)
    }

    /// Returns the request pending under `token`.
    pub fn get(&self, token: Token) -> Option<&Record> {
        self.records.get(&token)
    }

    /// Adds a new request and returns its token.
    pub fn insert(&mut self, query: String, callback: Callback) -> Token {
        let token = Token::new(self.next);
        self.next += 1;
        self.records.insert(token, Record { query, callback });
        token
    }

    /// Completes the request under `token`.
    ///
    /// Returns whether there was such a request.
    pub fn complete(&mut self, token: Token, result: LookupResult) -> bool {
        match self.records.remove(&token) {
            Some(record) => {
                tracing::trace!(
                    %token, query = record.query(), ok = result.is_ok(),
                    "request completed"
                );
                record.finish(result);
                true
            }
            None => {
                tracing::warn!(%token, "completion for unknown request");
                false
            }
        }
    }

    /// Cancels all pending requests.
    ///
    /// The callbacks are called with [`Failure::Cancelled`] in the order
    /// the requests were added. Returns the number of cancelled requests.
    pub fn cancel_all(&mut self) -> usize {
        let records = std::mem::take(&mut self.records);
        let count = records.len();
        for (_, record) in records {
            record.finish(Err(Failure::Cancelled))
        }
        count
    }
}

impl fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PendingRequests")
            .field("records", &self.records)
            .field("next", &self.next)
            .finish()
    }
}

//============ Testing =======================================================
