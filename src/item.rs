//! Scraped item contract and the parse-output container.
//!
//! Items are opaque to the engine and pipelines: the only thing either ever
//! asks of one is a flat field map, used by generic sinks such as the console
//! writer. Spiders return items mixed with follow-up requests in a
//! [`ParseOutput`].

use std::collections::HashMap;

use crate::request::Request;

/// A caller-defined result record. The engine never interprets its fields.
pub trait ScrapedItem: Send + Sync + 'static {
    /// Flattens the item into a key→value map for generic output sinks.
    fn to_field_map(&self) -> HashMap<String, serde_json::Value>;
}

impl ScrapedItem for HashMap<String, serde_json::Value> {
    fn to_field_map(&self) -> HashMap<String, serde_json::Value> {
        self.clone()
    }
}

/// The mixed output of one parse callback: scraped items plus newly
/// discovered requests to follow.
#[derive(Debug)]
pub struct ParseOutput<I> {
    items: Vec<I>,
    requests: Vec<Request>,
}

impl<I> ParseOutput<I> {
    pub fn new() -> Self {
        ParseOutput {
            items: Vec::new(),
            requests: Vec::new(),
        }
    }

    pub fn add_item(&mut self, item: I) {
        self.items.push(item);
    }

    pub fn add_request(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.requests.is_empty()
    }

    /// Splits the output into its item and request halves.
    pub fn into_parts(self) -> (Vec<I>, Vec<Request>) {
        (self.items, self.requests)
    }
}

impl<I> Default for ParseOutput<I> {
    fn default() -> Self {
        Self::new()
    }
}
