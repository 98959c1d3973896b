//! Scraped records and the output of a request callback.
//!
//! A [`StrictItem`] is a key/value record whose keys are restricted to the field list of the
//! [`ItemSchema`] it was created from. Writing an undeclared field fails with
//! [`ItemError::FieldNotPermitted`] instead of silently growing the record.

use crate::error::ItemError;
use crate::request::Request;
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Ordered list of the fields an item may carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSchema {
    name: String,
    fields: Vec<String>,
}

impl ItemSchema {
    /// Declares a schema. Duplicate field names are collapsed, first occurrence wins.
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut declared: Vec<String> = Vec::new();
        for field in fields {
            let field = field.into();
            if !declared.contains(&field) {
                declared.push(field);
            }
        }
        Arc::new(ItemSchema {
            name: name.into(),
            fields: declared,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn allows(&self, field: &str) -> bool {
        self.position(field).is_some()
    }

    fn position(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }
}

/// Where and when an item was scraped. Filled in by the engine, never by spider code.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ItemMetadata {
    pub spider_name: Option<String>,
    pub url: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
}

impl ItemMetadata {
    fn is_unset(&self) -> bool {
        self.spider_name.is_none() && self.url.is_none() && self.scraped_at.is_none()
    }
}

/// A record restricted to the fields of its schema.
#[derive(Debug, Clone, PartialEq)]
pub struct StrictItem {
    schema: Arc<ItemSchema>,
    values: Vec<Option<Value>>,
    metadata: ItemMetadata,
}

impl StrictItem {
    pub fn new(schema: &Arc<ItemSchema>) -> Self {
        StrictItem {
            schema: Arc::clone(schema),
            values: vec![None; schema.fields.len()],
            metadata: ItemMetadata::default(),
        }
    }

    /// Sets `field`, replacing any previous value.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<(), ItemError> {
        let idx = self.slot(field)?;
        self.values[idx] = Some(value.into());
        Ok(())
    }

    /// Chaining form of [`set`](Self::set).
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Result<Self, ItemError> {
        self.set(field, value)?;
        Ok(self)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.schema
            .position(field)
            .and_then(|idx| self.values[idx].as_ref())
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn remove(&mut self, field: &str) -> Result<Option<Value>, ItemError> {
        let idx = self.slot(field)?;
        Ok(self.values[idx].take())
    }

    /// Populated fields, in schema order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.schema
            .fields
            .iter()
            .zip(self.values.iter())
            .filter_map(|(name, value)| value.as_ref().map(|v| (name.as_str(), v)))
    }

    /// True when no field has been populated.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    pub fn schema(&self) -> &Arc<ItemSchema> {
        &self.schema
    }

    pub fn metadata(&self) -> &ItemMetadata {
        &self.metadata
    }

    /// Populated fields as a JSON object, without metadata.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        Value::Object(map)
    }

    /// Records the provenance of the item. Values that are already set are left alone.
    pub(crate) fn stamp(&mut self, spider_name: Option<&str>, url: &str) {
        if self.metadata.spider_name.is_none() {
            self.metadata.spider_name = spider_name.map(str::to_owned);
        }
        if self.metadata.url.is_none() {
            self.metadata.url = Some(url.to_owned());
        }
        if self.metadata.scraped_at.is_none() {
            self.metadata.scraped_at = Some(Utc::now());
        }
    }

    fn slot(&self, field: &str) -> Result<usize, ItemError> {
        self.schema
            .position(field)
            .ok_or_else(|| ItemError::FieldNotPermitted {
                field: field.to_string(),
                schema: self.schema.name.clone(),
            })
    }
}

impl Serialize for StrictItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (name, value) in self.fields() {
            map.serialize_entry(name, value)?;
        }
        if !self.metadata.is_unset() {
            map.serialize_entry("_meta", &self.metadata)?;
        }
        map.end()
    }
}

/// What a request callback produced: new requests to crawl and records to process.
///
/// Both sequences keep insertion order, which becomes their queue order.
#[derive(Debug, Default)]
pub struct ParseOutput {
    items: Vec<StrictItem>,
    requests: Vec<Request>,
}

impl ParseOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, item: StrictItem) {
        self.items.push(item);
    }

    pub fn add_items(&mut self, items: impl IntoIterator<Item = StrictItem>) {
        self.items.extend(items);
    }

    pub fn add_request(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn add_requests(&mut self, requests: impl IntoIterator<Item = Request>) {
        self.requests.extend(requests);
    }

    pub fn items(&self) -> &[StrictItem] {
        &self.items
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.requests.is_empty()
    }

    pub fn into_parts(self) -> (Vec<StrictItem>, Vec<Request>) {
        (self.items, self.requests)
    }
}
