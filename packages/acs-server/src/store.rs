//! Contracts onto the collaborators the session engine drives: persistent
//! device and product stores, the per-product data model, the performance
//! handler fed by PM uploads and the object store for uploaded files.
//!
//! Read accessors are synchronous views of already-loaded state; mutations
//! are async and expected to be thread-safe. In-memory reference
//! implementations live in [`crate::memory`].

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use cwmp::Inform;
use time::OffsetDateTime;

use crate::Error;

/// Named string arguments of a method call, a parameter update and the
/// like. Ordered so outbound messages are deterministic.
pub type Values = BTreeMap<String, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    Queued,
    Sent,
    Responded,
    Fault,
    Unknown,
}

/// A queued remote procedure call against a device.
#[derive(Clone, Debug)]
pub struct MethodCall {
    /// Correlation token, a nanosecond timestamp rendered as a string. It
    /// becomes the `cwmp:ID` header of the outbound request.
    pub command_key: String,
    pub method_name: String,
    pub request_values: Values,
    pub state: CallState,
    pub response_values: Option<Values>,
    pub fault_code: i32,
    pub fault_string: String,
}

impl MethodCall {
    pub fn request_value(&self, name: &str) -> &str {
        self.request_values
            .get(name)
            .map(String::as_str)
            .unwrap_or("")
    }
}

#[async_trait]
pub trait DataModel: Send + Sync {
    /// The xsi type recorded for a parameter (`string`, `boolean`, ...).
    fn parameter_type(&self, name: &str) -> Option<String>;

    async fn upsert_parameter(
        &self,
        name: &str,
        parameter_type: Option<&str>,
        writable: Option<bool>,
        description: Option<&str>,
        default_value: Option<&str>,
    ) -> Result<(), Error>;

    async fn reload(&self);
}

pub trait Product: Send + Sync {
    fn id(&self) -> String;
    fn data_model(&self) -> Arc<dyn DataModel>;
}

#[async_trait]
pub trait Device: Send + Sync {
    fn oui(&self) -> String;
    fn product_class(&self) -> String;
    fn serial_number(&self) -> String;
    fn product(&self) -> Option<Arc<dyn Product>>;

    fn online_status(&self) -> bool;
    /// Refreshes the liveness state after an Inform. Implementations emit
    /// an event when `last_online_status` was false (an offline→online
    /// transition); periodic Informs that change nothing stay silent.
    async fn handle_alive(&self, at: OffsetDateTime, last_online_status: bool);

    async fn update_methods(&self, methods: &[String]) -> Result<(), Error>;
    fn is_method_supported(&self, method: &str) -> bool;

    fn get_method_call(&self, command_key: &str) -> Option<MethodCall>;
    /// The next `Queued` call in FIFO order, or `None` while a call is
    /// `Sent` (CWMP alternates request and response within a session).
    fn next_method_call(&self) -> Option<MethodCall>;
    async fn push_method_call(
        &self,
        at: OffsetDateTime,
        method_name: &str,
        values: Option<Values>,
    ) -> Result<MethodCall, Error>;
    async fn update_method_call_request_sent(&self, command_key: &str);
    /// Resolves the `Sent` call matching `request_id`, marking it
    /// `Responded`, or `Fault` when a fault code or string is present.
    async fn update_method_call_response(
        &self,
        request_id: &str,
        values: Option<Values>,
        fault_code: i32,
        fault_string: &str,
    );
    async fn update_method_call_unknown(&self, command_key: &str);

    async fn update_transfer_log_complete(
        &self,
        ts: i64,
        start_time: OffsetDateTime,
        complete_time: OffsetDateTime,
    ) -> Result<(), Error>;
    #[allow(clippy::too_many_arguments)]
    async fn update_transfer_log_fault(
        &self,
        ts: i64,
        start_time: OffsetDateTime,
        complete_time: OffsetDateTime,
        fault_code: i32,
        fault_string: &str,
    ) -> Result<(), Error>;
    #[allow(clippy::too_many_arguments)]
    async fn insert_transfer_log_complete(
        &self,
        ts: i64,
        bucket: &str,
        key: &str,
        file_type: &str,
        file_name: &str,
        start_time: OffsetDateTime,
        complete_time: OffsetDateTime,
        fault_code: i32,
        fault_string: &str,
    ) -> Result<(), Error>;

    /// Known parameter names under `path`; with `next_level` only the
    /// immediate children are returned.
    fn parameter_names(&self, path: &str, next_level: bool) -> Vec<String>;
    fn parameter_value(&self, name: &str) -> Option<String>;
    fn parameter_value_or_default(&self, name: &str) -> String {
        self.parameter_value(name).unwrap_or_default()
    }
    async fn update_parameter_values(&self, values: &Values) -> Result<(), Error>;
    async fn update_parameter_writables(
        &self,
        values: &BTreeMap<String, bool>,
    ) -> Result<(), Error>;
    async fn update_parameter_notifications(
        &self,
        values: &BTreeMap<String, i32>,
    ) -> Result<(), Error>;

    async fn insert_event(
        &self,
        event_type: &str,
        at: OffsetDateTime,
        metadata: Values,
    ) -> Result<(), Error>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn get_product(
        &self,
        schema: &str,
        oui: &str,
        product_class: &str,
    ) -> Option<Arc<dyn Product>>;
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Looks up a device; an empty `product_class` matches any class (the
    /// upload filename does not carry one).
    async fn get_device(
        &self,
        schema: &str,
        oui: &str,
        product_class: &str,
        serial_number: &str,
    ) -> Option<Arc<dyn Device>>;

    /// Creates a device from its first Inform. This is the only way a
    /// device comes into existence.
    async fn create_device_with_inform(
        &self,
        schema: &str,
        oui: &str,
        product_class: &str,
        serial_number: &str,
        inform: &Inform,
    ) -> Result<Arc<dyn Device>, Error>;
}

#[async_trait]
pub trait PerformanceHandler: Send + Sync {
    async fn handle_measure_values(
        &self,
        device: Arc<dyn Device>,
        filename: &str,
        values: std::collections::HashMap<String, f64>,
    );
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub filename: String,
    pub size: usize,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        schema: &str,
        bucket: &str,
        key: &str,
        filename: &str,
        data: Bytes,
    ) -> Result<StoredObject, Error>;
}
