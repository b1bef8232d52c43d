//! In-memory collaborator implementations, used by the `acsd` binary when
//! no external stores are wired in and by the end-to-end tests.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use cwmp::Inform;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    CallState, DataModel, Device, DeviceStore, Error, MethodCall, ObjectStore, PerformanceHandler,
    Product, ProductStore, StoredObject, Values,
};

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Debug, Default)]
pub struct DataModelParameter {
    pub parameter_type: Option<String>,
    pub writable: Option<bool>,
    pub description: Option<String>,
    pub default_value: Option<String>,
}

#[derive(Default)]
pub struct MemoryDataModel {
    parameters: RwLock<BTreeMap<String, DataModelParameter>>,
    reloads: AtomicUsize,
}

impl MemoryDataModel {
    pub fn set_parameter_type(&self, name: &str, parameter_type: &str) {
        let mut parameters = self.parameters.write().unwrap_or_else(|p| p.into_inner());
        parameters.entry(name.to_owned()).or_default().parameter_type =
            Some(parameter_type.to_owned());
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn parameter(&self, name: &str) -> Option<DataModelParameter> {
        let parameters = self.parameters.read().unwrap_or_else(|p| p.into_inner());
        parameters.get(name).cloned()
    }
}

#[async_trait]
impl DataModel for MemoryDataModel {
    fn parameter_type(&self, name: &str) -> Option<String> {
        let parameters = self.parameters.read().unwrap_or_else(|p| p.into_inner());
        parameters.get(name)?.parameter_type.clone()
    }

    async fn upsert_parameter(
        &self,
        name: &str,
        parameter_type: Option<&str>,
        writable: Option<bool>,
        description: Option<&str>,
        default_value: Option<&str>,
    ) -> Result<(), Error> {
        let mut parameters = self.parameters.write().unwrap_or_else(|p| p.into_inner());
        let entry = parameters.entry(name.to_owned()).or_default();
        if let Some(parameter_type) = parameter_type {
            entry.parameter_type = Some(parameter_type.to_owned());
        }
        if let Some(writable) = writable {
            entry.writable = Some(writable);
        }
        if let Some(description) = description {
            entry.description = Some(description.to_owned());
        }
        if let Some(default_value) = default_value {
            entry.default_value = Some(default_value.to_owned());
        }
        Ok(())
    }

    async fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MemoryProduct {
    schema: String,
    oui: String,
    product_class: String,
    data_model: Arc<MemoryDataModel>,
}

impl MemoryProduct {
    pub fn memory_data_model(&self) -> Arc<MemoryDataModel> {
        self.data_model.clone()
    }
}

impl Product for MemoryProduct {
    fn id(&self) -> String {
        format!("{}/{}/{}", self.schema, self.oui, self.product_class)
    }

    fn data_model(&self) -> Arc<dyn DataModel> {
        self.data_model.clone()
    }
}

#[derive(Clone, Debug)]
pub struct TransferLogEntry {
    pub bucket: String,
    pub key: String,
    pub file_type: String,
    pub file_name: String,
    pub start_time: OffsetDateTime,
    pub complete_time: Option<OffsetDateTime>,
    pub fault_code: i32,
    pub fault_string: String,
}

#[derive(Clone, Debug)]
pub struct DeviceEvent {
    pub event_type: String,
    pub at: OffsetDateTime,
    pub metadata: Values,
}

#[derive(Default)]
struct DeviceState {
    parameters: BTreeMap<String, String>,
    writables: BTreeMap<String, bool>,
    notifications: BTreeMap<String, i32>,
    methods: Vec<String>,
    online: bool,
    queue: VecDeque<MethodCall>,
    history: Vec<MethodCall>,
    transfers: BTreeMap<i64, TransferLogEntry>,
    events: Vec<DeviceEvent>,
}

pub struct MemoryDevice {
    oui: String,
    product_class: String,
    serial_number: String,
    product: Arc<MemoryProduct>,
    state: Mutex<DeviceState>,
}

impl MemoryDevice {
    pub fn events(&self) -> Vec<DeviceEvent> {
        lock(&self.state).events.clone()
    }

    pub fn transfer_log(&self, ts: i64) -> Option<TransferLogEntry> {
        lock(&self.state).transfers.get(&ts).cloned()
    }

    pub fn transfer_logs(&self) -> Vec<(i64, TransferLogEntry)> {
        lock(&self.state)
            .transfers
            .iter()
            .map(|(ts, entry)| (*ts, entry.clone()))
            .collect()
    }

    pub fn supported_methods(&self) -> Vec<String> {
        lock(&self.state).methods.clone()
    }

    pub fn call_history(&self) -> Vec<MethodCall> {
        lock(&self.state).history.clone()
    }

    pub fn queued_calls(&self) -> Vec<MethodCall> {
        lock(&self.state).queue.iter().cloned().collect()
    }
}

#[async_trait]
impl Device for MemoryDevice {
    fn oui(&self) -> String {
        self.oui.clone()
    }

    fn product_class(&self) -> String {
        self.product_class.clone()
    }

    fn serial_number(&self) -> String {
        self.serial_number.clone()
    }

    fn product(&self) -> Option<Arc<dyn Product>> {
        Some(self.product.clone())
    }

    fn online_status(&self) -> bool {
        lock(&self.state).online
    }

    async fn handle_alive(&self, at: OffsetDateTime, last_online_status: bool) {
        let mut state = lock(&self.state);
        state.online = true;
        if !last_online_status {
            state.events.push(DeviceEvent {
                event_type: "online".to_owned(),
                at,
                metadata: Values::new(),
            });
        }
    }

    async fn update_methods(&self, methods: &[String]) -> Result<(), Error> {
        lock(&self.state).methods = methods.to_vec();
        Ok(())
    }

    fn is_method_supported(&self, method: &str) -> bool {
        lock(&self.state).methods.iter().any(|m| m == method)
    }

    fn get_method_call(&self, command_key: &str) -> Option<MethodCall> {
        let state = lock(&self.state);
        state
            .queue
            .iter()
            .chain(state.history.iter())
            .find(|call| call.command_key == command_key)
            .cloned()
    }

    fn next_method_call(&self) -> Option<MethodCall> {
        let state = lock(&self.state);
        if state.queue.iter().any(|call| call.state == CallState::Sent) {
            return None;
        }
        state
            .queue
            .iter()
            .find(|call| call.state == CallState::Queued)
            .cloned()
    }

    async fn push_method_call(
        &self,
        at: OffsetDateTime,
        method_name: &str,
        values: Option<Values>,
    ) -> Result<MethodCall, Error> {
        let mut state = lock(&self.state);

        // Nanosecond keys collide when two calls land in one tick; bump
        // until unique among known calls.
        let mut key = at.unix_timestamp_nanos() as i64;
        let taken = |state: &DeviceState, key: i64| {
            let key = key.to_string();
            state
                .queue
                .iter()
                .chain(state.history.iter())
                .any(|call| call.command_key == key)
        };
        while taken(&state, key) {
            key += 1;
        }

        let call = MethodCall {
            command_key: key.to_string(),
            method_name: method_name.to_owned(),
            request_values: values.unwrap_or_default(),
            state: CallState::Queued,
            response_values: None,
            fault_code: 0,
            fault_string: String::new(),
        };
        state.queue.push_back(call.clone());
        Ok(call)
    }

    async fn update_method_call_request_sent(&self, command_key: &str) {
        let mut state = lock(&self.state);
        if let Some(call) = state
            .queue
            .iter_mut()
            .find(|call| call.command_key == command_key)
        {
            call.state = CallState::Sent;
        }
    }

    async fn update_method_call_response(
        &self,
        request_id: &str,
        values: Option<Values>,
        fault_code: i32,
        fault_string: &str,
    ) {
        let mut state = lock(&self.state);
        let Some(position) = state
            .queue
            .iter()
            .position(|call| call.command_key == request_id && call.state == CallState::Sent)
        else {
            debug!(request_id, "response without a matching sent call");
            return;
        };

        let Some(mut call) = state.queue.remove(position) else {
            return;
        };
        call.response_values = values;
        call.fault_code = fault_code;
        call.fault_string = fault_string.to_owned();
        call.state = if fault_code != 0 || !fault_string.is_empty() {
            CallState::Fault
        } else {
            CallState::Responded
        };
        state.history.push(call);
    }

    async fn update_method_call_unknown(&self, command_key: &str) {
        let mut state = lock(&self.state);
        if let Some(position) = state
            .queue
            .iter()
            .position(|call| call.command_key == command_key)
        {
            if let Some(mut call) = state.queue.remove(position) {
                call.state = CallState::Unknown;
                state.history.push(call);
            }
        }
    }

    async fn update_transfer_log_complete(
        &self,
        ts: i64,
        start_time: OffsetDateTime,
        complete_time: OffsetDateTime,
    ) -> Result<(), Error> {
        let mut state = lock(&self.state);
        let entry = state.transfers.entry(ts).or_insert_with(|| TransferLogEntry {
            bucket: String::new(),
            key: String::new(),
            file_type: String::new(),
            file_name: String::new(),
            start_time,
            complete_time: None,
            fault_code: 0,
            fault_string: String::new(),
        });
        entry.start_time = start_time;
        entry.complete_time = Some(complete_time);
        entry.fault_code = 0;
        entry.fault_string = String::new();
        Ok(())
    }

    async fn update_transfer_log_fault(
        &self,
        ts: i64,
        start_time: OffsetDateTime,
        complete_time: OffsetDateTime,
        fault_code: i32,
        fault_string: &str,
    ) -> Result<(), Error> {
        let mut state = lock(&self.state);
        let entry = state.transfers.entry(ts).or_insert_with(|| TransferLogEntry {
            bucket: String::new(),
            key: String::new(),
            file_type: String::new(),
            file_name: String::new(),
            start_time,
            complete_time: None,
            fault_code: 0,
            fault_string: String::new(),
        });
        entry.start_time = start_time;
        entry.complete_time = Some(complete_time);
        entry.fault_code = fault_code;
        entry.fault_string = fault_string.to_owned();
        Ok(())
    }

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
    ) -> Result<(), Error> {
        let mut state = lock(&self.state);
        state.transfers.insert(
            ts,
            TransferLogEntry {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                file_type: file_type.to_owned(),
                file_name: file_name.to_owned(),
                start_time,
                complete_time: Some(complete_time),
                fault_code,
                fault_string: fault_string.to_owned(),
            },
        );
        Ok(())
    }

    fn parameter_names(&self, path: &str, next_level: bool) -> Vec<String> {
        let state = lock(&self.state);
        state
            .parameters
            .keys()
            .filter(|name| name.starts_with(path))
            .filter(|name| {
                if !next_level {
                    return true;
                }
                // Immediate children only: no further dots past the prefix
                // (a trailing dot marks an object).
                let remainder = &name[path.len()..];
                !remainder.trim_end_matches('.').contains('.')
            })
            .cloned()
            .collect()
    }

    fn parameter_value(&self, name: &str) -> Option<String> {
        lock(&self.state).parameters.get(name).cloned()
    }

    async fn update_parameter_values(&self, values: &Values) -> Result<(), Error> {
        let mut state = lock(&self.state);
        for (name, value) in values {
            state.parameters.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    async fn update_parameter_writables(
        &self,
        values: &BTreeMap<String, bool>,
    ) -> Result<(), Error> {
        let mut state = lock(&self.state);
        for (name, writable) in values {
            state.writables.insert(name.clone(), *writable);
        }
        Ok(())
    }

    async fn update_parameter_notifications(
        &self,
        values: &BTreeMap<String, i32>,
    ) -> Result<(), Error> {
        let mut state = lock(&self.state);
        for (name, notification) in values {
            state.notifications.insert(name.clone(), *notification);
        }
        Ok(())
    }

    async fn insert_event(
        &self,
        event_type: &str,
        at: OffsetDateTime,
        metadata: Values,
    ) -> Result<(), Error> {
        lock(&self.state).events.push(DeviceEvent {
            event_type: event_type.to_owned(),
            at,
            metadata,
        });
        Ok(())
    }
}

/// Product and device registry backed by plain maps.
#[derive(Default)]
pub struct MemoryStore {
    products: RwLock<HashMap<(String, String, String), Arc<MemoryProduct>>>,
    devices: RwLock<Vec<Arc<MemoryDevice>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a product; devices can only be created under a known
    /// product.
    pub fn add_product(&self, schema: &str, oui: &str, product_class: &str) -> Arc<MemoryProduct> {
        let product = Arc::new(MemoryProduct {
            schema: schema.to_owned(),
            oui: oui.to_owned(),
            product_class: product_class.to_owned(),
            data_model: Arc::new(MemoryDataModel::default()),
        });
        let mut products = self.products.write().unwrap_or_else(|p| p.into_inner());
        products.insert(
            (schema.to_owned(), oui.to_owned(), product_class.to_owned()),
            product.clone(),
        );
        product
    }

    pub fn memory_device(
        &self,
        oui: &str,
        product_class: &str,
        serial_number: &str,
    ) -> Option<Arc<MemoryDevice>> {
        let devices = self.devices.read().unwrap_or_else(|p| p.into_inner());
        devices
            .iter()
            .find(|device| {
                device.oui == oui
                    && device.serial_number == serial_number
                    && (product_class.is_empty() || device.product_class == product_class)
            })
            .cloned()
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn get_product(
        &self,
        schema: &str,
        oui: &str,
        product_class: &str,
    ) -> Option<Arc<dyn Product>> {
        let products = self.products.read().unwrap_or_else(|p| p.into_inner());
        products
            .get(&(schema.to_owned(), oui.to_owned(), product_class.to_owned()))
            .cloned()
            .map(|product| product as Arc<dyn Product>)
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn get_device(
        &self,
        _schema: &str,
        oui: &str,
        product_class: &str,
        serial_number: &str,
    ) -> Option<Arc<dyn Device>> {
        self.memory_device(oui, product_class, serial_number)
            .map(|device| device as Arc<dyn Device>)
    }

    async fn create_device_with_inform(
        &self,
        schema: &str,
        oui: &str,
        product_class: &str,
        serial_number: &str,
        inform: &Inform,
    ) -> Result<Arc<dyn Device>, Error> {
        let product = {
            let products = self.products.read().unwrap_or_else(|p| p.into_inner());
            products
                .get(&(schema.to_owned(), oui.to_owned(), product_class.to_owned()))
                .cloned()
        }
        .ok_or_else(|| Error::UnknownProduct {
            oui: oui.to_owned(),
            product_class: product_class.to_owned(),
        })?;

        let mut parameters = BTreeMap::new();
        for parameter in &inform.parameter_list {
            parameters.insert(parameter.name.clone(), parameter.value.clone());
        }

        let device = Arc::new(MemoryDevice {
            oui: oui.to_owned(),
            product_class: product_class.to_owned(),
            serial_number: serial_number.to_owned(),
            product,
            state: Mutex::new(DeviceState {
                parameters,
                ..Default::default()
            }),
        });

        let mut devices = self.devices.write().unwrap_or_else(|p| p.into_inner());
        devices.push(device.clone());
        Ok(device)
    }
}

/// Object store that keeps uploads in memory.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<Vec<(StoredObject, Bytes)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn objects(&self) -> Vec<StoredObject> {
        lock(&self.objects)
            .iter()
            .map(|(object, _)| object.clone())
            .collect()
    }

    pub fn object_data(&self, key: &str) -> Option<Bytes> {
        lock(&self.objects)
            .iter()
            .find(|(object, _)| object.key == key)
            .map(|(_, data)| data.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        _schema: &str,
        bucket: &str,
        key: &str,
        filename: &str,
        data: Bytes,
    ) -> Result<StoredObject, Error> {
        let object = StoredObject {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            filename: filename.to_owned(),
            size: data.len(),
        };
        lock(&self.objects).push((object.clone(), data));
        Ok(object)
    }
}

/// Performance handler that only logs; the binary uses it when no KPI
/// pipeline is attached.
#[derive(Default)]
pub struct LoggingPerformanceHandler {}

#[async_trait]
impl PerformanceHandler for LoggingPerformanceHandler {
    async fn handle_measure_values(
        &self,
        device: Arc<dyn Device>,
        filename: &str,
        values: HashMap<String, f64>,
    ) {
        debug!(
            serial_number = device.serial_number(),
            filename,
            values = values.len(),
            "measurement values"
        );
    }
}
