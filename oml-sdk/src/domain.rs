//! Domain contexts.
//!
//! A domain context binds measurement points to the channels of one
//! collection domain. It assigns schema indices in first-use order, numbers
//! rows per schema, and stamps them with the time since the domain started.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

use oml_types::{escape_string, MeasurementPoint, Value, METADATA_SCHEMA_INDEX};
use parking_lot::Mutex;
use tracing::debug;

use crate::channel::{Channel, Message, ProtocolHeader, DEFAULT_CHANNEL};
use crate::error::{Error, Result};
use crate::registry::MeasurementPointHandle;

/// Subject of experiment-wide metadata.
pub const ROOT_SUBJECT: &str = ".";

#[derive(Debug)]
struct PointContext {
    index: u32,
    seq_no: u64,
    routes: Vec<Arc<Channel>>,
}

#[derive(Debug, Default)]
struct SchemaTable {
    points: HashMap<u64, PointContext>,
    last_index: u32,
    meta_seq_no: u64,
}

/// Per-domain injection state and channels.
#[derive(Debug)]
pub struct DomainContext {
    header: ProtocolHeader,
    channels: BTreeMap<String, Arc<Channel>>,
    table: Mutex<SchemaTable>,
}

impl DomainContext {
    /// Create a context over already opened channels.
    ///
    /// An empty channel map gives a context that accepts and validates
    /// injections but sends nothing.
    pub fn new(header: ProtocolHeader, channels: BTreeMap<String, Arc<Channel>>) -> Self {
        Self {
            header,
            channels,
            table: Mutex::new(SchemaTable::default()),
        }
    }

    /// Domain name.
    pub fn domain(&self) -> &str {
        &self.header.domain
    }

    /// Start of the domain; row timestamps are relative to it.
    pub fn start_time(&self) -> SystemTime {
        self.header.start_time
    }

    /// Names of the bound channels.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Look up a bound channel.
    pub fn channel(&self, name: &str) -> Option<&Arc<Channel>> {
        self.channels.get(name)
    }

    /// Schema index of a point, assigning one and announcing the schema on
    /// first use.
    pub fn schema_index(&self, mp: &MeasurementPointHandle) -> Result<u32> {
        let point = mp.freeze();
        let mut table = self.table.lock();
        Ok(self.point_context(&mut table, mp.id(), &point)?.index)
    }

    /// Send one measurement tuple.
    ///
    /// Validation happens before anything is queued, so a rejected tuple
    /// leaves no trace on the wire (apart from freezing the point).
    pub fn inject(&self, mp: &MeasurementPointHandle, values: &[Value]) -> Result<()> {
        let point = mp.freeze();
        let tokens = point.validate_and_serialize(values)?;

        // sequence assignment and enqueue happen under one lock so rows
        // reach the queue in sequence order
        let mut table = self.table.lock();
        let ctx = self.point_context(&mut table, mp.id(), &point)?;
        ctx.seq_no += 1;

        let mut row = Vec::with_capacity(tokens.len() + 3);
        row.push(self.timestamp());
        row.push(ctx.index.to_string());
        row.push(ctx.seq_no.to_string());
        row.extend(tokens);
        send(&ctx.routes, Message::Data(row.join("\t")));
        Ok(())
    }

    /// Attach a key/value annotation to a measurement point, or to one of
    /// its fields when `qualifier` is given.
    pub fn inject_metadata(
        &self,
        mp: &MeasurementPointHandle,
        key: &str,
        value: &str,
        qualifier: Option<&str>,
    ) -> Result<()> {
        let point = mp.freeze();
        let mut subject = format!(".{}", point.table_name(&self.header.app_name));
        if let Some(qualifier) = qualifier {
            subject.push('.');
            subject.push_str(qualifier);
        }

        let mut table = self.table.lock();
        let routes = self.point_context(&mut table, mp.id(), &point)?.routes.clone();
        let row = self.metadata_row(&mut table, &subject, key, value);
        send(&routes, Message::Data(row));
        Ok(())
    }

    /// Attach a key/value annotation to the whole domain. Sent on every channel.
    pub fn inject_experiment_metadata(&self, key: &str, value: &str) {
        let mut table = self.table.lock();
        let row = self.metadata_row(&mut table, ROOT_SUBJECT, key, value);
        for channel in self.channels.values() {
            channel.push(Message::Data(row.clone()));
        }
    }

    /// Drain and close every channel, then forget all schema state.
    pub fn close(&self) {
        for channel in self.channels.values() {
            channel.close();
        }
        *self.table.lock() = SchemaTable::default();
    }

    fn point_context<'t>(
        &self,
        table: &'t mut SchemaTable,
        id: u64,
        point: &MeasurementPoint,
    ) -> Result<&'t mut PointContext> {
        let SchemaTable {
            points,
            last_index,
            meta_seq_no,
        } = table;

        match points.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let routes = self.routes_for(point)?;
                *last_index += 1;
                *meta_seq_no += 1;
                let index = *last_index;

                let description = point.schema_description(index, &self.header.app_name);
                debug!(domain = %self.header.domain, schema = %description, "announcing schema");
                let row = [
                    self.timestamp(),
                    METADATA_SCHEMA_INDEX.to_string(),
                    meta_seq_no.to_string(),
                    ROOT_SUBJECT.to_string(),
                    "schema".to_string(),
                    description,
                ]
                .join("\t");
                send(&routes, Message::Schema(row));

                Ok(entry.insert(PointContext {
                    index,
                    seq_no: 0,
                    routes,
                }))
            }
        }
    }

    fn routes_for(&self, point: &MeasurementPoint) -> Result<Vec<Arc<Channel>>> {
        if self.channels.is_empty() {
            return Ok(Vec::new());
        }
        if point.channels.is_empty() {
            // the default channel may have been disabled
            let channel = self
                .channels
                .get(DEFAULT_CHANNEL)
                .ok_or_else(|| Error::UnknownChannel(DEFAULT_CHANNEL.to_string()))?;
            return Ok(vec![channel.clone()]);
        }
        let mut routes: Vec<Arc<Channel>> = Vec::with_capacity(point.channels.len());
        for name in &point.channels {
            let channel = self
                .channels
                .get(name)
                .ok_or_else(|| Error::UnknownChannel(name.clone()))?;
            if !routes.iter().any(|c| Arc::ptr_eq(c, channel)) {
                routes.push(channel.clone());
            }
        }
        Ok(routes)
    }

    fn metadata_row(&self, table: &mut SchemaTable, subject: &str, key: &str, value: &str) -> String {
        table.meta_seq_no += 1;
        [
            self.timestamp(),
            METADATA_SCHEMA_INDEX.to_string(),
            table.meta_seq_no.to_string(),
            escape_string(subject),
            escape_string(key),
            escape_string(value),
        ]
        .join("\t")
    }

    fn timestamp(&self) -> String {
        let elapsed = SystemTime::now()
            .duration_since(self.header.start_time)
            .unwrap_or_default();
        format!("{:.6}", elapsed.as_secs_f64())
    }
}

fn send(routes: &[Arc<Channel>], message: Message) {
    if let Some((last, rest)) = routes.split_last() {
        for channel in rest {
            channel.push(message.clone());
        }
        last.push(message);
    }
}
