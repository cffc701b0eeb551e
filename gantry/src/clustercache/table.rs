//! The table-print client.
//!
//! List, watch and get requests are sent with the `as=Table` Accept
//! variant so responses carry the server-side printer cells. Rows are
//! converted back into ordinary objects with the cells attached under
//! `metadata.fields`, which is the representation the rest of the
//! pipeline (and the column transforms) operate on.

use crate::error::{Error, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use gantry_core::{Column, Schema};
use http::header::{HeaderValue, ACCEPT};
use kube::api::{GetParams, ListParams, WatchEvent, WatchParams};
use kube::core::Request;
use kube::Client;
use serde::Deserialize;
use serde_json::Value;

const TABLE_ACCEPT: &str = "application/json;as=Table;v=v1;g=meta.k8s.io,application/json";
const INCLUDE_OBJECT: &str = "includeObject=Object";

/// A `meta.k8s.io/v1` Table response.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    #[serde(default)]
    pub metadata: TableMeta,
    #[serde(default)]
    pub column_definitions: Vec<TableColumnDefinition>,
    #[serde(default)]
    pub rows: Vec<TableRow>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMeta {
    #[serde(default)]
    pub resource_version: Option<String>,
    #[serde(default, rename = "continue")]
    pub continue_token: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableColumnDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub cells: Vec<Value>,
    #[serde(default)]
    pub object: Value,
}

/// A fully converted list response.
pub struct TableList {
    pub objects: Vec<Value>,
    pub resource_version: String,
    pub columns: Vec<Column>,
}

/// Client issuing table-representation requests for arbitrary schemas.
#[derive(Clone)]
pub struct TableClient {
    client: Client,
}

impl TableClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        TableClient { client }
    }

    /// List the schema's objects across all namespaces.
    pub async fn list(&self, schema: &Schema, limit: Option<u32>) -> Result<TableList> {
        let mut lp = ListParams::default();
        lp.limit = limit;
        let req = Request::new(collection_path(schema, None)).list(&lp)?;
        let table: Table = self.client.request(as_table(req)?).await?;
        Ok(TableList {
            resource_version: table.metadata.resource_version.clone().unwrap_or_default(),
            columns: columns_from(&table.column_definitions),
            objects: rows_to_objects(table),
        })
    }

    /// Open a watch for the schema at the given resource version.
    pub async fn watch(
        &self,
        schema: &Schema,
        resource_version: &str,
    ) -> Result<BoxStream<'static, kube::Result<WatchEvent<Table>>>> {
        let wp = WatchParams::default();
        let req = Request::new(collection_path(schema, None)).watch(&wp, resource_version)?;
        let stream = self.client.request_events::<Table>(as_table(req)?).await?;
        Ok(stream.boxed())
    }

    /// Get one object, table-converted like every other response.
    ///
    /// # Errors
    ///
    /// `NotFound` when the server returns an empty table.
    pub async fn get(&self, schema: &Schema, namespace: Option<&str>, name: &str) -> Result<Value> {
        let req = Request::new(collection_path(schema, namespace)).get(name, &GetParams::default())?;
        let table: Table = self.client.request(as_table(req)?).await?;
        rows_to_objects(table).into_iter().next().ok_or_else(|| {
            Error::Core(gantry_core::Error::NotFound(format!("{}/{name}", schema.id)))
        })
    }
}

/// The collection URL for a schema, optionally scoped to one namespace.
pub(crate) fn collection_path(schema: &Schema, namespace: Option<&str>) -> String {
    let prefix = if schema.group.is_empty() {
        format!("/api/{}", schema.version)
    } else {
        format!("/apis/{}/{}", schema.group, schema.version)
    };
    match namespace {
        Some(ns) if schema.namespaced => {
            format!("{prefix}/namespaces/{ns}/{}", schema.resource)
        }
        _ => format!("{prefix}/{}", schema.resource),
    }
}

/// Swap the Accept header for the table variant and ask the server to
/// include full objects in each row.
fn as_table(req: http::Request<Vec<u8>>) -> Result<http::Request<Vec<u8>>> {
    let (mut parts, body) = req.into_parts();
    let uri = parts.uri.to_string();
    let uri = if uri.ends_with('?') {
        format!("{uri}{INCLUDE_OBJECT}")
    } else if uri.contains('?') {
        format!("{uri}&{INCLUDE_OBJECT}")
    } else {
        format!("{uri}?{INCLUDE_OBJECT}")
    };
    parts.uri = uri.parse()?;
    parts
        .headers
        .insert(ACCEPT, HeaderValue::from_static(TABLE_ACCEPT));
    Ok(http::Request::from_parts(parts, body))
}

/// Convert each row into its object with the printer cells attached under
/// `metadata.fields`. Rows without an embedded object are dropped.
pub(crate) fn rows_to_objects(table: Table) -> Vec<Value> {
    table
        .rows
        .into_iter()
        .filter_map(|row| {
            let mut obj = row.object;
            obj.as_object()?;
            crate::dynamic::metadata_mut(&mut obj)?
                .insert("fields".to_string(), Value::Array(row.cells));
            Some(obj)
        })
        .collect()
}

/// Normalize column definitions into schema columns addressing their cell.
pub(crate) fn columns_from(definitions: &[TableColumnDefinition]) -> Vec<Column> {
    definitions
        .iter()
        .enumerate()
        .map(|(i, d)| Column {
            name: d.name.clone(),
            field: format!("$.metadata.fields[{i}]"),
            type_: d.type_.clone(),
            format: d.format.clone(),
            description: d.description.clone(),
        })
        .collect()
}
