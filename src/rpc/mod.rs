//! JSON surface of the orchestrator.
//!
//! [`dispatch`] is the one entry point both the HTTP server and the in-process
//! loopback network call, so every transport shares parsing, authorization and
//! status mapping. Grantee lists are parsed in full before anything is written.

use crate::error::{PearError, PearResult};
use crate::grantee::{Did, Grantee, RecordUri};
use crate::inbox::Notification;
use crate::network::XrpcVerb;
use crate::pear::{NewRecord, Pear};
use crate::repo::BlobRef;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

/// Every method a node serves under `/xrpc/{method}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrpcMethod {
    PutRecord,
    GetRecord,
    ListRecords,
    AddPermissions,
    RemovePermissions,
    HasPermission,
    ListPermissionGrants,
    ListPermissionsByLexicon,
    NotifyOfUpdate,
    GetCliqueItems,
    ListIdentities,
    UploadBlob,
    GetBlob,
}

impl XrpcMethod {
    pub const ALL: [XrpcMethod; 13] = [
        XrpcMethod::PutRecord,
        XrpcMethod::GetRecord,
        XrpcMethod::ListRecords,
        XrpcMethod::AddPermissions,
        XrpcMethod::RemovePermissions,
        XrpcMethod::HasPermission,
        XrpcMethod::ListPermissionGrants,
        XrpcMethod::ListPermissionsByLexicon,
        XrpcMethod::NotifyOfUpdate,
        XrpcMethod::GetCliqueItems,
        XrpcMethod::ListIdentities,
        XrpcMethod::UploadBlob,
        XrpcMethod::GetBlob,
    ];

    pub fn name(self) -> &'static str {
        match self {
            XrpcMethod::PutRecord => "pear.putRecord",
            XrpcMethod::GetRecord => "pear.getRecord",
            XrpcMethod::ListRecords => "pear.listRecords",
            XrpcMethod::AddPermissions => "pear.addPermissions",
            XrpcMethod::RemovePermissions => "pear.removePermissions",
            XrpcMethod::HasPermission => "pear.hasPermission",
            XrpcMethod::ListPermissionGrants => "pear.listPermissionGrants",
            XrpcMethod::ListPermissionsByLexicon => "pear.listPermissionsByLexicon",
            XrpcMethod::NotifyOfUpdate => "pear.notifyOfUpdate",
            XrpcMethod::GetCliqueItems => "pear.getCliqueItems",
            XrpcMethod::ListIdentities => "pear.listIdentities",
            XrpcMethod::UploadBlob => "pear.uploadBlob",
            XrpcMethod::GetBlob => "pear.getBlob",
        }
    }

    pub fn parse(name: &str) -> PearResult<Self> {
        Self::ALL
            .into_iter()
            .find(|method| method.name() == name)
            .ok_or_else(|| PearError::InvalidInput(format!("unknown method '{}'", name)))
    }

    pub fn verb(self) -> XrpcVerb {
        match self {
            XrpcMethod::PutRecord
            | XrpcMethod::AddPermissions
            | XrpcMethod::RemovePermissions
            | XrpcMethod::NotifyOfUpdate
            | XrpcMethod::UploadBlob => XrpcVerb::Procedure,
            _ => XrpcVerb::Query,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutRecordInput {
    /// Defaults to the caller
    #[serde(default)]
    pub owner: Option<Did>,
    pub collection: String,
    #[serde(default)]
    pub record_key: Option<String>,
    pub record: Value,
    #[serde(default)]
    pub validate: bool,
    #[serde(default)]
    pub grantees: Vec<String>,
    #[serde(default)]
    pub blobs: Vec<BlobRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRecordParams {
    pub owner: Did,
    pub collection: String,
    pub record_key: String,
}

/// Owner filter: a JSON array, or a comma-joined query-string value.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OwnerList {
    List(Vec<String>),
    Joined(String),
}

impl OwnerList {
    fn parse(&self) -> PearResult<Vec<Did>> {
        match self {
            OwnerList::List(items) => items.iter().map(|item| Did::parse(item)).collect(),
            OwnerList::Joined(joined) => joined
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(Did::parse)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRecordsParams {
    pub collection: String,
    #[serde(default)]
    pub owners: Option<OwnerList>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsInput {
    pub grantees: Vec<String>,
    /// Defaults to the caller
    #[serde(default)]
    pub owner: Option<Did>,
    pub collection: String,
    #[serde(default)]
    pub record_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HasPermissionParams {
    pub requester: Did,
    pub owner: Did,
    pub collection: String,
    #[serde(default)]
    pub record_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPermissionGrantsParams {
    #[serde(default)]
    pub granter: Option<Did>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCliqueItemsParams {
    pub clique: RecordUri,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlobParams {
    pub owner: Did,
    pub cid: String,
}

fn parse_params<T: DeserializeOwned>(method: XrpcMethod, params: Value) -> PearResult<T> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| {
        PearError::InvalidInput(format!("bad parameters for {}: {}", method.name(), e))
    })
}

/// Optional record key: absent and empty both mean "whole collection".
fn optional_key(record_key: &Option<String>) -> Option<&str> {
    record_key.as_deref().filter(|key| !key.is_empty())
}

/// Error body sent with every non-2xx answer.
pub fn error_body(error: &PearError) -> Value {
    json!({ "error": error.kind(), "message": error.to_string() })
}

/// Runs `method` for the authenticated `caller` and returns the JSON body.
pub async fn dispatch(pear: &Pear, caller: &Did, method: &str, params: Value) -> PearResult<Value> {
    let method = XrpcMethod::parse(method)?;
    match method {
        XrpcMethod::PutRecord => {
            let input: PutRecordInput = parse_params(method, params)?;
            let grantees = Grantee::parse_all(&input.grantees)?;
            let owner = input.owner.unwrap_or_else(|| caller.clone());
            let mut record = NewRecord::new(&input.collection, input.record).with_blobs(input.blobs);
            record.record_key = input.record_key.filter(|key| !key.is_empty());
            let stored = pear
                .put_record(caller, &owner, record, input.validate, &grantees)
                .await?;
            Ok(json!({ "uri": stored.uri, "record": stored }))
        }
        XrpcMethod::GetRecord => {
            let params: GetRecordParams = parse_params(method, params)?;
            let record = pear
                .get_record(caller, &params.owner, &params.collection, &params.record_key)
                .await?;
            Ok(json!({ "uri": record.uri, "record": record }))
        }
        XrpcMethod::ListRecords => {
            let params: ListRecordsParams = parse_params(method, params)?;
            let owners = params.owners.as_ref().map(OwnerList::parse).transpose()?;
            let records = pear
                .list_records(caller, &params.collection, owners.as_deref())
                .await?;
            Ok(json!({ "records": records }))
        }
        XrpcMethod::AddPermissions => {
            let input: PermissionsInput = parse_params(method, params)?;
            let grantees = Grantee::parse_all(&input.grantees)?;
            let owner = input.owner.clone().unwrap_or_else(|| caller.clone());
            let granted = pear
                .add_permissions(
                    caller,
                    &grantees,
                    &owner,
                    &input.collection,
                    optional_key(&input.record_key),
                )
                .await?;
            Ok(json!({ "permissions": granted }))
        }
        XrpcMethod::RemovePermissions => {
            let input: PermissionsInput = parse_params(method, params)?;
            let grantees = Grantee::parse_all(&input.grantees)?;
            let owner = input.owner.clone().unwrap_or_else(|| caller.clone());
            pear.remove_permissions(
                caller,
                &grantees,
                &owner,
                &input.collection,
                optional_key(&input.record_key),
            )?;
            Ok(json!({}))
        }
        XrpcMethod::HasPermission => {
            let params: HasPermissionParams = parse_params(method, params)?;
            let allowed = pear
                .has_permission(
                    caller,
                    &params.requester,
                    &params.owner,
                    &params.collection,
                    &params.record_key,
                )
                .await?;
            Ok(json!({ "hasPermission": allowed }))
        }
        XrpcMethod::ListPermissionGrants => {
            let params: ListPermissionGrantsParams = parse_params(method, params)?;
            let granter = params.granter.unwrap_or_else(|| caller.clone());
            let grants = pear.list_permission_grants(caller, &granter)?;
            Ok(json!({ "permissions": grants }))
        }
        XrpcMethod::ListPermissionsByLexicon => {
            let permissions = pear.list_permissions_by_lexicon(caller)?;
            Ok(json!({ "permissions": permissions }))
        }
        XrpcMethod::NotifyOfUpdate => {
            let notification: Notification = parse_params(method, params)?;
            pear.notify_of_update(caller, notification).await?;
            Ok(json!({}))
        }
        XrpcMethod::GetCliqueItems => {
            let params: GetCliqueItemsParams = parse_params(method, params)?;
            let items = pear.get_clique_items(caller, &params.clique)?;
            Ok(json!({ "items": items }))
        }
        XrpcMethod::ListIdentities => {
            let identities = pear.list_identities()?;
            Ok(json!({ "identities": identities }))
        }
        XrpcMethod::UploadBlob | XrpcMethod::GetBlob => Err(PearError::InvalidInput(format!(
            "{} carries raw bytes and is only served over HTTP",
            method.name()
        ))),
    }
}
