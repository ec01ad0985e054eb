//! Wire messages: newline-terminated JSON objects tagged by `type`.
//!
//! Two protocols share the framing. Clients talk to the coordinator with
//! [`ClientRequest`] / [`ClientReply`]; the coordinator talks to workers with
//! [`WorkerRequest`] / [`WorkerReply`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Amount;
use crate::model::{AccountId, ClientId, EffectKind, LedgerRecord, Operation, TxId};

/// Closed error taxonomy carried in the `code` field of error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unreachable,
    Protocol,
}

/// Outcome of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    Ready,
    Committed,
    Aborted,
    Error,
}

/// A message type that can be decoded from one wire line.
pub trait Message: DeserializeOwned {
    /// Every `type` tag (aliases included) this message accepts.
    const TYPES: &'static [&'static str];
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(serde_json::Error),

    #[error("message has no string `type` field")]
    MissingType,

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("invalid {tag} request: {source}")]
    Fields {
        tag: String,
        source: serde_json::Error,
    },
}

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecodeError::Fields { .. } => ErrorKind::Validation,
            _ => ErrorKind::Protocol,
        }
    }
}

/// Decodes one line into a typed message, telling framing problems
/// (`PROTOCOL`) apart from bad fields of a known message (`VALIDATION`).
pub fn decode<M: Message>(line: &str) -> Result<M, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(DecodeError::Json)?;
    let tag = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(DecodeError::MissingType)?
        .to_string();
    if !M::TYPES.contains(&tag.as_str()) {
        return Err(DecodeError::UnknownType(tag));
    }
    serde_json::from_value(value).map_err(|source| DecodeError::Fields { tag, source })
}

/// Encodes a message as one line, without the trailing newline.
pub fn encode<T: Serialize>(message: &T) -> String {
    // Serializing these plain structs cannot fail; fall back to a generic
    // protocol error line rather than panicking.
    serde_json::to_string(message).unwrap_or_else(|e| {
        format!(r#"{{"status":"ERROR","code":"PROTOCOL","error":"encode failed: {e}"}}"#)
    })
}

/// Error line understood by clients of both protocols, for input that never
/// reached a decoder.
pub fn error_line(kind: ErrorKind, message: impl Into<String>) -> String {
    encode(&ClientReply::error(kind, message))
}

// Coordinator -> worker

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerRequest {
    #[serde(rename = "PREPARE_TRANSFER", alias = "TRANSFER_PREPARE")]
    PrepareTransfer {
        tx_id: TxId,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
    #[serde(rename = "PREPARE_CREATE", alias = "CREATE_PREPARE")]
    PrepareCreate {
        tx_id: TxId,
        account: AccountId,
        initial: Amount,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id_cliente: Option<ClientId>,
        fecha_apertura: NaiveDate,
    },
    #[serde(rename = "PREPARE_DELETE", alias = "DELETE_PREPARE")]
    PrepareDelete { tx_id: TxId, account: AccountId },
    #[serde(rename = "COMMIT")]
    Commit { tx_id: TxId },
    #[serde(rename = "ABORT")]
    Abort { tx_id: TxId },
    #[serde(rename = "CONSULTAR_CUENTA")]
    Query { account: AccountId },
    #[serde(rename = "SUM_PARTITION")]
    SumPartition,
}

impl Message for WorkerRequest {
    const TYPES: &'static [&'static str] = &[
        "PREPARE_TRANSFER",
        "TRANSFER_PREPARE",
        "PREPARE_CREATE",
        "CREATE_PREPARE",
        "PREPARE_DELETE",
        "DELETE_PREPARE",
        "COMMIT",
        "ABORT",
        "CONSULTAR_CUENTA",
        "SUM_PARTITION",
    ];
}

impl WorkerRequest {
    /// PREPARE message carrying `operation` under `tx_id`.
    pub fn prepare(tx_id: &TxId, operation: &Operation) -> Self {
        let tx_id = tx_id.clone();
        match *operation {
            Operation::Transfer { from, to, amount } => WorkerRequest::PrepareTransfer {
                tx_id,
                from,
                to,
                amount,
            },
            Operation::Create {
                account,
                initial,
                owner,
                opened_on,
            } => WorkerRequest::PrepareCreate {
                tx_id,
                account,
                initial,
                id_cliente: owner,
                fecha_apertura: opened_on,
            },
            Operation::Delete { account } => WorkerRequest::PrepareDelete { tx_id, account },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<TxId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_cliente: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fecha_apertura: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerReply {
    fn status(status: Status) -> Self {
        Self {
            status,
            tx_id: None,
            account: None,
            balance: None,
            id_cliente: None,
            fecha_apertura: None,
            sum: None,
            code: None,
            error: None,
        }
    }

    pub fn ready(tx_id: TxId) -> Self {
        Self {
            tx_id: Some(tx_id),
            ..Self::status(Status::Ready)
        }
    }

    pub fn committed(tx_id: TxId) -> Self {
        Self {
            tx_id: Some(tx_id),
            ..Self::status(Status::Committed)
        }
    }

    pub fn aborted(tx_id: TxId) -> Self {
        Self {
            tx_id: Some(tx_id),
            ..Self::status(Status::Aborted)
        }
    }

    pub fn account(
        account: AccountId,
        balance: Amount,
        owner: Option<ClientId>,
        opened_on: Option<NaiveDate>,
    ) -> Self {
        Self {
            account: Some(account),
            balance: Some(balance),
            id_cliente: owner,
            fecha_apertura: opened_on,
            ..Self::status(Status::Ok)
        }
    }

    pub fn sum(sum: Amount) -> Self {
        Self {
            sum: Some(sum),
            ..Self::status(Status::Ok)
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>, tx_id: Option<TxId>) -> Self {
        Self {
            tx_id,
            code: Some(kind),
            error: Some(message.into()),
            ..Self::status(Status::Error)
        }
    }

    /// Error kind of an `ERROR` reply; replies from peers that omit `code`
    /// are treated as protocol errors.
    pub fn error_kind(&self) -> ErrorKind {
        self.code.unwrap_or(ErrorKind::Protocol)
    }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unspecified error")
    }

    /// True for the error a worker returns on COMMIT of an unknown `tx_id`.
    pub fn is_commit_without_prepare(&self) -> bool {
        self.status == Status::Error && self.error_message().starts_with("COMMIT_WITHOUT_PREPARE")
    }
}

// Client -> coordinator

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    #[serde(rename = "CONSULTAR_CUENTA")]
    QueryAccount { account: AccountId },
    #[serde(rename = "TRANSFERIR_CUENTA")]
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
    #[serde(rename = "CREAR_CUENTA")]
    CreateAccount {
        account: AccountId,
        initial: Amount,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id_cliente: Option<ClientId>,
    },
    #[serde(rename = "ELIMINAR_CUENTA")]
    DeleteAccount { account: AccountId },
    #[serde(rename = "ARQUEO")]
    Reconcile,
    #[serde(rename = "CONSULTAR_TRANSACCIONES")]
    History {
        account: AccountId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
}

impl Message for ClientRequest {
    const TYPES: &'static [&'static str] = &[
        "CONSULTAR_CUENTA",
        "TRANSFERIR_CUENTA",
        "CREAR_CUENTA",
        "ELIMINAR_CUENTA",
        "ARQUEO",
        "CONSULTAR_TRANSACCIONES",
    ];
}

impl ClientRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ClientRequest::QueryAccount { .. } => "query",
            ClientRequest::Transfer { .. } => "transfer",
            ClientRequest::CreateAccount { .. } => "create",
            ClientRequest::DeleteAccount { .. } => "delete",
            ClientRequest::Reconcile => "reconcile",
            ClientRequest::History { .. } => "history",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientReply {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_cliente: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fecha_apertura: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mensaje: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_balance: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<HistoryEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One row of a CONSULTAR_TRANSACCIONES reply, named the way front ends
/// of the central server read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(alias = "id")]
    pub id_transaccion: TxId,
    pub cuenta: AccountId,
    pub tipo: EffectKind,
    pub monto: Amount,
    pub fecha: DateTime<Utc>,
}

impl From<LedgerRecord> for HistoryEntry {
    fn from(record: LedgerRecord) -> Self {
        Self {
            id_transaccion: record.tx_id,
            cuenta: record.account,
            tipo: record.kind,
            monto: record.amount,
            fecha: record.timestamp,
        }
    }
}

impl ClientReply {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            account: None,
            balance: None,
            id_cliente: None,
            fecha_apertura: None,
            mensaje: None,
            total_balance: None,
            data: None,
            code: None,
            error: None,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            code: Some(kind),
            error: Some(message.into()),
            ..Self::ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_client_transfer() {
        let request: ClientRequest =
            decode(r#"{"type":"TRANSFERIR_CUENTA","from":1000,"to":1001,"amount":50}"#).unwrap();
        assert_eq!(
            request,
            ClientRequest::Transfer {
                from: 1000,
                to: 1001,
                amount: Amount::from_scaled(5_000),
            }
        );
    }

    #[test]
    fn decodes_unit_request() {
        let request: ClientRequest = decode(r#"{"type":"ARQUEO"}"#).unwrap();
        assert_eq!(request, ClientRequest::Reconcile);
    }

    #[test]
    fn malformed_json_is_protocol_error() {
        let err = decode::<ClientRequest>("{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn missing_or_unknown_type_is_protocol_error() {
        let err = decode::<ClientRequest>(r#"{"account":1}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingType));

        let err = decode::<ClientRequest>(r#"{"type":"ROBAR_BANCO"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(ref t) if t == "ROBAR_BANCO"));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn bad_fields_are_validation_errors() {
        let err = decode::<ClientRequest>(r#"{"type":"CONSULTAR_CUENTA","account":"abc"}"#)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = decode::<ClientRequest>(r#"{"type":"TRANSFERIR_CUENTA","from":1}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn worker_prepare_aliases() {
        let request: WorkerRequest =
            decode(r#"{"type":"TRANSFER_PREPARE","tx_id":"t1","from":1,"to":2,"amount":"3.50"}"#)
                .unwrap();
        assert_eq!(
            request,
            WorkerRequest::PrepareTransfer {
                tx_id: TxId::from("t1"),
                from: 1,
                to: 2,
                amount: Amount::from_scaled(350),
            }
        );
    }

    #[test]
    fn prepare_message_uses_canonical_tag() {
        let op = Operation::Delete { account: 9 };
        let line = encode(&WorkerRequest::prepare(&TxId::from("t9"), &op));
        assert_eq!(line, r#"{"type":"PREPARE_DELETE","tx_id":"t9","account":9}"#);
    }

    #[test]
    fn reply_omits_absent_fields() {
        let line = encode(&WorkerReply::ready(TxId::from("t1")));
        assert_eq!(line, r#"{"status":"READY","tx_id":"t1"}"#);

        let line = encode(&ClientReply::error(ErrorKind::NotFound, "ACCOUNT_NOT_FOUND"));
        assert_eq!(
            line,
            r#"{"status":"ERROR","code":"NOT_FOUND","error":"ACCOUNT_NOT_FOUND"}"#
        );
    }

    #[test]
    fn history_rows_use_front_end_field_names() {
        let record = LedgerRecord {
            tx_id: TxId::from("tx_1"),
            account: 1000,
            kind: EffectKind::Debit,
            amount: Amount::from_scaled(5_000),
            timestamp: "2024-06-01T10:00:00Z".parse().unwrap(),
        };
        let reply = ClientReply {
            data: Some(vec![HistoryEntry::from(record)]),
            ..ClientReply::ok()
        };
        assert_eq!(
            encode(&reply),
            r#"{"status":"OK","data":[{"id_transaccion":"tx_1","cuenta":1000,"tipo":"debit","monto":50.0,"fecha":"2024-06-01T10:00:00Z"}]}"#
        );

        let row: HistoryEntry = serde_json::from_str(
            r#"{"id":"tx_2","cuenta":7,"tipo":"credit","monto":1.5,"fecha":"2024-06-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(row.id_transaccion, TxId::from("tx_2"));
    }

    #[test]
    fn error_line_matches_reply_shape() {
        let reply: WorkerReply =
            serde_json::from_str(&error_line(ErrorKind::Protocol, "bad bytes")).unwrap();
        assert_eq!(reply.status, Status::Error);
        assert_eq!(reply.error_kind(), ErrorKind::Protocol);
        assert_eq!(reply.error_message(), "bad bytes");
    }

    #[test]
    fn commit_without_prepare_is_recognised() {
        let reply = WorkerReply::error(
            ErrorKind::Protocol,
            "COMMIT_WITHOUT_PREPARE: transaction t1 was never prepared",
            Some(TxId::from("t1")),
        );
        assert!(reply.is_commit_without_prepare());
        assert!(!WorkerReply::committed(TxId::from("t1")).is_commit_without_prepare());
    }

    #[test]
    fn reply_without_code_counts_as_protocol_error() {
        let reply: WorkerReply = serde_json::from_str(r#"{"status":"ERROR"}"#).unwrap();
        assert_eq!(reply.error_kind(), ErrorKind::Protocol);
        assert_eq!(reply.error_message(), "unspecified error");
    }
}
