use std::fmt;

use bytes::BytesMut;

use crate::{
    map,
    packstream::{self, Map, Structure, Value},
};

use super::Signature;

/// Server replies. Every request gets exactly one summary response
/// (SUCCESS, IGNORED or FAILURE), preceded by RECORDs when streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success(Map),
    Record(Vec<Value>),
    Ignored,
    Failure { code: FailureCode, message: String },
}

/// Classified reasons for a FAILURE. Drivers decide whether to retry or
/// surface the error from the dotted code string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    InvalidRequest,
    UnsupportedMessage,
    Unauthorized,
    Forbidden,
    StatementFailed,
    TransactionNotFound,
    TransactionActive,
    BeginFailed,
    CommitFailed,
    RollbackFailed,
    /// The executor returned values that cannot go on the wire.
    ResultUnencodable,
}

impl FailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCode::InvalidRequest => "Neo.ClientError.Request.Invalid",
            FailureCode::UnsupportedMessage => "Neo.ClientError.Request.Unsupported",
            FailureCode::Unauthorized => "Neo.ClientError.Security.Unauthorized",
            FailureCode::Forbidden => "Neo.ClientError.Security.Forbidden",
            FailureCode::StatementFailed => "Neo.ClientError.Statement.SyntaxError",
            FailureCode::TransactionNotFound => "Neo.ClientError.Transaction.TransactionNotFound",
            FailureCode::TransactionActive => {
                "Neo.ClientError.Transaction.ForbiddenDueToTransactionType"
            }
            FailureCode::BeginFailed => "Neo.TransactionError.Begin",
            FailureCode::CommitFailed => "Neo.TransactionError.Commit",
            FailureCode::RollbackFailed => "Neo.TransactionError.Rollback",
            FailureCode::ResultUnencodable => "Neo.DatabaseError.Statement.ExecutionFailed",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        [
            FailureCode::InvalidRequest,
            FailureCode::UnsupportedMessage,
            FailureCode::Unauthorized,
            FailureCode::Forbidden,
            FailureCode::StatementFailed,
            FailureCode::TransactionNotFound,
            FailureCode::TransactionActive,
            FailureCode::BeginFailed,
            FailureCode::CommitFailed,
            FailureCode::RollbackFailed,
            FailureCode::ResultUnencodable,
        ]
        .into_iter()
        .find(|c| c.as_str() == code)
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Response {
    pub fn success() -> Self {
        Response::Success(Map::new())
    }

    pub fn failure(code: FailureCode, message: impl Into<String>) -> Self {
        Response::Failure {
            code,
            message: message.into(),
        }
    }

    pub fn signature(&self) -> Signature {
        match self {
            Response::Success(_) => Signature::SUCCESS,
            Response::Record(_) => Signature::RECORD,
            Response::Ignored => Signature::IGNORED,
            Response::Failure { .. } => Signature::FAILURE,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Response::Failure { .. })
    }

    /// Appends the PackStream encoding of this response to `buf`.
    pub fn encode_into(self, buf: &mut BytesMut) {
        packstream::encode_into(&Value::Structure(self.into()), buf);
    }

    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(128);
        self.encode_into(&mut buf);
        buf.to_vec()
    }
}

impl From<Response> for Structure {
    fn from(value: Response) -> Self {
        let signature = value.signature().into();
        let fields = match value {
            Response::Success(meta) => vec![Value::Map(meta)],
            Response::Record(values) => vec![Value::List(values)],
            Response::Ignored => vec![],
            Response::Failure { code, message } => vec![Value::Map(map! {
                "code" => code.as_str(),
                "message" => message,
            })],
        };
        Structure { signature, fields }
    }
}

/// Reads a response back from its structure; what a client does.
impl TryFrom<Structure> for Response {
    type Error = String;

    fn try_from(value: Structure) -> Result<Self, Self::Error> {
        let signature = Signature::from(value.signature);
        let mut fields = value.fields.into_iter();

        match signature {
            Signature::SUCCESS => match fields.next() {
                Some(Value::Map(meta)) => Ok(Response::Success(meta)),
                None => Ok(Response::success()),
                Some(other) => Err(format!("SUCCESS metadata is a {}", other.kind())),
            },
            Signature::RECORD => match fields.next() {
                Some(Value::List(values)) => Ok(Response::Record(values)),
                other => Err(format!("RECORD fields are {other:?}")),
            },
            Signature::IGNORED => Ok(Response::Ignored),
            Signature::FAILURE => {
                let meta = fields.next().and_then(Value::into_map).unwrap_or_default();
                let code = meta.get("code").and_then(Value::as_str).unwrap_or_default();
                let message = meta.get("message").and_then(Value::as_str).unwrap_or_default();
                let code = FailureCode::from_code(code)
                    .ok_or_else(|| format!("unknown failure code {code:?}"))?;
                Ok(Response::failure(code, message))
            }
            other => Err(format!("{other} is not a response")),
        }
    }
}
