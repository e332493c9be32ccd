use thiserror::Error;

use crate::{
    auth::Permission,
    packstream::{self, Map, Structure, Value},
};

use super::{Signature, TransportError};

/// A well-formed message whose fields do not have the shape its signature
/// calls for. The connection stays usable; the client gets a FAILURE.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("{message} is missing its {field} field")]
    MissingField {
        message: &'static str,
        field: &'static str,
    },

    #[error("{message} {field} must be a {expected}, got {found}")]
    WrongType {
        message: &'static str,
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

const WRITE_KEYWORDS: [&str; 5] = ["CREATE", "DELETE", "SET ", "MERGE", "REMOVE "];
const SCHEMA_KEYWORDS: [&str; 2] = ["INDEX", "CONSTRAINT"];

/// What a query may touch, judged by keyword scanning.
///
/// This is a lexical heuristic over the query text, not a parse: a keyword
/// inside a string literal or an identifier counts too. It errs towards
/// demanding more permission, and the executor remains responsible for
/// enforcing its own access rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryClass {
    pub write: bool,
    pub schema: bool,
}

impl QueryClass {
    pub fn of(query: &str) -> Self {
        let upper = query.to_uppercase();
        Self {
            write: WRITE_KEYWORDS.iter().any(|k| upper.contains(k)),
            schema: SCHEMA_KEYWORDS.iter().any(|k| upper.contains(k)),
        }
    }

    /// Permissions to check, most specific first. Every query reads.
    pub fn required_permissions(self) -> impl Iterator<Item = Permission> {
        [
            self.schema.then_some(Permission::Schema),
            self.write.then_some(Permission::Write),
            Some(Permission::Read),
        ]
        .into_iter()
        .flatten()
    }

    /// Query type reported to drivers: `w` for writes, `r` otherwise.
    pub fn type_code(self) -> &'static str {
        if self.write { "w" } else { "r" }
    }
}

/// A client message, decoded and checked.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Hello {
        extra: Map,
    },
    Goodbye,
    Reset,
    Run {
        query: String,
        parameters: Map,
        extra: Map,
    },
    Begin {
        extra: Map,
    },
    Commit,
    Rollback,
    /// `n: None` discards everything that is left.
    Discard {
        n: Option<usize>,
    },
    /// `n: None` streams everything that is left.
    Pull {
        n: Option<usize>,
    },
    Route {
        routing: Map,
    },
    Unknown(Signature),
}

impl Request {
    pub fn signature(&self) -> Signature {
        match self {
            Request::Hello { .. } => Signature::HELLO,
            Request::Goodbye => Signature::GOODBYE,
            Request::Reset => Signature::RESET,
            Request::Run { .. } => Signature::RUN,
            Request::Begin { .. } => Signature::BEGIN,
            Request::Commit => Signature::COMMIT,
            Request::Rollback => Signature::ROLLBACK,
            Request::Discard { .. } => Signature::DISCARD,
            Request::Pull { .. } => Signature::PULL,
            Request::Route { .. } => Signature::ROUTE,
            Request::Unknown(sig) => *sig,
        }
    }

    /// Reads a string entry from the HELLO auth fields, empty when absent.
    pub fn hello_field<'a>(extra: &'a Map, key: &str) -> &'a str {
        extra.get(key).and_then(Value::as_str).unwrap_or_default()
    }
}

/// Decodes a complete message body into its structure. Anything wrong at
/// this level leaves the byte stream untrustworthy, so it is a transport
/// fault rather than a FAILURE response.
pub(crate) fn decode_message(bytes: &[u8]) -> Result<Structure, TransportError> {
    if bytes.len() < 2 {
        return Err(TransportError::MessageTooShort(bytes.len()));
    }
    if bytes[0] & 0xF0 != 0xB0 {
        return Err(TransportError::NotAStructure(bytes[0]));
    }

    match packstream::decode_exact(bytes)? {
        Value::Structure(s) => Ok(s),
        _ => Err(TransportError::NotAStructure(bytes[0])),
    }
}

impl TryFrom<Structure> for Request {
    type Error = RequestError;

    fn try_from(message: Structure) -> Result<Self, Self::Error> {
        let signature = Signature::from(message.signature);
        let name = signature.name();
        let mut fields = message.fields.into_iter();

        let request = match signature {
            Signature::HELLO => Request::Hello {
                extra: optional_map(fields.next(), name, "extra")?,
            },
            Signature::GOODBYE => Request::Goodbye,
            Signature::RESET => Request::Reset,
            Signature::RUN => {
                let query = match fields.next() {
                    Some(Value::String(q)) => q,
                    Some(other) => {
                        return Err(RequestError::WrongType {
                            message: name,
                            field: "query",
                            expected: "string",
                            found: other.kind(),
                        });
                    }
                    None => {
                        return Err(RequestError::MissingField {
                            message: name,
                            field: "query",
                        });
                    }
                };
                Request::Run {
                    query,
                    parameters: optional_map(fields.next(), name, "parameters")?,
                    extra: optional_map(fields.next(), name, "extra")?,
                }
            }
            Signature::BEGIN => Request::Begin {
                extra: optional_map(fields.next(), name, "extra")?,
            },
            Signature::COMMIT => Request::Commit,
            Signature::ROLLBACK => Request::Rollback,
            Signature::DISCARD => Request::Discard {
                n: count(&optional_map(fields.next(), name, "extra")?, name)?,
            },
            Signature::PULL => Request::Pull {
                n: count(&optional_map(fields.next(), name, "extra")?, name)?,
            },
            Signature::ROUTE => Request::Route {
                routing: optional_map(fields.next(), name, "routing")?,
            },
            other => Request::Unknown(other),
        };

        Ok(request)
    }
}

fn optional_map(
    value: Option<Value>,
    message: &'static str,
    field: &'static str,
) -> Result<Map, RequestError> {
    match value {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Map(m)) => Ok(m),
        Some(other) => Err(RequestError::WrongType {
            message,
            field,
            expected: "map",
            found: other.kind(),
        }),
    }
}

/// Reads the `n` option of PULL and DISCARD. Absent or negative means all.
fn count(extra: &Map, message: &'static str) -> Result<Option<usize>, RequestError> {
    match extra.get("n") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Integer(n)) => Ok(usize::try_from(*n).ok()),
        Some(other) => Err(RequestError::WrongType {
            message,
            field: "n",
            expected: "integer",
            found: other.kind(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map;

    fn parse(bytes: &[u8]) -> Result<Request, RequestError> {
        decode_message(bytes).unwrap().try_into()
    }

    #[test]
    fn classifies_queries() {
        let read = QueryClass::of("MATCH (n) RETURN n");
        assert_eq!(read, QueryClass { write: false, schema: false });
        assert_eq!(read.type_code(), "r");
        assert_eq!(read.required_permissions().collect::<Vec<_>>(), vec![Permission::Read]);

        let write = QueryClass::of("match (n) set n.x = 1");
        assert!(write.write);
        assert_eq!(write.type_code(), "w");
        assert_eq!(
            write.required_permissions().collect::<Vec<_>>(),
            vec![Permission::Write, Permission::Read]
        );

        let schema = QueryClass::of("CREATE INDEX FOR (n:Person) ON (n.name)");
        assert!(schema.schema && schema.write);
        assert_eq!(
            schema.required_permissions().collect::<Vec<_>>(),
            vec![Permission::Schema, Permission::Write, Permission::Read]
        );
    }

    #[test]
    fn classification_is_lexical() {
        // The keyword sits inside a string literal, but still counts.
        assert!(QueryClass::of("RETURN 'please CREATE me'").write);
        assert!(QueryClass::of("MATCH (n) DETACH DELETE n").write);
        assert!(!QueryClass::of("MATCH (n) RETURN n.offset").write);
    }

    #[test]
    fn parses_run() {
        // RUN "RETURN 1" {} {}
        let mut bytes = vec![0xB3, 0x10, 0x88];
        bytes.extend_from_slice(b"RETURN 1");
        bytes.extend_from_slice(&[0xA0, 0xA0]);

        assert_eq!(
            parse(&bytes).unwrap(),
            Request::Run {
                query: "RETURN 1".into(),
                parameters: Map::new(),
                extra: Map::new(),
            }
        );
    }

    #[test]
    fn parses_run_with_parameters() {
        // RUN "q" {"x": 1}
        let bytes = [0xB2, 0x10, 0x81, b'q', 0xA1, 0x81, b'x', 0x01];
        match parse(&bytes).unwrap() {
            Request::Run { parameters, .. } => assert_eq!(parameters, map! { "x" => 1 }),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn run_without_query_is_invalid() {
        assert_eq!(
            parse(&[0xB0, 0x10]),
            Err(RequestError::MissingField {
                message: "RUN",
                field: "query"
            })
        );
        assert!(matches!(
            parse(&[0xB1, 0x10, 0x01]),
            Err(RequestError::WrongType { field: "query", .. })
        ));
    }

    #[test]
    fn parses_hello_fields() {
        let mut bytes = vec![0xB1, 0x01, 0xA2];
        bytes.extend_from_slice(&[0x86]);
        bytes.extend_from_slice(b"scheme");
        bytes.extend_from_slice(&[0x85]);
        bytes.extend_from_slice(b"basic");
        bytes.extend_from_slice(&[0x89]);
        bytes.extend_from_slice(b"principal");
        bytes.extend_from_slice(&[0x85]);
        bytes.extend_from_slice(b"admin");

        let Request::Hello { extra } = parse(&bytes).unwrap() else {
            panic!("not a HELLO");
        };
        assert_eq!(Request::hello_field(&extra, "scheme"), "basic");
        assert_eq!(Request::hello_field(&extra, "principal"), "admin");
        assert_eq!(Request::hello_field(&extra, "credentials"), "");
    }

    #[test]
    fn pull_counts() {
        assert_eq!(parse(&[0xB1, 0x3F, 0xA0]).unwrap(), Request::Pull { n: None });
        assert_eq!(
            parse(&[0xB1, 0x3F, 0xA1, 0x81, b'n', 0x05]).unwrap(),
            Request::Pull { n: Some(5) }
        );
        assert_eq!(
            parse(&[0xB1, 0x3F, 0xA1, 0x81, b'n', 0xFF]).unwrap(),
            Request::Pull { n: None }
        );
        assert_eq!(parse(&[0xB0, 0x3F]).unwrap(), Request::Pull { n: None });
        assert_eq!(
            parse(&[0xB1, 0x2F, 0xA1, 0x81, b'n', 0x00]).unwrap(),
            Request::Discard { n: Some(0) }
        );
    }

    #[test]
    fn unknown_signature() {
        assert_eq!(
            parse(&[0xB0, 0x55]).unwrap(),
            Request::Unknown(Signature::from(0x55))
        );
    }

    #[test]
    fn simple_messages() {
        assert_eq!(parse(&[0xB0, 0x02]).unwrap(), Request::Goodbye);
        assert_eq!(parse(&[0xB0, 0x0F]).unwrap(), Request::Reset);
        assert_eq!(parse(&[0xB0, 0x12]).unwrap(), Request::Commit);
        assert_eq!(parse(&[0xB0, 0x13]).unwrap(), Request::Rollback);
        assert_eq!(
            parse(&[0xB1, 0x11, 0xA0]).unwrap(),
            Request::Begin { extra: Map::new() }
        );
    }

    #[test]
    fn short_or_unstructured_messages_are_transport_faults() {
        assert!(matches!(
            decode_message(&[0xB0]),
            Err(TransportError::MessageTooShort(1))
        ));
        assert!(matches!(
            decode_message(&[0x01, 0x02]),
            Err(TransportError::NotAStructure(0x01))
        ));
        assert!(matches!(
            decode_message(&[0xB1, 0x10, 0xC4]),
            Err(TransportError::Decode(_))
        ));
    }
}
