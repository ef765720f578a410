//! Wire-level constants shared by the server, the client, and the tests.
//!
//! The protocol is one plain-text request per TCP connection:
//! `name;class;score`, answered by [`ACK`], an `ERR:` line, or silence.

use std::time::Duration;

/// Port the service listens on when no `--listen` address is given.
pub const DEFAULT_PORT: u16 = 5050;

/// Largest request accepted in the single read a connection gets.
pub const MAX_MESSAGE_BYTES: usize = 4096;

/// Separator between the three request fields. There is no escaping.
pub const FIELD_DELIMITER: char = ';';

/// Positive acknowledgement, sent once the record is durably stored.
pub const ACK: &[u8] = b"OK";

/// Reply for a request that does not split into `name;class;score`.
pub const ERR_MALFORMED: &str = "ERR: formato inválido. Use nome;turma;nota";

/// Reply for a request whose score field is not a number.
pub const ERR_INVALID_SCORE: &str = "ERR: nota inválida";

/// How long a connection may stay silent before it is closed without a reply.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect and reply timeout used by the submission client.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(3);

/// Formats a submission the way the server expects to receive it.
pub fn format_request(name: &str, class_label: &str, score: &str) -> String {
    format!("{name}{FIELD_DELIMITER}{class_label}{FIELD_DELIMITER}{score}")
}
