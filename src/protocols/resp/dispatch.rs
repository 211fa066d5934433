//! Maps a parsed command onto the store.

use super::parser::Command;
use super::response::Response;
use crate::storage::{Store, Value};
use tracing::trace;

/// Execute `command` against `store` and build the reply.
///
/// Arity problems, store failures and unknown verbs all become
/// `Response::Error`; nothing here can fail the connection.
pub fn dispatch(command: &Command, store: &dyn Store) -> Response {
    let args = command.args();
    trace!(
        verb = %String::from_utf8_lossy(command.verb()),
        arity = command.arity(),
        "Dispatching"
    );

    match command.verb() {
        b"set" => {
            if args.len() < 3 {
                return Response::error("input < 3");
            }
            if args.len() > 3 {
                return Response::error("input > 3");
            }
            let key = String::from_utf8_lossy(&args[1]);
            match store.set(&key, Value::from(&args[2][..])) {
                Ok(()) => Response::Status,
                Err(e) => Response::error(e.to_string()),
            }
        }

        b"get" => {
            if args.len() < 2 {
                return Response::error("input < 2");
            }
            let key = String::from_utf8_lossy(&args[1]);
            match store.get(&key) {
                Ok(Value::Str(s)) => Response::data(s),
                Ok(_) => Response::error("not string for get"),
                Err(e) => Response::error(e.to_string()),
            }
        }

        b"cmd" => Response::Config,

        _ => Response::error("not supported cmd"),
    }
}
